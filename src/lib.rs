pub mod config;
pub mod error;
pub mod exchange;
pub mod observability;
pub mod protocol;
pub mod stream;
pub mod transport;
pub mod usage;

mod util;
