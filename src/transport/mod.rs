mod http_transport;
mod replay;

pub use http_transport::{ClientCache, HttpTransport};
pub use replay::{ReplayFeed, ReplayTransport};
