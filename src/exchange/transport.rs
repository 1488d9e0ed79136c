use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::protocol::RequestSpec;

/// Exit status reported by a transport, using curl's exit-code conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitStatus(i32);

impl ExitStatus {
    pub const SUCCESS: ExitStatus = ExitStatus(0);
    pub const COULDNT_RESOLVE_HOST: ExitStatus = ExitStatus(6);
    pub const COULDNT_CONNECT: ExitStatus = ExitStatus(7);
    pub const OPERATION_TIMEDOUT: ExitStatus = ExitStatus(28);
    /// Generic receive failure mid-body.
    pub const RECV_ERROR: ExitStatus = ExitStatus(56);
    /// 128 + SIGKILL.
    pub const KILLED: ExitStatus = ExitStatus(137);
    /// 128 + SIGTERM.
    pub const TERMINATED: ExitStatus = ExitStatus(143);

    #[must_use]
    pub const fn new(code: i32) -> Self {
        ExitStatus(code)
    }

    #[must_use]
    pub const fn code(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn success(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit status {}", self.0)
    }
}

/// Something the transport observed while executing a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Request accepted; response headers received with this status.
    Dispatched { status: u16 },
    /// A body fragment, boundaries arbitrary.
    Bytes(Bytes),
    /// One diagnostic line.
    Stderr(String),
    /// The transport finished. Always the last event.
    Exited(ExitStatus),
}

/// Executes one request and reports what happened as [`TransportEvent`]s.
///
/// The exchange lifecycle drives a transport but never constructs one.
pub trait Transport: Send + 'static {
    /// Start executing `spec`. Events arrive on the returned receiver until
    /// `Exited`, after which the sender is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot be started at all.
    fn dispatch(
        &mut self,
        spec: &RequestSpec,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, StreamError>;

    /// Ask the transport to stop. A graceful request lets it wind down and
    /// report `Exited`; a forced one stops it immediately.
    fn terminate(&mut self, graceful: bool);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn dispatch(
        &mut self,
        spec: &RequestSpec,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, StreamError> {
        (**self).dispatch(spec)
    }

    fn terminate(&mut self, graceful: bool) {
        (**self).terminate(graceful);
    }
}
