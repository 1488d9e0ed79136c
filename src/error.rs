use crate::exchange::transport::ExitStatus;

/// Error type surfaced for a failed or refused exchange.
///
/// Malformed or unrecognized frames never end up here: adapters log and skip
/// them and the exchange continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("Transport error: {0}")]
    Transport(TransportFailure),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Exchange cancelled")]
    Cancelled,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl StreamError {
    /// Whether a caller-side retry of the same request is reasonable.
    ///
    /// The engine never retries on its own; this only classifies the cause.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Transport(failure) => matches!(
                failure,
                TransportFailure::ConnectionRefused(_) | TransportFailure::Timeout(_)
            ),
            StreamError::Backend(_)
            | StreamError::Cancelled
            | StreamError::InvalidRequest(_) => false,
        }
    }
}

impl From<TransportFailure> for StreamError {
    fn from(failure: TransportFailure) -> Self {
        StreamError::Transport(failure)
    }
}

/// Cause of a transport-level failure, derived from the transport exit status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportFailure {
    #[error("could not resolve host: {0}")]
    HostResolution(String),
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport terminated")]
    Terminated,
    #[error("transport exited with status {code}: {message}")]
    Exited { code: i32, message: String },
}

impl TransportFailure {
    /// Map a non-zero exit status (curl conventions) to a failure cause.
    ///
    /// `last_stderr` is the most recent diagnostic line the transport
    /// reported, used as the human-readable detail.
    #[must_use]
    pub fn from_exit(status: ExitStatus, last_stderr: Option<&str>) -> Self {
        let message = last_stderr
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .unwrap_or("no diagnostic output")
            .to_string();
        match status {
            ExitStatus::COULDNT_RESOLVE_HOST => TransportFailure::HostResolution(message),
            ExitStatus::COULDNT_CONNECT => TransportFailure::ConnectionRefused(message),
            ExitStatus::OPERATION_TIMEDOUT => TransportFailure::Timeout(message),
            ExitStatus::TERMINATED | ExitStatus::KILLED => TransportFailure::Terminated,
            other => TransportFailure::Exited {
                code: other.code(),
                message,
            },
        }
    }
}
