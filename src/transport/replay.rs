use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::exchange::transport::{ExitStatus, Transport, TransportEvent};
use crate::protocol::RequestSpec;

#[derive(Debug, Default)]
struct ReplayLog {
    requests: Vec<RequestSpec>,
    terminations: Vec<bool>,
}

/// Transport whose events are supplied by a [`ReplayFeed`] instead of a network.
///
/// Used to replay recorded response bodies and to script lifecycle tests.
#[derive(Debug)]
pub struct ReplayTransport {
    tx: mpsc::UnboundedSender<TransportEvent>,
    rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    log: Arc<Mutex<ReplayLog>>,
    ignore_graceful: bool,
}

/// Producer side of a [`ReplayTransport`].
#[derive(Debug, Clone)]
pub struct ReplayFeed {
    tx: mpsc::UnboundedSender<TransportEvent>,
    log: Arc<Mutex<ReplayLog>>,
}

impl ReplayTransport {
    #[must_use]
    pub fn new() -> (Self, ReplayFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(ReplayLog::default()));
        let feed = ReplayFeed {
            tx: tx.clone(),
            log: Arc::clone(&log),
        };
        (
            Self {
                tx,
                rx: Some(rx),
                log,
                ignore_graceful: false,
            },
            feed,
        )
    }

    /// A transport that answers with `status`, then `body` in the given
    /// fragments, then a successful exit.
    #[must_use]
    pub fn scripted<I, B>(status: u16, fragments: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let (transport, feed) = Self::new();
        feed.dispatched(status);
        for fragment in fragments {
            feed.bytes(fragment);
        }
        feed.exit(ExitStatus::SUCCESS);
        transport
    }

    /// Do not react to graceful terminate requests, forcing the lifecycle
    /// to escalate.
    #[must_use]
    pub fn ignore_graceful_terminate(mut self) -> Self {
        self.ignore_graceful = true;
        self
    }
}

impl Transport for ReplayTransport {
    fn dispatch(
        &mut self,
        spec: &RequestSpec,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, StreamError> {
        let rx = self.rx.take().ok_or_else(|| {
            StreamError::InvalidRequest("replay transport already dispatched a request".into())
        })?;
        self.log.lock().requests.push(spec.clone());
        Ok(rx)
    }

    fn terminate(&mut self, graceful: bool) {
        self.log.lock().terminations.push(graceful);
        if graceful && !self.ignore_graceful {
            let _ = self.tx.send(TransportEvent::Exited(ExitStatus::TERMINATED));
        }
    }
}

impl ReplayFeed {
    pub fn dispatched(&self, status: u16) {
        self.send(TransportEvent::Dispatched { status });
    }

    pub fn bytes(&self, bytes: impl Into<Bytes>) {
        self.send(TransportEvent::Bytes(bytes.into()));
    }

    pub fn stderr(&self, line: impl Into<String>) {
        self.send(TransportEvent::Stderr(line.into()));
    }

    pub fn exit(&self, status: ExitStatus) {
        self.send(TransportEvent::Exited(status));
    }

    /// Requests the transport was asked to dispatch.
    #[must_use]
    pub fn requests(&self) -> Vec<RequestSpec> {
        self.log.lock().requests.clone()
    }

    /// Terminate calls in order; `true` for graceful.
    #[must_use]
    pub fn terminations(&self) -> Vec<bool> {
        self.log.lock().terminations.clone()
    }

    fn send(&self, event: TransportEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("replay transport receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_adapter, Message, ProviderKind, RequestParams};

    fn spec() -> RequestSpec {
        build_adapter(ProviderKind::OpenAi, "https://example.test/v1", None)
            .build_request(&[Message::user("hi")], None, &RequestParams::new("m", "k"))
            .expect("spec")
    }

    #[tokio::test]
    async fn test_scripted_events_in_order() {
        let mut transport = ReplayTransport::scripted(200, ["a", "b"]);
        let mut rx = transport.dispatch(&spec()).expect("dispatch");
        assert_eq!(rx.recv().await, Some(TransportEvent::Dispatched { status: 200 }));
        assert_eq!(rx.recv().await, Some(TransportEvent::Bytes(Bytes::from("a"))));
        assert_eq!(rx.recv().await, Some(TransportEvent::Bytes(Bytes::from("b"))));
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Exited(ExitStatus::SUCCESS))
        );
        assert!(transport.dispatch(&spec()).is_err());
    }

    #[tokio::test]
    async fn test_graceful_terminate_reports_exit() {
        let (mut transport, feed) = ReplayTransport::new();
        let mut rx = transport.dispatch(&spec()).expect("dispatch");
        transport.terminate(true);
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Exited(ExitStatus::TERMINATED))
        );
        assert_eq!(feed.terminations(), vec![true]);
        assert_eq!(feed.requests().len(), 1);
    }
}
