//! One request/response exchange, from dispatch to its single terminal outcome.
//!
//! A [`RequestLifecycle`] owns the decoder state, the per-request usage and
//! the state machine for exactly one exchange. It runs on one task; transport
//! arrivals, cancellation and delivery to the [`ExchangeObserver`] are all
//! serialized there, so none of that state needs locking.
pub mod transport;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{StreamError, TransportFailure};
use crate::observability::log_exchange_usage;
use crate::protocol::error_shapes::parse_error_text;
use crate::protocol::{NormalizedEvent, ProviderAdapter, ProviderKind, RequestSpec};
use crate::stream::StreamPipeline;
use crate::usage::{SessionUsage, UsageAggregator, UsageCounters};
use crate::util::{next_exchange_id, preview};

pub use transport::{ExitStatus, Transport, TransportEvent};

/// Bytes of a non-2xx body kept for the failure message.
const ERROR_BODY_LIMIT: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Sending,
    Streaming,
    Completing,
    Done,
    Cancelled,
    Failed,
}

impl LifecycleState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LifecycleState::Done | LifecycleState::Cancelled | LifecycleState::Failed
        )
    }
}

/// Terminal result of an exchange; delivered exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Done { usage: UsageCounters },
    Cancelled,
    Failed(StreamError),
}

impl ExchangeOutcome {
    /// # Errors
    ///
    /// `Cancelled` maps to [`StreamError::Cancelled`], `Failed` to its cause.
    pub fn into_result(self) -> Result<UsageCounters, StreamError> {
        match self {
            ExchangeOutcome::Done { usage } => Ok(usage),
            ExchangeOutcome::Cancelled => Err(StreamError::Cancelled),
            ExchangeOutcome::Failed(err) => Err(err),
        }
    }

    fn state(&self) -> LifecycleState {
        match self {
            ExchangeOutcome::Done { .. } => LifecycleState::Done,
            ExchangeOutcome::Cancelled => LifecycleState::Cancelled,
            ExchangeOutcome::Failed(_) => LifecycleState::Failed,
        }
    }
}

/// Receives everything an exchange produces, in order, on the exchange task.
pub trait ExchangeObserver: Send + 'static {
    fn on_event(&mut self, event: &NormalizedEvent);

    /// Diagnostic output from the transport; ignored by default.
    fn on_stderr(&mut self, _line: &str) {}

    /// Called exactly once, last.
    fn on_outcome(&mut self, outcome: &ExchangeOutcome);
}

/// Message forwarded by a [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeUpdate {
    Event(NormalizedEvent),
    Stderr(String),
    Finished(ExchangeOutcome),
}

/// Observer that forwards every callback to an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ExchangeUpdate>,
}

impl ChannelObserver {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExchangeUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, update: ExchangeUpdate) {
        if self.tx.send(update).is_err() {
            debug!("exchange update receiver dropped");
        }
    }
}

impl ExchangeObserver for ChannelObserver {
    fn on_event(&mut self, event: &NormalizedEvent) {
        self.send(ExchangeUpdate::Event(event.clone()));
    }

    fn on_stderr(&mut self, line: &str) {
        self.send(ExchangeUpdate::Stderr(line.to_string()));
    }

    fn on_outcome(&mut self, outcome: &ExchangeOutcome) {
        self.send(ExchangeUpdate::Finished(outcome.clone()));
    }
}

/// Opaque reference to a running exchange, used to cancel it.
#[derive(Debug, Clone)]
pub struct ExchangeHandle {
    id: u64,
    token: CancellationToken,
}

impl ExchangeHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Request cancellation. Idempotent; a no-op once the exchange ended.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// How long a cooperative terminate may take before it is forced.
    pub cancel_grace: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            cancel_grace: Duration::from_millis(2000),
        }
    }
}

/// Drives one exchange over a [`Transport`].
pub struct RequestLifecycle<T: Transport> {
    id: u64,
    provider: ProviderKind,
    transport: T,
    pipeline: StreamPipeline,
    usage: UsageAggregator,
    options: LifecycleOptions,
    token: CancellationToken,
    state: LifecycleState,
    http_status: Option<u16>,
    error_body: Vec<u8>,
    last_stderr: Option<String>,
    backend_error: Option<String>,
    pending: Vec<NormalizedEvent>,
}

impl<T: Transport> RequestLifecycle<T> {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        transport: T,
        session: SessionUsage,
        options: LifecycleOptions,
    ) -> Self {
        Self {
            id: next_exchange_id(),
            provider: adapter.kind(),
            transport,
            pipeline: StreamPipeline::new(adapter),
            usage: UsageAggregator::new(session),
            options,
            token: CancellationToken::new(),
            state: LifecycleState::Idle,
            http_status: None,
            error_body: Vec::new(),
            last_stderr: None,
            backend_error: None,
            pending: Vec::with_capacity(8),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    #[must_use]
    pub fn handle(&self) -> ExchangeHandle {
        ExchangeHandle {
            id: self.id,
            token: self.token.clone(),
        }
    }

    /// Run the exchange on a new task.
    pub fn spawn<O: ExchangeObserver>(
        self,
        spec: RequestSpec,
        observer: O,
    ) -> (ExchangeHandle, JoinHandle<ExchangeOutcome>) {
        let handle = self.handle();
        let join = tokio::spawn(self.run(spec, observer));
        (handle, join)
    }

    /// Run the exchange to completion on the current task.
    pub async fn run<O: ExchangeObserver>(
        mut self,
        spec: RequestSpec,
        mut observer: O,
    ) -> ExchangeOutcome {
        let started = Instant::now();
        let outcome = self.drive(&spec, &mut observer).await;
        self.state = outcome.state();
        match &outcome {
            ExchangeOutcome::Done { usage } => {
                log_exchange_usage(
                    self.id,
                    self.provider,
                    usage,
                    &self.usage.session().snapshot(),
                    started.elapsed(),
                );
            }
            ExchangeOutcome::Cancelled => {
                info!(exchange_id = self.id, provider = %self.provider, "exchange cancelled");
            }
            ExchangeOutcome::Failed(err) => {
                warn!(exchange_id = self.id, provider = %self.provider, error = %err, "exchange failed");
            }
        }
        observer.on_outcome(&outcome);
        outcome
    }

    async fn drive<O: ExchangeObserver>(
        &mut self,
        spec: &RequestSpec,
        observer: &mut O,
    ) -> ExchangeOutcome {
        if self.token.is_cancelled() {
            return ExchangeOutcome::Cancelled;
        }
        self.transition(LifecycleState::Sending);
        debug!(exchange_id = self.id, url = spec.url(), "dispatching request");
        let mut events = match self.transport.dispatch(spec) {
            Ok(events) => events,
            Err(err) => return ExchangeOutcome::Failed(err),
        };

        let token = self.token.clone();
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    return self.cancel(&mut events).await;
                }
                event = events.recv() => match event {
                    Some(TransportEvent::Dispatched { status }) => {
                        debug!(exchange_id = self.id, status, "response headers received");
                        self.http_status = Some(status);
                        self.transition(LifecycleState::Streaming);
                    }
                    Some(TransportEvent::Bytes(bytes)) => {
                        if self.state == LifecycleState::Sending {
                            self.transition(LifecycleState::Streaming);
                        }
                        if self.is_error_status() {
                            let room = ERROR_BODY_LIMIT.saturating_sub(self.error_body.len());
                            self.error_body.extend_from_slice(&bytes[..bytes.len().min(room)]);
                        }
                        self.pipeline.feed(&bytes, &mut self.pending);
                        self.deliver(observer);
                    }
                    Some(TransportEvent::Stderr(line)) => {
                        debug!(exchange_id = self.id, line = preview(&line), "transport stderr");
                        observer.on_stderr(&line);
                        self.last_stderr = Some(line);
                    }
                    Some(TransportEvent::Exited(status)) => {
                        return self.finish(status, observer);
                    }
                    None => {
                        self.last_stderr = Some("transport closed without an exit status".into());
                        return self.finish(ExitStatus::RECV_ERROR, observer);
                    }
                },
            }
        }
    }

    /// Hand pending events to the observer unless cancellation has been requested.
    fn deliver<O: ExchangeObserver>(&mut self, observer: &mut O) {
        for event in self.pending.drain(..) {
            if self.token.is_cancelled() {
                break;
            }
            self.usage.observe(&event);
            match &event {
                NormalizedEvent::MessageComplete | NormalizedEvent::Done
                    if self.state == LifecycleState::Streaming =>
                {
                    self.state = LifecycleState::Completing;
                    debug!(exchange_id = self.id, state = ?self.state, "lifecycle transition");
                }
                NormalizedEvent::Error { message } => {
                    self.backend_error.get_or_insert_with(|| message.clone());
                }
                _ => {}
            }
            observer.on_event(&event);
        }
    }

    fn finish<O: ExchangeObserver>(
        &mut self,
        status: ExitStatus,
        observer: &mut O,
    ) -> ExchangeOutcome {
        if self.token.is_cancelled() {
            return ExchangeOutcome::Cancelled;
        }

        if !status.success() {
            let failure = TransportFailure::from_exit(status, self.last_stderr.as_deref());
            let surfaced = self.backend_error.take();
            if !self.pipeline.normalizer().saw_error() {
                self.pipeline
                    .push_event(NormalizedEvent::error(failure.to_string()), &mut self.pending);
            }
            self.pipeline.push_event(NormalizedEvent::Done, &mut self.pending);
            self.deliver(observer);
            return match surfaced {
                Some(message) => ExchangeOutcome::Failed(StreamError::Backend(message)),
                None => ExchangeOutcome::Failed(StreamError::Transport(failure)),
            };
        }

        self.pipeline.finish(&mut self.pending);
        if let Some(status) = self.http_status.filter(|_| self.is_error_status()) {
            if !self.pipeline.normalizer().saw_error() {
                let message = format!("HTTP {status}: {}", self.error_body_message());
                self.pipeline
                    .push_event(NormalizedEvent::error(message), &mut self.pending);
            }
        }
        self.pipeline.push_event(NormalizedEvent::Done, &mut self.pending);
        self.deliver(observer);

        match self.backend_error.take() {
            Some(message) => ExchangeOutcome::Failed(StreamError::Backend(message)),
            None => ExchangeOutcome::Done {
                usage: self.usage.completed().unwrap_or_else(|| self.usage.current()),
            },
        }
    }

    async fn cancel(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    ) -> ExchangeOutcome {
        debug!(exchange_id = self.id, state = ?self.state, "cancellation requested");
        self.pending.clear();
        self.transport.terminate(true);

        let grace = tokio::time::sleep(self.options.cancel_grace);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                () = &mut grace => {
                    warn!(
                        exchange_id = self.id,
                        grace_ms = u64::try_from(self.options.cancel_grace.as_millis()).unwrap_or(u64::MAX),
                        "transport ignored graceful terminate, forcing"
                    );
                    self.transport.terminate(false);
                    break;
                }
                event = events.recv() => match event {
                    Some(TransportEvent::Exited(status)) => {
                        debug!(exchange_id = self.id, %status, "transport exited after cancel");
                        break;
                    }
                    None => break,
                    Some(_) => {}
                },
            }
        }
        ExchangeOutcome::Cancelled
    }

    fn transition(&mut self, next: LifecycleState) {
        if self.state != next {
            debug!(exchange_id = self.id, from = ?self.state, to = ?next, "lifecycle transition");
            self.state = next;
        }
    }

    fn is_error_status(&self) -> bool {
        self.http_status
            .is_some_and(|status| !(200..300).contains(&status))
    }

    fn error_body_message(&self) -> String {
        let text = String::from_utf8_lossy(&self.error_body);
        if let Some(message) = parse_error_text(&text) {
            return message;
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            "empty response body".to_string()
        } else {
            preview(trimmed).to_string()
        }
    }
}
