use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use turnstream::error::{StreamError, TransportFailure};
use turnstream::exchange::{
    ChannelObserver, ExchangeOutcome, ExchangeUpdate, ExitStatus, LifecycleOptions,
    RequestLifecycle,
};
use turnstream::protocol::{
    build_adapter, Message, NormalizedEvent, ProviderAdapter, ProviderKind, RequestParams,
    RequestSpec, UsageKind,
};
use turnstream::transport::ReplayTransport;
use turnstream::usage::{SessionUsage, UsageCounters};

fn adapter(kind: ProviderKind) -> Arc<dyn ProviderAdapter> {
    build_adapter(kind, "https://example.test/v1", None)
}

fn spec(adapter: &Arc<dyn ProviderAdapter>) -> RequestSpec {
    adapter
        .build_request(
            &[Message::user("hello")],
            Some("be brief"),
            &RequestParams::new("test-model", "secret"),
        )
        .expect("request spec")
}

fn lifecycle(
    kind: ProviderKind,
    transport: ReplayTransport,
    session: &SessionUsage,
) -> (RequestLifecycle<ReplayTransport>, RequestSpec) {
    let adapter = adapter(kind);
    let spec = spec(&adapter);
    let lifecycle = RequestLifecycle::new(
        adapter,
        transport,
        session.clone(),
        LifecycleOptions {
            cancel_grace: Duration::from_millis(50),
        },
    );
    (lifecycle, spec)
}

async fn collect(
    mut updates: UnboundedReceiver<ExchangeUpdate>,
) -> (Vec<NormalizedEvent>, Vec<ExchangeOutcome>) {
    let mut events = Vec::new();
    let mut outcomes = Vec::new();
    while let Some(update) = updates.recv().await {
        match update {
            ExchangeUpdate::Event(event) => {
                assert!(outcomes.is_empty(), "event {event:?} after outcome");
                events.push(event);
            }
            ExchangeUpdate::Stderr(_) => {}
            ExchangeUpdate::Finished(outcome) => outcomes.push(outcome),
        }
    }
    (events, outcomes)
}

async fn run_scripted(
    kind: ProviderKind,
    status: u16,
    body: &'static str,
    session: &SessionUsage,
) -> (Vec<NormalizedEvent>, ExchangeOutcome) {
    let (lifecycle, spec) = lifecycle(kind, ReplayTransport::scripted(status, [body]), session);
    let (observer, updates) = ChannelObserver::channel();
    let outcome = lifecycle.run(spec, observer).await;
    let (events, outcomes) = collect(updates).await;
    assert_eq!(outcomes, vec![outcome.clone()], "exactly one outcome");
    (events, outcome)
}

const OPENAI_OK: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":3}}\n\n",
    "data: [DONE]\n\n",
);

#[tokio::test]
async fn test_successful_exchange_updates_session_usage() {
    let session = SessionUsage::new();
    let (events, outcome) = run_scripted(ProviderKind::OpenAi, 200, OPENAI_OK, &session).await;

    let expected_usage = UsageCounters {
        input: 5,
        output: 3,
        thoughts: 0,
    };
    assert_eq!(
        outcome,
        ExchangeOutcome::Done {
            usage: expected_usage
        }
    );
    assert_eq!(events.first(), Some(&NormalizedEvent::content("Hi")));
    assert_eq!(events.last(), Some(&NormalizedEvent::Done));
    assert_eq!(session.snapshot(), expected_usage);
}

#[tokio::test]
async fn test_session_usage_is_monotonic_across_exchanges() {
    let session = SessionUsage::new();
    let mut previous = session.snapshot().total();
    for _ in 0..3 {
        run_scripted(ProviderKind::OpenAi, 200, OPENAI_OK, &session).await;
        let now = session.snapshot().total();
        assert!(now > previous);
        previous = now;
    }
    assert_eq!(session.snapshot().input, 15);
    assert_eq!(session.snapshot().output, 9);
}

#[tokio::test]
async fn test_missing_done_is_synthesized() {
    let session = SessionUsage::new();
    let (events, outcome) = run_scripted(
        ProviderKind::OpenAi,
        200,
        "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
        &session,
    )
    .await;
    assert_eq!(
        events,
        vec![NormalizedEvent::content("partial"), NormalizedEvent::Done]
    );
    assert_eq!(
        outcome,
        ExchangeOutcome::Done {
            usage: UsageCounters::default()
        }
    );
    assert!(session.snapshot().is_empty());
}

#[tokio::test]
async fn test_backend_error_beats_successful_exit() {
    let session = SessionUsage::new();
    let (events, outcome) = run_scripted(
        ProviderKind::Anthropic,
        200,
        concat!(
            "event: error\n",
            "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        ),
        &session,
    )
    .await;
    assert_eq!(
        events,
        vec![
            NormalizedEvent::error("overloaded_error: Overloaded"),
            NormalizedEvent::Done
        ]
    );
    assert_eq!(
        outcome,
        ExchangeOutcome::Failed(StreamError::Backend("overloaded_error: Overloaded".into()))
    );
}

#[tokio::test]
async fn test_unterminated_json_error_body_on_http_error() {
    let session = SessionUsage::new();
    let (_, outcome) = run_scripted(
        ProviderKind::OpenAi,
        401,
        r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","code":"invalid_api_key"}}"#,
        &session,
    )
    .await;
    assert_eq!(
        outcome.into_result(),
        Err(StreamError::Backend(
            "invalid_request_error: Incorrect API key provided".into()
        ))
    );
}

#[tokio::test]
async fn test_plain_text_http_error_uses_status() {
    let session = SessionUsage::new();
    let (events, outcome) =
        run_scripted(ProviderKind::Anthropic, 502, "Bad Gateway", &session).await;
    assert_eq!(
        events,
        vec![
            NormalizedEvent::error("HTTP 502: Bad Gateway"),
            NormalizedEvent::Done
        ]
    );
    assert_eq!(
        outcome,
        ExchangeOutcome::Failed(StreamError::Backend("HTTP 502: Bad Gateway".into()))
    );
}

#[tokio::test]
async fn test_transport_exit_code_maps_to_cause() {
    let session = SessionUsage::new();
    let (transport, feed) = ReplayTransport::new();
    feed.stderr("Could not resolve host: api.example.test");
    feed.exit(ExitStatus::COULDNT_RESOLVE_HOST);
    let (lifecycle, spec) = lifecycle(ProviderKind::Gemini, transport, &session);
    let (observer, updates) = ChannelObserver::channel();

    let outcome = lifecycle.run(spec, observer).await;
    let (events, _) = collect(updates).await;

    let failure = TransportFailure::HostResolution("Could not resolve host: api.example.test".into());
    assert_eq!(
        outcome,
        ExchangeOutcome::Failed(StreamError::Transport(failure.clone()))
    );
    assert_eq!(
        events,
        vec![
            NormalizedEvent::error(failure.to_string()),
            NormalizedEvent::Done
        ]
    );
    assert_eq!(feed.requests().len(), 1);
}

#[tokio::test]
async fn test_timeout_exit_is_retryable() {
    let session = SessionUsage::new();
    let (transport, feed) = ReplayTransport::new();
    feed.dispatched(200);
    feed.bytes("data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n");
    feed.stderr("Operation timed out after 300000 milliseconds");
    feed.exit(ExitStatus::OPERATION_TIMEDOUT);
    let (lifecycle, spec) = lifecycle(ProviderKind::OpenAi, transport, &session);
    let (observer, _updates) = ChannelObserver::channel();

    let err = lifecycle.run(spec, observer).await.into_result().unwrap_err();
    assert!(matches!(
        err,
        StreamError::Transport(TransportFailure::Timeout(_))
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_chunked_gemini_exchange() {
    let session = SessionUsage::new();
    let first = "[{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi\"}]}}],\"usageMetadata\":{\"promptTokenCount\":4}}";
    let body = format!("{:x}\r\n{first}\r\n", first.len());
    let last = ",{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"!\"}]},\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"promptTokenCount\":4,\"candidatesTokenCount\":2}}";
    let tail = format!("{:x}\r\n{last}\r\n1\r\n]\r\n0\r\n\r\n", last.len());

    let (transport, feed) = ReplayTransport::new();
    feed.dispatched(200);
    feed.bytes(body);
    feed.bytes(tail);
    feed.exit(ExitStatus::SUCCESS);
    let (lifecycle, spec) = lifecycle(ProviderKind::Gemini, transport, &session);
    let (observer, updates) = ChannelObserver::channel();

    let outcome = lifecycle.run(spec, observer).await;
    let (events, _) = collect(updates).await;
    assert_eq!(
        events,
        vec![
            NormalizedEvent::content("Hi"),
            NormalizedEvent::usage(UsageKind::Input, 4),
            NormalizedEvent::content("!"),
            NormalizedEvent::usage(UsageKind::Input, 4),
            NormalizedEvent::usage(UsageKind::Output, 2),
            NormalizedEvent::MessageComplete,
            NormalizedEvent::Done,
        ]
    );
    assert_eq!(
        outcome,
        ExchangeOutcome::Done {
            usage: UsageCounters {
                input: 4,
                output: 2,
                thoughts: 0
            }
        }
    );
}

#[tokio::test(flavor = "current_thread")]
async fn test_cancel_mid_stream_drops_buffered_bytes() {
    let session = SessionUsage::new();
    let (transport, feed) = ReplayTransport::new();
    let (lifecycle, spec) = lifecycle(ProviderKind::OpenAi, transport, &session);
    let (observer, mut updates) = ChannelObserver::channel();
    let (handle, task) = lifecycle.spawn(spec, observer);

    feed.dispatched(200);
    feed.bytes("data: {\"choices\":[{\"delta\":{\"content\":\"one\"}}]}\n\n");
    assert_eq!(
        updates.recv().await,
        Some(ExchangeUpdate::Event(NormalizedEvent::content("one")))
    );

    handle.cancel();
    feed.bytes("data: {\"choices\":[{\"delta\":{\"content\":\"two\"}}]}\n\n");
    feed.bytes("data: [DONE]\n\n");

    let outcome = task.await.expect("lifecycle task");
    assert_eq!(outcome, ExchangeOutcome::Cancelled);
    assert_eq!(outcome.into_result(), Err(StreamError::Cancelled));

    let (events, outcomes) = collect(updates).await;
    assert!(events.is_empty(), "events after cancel: {events:?}");
    assert_eq!(outcomes, vec![ExchangeOutcome::Cancelled]);
    assert_eq!(feed.terminations(), vec![true]);
    assert!(session.snapshot().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn test_cancel_escalates_when_graceful_terminate_is_ignored() {
    let session = SessionUsage::new();
    let (transport, feed) = ReplayTransport::new();
    let (lifecycle, spec) = lifecycle(
        ProviderKind::Anthropic,
        transport.ignore_graceful_terminate(),
        &session,
    );
    let (observer, mut updates) = ChannelObserver::channel();
    let (handle, task) = lifecycle.spawn(spec, observer);

    feed.dispatched(200);
    feed.bytes("data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"x\"}}\n");
    assert!(matches!(
        updates.recv().await,
        Some(ExchangeUpdate::Event(NormalizedEvent::ContentDelta { .. }))
    ));
    handle.cancel();

    let outcome = task.await.expect("lifecycle task");
    assert_eq!(outcome, ExchangeOutcome::Cancelled);
    assert_eq!(feed.terminations(), vec![true, false]);
}

#[tokio::test]
async fn test_cancel_before_start_never_dispatches() {
    let session = SessionUsage::new();
    let (transport, feed) = ReplayTransport::new();
    let (lifecycle, spec) = lifecycle(ProviderKind::OpenAi, transport, &session);
    let handle = lifecycle.handle();
    handle.cancel();
    assert!(handle.is_cancelled());

    let (observer, updates) = ChannelObserver::channel();
    let outcome = lifecycle.run(spec, observer).await;
    assert_eq!(outcome, ExchangeOutcome::Cancelled);
    let (events, outcomes) = collect(updates).await;
    assert!(events.is_empty());
    assert_eq!(outcomes.len(), 1);
    assert!(feed.requests().is_empty());
    assert!(feed.terminations().is_empty());
}

#[tokio::test]
async fn test_exchange_ids_are_unique() {
    let session = SessionUsage::new();
    let (first, _) = lifecycle(ProviderKind::OpenAi, ReplayTransport::new().0, &session);
    let (second, _) = lifecycle(ProviderKind::OpenAi, ReplayTransport::new().0, &session);
    assert_ne!(first.id(), second.id());
    assert_eq!(first.handle().id(), first.id());
}

#[tokio::test]
async fn test_malformed_frame_does_not_fail_exchange() {
    let session = SessionUsage::new();
    let (events, outcome) = run_scripted(
        ProviderKind::OpenAi,
        200,
        concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            "data: {not json\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n",
            "data: [DONE]\n\n",
        ),
        &session,
    )
    .await;
    assert_eq!(
        events,
        vec![
            NormalizedEvent::content("a"),
            NormalizedEvent::content("b"),
            NormalizedEvent::Done
        ]
    );
    assert!(outcome.into_result().is_ok());
}
