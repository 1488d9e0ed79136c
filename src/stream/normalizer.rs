use smallvec::{smallvec, SmallVec};

use crate::protocol::anthropic::stream::AnthropicEvent;
use crate::protocol::gemini::stream::GeminiEvent;
use crate::protocol::openai_chat::stream::OpenAiEvent;
use crate::protocol::{NormalizedEvent, RawEvent, UsageKind};

pub type NormalizedBatch = SmallVec<[NormalizedEvent; 4]>;

/// Map one provider-native event to its normalized events, in order.
///
/// Stateless; sequencing rules live in [`EventNormalizer`].
#[must_use]
pub fn normalize_raw_event(raw: RawEvent) -> NormalizedBatch {
    match raw {
        RawEvent::Anthropic(event) => normalize_anthropic(event),
        RawEvent::OpenAi(event) => normalize_openai(event),
        RawEvent::Gemini(event) => normalize_gemini(event),
    }
}

fn normalize_anthropic(event: AnthropicEvent) -> NormalizedBatch {
    match event {
        AnthropicEvent::MessageStart { input_tokens } => input_tokens
            .map(|tokens| NormalizedEvent::usage(UsageKind::Input, tokens))
            .into_iter()
            .collect(),
        AnthropicEvent::TextDelta(text) => text_event(text, NormalizedEvent::content),
        AnthropicEvent::ThinkingDelta(text) => text_event(text, NormalizedEvent::thinking),
        AnthropicEvent::MessageDelta {
            input_tokens,
            output_tokens,
            stop_reason,
        } => {
            if let Some(reason) = stop_reason.as_deref() {
                tracing::debug!(stop_reason = reason, "anthropic message delta");
            }
            let mut batch = NormalizedBatch::new();
            push_usage(&mut batch, UsageKind::Input, input_tokens);
            push_usage(&mut batch, UsageKind::Output, output_tokens);
            batch
        }
        AnthropicEvent::MessageStop => {
            smallvec![NormalizedEvent::MessageComplete, NormalizedEvent::Done]
        }
        AnthropicEvent::Error(message) => smallvec![NormalizedEvent::error(message)],
    }
}

fn normalize_openai(event: OpenAiEvent) -> NormalizedBatch {
    match event {
        OpenAiEvent::ContentDelta(text) => text_event(text, NormalizedEvent::content),
        OpenAiEvent::ReasoningDelta(text) => text_event(text, NormalizedEvent::thinking),
        OpenAiEvent::FinishReason(reason) => {
            // Usage still follows in a trailing chunk; completion waits for it.
            tracing::debug!(finish_reason = %reason, "openai finish reason");
            NormalizedBatch::new()
        }
        OpenAiEvent::Usage {
            prompt_tokens,
            completion_tokens,
            reasoning_tokens,
            final_chunk,
        } => {
            let mut batch = NormalizedBatch::new();
            push_usage(&mut batch, UsageKind::Input, prompt_tokens);
            push_usage(&mut batch, UsageKind::Output, completion_tokens);
            push_usage(&mut batch, UsageKind::Thoughts, reasoning_tokens);
            if final_chunk {
                batch.push(NormalizedEvent::MessageComplete);
            }
            batch
        }
        OpenAiEvent::Done => smallvec![NormalizedEvent::Done],
        OpenAiEvent::Error(message) => smallvec![NormalizedEvent::error(message)],
    }
}

fn normalize_gemini(event: GeminiEvent) -> NormalizedBatch {
    match event {
        GeminiEvent::Text(text) => text_event(text, NormalizedEvent::content),
        GeminiEvent::Thought(text) => text_event(text, NormalizedEvent::thinking),
        GeminiEvent::Usage {
            prompt_tokens,
            candidates_tokens,
            thoughts_tokens,
        } => {
            let mut batch = NormalizedBatch::new();
            push_usage(&mut batch, UsageKind::Input, prompt_tokens);
            push_usage(&mut batch, UsageKind::Output, candidates_tokens);
            push_usage(&mut batch, UsageKind::Thoughts, thoughts_tokens);
            batch
        }
        GeminiEvent::Finish(reason) => {
            tracing::debug!(finish_reason = %reason, "gemini finish reason");
            smallvec![NormalizedEvent::MessageComplete, NormalizedEvent::Done]
        }
        GeminiEvent::Error(message) => smallvec![NormalizedEvent::error(message)],
    }
}

#[inline]
fn text_event(text: String, make: fn(String) -> NormalizedEvent) -> NormalizedBatch {
    if text.is_empty() {
        NormalizedBatch::new()
    } else {
        smallvec![make(text)]
    }
}

#[inline]
fn push_usage(batch: &mut NormalizedBatch, kind: UsageKind, tokens: Option<u64>) {
    if let Some(tokens) = tokens {
        batch.push(NormalizedEvent::usage(kind, tokens));
    }
}

/// Per-exchange gate that enforces event ordering.
///
/// After `Error` only a single `Done` may pass; after `Done` nothing passes;
/// `MessageComplete` passes at most once.
#[derive(Debug, Default)]
pub struct EventNormalizer {
    errored: bool,
    completed: bool,
    done: bool,
    suppressed: usize,
}

impl EventNormalizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize `raw` and append the events allowed through to `out`.
    pub fn push_raw(&mut self, raw: RawEvent, out: &mut Vec<NormalizedEvent>) {
        for event in normalize_raw_event(raw) {
            self.push(event, out);
        }
    }

    /// Gate an already-normalized event, e.g. one synthesized by the lifecycle.
    pub fn push(&mut self, event: NormalizedEvent, out: &mut Vec<NormalizedEvent>) {
        if self.done || (self.errored && event != NormalizedEvent::Done) {
            self.suppressed += 1;
            tracing::trace!(?event, "suppressing event after terminal event");
            return;
        }
        match &event {
            NormalizedEvent::MessageComplete if self.completed => {
                self.suppressed += 1;
                return;
            }
            NormalizedEvent::MessageComplete => self.completed = true,
            NormalizedEvent::Error { .. } => self.errored = true,
            NormalizedEvent::Done => self.done = true,
            _ => {}
        }
        out.push(event);
    }

    #[must_use]
    pub fn saw_error(&self) -> bool {
        self.errored
    }

    #[must_use]
    pub fn saw_complete(&self) -> bool {
        self.completed
    }

    #[must_use]
    pub fn saw_done(&self) -> bool {
        self.done
    }

    /// Events dropped by the ordering rules so far.
    #[must_use]
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }
}
