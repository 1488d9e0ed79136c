use serde::Deserialize;
use serde_json::Value;

use crate::protocol::error_shapes::{extract_error_message, parse_error_text};
use crate::protocol::RawEvent;
use crate::util::{classify_sse_line, preview, SseLine};

const DONE_SENTINEL: &str = "[DONE]";

/// OpenAI-chat-native stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenAiEvent {
    ContentDelta(String),
    /// `delta.reasoning_content`, sent by reasoning-capable compatible backends.
    ReasoningDelta(String),
    /// Non-null `finish_reason`; only a hint, the message is not final yet.
    FinishReason(String),
    /// Token counts from a `usage` object.
    ///
    /// `final_chunk` is set when the carrying chunk had an empty `choices`
    /// array, which is the real end-of-message marker.
    Usage {
        prompt_tokens: Option<u64>,
        completion_tokens: Option<u64>,
        reasoning_tokens: Option<u64>,
        final_chunk: bool,
    },
    /// The literal `data: [DONE]` sentinel.
    Done,
    Error(String),
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<UsageBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens_details: Option<CompletionDetails>,
}

#[derive(Debug, Deserialize)]
struct CompletionDetails {
    #[serde(default)]
    reasoning_tokens: Option<u64>,
}

/// Parse one line of an OpenAI-style chat completion stream.
pub fn parse_openai_line(line: &str, out: &mut Vec<RawEvent>) {
    match classify_sse_line(line) {
        SseLine::Blank | SseLine::Comment => {}
        SseLine::Event(name) => {
            tracing::debug!(event = name, "ignoring event line in sentinel stream");
        }
        SseLine::Data(payload) => {
            let payload = payload.trim();
            if payload == DONE_SENTINEL {
                out.push(RawEvent::OpenAi(OpenAiEvent::Done));
                return;
            }
            match serde_json::from_str::<Value>(payload) {
                Ok(value) => parse_openai_value(value, out),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        payload = preview(payload),
                        "unparsable openai data line"
                    );
                }
            }
        }
        SseLine::Other(text) => {
            if let Some(message) = parse_error_text(text) {
                out.push(RawEvent::OpenAi(OpenAiEvent::Error(message)));
            } else {
                tracing::debug!(line = preview(text), "ignoring unrecognized openai line");
            }
        }
    }
}

/// Interpret one decoded chat completion chunk.
pub fn parse_openai_value(value: Value, out: &mut Vec<RawEvent>) {
    if let Some(message) = extract_error_message(&value) {
        out.push(RawEvent::OpenAi(OpenAiEvent::Error(message)));
        return;
    }
    let chunk = match serde_json::from_value::<StreamChunk>(value) {
        Ok(chunk) => chunk,
        Err(err) => {
            tracing::warn!(error = %err, "malformed openai stream chunk");
            return;
        }
    };

    let final_chunk = chunk.choices.is_empty();
    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(delta) = choice.delta {
            if let Some(reasoning) = delta.reasoning_content.filter(|text| !text.is_empty()) {
                out.push(RawEvent::OpenAi(OpenAiEvent::ReasoningDelta(reasoning)));
            }
            if let Some(content) = delta.content.filter(|text| !text.is_empty()) {
                out.push(RawEvent::OpenAi(OpenAiEvent::ContentDelta(content)));
            }
        }
        if let Some(reason) = choice.finish_reason {
            out.push(RawEvent::OpenAi(OpenAiEvent::FinishReason(reason)));
        }
    }

    if let Some(usage) = chunk.usage {
        out.push(RawEvent::OpenAi(OpenAiEvent::Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            reasoning_tokens: usage
                .completion_tokens_details
                .and_then(|details| details.reasoning_tokens),
            final_chunk,
        }));
    }
}
