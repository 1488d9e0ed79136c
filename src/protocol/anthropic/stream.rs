use serde::Deserialize;
use serde_json::Value;

use crate::protocol::error_shapes::{extract_error_message, parse_error_text};
use crate::protocol::RawEvent;
use crate::util::{classify_sse_line, preview, SseLine};

/// Anthropic-native stream event, as surfaced downstream.
///
/// `signature_delta`, `input_json_delta`, `content_block_stop` and `ping` are
/// acknowledged by the parser and never become events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnthropicEvent {
    MessageStart {
        input_tokens: Option<u64>,
    },
    TextDelta(String),
    ThinkingDelta(String),
    MessageDelta {
        input_tokens: Option<u64>,
        output_tokens: Option<u64>,
        stop_reason: Option<String>,
    },
    /// Ends both the message and the stream; no separate sentinel follows.
    MessageStop,
    Error(String),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamPayload {
    #[serde(rename = "message_start")]
    MessageStart { message: MessageStartBody },
    #[serde(rename = "content_block_start")]
    ContentBlockStart { content_block: BlockStart },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: BlockDelta },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop {},
    #[serde(rename = "message_delta")]
    MessageDelta {
        #[serde(default)]
        delta: Option<MessageDeltaBody>,
        #[serde(default)]
        usage: Option<UsageBody>,
    },
    #[serde(rename = "message_stop")]
    MessageStop {},
    #[serde(rename = "ping")]
    Ping {},
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageStartBody {
    #[serde(default)]
    usage: Option<UsageBody>,
}

#[derive(Debug, Default, Deserialize)]
struct UsageBody {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum BlockStart {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum BlockDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { thinking: String },
    #[serde(rename = "signature_delta")]
    SignatureDelta {},
    #[serde(rename = "input_json_delta")]
    InputJsonDelta {},
    #[serde(other)]
    Other,
}

/// Parse one line of an Anthropic event stream.
pub fn parse_anthropic_line(line: &str, out: &mut Vec<RawEvent>) {
    match classify_sse_line(line) {
        SseLine::Blank | SseLine::Comment => {}
        SseLine::Event(name) => {
            tracing::trace!(event = name, "anthropic event name");
        }
        SseLine::Data(payload) => match serde_json::from_str::<Value>(payload) {
            Ok(value) => parse_anthropic_value(value, out),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    payload = preview(payload),
                    "unparsable anthropic data line"
                );
            }
        },
        SseLine::Other(text) => {
            if let Some(message) = parse_error_text(text) {
                out.push(RawEvent::Anthropic(AnthropicEvent::Error(message)));
            } else {
                tracing::debug!(line = preview(text), "ignoring unrecognized anthropic line");
            }
        }
    }
}

/// Interpret one decoded Anthropic JSON payload.
pub fn parse_anthropic_value(value: Value, out: &mut Vec<RawEvent>) {
    if let Some(message) = extract_error_message(&value) {
        out.push(RawEvent::Anthropic(AnthropicEvent::Error(message)));
        return;
    }

    let type_name = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("<missing>")
        .to_string();
    let payload = match serde_json::from_value::<StreamPayload>(value) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(event = %type_name, error = %err, "malformed anthropic event");
            return;
        }
    };

    let event = match payload {
        StreamPayload::MessageStart { message } => AnthropicEvent::MessageStart {
            input_tokens: message.usage.and_then(|usage| usage.input_tokens),
        },
        StreamPayload::ContentBlockStart { content_block } => match content_block {
            BlockStart::Text { text } if !text.is_empty() => AnthropicEvent::TextDelta(text),
            BlockStart::Thinking { thinking } if !thinking.is_empty() => {
                AnthropicEvent::ThinkingDelta(thinking)
            }
            _ => return,
        },
        StreamPayload::ContentBlockDelta { delta } => match delta {
            BlockDelta::TextDelta { text } => AnthropicEvent::TextDelta(text),
            BlockDelta::ThinkingDelta { thinking } => AnthropicEvent::ThinkingDelta(thinking),
            BlockDelta::SignatureDelta {} | BlockDelta::InputJsonDelta {} => {
                tracing::trace!("dropping signature/tool-input delta");
                return;
            }
            BlockDelta::Other => {
                tracing::warn!("unknown anthropic content_block_delta type");
                return;
            }
        },
        StreamPayload::MessageDelta { delta, usage } => {
            let usage = usage.unwrap_or_default();
            AnthropicEvent::MessageDelta {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                stop_reason: delta.and_then(|delta| delta.stop_reason),
            }
        }
        StreamPayload::MessageStop {} => AnthropicEvent::MessageStop,
        StreamPayload::ContentBlockStop {} | StreamPayload::Ping {} => return,
        StreamPayload::Unknown => {
            tracing::warn!(event = %type_name, "unrecognized anthropic event type");
            return;
        }
    };
    out.push(RawEvent::Anthropic(event));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Vec<AnthropicEvent> {
        let mut out = Vec::new();
        parse_anthropic_line(line, &mut out);
        out.into_iter()
            .map(|event| match event {
                RawEvent::Anthropic(event) => event,
                other => panic!("unexpected event {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_message_start_seeds_input_usage() {
        let events = parse(
            r#"data: {"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","model":"claude","usage":{"input_tokens":25,"output_tokens":1}}}"#,
        );
        assert_eq!(
            events,
            vec![AnthropicEvent::MessageStart {
                input_tokens: Some(25)
            }]
        );
    }

    #[test]
    fn test_text_and_thinking_deltas() {
        assert_eq!(
            parse(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#),
            vec![AnthropicEvent::TextDelta("Hi".into())]
        );
        assert_eq!(
            parse(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hmm"}}"#),
            vec![AnthropicEvent::ThinkingDelta("hmm".into())]
        );
    }

    #[test]
    fn test_signature_and_tool_deltas_are_dropped() {
        assert!(parse(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"signature_delta","signature":"abc"}}"#).is_empty());
        assert!(parse(r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"a\""}}"#).is_empty());
    }

    #[test]
    fn test_message_delta_usage() {
        assert_eq!(
            parse(r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn","stop_sequence":null},"usage":{"output_tokens":15}}"#),
            vec![AnthropicEvent::MessageDelta {
                input_tokens: None,
                output_tokens: Some(15),
                stop_reason: Some("end_turn".into()),
            }]
        );
    }

    #[test]
    fn test_keepalives_event_lines_and_unknown_types_are_silent() {
        assert!(parse("event: content_block_delta").is_empty());
        assert!(parse(r#"data: {"type": "ping"}"#).is_empty());
        assert!(parse(r#"data: {"type":"content_block_stop","index":0}"#).is_empty());
        assert!(parse(r#"data: {"type":"brand_new_event"}"#).is_empty());
        assert!(parse("data: {truncated").is_empty());
        assert!(parse("").is_empty());
    }

    #[test]
    fn test_errors_inside_and_outside_data_framing() {
        assert_eq!(
            parse(r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#),
            vec![AnthropicEvent::Error("overloaded_error: Overloaded".into())]
        );
        assert_eq!(
            parse(r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#),
            vec![AnthropicEvent::Error(
                "authentication_error: invalid x-api-key".into()
            )]
        );
    }

    #[test]
    fn test_message_stop() {
        assert_eq!(
            parse(r#"data: {"type":"message_stop"}"#),
            vec![AnthropicEvent::MessageStop]
        );
    }
}
