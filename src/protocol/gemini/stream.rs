use serde::Deserialize;
use serde_json::Value;

use crate::protocol::error_shapes::extract_error_message;
use crate::protocol::RawEvent;

/// Gemini-native stream event; one response object yields several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeminiEvent {
    Text(String),
    /// A part flagged `thought: true`.
    Thought(String),
    Usage {
        prompt_tokens: Option<u64>,
        candidates_tokens: Option<u64>,
        thoughts_tokens: Option<u64>,
    },
    /// Non-null `finishReason`; ends the message and, since no separate
    /// end-of-stream object is guaranteed, the stream.
    Finish(String),
    Error(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseChunk {
    #[serde(default)]
    candidates: Option<Vec<Candidate>>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<u64>,
    #[serde(default)]
    candidates_token_count: Option<u64>,
    #[serde(default)]
    thoughts_token_count: Option<u64>,
}

/// Interpret one response object from the streamed array.
pub fn parse_gemini_value(value: Value, out: &mut Vec<RawEvent>) {
    if let Some(message) = extract_error_message(&value) {
        out.push(RawEvent::Gemini(GeminiEvent::Error(message)));
        return;
    }
    let chunk = match serde_json::from_value::<ResponseChunk>(value) {
        Ok(chunk) => chunk,
        Err(err) => {
            tracing::warn!(error = %err, "malformed gemini response object");
            return;
        }
    };

    let candidate = chunk
        .candidates
        .and_then(|candidates| candidates.into_iter().next());
    let mut finish_reason = None;
    if let Some(candidate) = candidate {
        if let Some(content) = candidate.content {
            for part in content.parts {
                let Some(text) = part.text.filter(|text| !text.is_empty()) else {
                    continue;
                };
                let event = if part.thought {
                    GeminiEvent::Thought(text)
                } else {
                    GeminiEvent::Text(text)
                };
                out.push(RawEvent::Gemini(event));
            }
        }
        finish_reason = candidate
            .finish_reason
            .filter(|reason| !reason.is_empty() && reason != "null");
    }

    if let Some(usage) = chunk.usage_metadata {
        out.push(RawEvent::Gemini(GeminiEvent::Usage {
            prompt_tokens: usage.prompt_token_count,
            candidates_tokens: usage.candidates_token_count,
            thoughts_tokens: usage.thoughts_token_count,
        }));
    }

    if let Some(reason) = finish_reason {
        out.push(RawEvent::Gemini(GeminiEvent::Finish(reason)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Vec<GeminiEvent> {
        let mut out = Vec::new();
        parse_gemini_value(value, &mut out);
        out.into_iter()
            .map(|event| match event {
                RawEvent::Gemini(event) => event,
                other => panic!("unexpected event {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_multiple_parts_and_usage() {
        let events = parse(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hel"}, {"text": "lo"}]},
                "index": 0
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2}
        }));
        assert_eq!(
            events,
            vec![
                GeminiEvent::Text("Hel".into()),
                GeminiEvent::Text("lo".into()),
                GeminiEvent::Usage {
                    prompt_tokens: Some(4),
                    candidates_tokens: Some(2),
                    thoughts_tokens: None,
                },
            ]
        );
    }

    #[test]
    fn test_finish_reason_comes_last() {
        let events = parse(json!({
            "candidates": [{
                "content": {"parts": [{"text": "!"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 3, "thoughtsTokenCount": 9}
        }));
        assert_eq!(events.first(), Some(&GeminiEvent::Text("!".into())));
        assert_eq!(events.last(), Some(&GeminiEvent::Finish("STOP".into())));
        assert!(events.contains(&GeminiEvent::Usage {
            prompt_tokens: Some(4),
            candidates_tokens: Some(3),
            thoughts_tokens: Some(9),
        }));
    }

    #[test]
    fn test_null_sentinel_finish_reason_is_ignored() {
        let events = parse(json!({
            "candidates": [{"content": {"parts": [{"text": "a"}]}, "finishReason": "null"}]
        }));
        assert_eq!(events, vec![GeminiEvent::Text("a".into())]);
    }

    #[test]
    fn test_thought_parts() {
        let events = parse(json!({
            "candidates": [{"content": {"parts": [{"text": "plan", "thought": true}, {"text": "answer"}]}}]
        }));
        assert_eq!(
            events,
            vec![
                GeminiEvent::Thought("plan".into()),
                GeminiEvent::Text("answer".into())
            ]
        );
    }

    #[test]
    fn test_error_object() {
        let events = parse(json!({
            "error": {"code": 429, "message": "Resource exhausted", "status": "RESOURCE_EXHAUSTED"}
        }));
        assert_eq!(
            events,
            vec![GeminiEvent::Error(
                "RESOURCE_EXHAUSTED: Resource exhausted".into()
            )]
        );
    }
}
