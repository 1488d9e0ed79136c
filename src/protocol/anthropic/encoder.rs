use crate::error::StreamError;
use crate::protocol::anthropic::{AnthropicMessage, AnthropicRequest};
use crate::protocol::{Message, RequestParams, Role};

/// `max_tokens` is mandatory on this API.
const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Encode a conversation into an Anthropic streaming request.
///
/// # Errors
///
/// Returns [`StreamError::InvalidRequest`] when the conversation is empty or
/// does not start with a user turn.
pub fn encode_anthropic_request(
    messages: &[Message],
    system_prompt: Option<&str>,
    params: &RequestParams,
) -> Result<AnthropicRequest, StreamError> {
    match messages.first() {
        None => return Err(StreamError::InvalidRequest("conversation is empty".into())),
        Some(first) if first.role != Role::User => {
            return Err(StreamError::InvalidRequest(
                "conversation must start with a user turn".into(),
            ))
        }
        Some(_) => {}
    }

    let messages = messages
        .iter()
        .map(|message| AnthropicMessage {
            role: match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            }
            .to_string(),
            content: message.content.clone(),
        })
        .collect();

    Ok(AnthropicRequest {
        model: params.model.clone(),
        max_tokens: params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: system_prompt
            .filter(|prompt| !prompt.is_empty())
            .map(str::to_string),
        messages,
        stream: true,
        temperature: params.temperature,
        top_p: params.top_p,
        stop_sequences: params.stop.clone(),
    })
}
