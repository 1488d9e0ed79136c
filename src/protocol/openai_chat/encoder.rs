use crate::error::StreamError;
use crate::protocol::openai_chat::{OpenAiChatRequest, OpenAiMessage, OpenAiStreamOptions};
use crate::protocol::{Message, RequestParams, Role};

/// Encode a conversation into a streaming chat completions request.
///
/// The system prompt, when present, becomes a leading `system` message.
///
/// # Errors
///
/// Returns [`StreamError::InvalidRequest`] when the conversation is empty.
pub fn encode_openai_chat_request(
    messages: &[Message],
    system_prompt: Option<&str>,
    params: &RequestParams,
) -> Result<OpenAiChatRequest, StreamError> {
    if messages.is_empty() {
        return Err(StreamError::InvalidRequest("conversation is empty".into()));
    }

    let mut wire_messages = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = system_prompt.filter(|prompt| !prompt.is_empty()) {
        wire_messages.push(OpenAiMessage {
            role: "system".to_string(),
            content: system.to_string(),
        });
    }
    wire_messages.extend(messages.iter().map(|message| OpenAiMessage {
        role: match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
        .to_string(),
        content: message.content.clone(),
    }));

    Ok(OpenAiChatRequest {
        model: params.model.clone(),
        messages: wire_messages,
        stream: true,
        stream_options: OpenAiStreamOptions {
            include_usage: true,
        },
        max_tokens: params.max_tokens,
        temperature: params.temperature,
        top_p: params.top_p,
        stop: params.stop.clone(),
    })
}
