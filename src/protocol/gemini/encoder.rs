use crate::error::StreamError;
use crate::protocol::gemini::{GeminiContent, GeminiGenerationConfig, GeminiPart, GeminiRequest};
use crate::protocol::{Message, RequestParams, Role};

/// Encode a conversation into a Gemini request.
///
/// Assistant turns use the `model` role; the system prompt goes into
/// `systemInstruction`, not `contents`.
///
/// # Errors
///
/// Returns [`StreamError::InvalidRequest`] when the conversation is empty.
pub fn encode_gemini_request(
    messages: &[Message],
    system_prompt: Option<&str>,
    params: &RequestParams,
) -> Result<GeminiRequest, StreamError> {
    if messages.is_empty() {
        return Err(StreamError::InvalidRequest("conversation is empty".into()));
    }

    let contents = messages
        .iter()
        .map(|message| GeminiContent {
            role: Some(
                match message.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                }
                .to_string(),
            ),
            parts: vec![GeminiPart {
                text: message.content.clone(),
            }],
        })
        .collect();

    let system_instruction = system_prompt
        .filter(|prompt| !prompt.is_empty())
        .map(|prompt| GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: prompt.to_string(),
            }],
        });

    let generation = GeminiGenerationConfig {
        temperature: params.temperature,
        top_p: params.top_p,
        max_output_tokens: params.max_tokens,
        stop_sequences: params.stop.clone(),
    };
    let has_generation = generation.temperature.is_some()
        || generation.top_p.is_some()
        || generation.max_output_tokens.is_some()
        || generation.stop_sequences.is_some();

    Ok(GeminiRequest {
        contents,
        system_instruction,
        generation_config: has_generation.then_some(generation),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_config_omitted_when_unset() {
        let params = RequestParams::new("gemini", "k");
        let wire = encode_gemini_request(&[Message::user("q")], None, &params).unwrap();
        let json = serde_json::to_value(&wire).unwrap();
        assert!(json.get("generationConfig").is_none());
        assert!(json.get("systemInstruction").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
    }
}
