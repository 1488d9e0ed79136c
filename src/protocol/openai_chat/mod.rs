pub mod encoder;
pub mod stream;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::protocol::{
    encode_body, header_value, json_headers, Frame, Message, ProviderAdapter, ProviderKind,
    RawEvent, RequestParams, RequestSpec,
};

/// `OpenAI` Chat Completions request wire type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    pub stream: bool,
    pub stream_options: OpenAiStreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

/// A message in `OpenAI` format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    pub content: String,
}

/// Stream options; `include_usage` makes the backend send a final usage chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiStreamOptions {
    pub include_usage: bool,
}

/// Sentinel SSE backend (`POST {base}/chat/completions`).
#[derive(Debug, Clone)]
pub struct OpenAiChatAdapter {
    chat_url: String,
}

impl OpenAiChatAdapter {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            chat_url: format!("{base}/chat/completions"),
        }
    }
}

impl ProviderAdapter for OpenAiChatAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn build_request(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        params: &RequestParams,
    ) -> Result<RequestSpec, StreamError> {
        let wire = encoder::encode_openai_chat_request(messages, system_prompt, params)?;
        let mut headers = json_headers();
        headers.insert(
            http::header::AUTHORIZATION,
            header_value(&format!("Bearer {}", params.credential))?,
        );
        Ok(RequestSpec::new(
            ProviderKind::OpenAi,
            self.chat_url.clone(),
            headers,
            encode_body(&wire)?,
            params.timeout,
            params.connect_timeout,
        ))
    }

    fn parse_frame(&self, frame: Frame, out: &mut Vec<RawEvent>) {
        match frame {
            Frame::Line(line) => stream::parse_openai_line(&line, out),
            Frame::Object(value) => stream::parse_openai_value(value, out),
        }
    }
}
