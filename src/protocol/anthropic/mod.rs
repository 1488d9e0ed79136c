pub mod encoder;
pub mod stream;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::protocol::{
    encode_body, header_value, json_headers, Frame, Message, ProviderAdapter, ProviderKind,
    RawEvent, RequestParams, RequestSpec,
};

const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API request wire type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<AnthropicMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

/// Anthropic message wire type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: String,
}

/// Event-tagged SSE backend (`POST {base}/messages`).
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    messages_url: String,
    api_version: String,
}

impl AnthropicAdapter {
    #[must_use]
    pub fn new(base_url: &str, api_version: Option<&str>) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            messages_url: format!("{base}/messages"),
            api_version: api_version.unwrap_or(DEFAULT_API_VERSION).to_string(),
        }
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn build_request(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        params: &RequestParams,
    ) -> Result<RequestSpec, StreamError> {
        let wire = encoder::encode_anthropic_request(messages, system_prompt, params)?;
        let mut headers = json_headers();
        headers.insert("x-api-key", header_value(&params.credential)?);
        headers.insert("anthropic-version", header_value(&self.api_version)?);
        Ok(RequestSpec::new(
            ProviderKind::Anthropic,
            self.messages_url.clone(),
            headers,
            encode_body(&wire)?,
            params.timeout,
            params.connect_timeout,
        ))
    }

    fn parse_frame(&self, frame: Frame, out: &mut Vec<RawEvent>) {
        match frame {
            Frame::Line(line) => stream::parse_anthropic_line(&line, out),
            Frame::Object(value) => stream::parse_anthropic_value(value, out),
        }
    }
}
