pub mod anthropic;
pub mod error_shapes;
pub mod gemini;
pub mod model;
pub mod openai_chat;

use std::sync::Arc;

pub use model::{
    FrameMode, Message, NormalizedEvent, ProviderKind, RequestParams, RequestSpec, Role, UsageKind,
};

use crate::error::StreamError;

/// One decoded logical unit of provider output.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A complete line (without its terminating newline) from an SSE-style body.
    Line(String),
    /// A complete JSON object from a chunked JSON-array body.
    Object(serde_json::Value),
}

/// Provider-native event produced by [`ProviderAdapter::parse_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Anthropic(anthropic::stream::AnthropicEvent),
    OpenAi(openai_chat::stream::OpenAiEvent),
    Gemini(gemini::stream::GeminiEvent),
}

/// Per-backend request builder and frame parser.
///
/// Adapters hold only static endpoint data, so one instance can serve any
/// number of concurrent exchanges.
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn frame_mode(&self) -> FrameMode {
        self.kind().frame_mode()
    }

    /// Build the request for one exchange.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidRequest`] when the inputs cannot be
    /// expressed as a valid request for this backend.
    fn build_request(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        params: &RequestParams,
    ) -> Result<RequestSpec, StreamError>;

    /// Interpret one frame, appending zero or more raw events to `out`.
    ///
    /// Malformed or unrecognized frames are logged and skipped.
    fn parse_frame(&self, frame: Frame, out: &mut Vec<RawEvent>);
}

/// Construct the adapter for `kind` rooted at `base_url`.
///
/// `api_version` is only meaningful for Anthropic (`anthropic-version` header).
#[must_use]
pub fn build_adapter(
    kind: ProviderKind,
    base_url: &str,
    api_version: Option<&str>,
) -> Arc<dyn ProviderAdapter> {
    match kind {
        ProviderKind::Anthropic => Arc::new(anthropic::AnthropicAdapter::new(base_url, api_version)),
        ProviderKind::OpenAi => Arc::new(openai_chat::OpenAiChatAdapter::new(base_url)),
        ProviderKind::Gemini => Arc::new(gemini::GeminiAdapter::new(base_url)),
    }
}

pub(crate) fn header_value(value: &str) -> Result<http::HeaderValue, StreamError> {
    http::HeaderValue::from_str(value)
        .map_err(|_| StreamError::InvalidRequest("credential contains invalid header characters".into()))
}

pub(crate) fn encode_body<T: serde::Serialize>(body: &T) -> Result<bytes::Bytes, StreamError> {
    serde_json::to_vec(body)
        .map(bytes::Bytes::from)
        .map_err(|err| StreamError::InvalidRequest(format!("failed to encode request body: {err}")))
}

pub(crate) fn json_headers() -> http::HeaderMap {
    let mut headers = http::HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    headers
}
