use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The wire dialect a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Event-tagged SSE (`event:` + `data:` lines, `message_stop` ends the stream).
    Anthropic,
    /// Sentinel SSE (`data:` lines terminated by `data: [DONE]`).
    #[serde(rename = "openai")]
    OpenAi,
    /// Raw chunked-transfer JSON array.
    Gemini,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// How the response body of this provider is split into frames.
    #[must_use]
    pub fn frame_mode(self) -> FrameMode {
        match self {
            ProviderKind::Anthropic | ProviderKind::OpenAi => FrameMode::Lines,
            ProviderKind::Gemini => FrameMode::ChunkedArray,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte-stream framing used by the chunk decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    Lines,
    ChunkedArray,
}

/// Conversation role of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of the conversation sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-exchange parameters handed to [`ProviderAdapter::build_request`].
///
/// `credential` is the ready-to-use secret for this exchange; no lookup
/// happens inside the engine.
///
/// [`ProviderAdapter::build_request`]: crate::protocol::ProviderAdapter::build_request
#[derive(Clone)]
pub struct RequestParams {
    pub model: String,
    pub credential: String,
    pub max_tokens: Option<u64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stop: Option<Vec<String>>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl RequestParams {
    #[must_use]
    pub fn new(model: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            credential: credential.into(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: None,
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for RequestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestParams")
            .field("model", &self.model)
            .field("credential", &"<redacted>")
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("stop", &self.stop)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// A fully-built, immutable request for one exchange.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    provider: ProviderKind,
    url: String,
    headers: http::HeaderMap,
    body: Bytes,
    timeout: Duration,
    connect_timeout: Duration,
}

impl RequestSpec {
    #[must_use]
    pub fn new(
        provider: ProviderKind,
        url: String,
        headers: http::HeaderMap,
        body: Bytes,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            url,
            headers,
            body,
            timeout,
            connect_timeout,
        }
    }

    #[must_use]
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    #[must_use]
    pub fn method(&self) -> http::Method {
        http::Method::POST
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &http::HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

/// Which token counter a usage update refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageKind {
    Input,
    Output,
    Thoughts,
}

/// Provider-agnostic event delivered to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedEvent {
    /// Fragment of generated answer text, append-only.
    ContentDelta { text: String },
    /// Fragment of auxiliary reasoning text.
    Thinking { text: String },
    /// Absolute token count as of this point; replaces any earlier value of the same kind.
    UsageUpdate { kind: UsageKind, tokens: u64 },
    /// The model finished its answer; usage is final.
    MessageComplete,
    /// Backend- or transport-reported failure; terminal.
    Error { message: String },
    /// Transport-level end of stream.
    Done,
}

impl NormalizedEvent {
    #[must_use]
    pub fn content(text: impl Into<String>) -> Self {
        NormalizedEvent::ContentDelta { text: text.into() }
    }

    #[must_use]
    pub fn thinking(text: impl Into<String>) -> Self {
        NormalizedEvent::Thinking { text: text.into() }
    }

    #[must_use]
    pub fn usage(kind: UsageKind, tokens: u64) -> Self {
        NormalizedEvent::UsageUpdate { kind, tokens }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        NormalizedEvent::Error {
            message: message.into(),
        }
    }
}
