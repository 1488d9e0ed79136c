pub mod encoder;
pub mod stream;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::protocol::{
    encode_body, header_value, json_headers, Frame, Message, ProviderAdapter, ProviderKind,
    RawEvent, RequestParams, RequestSpec,
};
use crate::util::preview;

/// Gemini v1beta `streamGenerateContent` request wire type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GeminiGenerationConfig>,
}

/// A content message in Gemini format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<GeminiPart>,
}

/// A text part within a Gemini content message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiPart {
    pub text: String,
}

/// Generation config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

/// Chunked JSON-array backend (`POST {base}/models/{model}:streamGenerateContent`).
#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    model_prefix: String,
}

impl GeminiAdapter {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            model_prefix: format!("{base}/models/"),
        }
    }

    fn stream_url(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}{model}:streamGenerateContent", self.model_prefix)
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn build_request(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        params: &RequestParams,
    ) -> Result<RequestSpec, StreamError> {
        if params.model.trim().is_empty() {
            return Err(StreamError::InvalidRequest("model name is empty".into()));
        }
        let wire = encoder::encode_gemini_request(messages, system_prompt, params)?;
        let mut headers = json_headers();
        headers.insert("x-goog-api-key", header_value(&params.credential)?);
        Ok(RequestSpec::new(
            ProviderKind::Gemini,
            self.stream_url(&params.model),
            headers,
            encode_body(&wire)?,
            params.timeout,
            params.connect_timeout,
        ))
    }

    fn parse_frame(&self, frame: Frame, out: &mut Vec<RawEvent>) {
        match frame {
            Frame::Object(value) => stream::parse_gemini_value(value, out),
            Frame::Line(line) => {
                tracing::warn!(line = preview(&line), "gemini stream does not use line framing, dropping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request() {
        let adapter = GeminiAdapter::new("https://generativelanguage.googleapis.com/v1beta/");
        let mut params = RequestParams::new("models/gemini-2.5-flash", "AIza-test");
        params.max_tokens = Some(256);
        let spec = adapter
            .build_request(
                &[Message::user("q"), Message::assistant("a"), Message::user("q2")],
                Some("sys"),
                &params,
            )
            .expect("build");
        assert_eq!(
            spec.url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:streamGenerateContent"
        );
        assert_eq!(spec.headers()["x-goog-api-key"], "AIza-test");

        let body: serde_json::Value = serde_json::from_slice(spec.body()).expect("json body");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][2]["parts"][0]["text"], "q2");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn test_line_frames_are_dropped() {
        let adapter = GeminiAdapter::new("https://generativelanguage.googleapis.com/v1beta");
        let mut out = Vec::new();
        adapter.parse_frame(
            Frame::Line(r#"data: {"candidates":[{"content":{"parts":[{"text":"x"}]}}]}"#.into()),
            &mut out,
        );
        assert!(out.is_empty());
        adapter.parse_frame(
            Frame::Object(serde_json::json!({"candidates":[{"content":{"parts":[{"text":"x"}]}}]})),
            &mut out,
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_empty_model_is_rejected() {
        let adapter = GeminiAdapter::new("https://example.test/v1beta");
        let params = RequestParams::new(" ", "k");
        assert!(adapter
            .build_request(&[Message::user("q")], None, &params)
            .is_err());
    }
}
