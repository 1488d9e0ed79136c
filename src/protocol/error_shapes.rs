use serde_json::Value;

/// Extract a caller-facing message from a backend error payload.
///
/// Accepts the three shapes the supported backends use:
/// - Anthropic: `{"type":"error","error":{"type":"overloaded_error","message":"..."}}`
/// - `OpenAI`: `{"error":{"message":"...","type":"invalid_request_error","code":...}}`
/// - Gemini: `{"error":{"code":400,"message":"...","status":"INVALID_ARGUMENT"}}`,
///   possibly wrapped in a one-element array.
///
/// Returns `None` when the value carries no `error` member.
#[must_use]
pub fn extract_error_message(value: &Value) -> Option<String> {
    let value = match value {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let error = value.as_object()?.get("error")?;
    match error {
        Value::String(message) => Some(message.clone()),
        Value::Object(body) => {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            let label = body
                .get("type")
                .or_else(|| body.get("status"))
                .and_then(Value::as_str)
                .filter(|label| !label.is_empty());
            Some(match label {
                Some(label) => format!("{label}: {message}"),
                None => message.to_string(),
            })
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Try to read `text` as a standalone JSON error object.
#[must_use]
pub fn parse_error_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    extract_error_message(&value)
}
