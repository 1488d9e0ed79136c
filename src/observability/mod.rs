use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::protocol::ProviderKind;
use crate::usage::UsageCounters;

/// Map a configured log level name to a tracing filter directive.
///
/// Returns `None` for `DISABLED`.
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (TRACE, DEBUG, INFO, WARN, ERROR)
#[must_use]
pub fn filter_directive(log_level: &str) -> Option<String> {
    let level = log_level.trim().to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Initialize the tracing subscriber with the configured log level.
///
/// `RUST_LOG`, when set, overrides the configured level. Logs go to stderr
/// so they never interleave with streamed output on stdout.
pub fn init_tracing(log_level: &str, json: bool) {
    let Some(directive) = filter_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directive))
        .unwrap_or_else(|_| EnvFilter::new("INFO"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Log token usage for a finished exchange.
pub fn log_exchange_usage(
    exchange_id: u64,
    provider: ProviderKind,
    usage: &UsageCounters,
    session: &UsageCounters,
    elapsed: Duration,
) {
    info!(
        exchange_id,
        provider = provider.as_str(),
        input_tokens = usage.input,
        output_tokens = usage.output,
        thoughts_tokens = usage.thoughts,
        session_total_tokens = session.total(),
        duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        "exchange complete"
    );
}
