use std::sync::atomic::{AtomicU64, Ordering};

static EXCHANGE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[inline]
pub(crate) fn next_exchange_id() -> u64 {
    EXCHANGE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Field classification of one SSE line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SseLine<'a> {
    Blank,
    Comment,
    Event(&'a str),
    Data(&'a str),
    Other(&'a str),
}

/// Classify a single SSE line (trailing `\r` tolerated).
///
/// One optional space after the field colon is stripped, per the SSE grammar.
#[inline]
pub(crate) fn classify_sse_line(line: &str) -> SseLine<'_> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return SseLine::Blank;
    }
    if line.starts_with(':') {
        return SseLine::Comment;
    }
    if let Some(value) = line.strip_prefix("data:") {
        return SseLine::Data(value.strip_prefix(' ').unwrap_or(value));
    }
    if let Some(value) = line.strip_prefix("event:") {
        return SseLine::Event(value.trim());
    }
    SseLine::Other(line)
}

/// Bounded preview of a payload for log lines.
#[inline]
pub(crate) fn preview(text: &str) -> &str {
    const MAX: usize = 160;
    if text.len() <= MAX {
        return text;
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
