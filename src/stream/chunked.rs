//! Chunked-transfer JSON-array decoding.
//!
//! The body is a single JSON array delivered in HTTP/1.1 chunked encoding,
//! roughly one array element per transfer chunk. Each complete object is
//! dispatched as soon as it arrives; the array text is also accumulated so
//! that, when `]` closes it, any element that never arrived as a standalone
//! chunk is recovered. A running count of dispatched elements keeps every
//! element delivered exactly once.
use memchr::memmem;
use serde_json::Value;

use crate::protocol::Frame;
use crate::util::preview;

const CRLF: &[u8] = b"\r\n";
/// Upper bound on a single object split across transfer chunks.
const MAX_PARTIAL_OBJECT: usize = 16 * 1024 * 1024;

#[derive(Debug, Default)]
struct ArrayAccumulator {
    text: Vec<u8>,
    dispatched: usize,
}

impl ArrayAccumulator {
    fn opened() -> Self {
        Self {
            text: vec![b'['],
            dispatched: 0,
        }
    }

    fn needs_separator(&self) -> bool {
        !matches!(self.text.trim_ascii_end().last(), Some(b'[' | b','))
    }
}

/// Incremental decoder for `Transfer-Encoding: chunked` JSON-array bodies.
#[derive(Debug, Default)]
pub struct ChunkedArrayDecoder {
    buffer: Vec<u8>,
    array: Option<ArrayAccumulator>,
    partial: Vec<u8>,
    /// Set when a bare `,` arrived and no element has followed it yet.
    separator_pending: bool,
}

impl ChunkedArrayDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw transport bytes; complete objects are appended to `out`.
    pub fn feed_into(&mut self, bytes: &[u8], out: &mut Vec<Frame>) {
        self.buffer.extend_from_slice(bytes);
        let mut consumed = 0;
        while let Some(step) = next_transfer_chunk(&self.buffer[consumed..]) {
            match step {
                ChunkStep::Payload { start, len, next } => {
                    let payload_start = consumed + start;
                    let payload = self.buffer[payload_start..payload_start + len].to_vec();
                    consumed += next;
                    self.on_transfer_chunk(&payload, out);
                }
                ChunkStep::Skip { next } => consumed += next,
            }
        }
        if consumed > 0 {
            self.buffer.drain(..consumed);
        }
    }

    /// End of stream: an open array or half-received object is discarded,
    /// never force-completed.
    pub fn finish_into(&mut self, _out: &mut Vec<Frame>) {
        if let Some(array) = self.array.take() {
            tracing::debug!(
                dispatched = array.dispatched,
                "stream ended with an unterminated JSON array, discarding remainder"
            );
        }
        if !self.partial.is_empty() {
            tracing::warn!(
                bytes = self.partial.len(),
                "stream ended inside a JSON object, discarding"
            );
            self.partial.clear();
        }
        if !self.buffer.is_empty() {
            tracing::warn!(
                bytes = self.buffer.len(),
                "stream ended inside a transfer chunk, discarding"
            );
            self.buffer.clear();
        }
        self.separator_pending = false;
    }

    /// Bytes held back across all internal buffers.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
            + self.partial.len()
            + self.array.as_ref().map_or(0, |array| array.text.len())
    }

    fn on_transfer_chunk(&mut self, payload: &[u8], out: &mut Vec<Frame>) {
        if self.partial.is_empty() {
            self.classify(payload, out);
            return;
        }
        let mut joined = std::mem::take(&mut self.partial);
        joined.extend_from_slice(payload);
        self.classify(&joined, out);
    }

    fn classify(&mut self, chunk: &[u8], out: &mut Vec<Frame>) {
        let mut rest = chunk;
        loop {
            rest = rest.trim_ascii();
            let Some(&first) = rest.first() else {
                return;
            };
            match first {
                b'[' => {
                    if self.array.is_some() {
                        tracing::warn!("nested array start in stream, restarting accumulator");
                    }
                    self.array = Some(ArrayAccumulator::opened());
                    self.separator_pending = false;
                    rest = &rest[1..];
                }
                b',' => {
                    if let Some(array) = self.array.as_mut() {
                        if array.needs_separator() {
                            array.text.push(b',');
                        }
                    }
                    self.separator_pending = true;
                    rest = &rest[1..];
                }
                b']' => {
                    self.close_array(out);
                    rest = &rest[1..];
                }
                _ => match self.take_object(rest, out) {
                    Some(used) => rest = &rest[used..],
                    None => return,
                },
            }
        }
    }

    /// Parse one JSON value at the head of `rest`. Returns the bytes consumed,
    /// or `None` when the remainder was buffered or dropped.
    fn take_object(&mut self, rest: &[u8], out: &mut Vec<Frame>) -> Option<usize> {
        let mut values = serde_json::Deserializer::from_slice(rest).into_iter::<Value>();
        match values.next() {
            Some(Ok(value)) => {
                let used = values.byte_offset();
                self.dispatch(value, &rest[..used], out);
                Some(used)
            }
            Some(Err(err)) if err.is_eof() => {
                if rest.len() > MAX_PARTIAL_OBJECT {
                    tracing::warn!(bytes = rest.len(), "partial JSON object too large, dropping");
                } else {
                    self.partial = rest.to_vec();
                }
                None
            }
            Some(Err(err)) => {
                tracing::warn!(
                    error = %err,
                    chunk = preview(&String::from_utf8_lossy(rest)),
                    "unparsable chunk in JSON array stream, skipping"
                );
                None
            }
            None => None,
        }
    }

    fn dispatch(&mut self, value: Value, raw: &[u8], out: &mut Vec<Frame>) {
        if let Some(array) = self.array.as_mut() {
            if array.needs_separator() {
                array.text.push(b',');
            }
            array.text.extend_from_slice(raw);
            array.dispatched += 1;
        }
        self.separator_pending = false;
        if value.is_object() {
            out.push(Frame::Object(value));
        } else {
            tracing::debug!(value = %value, "ignoring non-object array element");
        }
    }

    fn close_array(&mut self, out: &mut Vec<Frame>) {
        let Some(mut array) = self.array.take() else {
            tracing::warn!("array close without matching open, ignoring");
            return;
        };
        if self.separator_pending {
            // A trailing separator with nothing after it is not valid JSON.
            while matches!(array.text.last(), Some(b',') | Some(b' ' | b'\n' | b'\r' | b'\t')) {
                array.text.pop();
            }
            self.separator_pending = false;
        }
        array.text.push(b']');
        match serde_json::from_slice::<Vec<Value>>(&array.text) {
            Ok(elements) => {
                let total = elements.len();
                for element in elements.into_iter().skip(array.dispatched) {
                    if element.is_object() {
                        out.push(Frame::Object(element));
                    }
                }
                tracing::trace!(total, dispatched = array.dispatched, "JSON array closed");
            }
            Err(err) => {
                tracing::warn!(error = %err, "accumulated JSON array is unparsable, dropping");
            }
        }
    }
}

enum ChunkStep {
    /// A complete data chunk: payload at `start..start + len`, next chunk at `next`.
    Payload { start: usize, len: usize, next: usize },
    /// Terminal chunk, stray CRLF, or an unreadable header to resync past.
    Skip { next: usize },
}

/// Locate the next complete transfer chunk in `buffer`, or `None` if more
/// bytes are needed.
fn next_transfer_chunk(buffer: &[u8]) -> Option<ChunkStep> {
    let header_end = memmem::find(buffer, CRLF)?;
    let header = &buffer[..header_end];
    if header.trim_ascii().is_empty() {
        return Some(ChunkStep::Skip {
            next: header_end + CRLF.len(),
        });
    }
    let Some(len) = parse_chunk_size(header) else {
        tracing::warn!(
            header = preview(&String::from_utf8_lossy(header)),
            "invalid chunk size line, resyncing"
        );
        return Some(ChunkStep::Skip {
            next: header_end + CRLF.len(),
        });
    };
    let start = header_end + CRLF.len();
    if len == 0 {
        return Some(ChunkStep::Skip { next: start });
    }
    if len > MAX_PARTIAL_OBJECT {
        tracing::warn!(len, "chunk size exceeds limit, resyncing");
        return Some(ChunkStep::Skip { next: start });
    }
    let end = start.checked_add(len)?;
    let next = end.checked_add(CRLF.len())?;
    if buffer.len() < next {
        return None;
    }
    if &buffer[end..next] != CRLF {
        tracing::warn!(len, "chunk payload not followed by CRLF");
    }
    Some(ChunkStep::Payload { start, len, next })
}

fn parse_chunk_size(header: &[u8]) -> Option<usize> {
    let size = header.split(|&b| b == b';').next()?.trim_ascii();
    if size.is_empty() || size.len() > 16 {
        return None;
    }
    let text = std::str::from_utf8(size).ok()?;
    usize::from_str_radix(text, 16).ok()
}
