//! Line-mode chunk decoding for the SSE-style providers.
//!
//! Transport fragments arrive with arbitrary boundaries; complete lines are
//! emitted verbatim (without the `\n`) and the unterminated tail is kept for
//! the next fragment. Splitting happens on raw bytes, so a multi-byte UTF-8
//! sequence cut by the transport is reassembled before any text conversion.
use memchr::memchr_iter;

use crate::protocol::Frame;

/// Incremental line splitter.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    read_offset: usize,
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and append every completed line to `out`.
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut Vec<Frame>) {
        self.buffer.extend_from_slice(chunk);
        let scan_start = self.buffer.len() - chunk.len();
        let mut processed_up_to = self.read_offset;
        for rel_pos in memchr_iter(b'\n', &self.buffer[scan_start..]) {
            let line_end = scan_start + rel_pos;
            out.push(Frame::Line(line_text(&self.buffer[processed_up_to..line_end])));
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush an unterminated trailing line at end of stream.
    pub fn finish_into(&mut self, out: &mut Vec<Frame>) {
        let residue = &self.buffer[self.read_offset..];
        if !residue.is_empty() {
            out.push(Frame::Line(line_text(residue)));
        }
        self.buffer.clear();
        self.read_offset = 0;
    }

    /// Bytes held back waiting for a newline.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() - self.read_offset
    }
}

fn line_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(err) => {
            tracing::warn!(error = %err, "invalid UTF-8 in stream line, replacing");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
