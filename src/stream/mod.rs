pub mod chunked;
pub mod lines;
pub mod normalizer;

use std::sync::Arc;

pub use chunked::ChunkedArrayDecoder;
pub use lines::LineDecoder;
pub use normalizer::{normalize_raw_event, EventNormalizer};

use crate::protocol::{Frame, FrameMode, NormalizedEvent, ProviderAdapter, RawEvent};

/// Byte-to-frame decoder, one variant per [`FrameMode`].
#[derive(Debug)]
pub enum ChunkDecoder {
    Lines(LineDecoder),
    ChunkedArray(ChunkedArrayDecoder),
}

impl ChunkDecoder {
    #[must_use]
    pub fn new(mode: FrameMode) -> Self {
        match mode {
            FrameMode::Lines => ChunkDecoder::Lines(LineDecoder::new()),
            FrameMode::ChunkedArray => ChunkDecoder::ChunkedArray(ChunkedArrayDecoder::new()),
        }
    }

    /// Feed one transport fragment; complete frames are appended to `out`.
    pub fn feed_into(&mut self, bytes: &[u8], out: &mut Vec<Frame>) {
        match self {
            ChunkDecoder::Lines(decoder) => decoder.feed_into(bytes, out),
            ChunkDecoder::ChunkedArray(decoder) => decoder.feed_into(bytes, out),
        }
    }

    /// Signal end of stream.
    pub fn finish_into(&mut self, out: &mut Vec<Frame>) {
        match self {
            ChunkDecoder::Lines(decoder) => decoder.finish_into(out),
            ChunkDecoder::ChunkedArray(decoder) => decoder.finish_into(out),
        }
    }

    #[must_use]
    pub fn buffered_len(&self) -> usize {
        match self {
            ChunkDecoder::Lines(decoder) => decoder.buffered_len(),
            ChunkDecoder::ChunkedArray(decoder) => decoder.buffered_len(),
        }
    }
}

/// Decoder, adapter and normalizer composed for one exchange.
///
/// Synchronous: bytes in, normalized events out. The exchange lifecycle
/// drives it from its task; tests drive it directly.
pub struct StreamPipeline {
    adapter: Arc<dyn ProviderAdapter>,
    decoder: ChunkDecoder,
    normalizer: EventNormalizer,
    frames: Vec<Frame>,
    raw: Vec<RawEvent>,
}

impl StreamPipeline {
    #[must_use]
    pub fn new(adapter: Arc<dyn ProviderAdapter>) -> Self {
        let decoder = ChunkDecoder::new(adapter.frame_mode());
        Self {
            adapter,
            decoder,
            normalizer: EventNormalizer::new(),
            frames: Vec::with_capacity(8),
            raw: Vec::with_capacity(8),
        }
    }

    /// Process one transport fragment.
    pub fn feed(&mut self, bytes: &[u8], out: &mut Vec<NormalizedEvent>) {
        self.decoder.feed_into(bytes, &mut self.frames);
        self.drain_frames(out);
    }

    /// Flush whatever the decoder still holds at end of stream.
    pub fn finish(&mut self, out: &mut Vec<NormalizedEvent>) {
        self.decoder.finish_into(&mut self.frames);
        self.drain_frames(out);
    }

    /// Pass a synthesized event through the same ordering gate.
    pub fn push_event(&mut self, event: NormalizedEvent, out: &mut Vec<NormalizedEvent>) {
        self.normalizer.push(event, out);
    }

    #[must_use]
    pub fn normalizer(&self) -> &EventNormalizer {
        &self.normalizer
    }

    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.decoder.buffered_len()
    }

    fn drain_frames(&mut self, out: &mut Vec<NormalizedEvent>) {
        for frame in self.frames.drain(..) {
            self.adapter.parse_frame(frame, &mut self.raw);
        }
        for raw in self.raw.drain(..) {
            self.normalizer.push_raw(raw, out);
        }
    }
}

impl std::fmt::Debug for StreamPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPipeline")
            .field("provider", &self.adapter.kind())
            .field("decoder", &self.decoder)
            .field("normalizer", &self.normalizer)
            .finish_non_exhaustive()
    }
}
