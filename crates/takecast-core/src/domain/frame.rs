//! Decoded media units handed to the downstream consumer.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// A decrypted, reassembled media frame.
///
/// Ids are per-kind monotonic counters starting at 0; audio and video run on
/// independent clocks.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: u64,
    pub kind: MediaKind,
    pub data: Vec<u8>,
    /// Derived from RTP timestamp deltas over the stream time base.
    pub duration: Duration,
}

impl Frame {
    /// VP8 keyframe test: tag byte bit 0 clear means keyframe.
    pub fn is_keyframe(&self) -> bool {
        match self.kind {
            MediaKind::Video => self.data.first().is_some_and(|b| b & 0x1 == 0),
            MediaKind::Audio => false,
        }
    }
}
