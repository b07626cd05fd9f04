//! Frame reassembly and decryption.
//!
//! Opus payloads are one frame per packet (RFC 7587). VP8 payloads carry the
//! RFC 7741 payload descriptor: the S bit with partition index 0 opens a
//! frame, fragments are concatenated in arrival order, and the RTP marker
//! closes it. Completed frames get per-kind monotonic ids starting at 0,
//! which also seed the AES-CTR IV.

use std::collections::VecDeque;
use std::time::Duration;

use aes::cipher::{KeyIvInit, StreamCipher};
use tracing::trace;

use crate::domain::error::{Error, Result};
use crate::domain::frame::{Frame, MediaKind};
use crate::domain::offer::OfferStream;

use super::packet::RtpPacket;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes192Ctr = ctr::Ctr128BE<aes::Aes192>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

const DEFAULT_AUDIO_CLOCK: u32 = 48_000;
const DEFAULT_VIDEO_CLOCK: u32 = 90_000;

/// Session AES key; 16, 24, or 32 bytes.
#[derive(Clone)]
pub enum AesKey {
    Aes128([u8; 16]),
    Aes192([u8; 24]),
    Aes256([u8; 32]),
}

impl AesKey {
    pub fn new(bytes: &[u8]) -> Result<Self> {
        match bytes.len() {
            16 => Ok(Self::Aes128(bytes.try_into().expect("length checked"))),
            24 => Ok(Self::Aes192(bytes.try_into().expect("length checked"))),
            32 => Ok(Self::Aes256(bytes.try_into().expect("length checked"))),
            n => Err(Error::Protocol(format!("bad key: {n} bytes"))),
        }
    }

    fn apply_ctr(&self, iv: &[u8; 16], data: &mut [u8]) {
        match self {
            Self::Aes128(key) => Aes128Ctr::new(key.into(), iv.into()).apply_keystream(data),
            Self::Aes192(key) => Aes192Ctr::new(key.into(), iv.into()).apply_keystream(data),
            Self::Aes256(key) => Aes256Ctr::new(key.into(), iv.into()).apply_keystream(data),
        }
    }
}

/// IV for frame `id`: big-endian frame id in bytes 8..12 of a zeroed 16-byte
/// buffer, then the whole buffer XORed with the mask.
pub fn derive_iv(mask: &[u8; 16], frame_id: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[8..12].copy_from_slice(&(frame_id as u32).to_be_bytes());
    for (b, m) in iv.iter_mut().zip(mask) {
        *b ^= m;
    }
    iv
}

/// AES-CTR over a frame payload in place; symmetric, so it both encrypts and
/// decrypts.
pub fn crypt_frame(key: &AesKey, mask: &[u8; 16], frame_id: u64, data: &mut [u8]) {
    key.apply_ctr(&derive_iv(mask, frame_id), data);
}

/// Accepts RTP packets in arrival order and produces decrypted frames.
pub struct Framer {
    key: AesKey,
    iv_mask: [u8; 16],
    audio: Option<StreamFramer>,
    video: Option<StreamFramer>,
}

impl Framer {
    pub fn new(
        key: AesKey,
        iv_mask: [u8; 16],
        audio: Option<&OfferStream>,
        video: Option<&OfferStream>,
    ) -> Self {
        Self {
            key,
            iv_mask,
            audio: audio.map(|s| {
                StreamFramer::new(MediaKind::Audio, s, DEFAULT_AUDIO_CLOCK)
            }),
            video: video.map(|s| {
                StreamFramer::new(MediaKind::Video, s, DEFAULT_VIDEO_CLOCK)
            }),
        }
    }

    /// Buffer one RTP packet. Packets for unknown SSRCs are dropped.
    pub fn write(&mut self, packet: &RtpPacket) -> Result<()> {
        let stream = match (&mut self.audio, &mut self.video) {
            (Some(a), _) if a.ssrc == packet.ssrc => a,
            (_, Some(v)) if v.ssrc == packet.ssrc => v,
            _ => {
                trace!(ssrc = packet.ssrc, "dropping packet for unknown ssrc");
                return Ok(());
            }
        };
        stream.write(packet)
    }

    /// Pop the next complete frame, decrypted, or `None` when nothing is
    /// ready. Audio drains before video.
    pub fn read(&mut self) -> Option<Frame> {
        for stream in [self.audio.as_mut(), self.video.as_mut()].into_iter().flatten() {
            if let Some(mut frame) = stream.pop() {
                crypt_frame(&self.key, &self.iv_mask, frame.id, &mut frame.data);
                return Some(frame);
            }
        }
        None
    }
}

struct StreamFramer {
    kind: MediaKind,
    ssrc: u32,
    ticks_per_second: u32,
    next_id: u64,
    last_emitted_ts: Option<u32>,
    /// VP8 fragments of the frame under assembly.
    pending: Vec<u8>,
    pending_ts: u32,
    started: bool,
    complete: VecDeque<(Vec<u8>, u32)>,
}

impl StreamFramer {
    fn new(kind: MediaKind, stream: &OfferStream, default_clock: u32) -> Self {
        Self {
            kind,
            ssrc: stream.ssrc,
            ticks_per_second: stream.ticks_per_second().unwrap_or(default_clock),
            next_id: 0,
            last_emitted_ts: None,
            pending: Vec::new(),
            pending_ts: 0,
            started: false,
            complete: VecDeque::new(),
        }
    }

    fn write(&mut self, packet: &RtpPacket) -> Result<()> {
        match self.kind {
            MediaKind::Audio => {
                // One Opus frame per packet.
                self.complete
                    .push_back((packet.payload.clone(), packet.timestamp));
                Ok(())
            }
            MediaKind::Video => self.write_vp8(packet),
        }
    }

    fn write_vp8(&mut self, packet: &RtpPacket) -> Result<()> {
        let (start, payload) = strip_vp8_descriptor(&packet.payload)?;
        if start {
            if self.started {
                trace!(ssrc = self.ssrc, "discarding incomplete video frame");
            }
            self.pending.clear();
            self.pending_ts = packet.timestamp;
            self.started = true;
        } else if !self.started {
            // Mid-frame fragment without a start; wait for the next frame.
            return Ok(());
        }
        self.pending.extend_from_slice(payload);
        if packet.marker {
            self.complete
                .push_back((std::mem::take(&mut self.pending), self.pending_ts));
            self.started = false;
        }
        Ok(())
    }

    fn pop(&mut self) -> Option<Frame> {
        let (data, ts) = self.complete.pop_front()?;
        let duration = match self.last_emitted_ts {
            Some(prev) => {
                let delta = ts.wrapping_sub(prev) as u64;
                Duration::from_nanos(delta * 1_000_000_000 / self.ticks_per_second as u64)
            }
            None => Duration::ZERO,
        };
        self.last_emitted_ts = Some(ts);
        let id = self.next_id;
        self.next_id += 1;
        Some(Frame {
            id,
            kind: self.kind,
            data,
            duration,
        })
    }
}

/// Strip the RFC 7741 payload descriptor; returns (frame-start, payload).
fn strip_vp8_descriptor(payload: &[u8]) -> Result<(bool, &[u8])> {
    let (&first, mut rest) = payload
        .split_first()
        .ok_or_else(|| Error::protocol("empty VP8 payload"))?;
    let extended = first & 0x80 != 0;
    let start = first & 0x10 != 0 && first & 0x07 == 0;
    if extended {
        let (&ext, tail) = rest
            .split_first()
            .ok_or_else(|| Error::protocol("truncated VP8 descriptor"))?;
        rest = tail;
        if ext & 0x80 != 0 {
            // PictureID, one or two bytes.
            let (&pid, tail) = rest
                .split_first()
                .ok_or_else(|| Error::protocol("truncated VP8 picture id"))?;
            rest = tail;
            if pid & 0x80 != 0 {
                rest = rest
                    .split_first()
                    .ok_or_else(|| Error::protocol("truncated VP8 picture id"))?
                    .1;
            }
        }
        if ext & 0x40 != 0 {
            rest = rest
                .split_first()
                .ok_or_else(|| Error::protocol("truncated VP8 TL0PICIDX"))?
                .1;
        }
        if ext & 0x30 != 0 {
            rest = rest
                .split_first()
                .ok_or_else(|| Error::protocol("truncated VP8 TID/KEYIDX"))?
                .1;
        }
    }
    Ok((start, rest))
}
