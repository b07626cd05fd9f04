//! Mirroring session description: the webrtc-namespace OFFER and ANSWER.

use serde::{Deserialize, Serialize};

pub const STREAM_TYPE_AUDIO: &str = "audio_source";
pub const STREAM_TYPE_VIDEO: &str = "video_source";

/// Body of an `OFFER` message: `{seqNum, offer: {...}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebRtcOfferPayload {
    pub seq_num: i64,
    pub offer: Offer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Offer {
    /// "mirroring" or "remoting".
    pub cast_mode: String,
    pub receiver_get_status: bool,
    pub supported_streams: Vec<OfferStream>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfferStream {
    /// "audio_source" or "video_source".
    #[serde(rename = "type")]
    pub stream_type: String,
    pub index: u32,
    pub channels: u32,
    pub rtp_profile: String,
    pub rtp_payload_type: u32,
    pub ssrc: u32,
    /// Hex-encoded AES key; identical across all streams of one offer.
    pub aes_key: String,
    /// Hex-encoded 16-byte IV mask; identical across all streams.
    pub aes_iv_mask: String,
    /// "1/N": N RTP ticks per second.
    pub time_base: String,
    pub sample_rate: f64,
    /// Milliseconds.
    pub target_delay: u32,
    pub receiver_rtcp_event_log: bool,
    pub bit_rate: u32,
    pub codec_name: String,
    pub resolutions: Vec<Resolution>,
    pub max_frame_rate: String,
    pub profile: String,
    pub protection: String,
    pub max_bit_rate: u32,
    pub level: String,
    pub error_recovery_mode: String,
}

impl OfferStream {
    /// Ticks per second from the `"1/N"` time base, if well-formed.
    pub fn ticks_per_second(&self) -> Option<u32> {
        let rest = self.time_base.strip_prefix("1/")?;
        rest.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// The receiver's half of the session description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Answer {
    pub udp_port: u16,
    /// Offer indexes of the selected streams.
    pub send_indexes: Vec<u32>,
    /// Receiver-side SSRC per selected stream: offer ssrc + 1.
    pub ssrcs: Vec<u32>,
}

/// Body of the `ANSWER` reply, echoing the offer's `seqNum`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnswerResponse {
    #[serde(rename = "type")]
    pub message_type: String,
    pub seq_num: i64,
    /// "ok" or "error".
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<Answer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AnswerError>,
}

/// Mirroring setup failures use code 88.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerError {
    pub code: i32,
    pub description: String,
}
