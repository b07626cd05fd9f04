//! A mirroring session: one UDP socket plus the AES-CTR material derived from
//! the sender's OFFER.
//!
//! Ownership transfers to a consumer task after creation; closing cancels the
//! session token and unblocks the packet reader.

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::domain::error::{Error, Result};
use crate::domain::offer::{Answer, Offer, OfferStream, STREAM_TYPE_AUDIO, STREAM_TYPE_VIDEO};

use super::framer::{AesKey, Framer};
use super::packet::Packet;

/// MTU-sized scratch for datagram reads.
pub const SCRATCH_SIZE: usize = 1460;

pub struct Session {
    pub id: String,
    pub offer: Offer,
    pub answer: Answer,
    /// First `audio_source` stream of the offer, if any.
    pub audio: Option<OfferStream>,
    /// First `video_source` stream of the offer, if any.
    pub video: Option<OfferStream>,
    key: AesKey,
    iv_mask: [u8; 16],
    socket: UdpSocket,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("audio", &self.audio)
            .field("video", &self.video)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Validate the offer, bind a UDP socket on a kernel-chosen port, and
    /// build the answer.
    pub async fn start(id: String, offer: Offer) -> Result<Self> {
        let streams = &offer.supported_streams;
        let first = streams
            .first()
            .ok_or_else(|| Error::protocol("offer has no streams"))?;
        // Every stream must agree on key material.
        for stream in streams {
            if stream.aes_key != first.aes_key || stream.aes_iv_mask != first.aes_iv_mask {
                return Err(Error::protocol("mismatched key/salt"));
            }
        }
        let key_bytes =
            hex::decode(&first.aes_key).map_err(|e| Error::Protocol(format!("bad key: {e}")))?;
        let key = AesKey::new(&key_bytes)?;
        let mask_bytes = hex::decode(&first.aes_iv_mask)
            .map_err(|e| Error::Protocol(format!("bad iv: {e}")))?;
        let iv_mask: [u8; 16] = mask_bytes
            .try_into()
            .map_err(|_| Error::protocol("bad iv: mask must be 16 bytes"))?;

        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        let mut answer = Answer {
            udp_port: socket.local_addr()?.port(),
            ..Answer::default()
        };

        // First audio and first video stream win; others are ignored.
        let mut audio: Option<OfferStream> = None;
        let mut video: Option<OfferStream> = None;
        for (index, stream) in streams.iter().enumerate() {
            if stream.stream_type == STREAM_TYPE_AUDIO && audio.is_none() {
                audio = Some(stream.clone());
            } else if stream.stream_type == STREAM_TYPE_VIDEO && video.is_none() {
                video = Some(stream.clone());
            } else {
                continue;
            }
            answer.send_indexes.push(index as u32);
            answer.ssrcs.push(stream.ssrc.wrapping_add(1));
        }

        Ok(Self {
            id,
            offer,
            answer,
            audio,
            video,
            key,
            iv_mask,
            socket,
            cancel: CancellationToken::new(),
        })
    }

    /// A framer wired to this session's streams and key material.
    pub fn framer(&self) -> Framer {
        Framer::new(
            self.key.clone(),
            self.iv_mask,
            self.audio.as_ref(),
            self.video.as_ref(),
        )
    }

    /// Receive and classify one datagram; `scratch` is reused across reads.
    pub async fn recv_packet(&self, scratch: &mut Vec<u8>) -> Result<Packet> {
        if scratch.len() < SCRATCH_SIZE {
            scratch.resize(SCRATCH_SIZE, 0);
        }
        let n = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            res = self.socket.recv(scratch) => res?,
        };
        Packet::classify(&scratch[..n])
    }

    pub fn local_port(&self) -> u16 {
        self.answer.udp_port
    }

    /// Cancel the session; the packet reader observes [`Error::Cancelled`].
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(stream_type: &str, index: u32, ssrc: u32) -> OfferStream {
        OfferStream {
            stream_type: stream_type.into(),
            index,
            ssrc,
            aes_key: hex::encode([7u8; 16]),
            aes_iv_mask: hex::encode([9u8; 16]),
            time_base: "1/48000".into(),
            ..OfferStream::default()
        }
    }

    fn offer(streams: Vec<OfferStream>) -> Offer {
        Offer {
            cast_mode: "mirroring".into(),
            receiver_get_status: false,
            supported_streams: streams,
        }
    }

    #[tokio::test]
    async fn selects_first_audio_and_video_streams() {
        let session = Session::start(
            "s1".into(),
            offer(vec![
                stream(STREAM_TYPE_AUDIO, 0, 100),
                stream(STREAM_TYPE_VIDEO, 1, 200),
                stream(STREAM_TYPE_AUDIO, 2, 300),
                stream("data_source", 3, 400),
            ]),
        )
        .await
        .unwrap();

        assert!(session.answer.udp_port > 0);
        assert_eq!(session.answer.send_indexes, vec![0, 1]);
        assert_eq!(session.answer.ssrcs, vec![101, 201]);
        assert_eq!(session.audio.as_ref().unwrap().ssrc, 100);
        assert_eq!(session.video.as_ref().unwrap().ssrc, 200);
    }

    #[tokio::test]
    async fn mismatched_key_material_fails() {
        let mut second = stream(STREAM_TYPE_VIDEO, 1, 200);
        second.aes_key = hex::encode([8u8; 16]);
        let err = Session::start(
            "s1".into(),
            offer(vec![stream(STREAM_TYPE_AUDIO, 0, 100), second]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Protocol(msg) if msg.contains("mismatched key/salt")));
    }

    #[tokio::test]
    async fn bad_hex_key_fails() {
        let mut bad = stream(STREAM_TYPE_AUDIO, 0, 100);
        bad.aes_key = "zz".into();
        let err = Session::start("s1".into(), offer(vec![bad])).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn close_unblocks_reader() {
        let session = Session::start(
            "s1".into(),
            offer(vec![stream(STREAM_TYPE_AUDIO, 0, 100)]),
        )
        .await
        .unwrap();
        session.close();
        let mut scratch = Vec::new();
        let err = session.recv_packet(&mut scratch).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn datagrams_round_trip_through_socket() {
        let session = Session::start(
            "s1".into(),
            offer(vec![stream(STREAM_TYPE_AUDIO, 0, 100)]),
        )
        .await
        .unwrap();

        let sender = tokio::net::UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let mut rtp = vec![0x80u8, 96, 0, 1];
        rtp.extend_from_slice(&960u32.to_be_bytes());
        rtp.extend_from_slice(&100u32.to_be_bytes());
        rtp.extend_from_slice(b"payload");
        sender
            .send_to(&rtp, ("127.0.0.1", session.local_port()))
            .await
            .unwrap();

        let mut scratch = Vec::new();
        let packet = session.recv_packet(&mut scratch).await.unwrap();
        match packet {
            Packet::Rtp(p) => {
                assert_eq!(p.ssrc, 100);
                assert_eq!(p.payload, b"payload");
            }
            other => panic!("expected RTP, got {other:?}"),
        }
    }
}
