//! Datagram classification and RTP/RTCP parsing.

use crate::domain::error::{Error, Result};

/// A classified datagram.
#[derive(Debug, Clone)]
pub enum Packet {
    Rtp(RtpPacket),
    /// Zero or more records of a compound RTCP packet.
    Rtcp(Vec<RtcpRecord>),
    /// Neither RTP nor RTCP; dropped.
    Ignored,
}

impl Packet {
    /// Classify by the first two bytes: RTP iff byte 0 ∈ [128, 191] and
    /// byte 1 ∈ [0, 191]; RTCP iff byte 0 ∈ [128, 191] and byte 1 ∈ [192, 223].
    pub fn classify(buf: &[u8]) -> Result<Packet> {
        if buf.len() < 2 || buf[0] < 128 || buf[0] > 191 {
            return Ok(Packet::Ignored);
        }
        if (192..=223).contains(&buf[1]) {
            return Ok(Packet::Rtcp(parse_rtcp(buf)?));
        }
        Ok(Packet::Rtp(RtpPacket::parse(buf)?))
    }
}

/// Parsed RTP packet (RFC 3550 header).
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 12 {
            return Err(Error::protocol("RTP packet shorter than fixed header"));
        }
        let b0 = buf[0];
        if b0 >> 6 != 2 {
            return Err(Error::Protocol(format!("unsupported RTP version {}", b0 >> 6)));
        }
        let padding = b0 & 0x20 != 0;
        let extension = b0 & 0x10 != 0;
        let csrc_count = b0 & 0x0f;
        let marker = buf[1] & 0x80 != 0;
        let payload_type = buf[1] & 0x7f;
        let sequence = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let mut offset = 12 + csrc_count as usize * 4;
        if buf.len() < offset {
            return Err(Error::protocol("RTP packet truncated in CSRC list"));
        }
        if extension {
            if buf.len() < offset + 4 {
                return Err(Error::protocol("RTP packet truncated in extension header"));
            }
            let words = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
            offset += 4 + words * 4;
            if buf.len() < offset {
                return Err(Error::protocol("RTP packet truncated in extension body"));
            }
        }
        let mut end = buf.len();
        if padding {
            let pad = buf[end - 1] as usize;
            if pad == 0 || offset + pad > end {
                return Err(Error::protocol("bad RTP padding length"));
            }
            end -= pad;
        }
        Ok(Self {
            padding,
            extension,
            csrc_count,
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload: buf[offset..end].to_vec(),
        })
    }
}

/// One record of a compound RTCP packet; contents are not interpreted.
#[derive(Debug, Clone, Copy)]
pub struct RtcpRecord {
    pub packet_type: u8,
    /// Record length in bytes, header included.
    pub length: usize,
}

fn parse_rtcp(buf: &[u8]) -> Result<Vec<RtcpRecord>> {
    let mut records = Vec::new();
    let mut rest = buf;
    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(Error::protocol("RTCP record shorter than header"));
        }
        if rest[0] >> 6 != 2 {
            return Err(Error::protocol("unsupported RTCP version"));
        }
        let length = (u16::from_be_bytes([rest[2], rest[3]]) as usize + 1) * 4;
        if rest.len() < length {
            return Err(Error::protocol("RTCP record truncated"));
        }
        records.push(RtcpRecord {
            packet_type: rest[1],
            length,
        });
        rest = &rest[length..];
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp_bytes(payload_type: u8, seq: u16, ts: u32, ssrc: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0x80, payload_type];
        buf.extend_from_slice(&seq.to_be_bytes());
        buf.extend_from_slice(&ts.to_be_bytes());
        buf.extend_from_slice(&ssrc.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn classifies_by_leading_bytes() {
        // payload type 96 → RTP
        let rtp = rtp_bytes(96, 1, 2, 3, b"x");
        assert!(matches!(Packet::classify(&rtp).unwrap(), Packet::Rtp(_)));

        // packet type 200 (sender report) → RTCP
        let rtcp = [0x80, 200, 0x00, 0x00];
        assert!(matches!(
            Packet::classify(&rtcp).unwrap(),
            Packet::Rtcp(records) if records.len() == 1
        ));

        // Not in the RTP range → ignored.
        assert!(matches!(
            Packet::classify(b"GET / HTTP/1.1").unwrap(),
            Packet::Ignored
        ));
        assert!(matches!(Packet::classify(&[0x80]).unwrap(), Packet::Ignored));
    }

    #[test]
    fn parses_header_fields() {
        let buf = rtp_bytes(0x7f, 0xBEEF, 0xDEADBEEF, 42, b"payload");
        let pkt = RtpPacket::parse(&buf).unwrap();
        assert_eq!(pkt.payload_type, 0x7f);
        assert_eq!(pkt.sequence, 0xBEEF);
        assert_eq!(pkt.timestamp, 0xDEADBEEF);
        assert_eq!(pkt.ssrc, 42);
        assert_eq!(pkt.payload, b"payload");
        assert!(!pkt.marker);
    }

    #[test]
    fn strips_padding_and_extension() {
        // Extension with one word, two bytes of padding.
        let mut buf = vec![0xb0, 96];
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&7u32.to_be_bytes());
        buf.extend_from_slice(&[0xbe, 0xde, 0x00, 0x01]); // extension header
        buf.extend_from_slice(&[0, 0, 0, 0]); // extension word
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&[0x00, 0x02]); // padding
        let pkt = RtpPacket::parse(&buf).unwrap();
        assert_eq!(pkt.payload, b"data");
    }

    #[test]
    fn malformed_packets_error() {
        assert!(RtpPacket::parse(&[0x80, 96, 0]).is_err());
        // Version 1
        let buf = rtp_bytes(96, 0, 0, 0, b"");
        let mut bad = buf.clone();
        bad[0] = 0x40;
        assert!(RtpPacket::parse(&bad).is_err());
    }
}
