//! Encrypted RTP ingest: datagram demux, frame reassembly, AES-CTR.

pub mod framer;
pub mod packet;
pub mod session;

pub use framer::{AesKey, Framer};
pub use packet::{Packet, RtpPacket};
pub use session::Session;
