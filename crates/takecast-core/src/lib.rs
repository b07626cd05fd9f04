//! takecast-core — a Google Cast receiver's protocol engine.
//!
//! # Architecture (Clean Architecture)
//!
//! - **domain**: message taxonomy, status snapshots, session descriptions,
//!   frames (no I/O).
//! - **application**: receiver registry, per-connection channel, application
//!   contract + the mirroring application.
//! - **adapters**: Cast V2 wire codec (protobuf over a length-prefixed TLS
//!   socket), certificate chain + device auth (rcgen/rsa), RTP ingest with
//!   AES-CTR decryption, mDNS advertisement, TLS server.

pub mod adapters;
pub mod application;
pub mod domain;
