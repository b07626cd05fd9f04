//! Framed Cast V2 wire I/O: length-prefixed protobuf frames plus the
//! response builder.

pub mod builder;
pub mod codec;
pub mod conn;

pub use builder::MessageBuilder;
pub use conn::{CastConn, ConnCerts};
