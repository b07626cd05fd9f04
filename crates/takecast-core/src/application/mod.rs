//! Use cases: the receiver registry, per-connection channels, and the
//! application contract with its canonical mirroring implementation.

pub mod channel;
pub mod mirror;
pub mod ports;
pub mod receiver;

pub use channel::Channel;
pub use mirror::{MirrorApplication, MirrorConfig};
pub use ports::{Application, ApplicationMetadata, Conn};
pub use receiver::Receiver;
