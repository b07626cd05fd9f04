//! Pure protocol data: no sockets, no crypto state, no tasks.

pub mod cast_channel;
pub mod error;
pub mod frame;
pub mod message;
pub mod offer;
pub mod status;
