//! Port traits (interfaces) the use cases depend on.
//!
//! Adapters implement these; the receiver and channel never reference a TLS
//! socket or rustls directly.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::cast_channel::{AuthChallenge, AuthResponse, CastMessage};
use crate::domain::error::Result;
use crate::domain::message::RequestMessage;

// ---------------------------------------------------------------------------
// Conn (framed socket abstraction)
// ---------------------------------------------------------------------------

/// One framed, authenticated control connection.
#[async_trait]
pub trait Conn: Send + Sync {
    /// Receive the next frame. Blocks until a frame, an I/O error, or close.
    async fn receive(&self) -> Result<CastMessage>;

    /// Send a frame. Empty source/destination are replaced with the defaults
    /// (`receiver-0` / `sender-0`). Callers serialize writes per connection.
    async fn send(&self, msg: CastMessage) -> Result<()>;

    /// Sign a sender's device-auth challenge with this connection's chain.
    fn auth(&self, challenge: &AuthChallenge) -> Result<AuthResponse>;

    /// Close the underlying socket; idempotent.
    async fn close(&self);
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Static per-application data. The running instance carries a session id;
/// a fresh immutable record is published on every state change.
#[derive(Debug, Clone, Default)]
pub struct ApplicationMetadata {
    /// App ids this application answers to; unique across the receiver.
    pub app_ids: Vec<String>,
    /// Empty until started; UUIDv4 with dashes removed while running.
    pub session_id: String,
    pub display_name: String,
    pub status_text: String,
    pub supported_namespaces: Vec<String>,
}

/// A namespaced handler registered with the receiver, addressable by app id.
#[async_trait]
pub trait Application: Send + Sync {
    /// Cheap and lock-free from the caller's perspective.
    fn metadata(&self) -> Arc<ApplicationMetadata>;

    /// Fast and non-blocking; background work is the app's responsibility.
    /// Must not error when already started.
    async fn start(&self, app_id: &str, params: Option<&Value>) -> Result<()>;

    /// Must not error when already stopped.
    async fn stop(&self) -> Result<()>;

    /// Process one message forwarded by a channel.
    async fn handle_message(&self, conn: &dyn Conn, msg: &RequestMessage) -> Result<()>;
}
