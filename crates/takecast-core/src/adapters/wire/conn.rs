//! Concrete [`Conn`] over any byte stream (TLS in production, an in-memory
//! duplex in tests).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::trace;

use crate::adapters::crypto::auth::auth_response;
use crate::adapters::crypto::KeyPair;
use crate::application::ports::Conn;
use crate::domain::cast_channel::{AuthChallenge, AuthResponse, CastMessage};
use crate::domain::error::Result;

use super::codec;

pub const DEFAULT_SOURCE_ID: &str = "receiver-0";
pub const DEFAULT_DESTINATION_ID: &str = "sender-0";

/// Certificate material every connection answers device-auth with.
#[derive(Clone)]
pub struct ConnCerts {
    pub intermediates: Arc<Vec<KeyPair>>,
    pub peer: Arc<KeyPair>,
    pub auth: Arc<KeyPair>,
}

/// Framed connection over a bidirectional byte stream.
pub struct CastConn<S> {
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
    certs: ConnCerts,
    closed: AtomicBool,
}

impl<S> CastConn<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(socket: S, certs: ConnCerts) -> Self {
        let (reader, writer) = tokio::io::split(socket);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            certs,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl<S> Conn for CastConn<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn receive(&self) -> Result<CastMessage> {
        let mut reader = self.reader.lock().await;
        let msg = codec::read_message(&mut *reader).await?;
        trace!(
            namespace = %msg.namespace,
            source = %msg.source_id,
            "received message"
        );
        Ok(msg)
    }

    async fn send(&self, mut msg: CastMessage) -> Result<()> {
        if msg.source_id.is_empty() {
            msg.source_id = DEFAULT_SOURCE_ID.into();
        }
        if msg.destination_id.is_empty() {
            msg.destination_id = DEFAULT_DESTINATION_ID.into();
        }
        trace!(
            namespace = %msg.namespace,
            destination = %msg.destination_id,
            "sending message"
        );
        let mut writer = self.writer.lock().await;
        codec::write_message(&mut *writer, &msg).await
    }

    fn auth(&self, challenge: &AuthChallenge) -> Result<AuthResponse> {
        auth_response(
            challenge,
            &self.certs.intermediates,
            &self.certs.peer,
            &self.certs.auth,
        )
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }
    }
}
