//! The canonical mirroring application: answers webrtc OFFERs with a live
//! [`Session`] and hands it to an out-of-band consumer.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::adapters::media::Session;
use crate::adapters::wire::MessageBuilder;
use crate::domain::error::{Error, Result};
use crate::domain::message::{RequestMessage, RequestPayload, NAMESPACE_REMOTING, NAMESPACE_WEBRTC};
use crate::domain::offer::{AnswerError, AnswerResponse};

use super::ports::{Application, ApplicationMetadata, Conn};

pub const APP_ID: &str = "0F5096E8";
pub const AUDIO_ONLY_APP_ID: &str = "85CDB22F";

const ANSWER_ERROR_CODE: i32 = 88;

/// Receives each established session; invoked asynchronously.
pub type SessionCallback = Arc<dyn Fn(Arc<Session>) + Send + Sync>;

#[derive(Default)]
pub struct MirrorConfig {
    /// Defaults to the mirroring + audio-only ids.
    pub app_ids: Vec<String>,
    /// Defaults to "TakeCast Mirror".
    pub display_name: String,
    /// Defaults to the webrtc + remoting namespaces.
    pub supported_namespaces: Vec<String>,
    pub on_session: Option<SessionCallback>,
}

pub struct MirrorApplication {
    app_ids: Vec<String>,
    display_name: String,
    supported_namespaces: Vec<String>,
    on_session: Option<SessionCallback>,
    /// Fresh immutable record on every state change; reads are lock-cheap.
    metadata: RwLock<Arc<ApplicationMetadata>>,
    session: Mutex<Option<Arc<Session>>>,
}

impl MirrorApplication {
    pub fn new(config: MirrorConfig) -> Arc<Self> {
        let app_ids = if config.app_ids.is_empty() {
            vec![APP_ID.to_string(), AUDIO_ONLY_APP_ID.to_string()]
        } else {
            config.app_ids
        };
        let display_name = if config.display_name.is_empty() {
            "TakeCast Mirror".to_string()
        } else {
            config.display_name
        };
        let supported_namespaces = if config.supported_namespaces.is_empty() {
            vec![NAMESPACE_WEBRTC.to_string(), NAMESPACE_REMOTING.to_string()]
        } else {
            config.supported_namespaces
        };
        let app = Self {
            metadata: RwLock::new(Arc::new(ApplicationMetadata::default())),
            session: Mutex::new(None),
            app_ids,
            display_name,
            supported_namespaces,
            on_session: config.on_session,
        };
        *app.metadata.write().expect("metadata lock poisoned") =
            Arc::new(app.fresh_metadata(String::new()));
        Arc::new(app)
    }

    fn fresh_metadata(&self, session_id: String) -> ApplicationMetadata {
        ApplicationMetadata {
            app_ids: self.app_ids.clone(),
            session_id,
            display_name: self.display_name.clone(),
            status_text: "Ready To Cast".into(),
            supported_namespaces: self.supported_namespaces.clone(),
        }
    }

    fn publish_metadata(&self, session_id: String) {
        *self.metadata.write().expect("metadata lock poisoned") =
            Arc::new(self.fresh_metadata(session_id));
    }
}

#[async_trait]
impl Application for MirrorApplication {
    fn metadata(&self) -> Arc<ApplicationMetadata> {
        Arc::clone(&self.metadata.read().expect("metadata lock poisoned"))
    }

    async fn start(&self, _app_id: &str, _params: Option<&Value>) -> Result<()> {
        // Holding the session lock serializes start/stop with OFFER handling.
        let _slot = self.session.lock().await;
        if !self.metadata().session_id.is_empty() {
            return Ok(());
        }
        let session_id = Uuid::new_v4().simple().to_string();
        self.publish_metadata(session_id);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut slot = self.session.lock().await;
        if self.metadata().session_id.is_empty() {
            return Ok(());
        }
        if let Some(session) = slot.take() {
            session.close();
        }
        self.publish_metadata(String::new());
        Ok(())
    }

    async fn handle_message(&self, conn: &dyn Conn, msg: &RequestMessage) -> Result<()> {
        let offer = match &msg.payload {
            RequestPayload::WebRtcOffer(offer) => offer,
            _ => {
                debug!(
                    namespace = %msg.raw.namespace,
                    message_type = %msg.header.message_type,
                    "mirror ignoring message"
                );
                return Ok(());
            }
        };

        let created: Result<Arc<Session>> = async {
            let mut slot = self.session.lock().await;
            if slot.is_some() {
                return Err(Error::state("session already exists"));
            }
            let session_id = self.metadata().session_id.clone();
            let session = Arc::new(Session::start(session_id, offer.offer.clone()).await?);
            *slot = Some(Arc::clone(&session));
            Ok(session)
        }
        .await;

        let mut response = AnswerResponse {
            message_type: "ANSWER".into(),
            seq_num: offer.seq_num,
            ..AnswerResponse::default()
        };
        match created {
            Ok(session) => {
                response.result = "ok".into();
                response.answer = Some(session.answer.clone());
                if let Some(on_session) = &self.on_session {
                    let on_session = Arc::clone(on_session);
                    tokio::spawn(async move { on_session(session) });
                }
            }
            Err(e) => {
                response.result = "error".into();
                response.error = Some(AnswerError {
                    code: ANSWER_ERROR_CODE,
                    description: e.to_string(),
                });
            }
        }
        let reply = MessageBuilder::new()
            .apply_received(&msg.raw)
            .json_payload(&response)?
            .build();
        conn.send(reply).await
    }
}
