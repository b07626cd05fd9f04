//! Process-wide receiver registry: registered applications, the current
//! status snapshot, and its subscribers.
//!
//! The status is versioned by replacement: mutations build a fresh
//! [`ReceiverStatus`] behind an `Arc` and broadcast it non-blocking to every
//! subscriber. Readers clone the pointer, never the contents.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapters::wire::MessageBuilder;
use crate::domain::cast_channel::{AuthError, DeviceAuthMessage};
use crate::domain::error::{Error, Result};
use crate::domain::message::{unmarshal_request_message, RequestMessage, RequestPayload};
use crate::domain::status::{ApplicationStatus, NamespaceEntry, ReceiverStatus};

use super::channel::Channel;
use super::ports::{Application, Conn};

/// Handle for removing a status listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct Receiver {
    inner: RwLock<Inner>,
    cancel: CancellationToken,
}

struct Inner {
    apps: HashMap<String, Arc<dyn Application>>,
    status: Arc<ReceiverStatus>,
    listeners: HashMap<u64, mpsc::Sender<Arc<ReceiverStatus>>>,
    next_listener: u64,
}

impl Receiver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner {
                apps: HashMap::new(),
                status: Arc::new(ReceiverStatus::initial()),
                listeners: HashMap::new(),
                next_listener: 0,
            }),
            cancel: CancellationToken::new(),
        })
    }

    /// Perform the handshake on a fresh connection and wrap it in a channel.
    ///
    /// The handshake accepts either a device-auth request followed by a
    /// CONNECT, or a CONNECT directly; anything else is a protocol error.
    /// The connection is closed on every failure path; afterwards closing the
    /// channel closes it.
    pub async fn connect_channel(
        self: Arc<Self>,
        ctx: &CancellationToken,
        conn: Arc<dyn Conn>,
    ) -> Result<Arc<Channel>> {
        let result = tokio::select! {
            _ = ctx.cancelled() => Err(Error::Cancelled),
            _ = self.cancel.cancelled() => Err(Error::Closed),
            res = self.handshake(&conn) => res,
        };
        match result {
            Ok(connect_msg) => Ok(Channel::new(self, conn, connect_msg)),
            Err(e) => {
                conn.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(&self, conn: &Arc<dyn Conn>) -> Result<RequestMessage> {
        let mut msg = unmarshal_request_message(conn.receive().await?)?;
        if let RequestPayload::DeviceAuth(auth_msg) = &msg.payload {
            debug!("received device auth request");
            let challenge = auth_msg
                .challenge
                .as_ref()
                .ok_or_else(|| Error::Auth("device auth message has no challenge".into()))?;
            match conn.auth(challenge) {
                Ok(response) => {
                    let reply = MessageBuilder::new()
                        .apply_received(&msg.raw)
                        .proto_payload(&DeviceAuthMessage {
                            challenge: None,
                            response: Some(response),
                            error: None,
                        })
                        .build();
                    conn.send(reply).await?;
                }
                Err(e) => {
                    // Best-effort error reply before failing the handshake.
                    let reply = MessageBuilder::new()
                        .apply_received(&msg.raw)
                        .proto_payload(&DeviceAuthMessage {
                            challenge: None,
                            response: None,
                            error: Some(AuthError::default()),
                        })
                        .build();
                    let _ = conn.send(reply).await;
                    return Err(e);
                }
            }
            msg = unmarshal_request_message(conn.receive().await?)?;
        }
        match msg.payload {
            RequestPayload::Connect(_) => Ok(msg),
            _ => Err(Error::Protocol(format!(
                "expected connect message, got {:?}",
                msg.header.message_type
            ))),
        }
    }

    /// Register an application under all of its app ids, atomically: on any
    /// collision nothing changes.
    pub async fn register_application(&self, app: Arc<dyn Application>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Closed);
        }
        let mut inner = self.inner.write().await;
        let meta = app.metadata();
        for app_id in &meta.app_ids {
            if inner.apps.contains_key(app_id) {
                return Err(Error::state(format!(
                    "application ID {app_id} already registered"
                )));
            }
        }
        for app_id in &meta.app_ids {
            inner.apps.insert(app_id.clone(), Arc::clone(&app));
        }
        Ok(())
    }

    /// Remove an application, stopping it first if it is the running one.
    pub async fn unregister_application(&self, app: &Arc<dyn Application>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Closed);
        }
        let mut inner = self.inner.write().await;
        for app_id in &app.metadata().app_ids {
            let running = inner
                .status
                .running_application()
                .is_some_and(|a| a.app_id == *app_id);
            if running {
                switch_locked(&mut inner, None, "", None).await?;
            }
            inner.apps.remove(app_id);
        }
        Ok(())
    }

    pub async fn application_by_id(&self, id: &str) -> Option<Arc<dyn Application>> {
        self.inner.read().await.apps.get(id).cloned()
    }

    pub async fn current_application(&self) -> Option<Arc<dyn Application>> {
        let inner = self.inner.read().await;
        let app_id = &inner.status.running_application()?.app_id;
        inner.apps.get(app_id).cloned()
    }

    pub async fn status(&self) -> Arc<ReceiverStatus> {
        Arc::clone(&self.inner.read().await.status)
    }

    /// The single mutating operation on the status: stop the current app if a
    /// different one runs, start the requested one, publish a fresh snapshot.
    ///
    /// A `Stop` failure aborts before any start; a `Start` failure leaves no
    /// app running — callers must tolerate that transient state.
    pub async fn switch_to_application(
        &self,
        transport_id: Option<&str>,
        app_id: &str,
        params: Option<&Value>,
    ) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Closed);
        }
        let mut inner = self.inner.write().await;
        switch_locked(&mut inner, transport_id, app_id, params).await
    }

    /// Register a buffered status sink; updates are sent non-blocking and
    /// dropped when the buffer is full.
    pub async fn add_status_listener(
        &self,
        tx: mpsc::Sender<Arc<ReceiverStatus>>,
    ) -> ListenerId {
        let mut inner = self.inner.write().await;
        let id = inner.next_listener;
        inner.next_listener += 1;
        inner.listeners.insert(id, tx);
        ListenerId(id)
    }

    pub async fn remove_status_listener(&self, id: ListenerId) {
        self.inner.write().await.listeners.remove(&id.0);
    }

    /// Stop the running app, clear registries and listeners, cancel the
    /// internal context. Does not close channels or connections.
    pub async fn close(&self) {
        let mut inner = self.inner.write().await;
        if let Err(e) = switch_locked(&mut inner, None, "", None).await {
            debug!("failed stopping application on close: {e}");
        }
        inner.apps.clear();
        inner.listeners.clear();
        self.cancel.cancel();
    }
}

async fn switch_locked(
    inner: &mut Inner,
    transport_id: Option<&str>,
    app_id: &str,
    params: Option<&Value>,
) -> Result<()> {
    if !app_id.is_empty() && !inner.apps.contains_key(app_id) {
        return Err(Error::state(format!("unrecognized application ID {app_id}")));
    }
    if !app_id.is_empty() && transport_id.is_none() {
        return Err(Error::state(
            "must have channel when giving application to switch to",
        ));
    }
    // Stop the current app if one runs under a different id.
    let running = inner
        .status
        .running_application()
        .map(|a| a.app_id.clone());
    if let Some(running_id) = &running {
        if running_id != app_id {
            debug!(app_id = %running_id, "stopping application");
            if let Some(app) = inner.apps.get(running_id) {
                app.stop().await?;
            }
        }
    }
    // Start the requested app unless it is already the current one.
    if !app_id.is_empty() && running.as_deref() != Some(app_id) {
        debug!(%app_id, "starting application");
        inner.apps[app_id].start(app_id, params).await?;
    }
    // Rebuild the status every time, no matter what.
    let mut status = ReceiverStatus {
        applications: Vec::new(),
        is_active_input: inner.status.is_active_input,
        volume: inner.status.volume.clone(),
    };
    if !app_id.is_empty() {
        let meta = inner.apps[app_id].metadata();
        status.applications.push(ApplicationStatus {
            app_id: app_id.into(),
            universal_app_id: app_id.into(),
            display_name: meta.display_name.clone(),
            namespaces: meta
                .supported_namespaces
                .iter()
                .map(|name| NamespaceEntry { name: name.clone() })
                .collect(),
            session_id: meta.session_id.clone(),
            status_text: meta.status_text.clone(),
            transport_id: transport_id.unwrap_or_default().into(),
            app_type: String::new(),
        });
    }
    let status = Arc::new(status);
    inner.status = Arc::clone(&status);
    for tx in inner.listeners.values() {
        let _ = tx.try_send(Arc::clone(&status));
    }
    Ok(())
}
