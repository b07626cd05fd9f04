//! Per-connection control channel: serial message dispatch plus status
//! broadcast.
//!
//! `run` drives three event sources — inbound frames (read by a dedicated
//! producer task), buffered status updates from the receiver, and context
//! cancellation. Inbound dispatch is intentionally serial: a handler for
//! message *n* completes (or fails the channel) before *n+1* is delivered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapters::wire::MessageBuilder;
use crate::domain::cast_channel::CastMessage;
use crate::domain::error::{Error, Result};
use crate::domain::message::{
    unmarshal_request_message, GetAppAvailabilityResponse, InvalidRequestResponse, MessageHeader,
    ReceiverStatusResponse, RequestMessage, RequestPayload, APP_AVAILABLE, APP_UNAVAILABLE,
    NAMESPACE_RECEIVER, REASON_INVALID_SESSION_ID,
};

use super::ports::Conn;
use super::receiver::Receiver;

/// Buffered status updates per channel; overflow drops older values.
const STATUS_BUFFER: usize = 10;

pub struct Channel {
    receiver: Arc<Receiver>,
    conn: Arc<dyn Conn>,
    /// Most recent CONNECT; replaced when the sender reconnects in place.
    connection_info: RwLock<RequestMessage>,
    run_called: AtomicBool,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("run_called", &self.run_called.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub(crate) fn new(
        receiver: Arc<Receiver>,
        conn: Arc<dyn Conn>,
        connect_msg: RequestMessage,
    ) -> Arc<Self> {
        Arc::new(Self {
            receiver,
            conn,
            connection_info: RwLock::new(connect_msg),
            run_called: AtomicBool::new(false),
        })
    }

    /// The sender id declared by the most recent CONNECT.
    pub fn source_id(&self) -> String {
        self.connection_info
            .read()
            .expect("connection info lock poisoned")
            .raw
            .source_id
            .clone()
    }

    fn connect_raw(&self) -> CastMessage {
        self.connection_info
            .read()
            .expect("connection info lock poisoned")
            .raw
            .clone()
    }

    /// Drive the channel until error, peer close, or cancellation.
    ///
    /// Must be called exactly once; the socket is closed on every exit path.
    pub async fn run(&self, ctx: CancellationToken) -> Result<()> {
        if self.run_called.swap(true, Ordering::SeqCst) {
            return Err(Error::state("run already called"));
        }
        let result = self.run_inner(&ctx).await;
        self.conn.close().await;
        result
    }

    async fn run_inner(&self, ctx: &CancellationToken) -> Result<()> {
        let (status_tx, mut status_rx) = mpsc::channel(STATUS_BUFFER);
        let listener = self.receiver.add_status_listener(status_tx).await;

        // Inbound producer; exits on I/O error or cancellation.
        let (msg_tx, mut msg_rx) = mpsc::channel::<Result<CastMessage>>(1);
        let producer_ctx = ctx.child_token();
        {
            let conn = Arc::clone(&self.conn);
            let token = producer_ctx.clone();
            tokio::spawn(async move {
                loop {
                    let res = tokio::select! {
                        _ = token.cancelled() => break,
                        res = conn.receive() => res,
                    };
                    let failed = res.is_err();
                    if msg_tx.send(res).await.is_err() || failed {
                        break;
                    }
                }
            });
        }

        let result = loop {
            tokio::select! {
                _ = ctx.cancelled() => break Err(Error::Cancelled),
                inbound = msg_rx.recv() => {
                    let raw = match inbound {
                        Some(Ok(raw)) => raw,
                        Some(Err(e)) => break Err(e),
                        None => break Err(Error::Closed),
                    };
                    let msg = match unmarshal_request_message(raw) {
                        Ok(msg) => msg,
                        Err(e) => break Err(e),
                    };
                    if let Err(e) = self.handle_message(&msg).await {
                        break Err(e);
                    }
                }
                update = status_rx.recv() => {
                    let Some(mut status) = update else { break Err(Error::Closed) };
                    // Drain to the latest pending snapshot before emitting.
                    while let Ok(newer) = status_rx.try_recv() {
                        status = newer;
                    }
                    let broadcast = MessageBuilder::new()
                        .apply_received(&self.connect_raw())
                        .namespace(NAMESPACE_RECEIVER)
                        .json_payload(&ReceiverStatusResponse {
                            header: MessageHeader::new("RECEIVER_STATUS"),
                            status,
                        });
                    let broadcast = match broadcast {
                        Ok(builder) => builder.build(),
                        Err(e) => break Err(e),
                    };
                    if let Err(e) = self.conn.send(broadcast).await {
                        break Err(e);
                    }
                }
            }
        };

        self.receiver.remove_status_listener(listener).await;
        producer_ctx.cancel();
        result
    }

    async fn handle_message(&self, msg: &RequestMessage) -> Result<()> {
        match &msg.payload {
            RequestPayload::Connect(_) => {
                *self
                    .connection_info
                    .write()
                    .expect("connection info lock poisoned") = msg.clone();
                Ok(())
            }
            RequestPayload::GetAppAvailability(req) => {
                let mut availability = HashMap::with_capacity(req.app_ids.len());
                for app_id in &req.app_ids {
                    let known = self.receiver.application_by_id(app_id).await.is_some();
                    availability.insert(
                        app_id.clone(),
                        if known { APP_AVAILABLE } else { APP_UNAVAILABLE }.to_string(),
                    );
                }
                let reply = MessageBuilder::new()
                    .apply_received(&msg.raw)
                    .json_payload(&GetAppAvailabilityResponse {
                        header: MessageHeader::reply(
                            "GET_APP_AVAILABILITY",
                            msg.header.request_id,
                        ),
                        availability,
                    })?
                    .build();
                self.conn.send(reply).await
            }
            RequestPayload::GetReceiverStatus => {
                let reply = MessageBuilder::new()
                    .apply_received(&msg.raw)
                    .json_payload(&ReceiverStatusResponse {
                        header: MessageHeader::reply("RECEIVER_STATUS", msg.header.request_id),
                        status: self.receiver.status().await,
                    })?
                    .build();
                self.conn.send(reply).await
            }
            RequestPayload::Launch(launch) => {
                self.receiver
                    .switch_to_application(
                        Some(&self.source_id()),
                        &launch.app_id,
                        launch.app_params.as_ref(),
                    )
                    .await
            }
            RequestPayload::Stop(stop) => {
                let status = self.receiver.status().await;
                let matches = !stop.session_id.is_empty()
                    && status
                        .running_application()
                        .is_some_and(|app| app.session_id == stop.session_id);
                if matches {
                    self.receiver.switch_to_application(None, "", None).await
                } else {
                    let reply = MessageBuilder::new()
                        .apply_received(&msg.raw)
                        .json_payload(&InvalidRequestResponse {
                            header: MessageHeader::reply(
                                "INVALID_REQUEST",
                                msg.header.request_id,
                            ),
                            reason: REASON_INVALID_SESSION_ID.into(),
                        })?
                        .build();
                    self.conn.send(reply).await
                }
            }
            RequestPayload::Ping => {
                let reply = MessageBuilder::new()
                    .apply_received(&msg.raw)
                    .json_payload(&MessageHeader::new("PONG"))?
                    .build();
                self.conn.send(reply).await
            }
            _ => {
                // Forward to the running application when it claims the
                // namespace; otherwise log and ignore.
                if let Some(app) = self.receiver.current_application().await {
                    if app
                        .metadata()
                        .supported_namespaces
                        .contains(&msg.raw.namespace)
                    {
                        return app.handle_message(self.conn.as_ref(), msg).await;
                    }
                }
                debug!(
                    namespace = %msg.raw.namespace,
                    message_type = %msg.header.message_type,
                    "ignoring unknown message"
                );
                Ok(())
            }
        }
    }
}
