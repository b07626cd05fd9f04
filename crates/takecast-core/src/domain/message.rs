//! Message taxonomy: namespaces and the closed set of decoded request types.
//!
//! Every inbound [`CastMessage`] is decoded into a [`RequestMessage`]: the raw
//! frame is retained so responses can invert source/destination and reuse the
//! protocol version, and the payload is a closed sum with one branch per known
//! (namespace, type) pair. Unknown namespaces or types decode to
//! [`RequestPayload::Unknown`], never an error.

use prost::Message as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::cast_channel::{CastMessage, DeviceAuthMessage};
use super::error::{Error, Result};
use super::offer::WebRtcOfferPayload;

pub const NAMESPACE_MEDIA: &str = "urn:x-cast:com.google.cast.media";
pub const NAMESPACE_RECEIVER: &str = "urn:x-cast:com.google.cast.receiver";
pub const NAMESPACE_CONNECTION: &str = "urn:x-cast:com.google.cast.tp.connection";
pub const NAMESPACE_DEVICE_AUTH: &str = "urn:x-cast:com.google.cast.tp.deviceauth";
pub const NAMESPACE_HEARTBEAT: &str = "urn:x-cast:com.google.cast.tp.heartbeat";
pub const NAMESPACE_WEBRTC: &str = "urn:x-cast:com.google.cast.webrtc";
pub const NAMESPACE_REMOTING: &str = "urn:x-cast:com.google.cast.remoting";

/// `type` + optional `requestId`, shared by every JSON payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageHeader {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,
}

impl MessageHeader {
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            request_id: None,
        }
    }

    pub fn reply(message_type: impl Into<String>, request_id: Option<i64>) -> Self {
        Self {
            message_type: message_type.into(),
            request_id,
        }
    }
}

/// A decoded inbound message: raw frame + typed body.
#[derive(Debug, Clone)]
pub struct RequestMessage {
    pub raw: CastMessage,
    /// Empty type for the binary device-auth namespace.
    pub header: MessageHeader,
    pub payload: RequestPayload,
}

#[derive(Debug, Clone)]
pub enum RequestPayload {
    Connect(ConnectPayload),
    GetAppAvailability(GetAppAvailabilityPayload),
    GetReceiverStatus,
    Launch(LaunchPayload),
    Stop(StopPayload),
    Ping,
    DeviceAuth(DeviceAuthMessage),
    WebRtcOffer(WebRtcOfferPayload),
    /// Known media namespace, no behavior yet.
    UnknownMedia,
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectPayload {
    pub conn_type: Option<i64>,
    pub origin: Option<Value>,
    pub sender_info: Option<Value>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetAppAvailabilityPayload {
    /// The queried ids ride under the singular `appId` key.
    #[serde(rename = "appId", default)]
    pub app_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchPayload {
    pub app_id: String,
    pub app_params: Option<Value>,
    pub language: Option<String>,
    pub supported_app_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StopPayload {
    pub session_id: String,
}

// --- Response bodies -------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAppAvailabilityResponse {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub availability: std::collections::HashMap<String, String>,
}

pub const APP_AVAILABLE: &str = "APP_AVAILABLE";
pub const APP_UNAVAILABLE: &str = "APP_UNAVAILABLE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverStatusResponse {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub status: std::sync::Arc<super::status::ReceiverStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidRequestResponse {
    #[serde(flatten)]
    pub header: MessageHeader,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub reason: String,
}

pub const REASON_INVALID_SESSION_ID: &str = "INVALID_SESSION_ID";

/// Connection-namespace `CLOSE` notification.
pub fn close_message() -> MessageHeader {
    MessageHeader::new("CLOSE")
}

// --- Decoding --------------------------------------------------------------

/// Decode a raw frame into its typed form.
///
/// Non-auth namespaces require a UTF-8 JSON payload with at least `type`;
/// the device-auth namespace carries a binary [`DeviceAuthMessage`].
pub fn unmarshal_request_message(raw: CastMessage) -> Result<RequestMessage> {
    if raw.namespace == NAMESPACE_DEVICE_AUTH {
        let bytes = raw
            .payload_binary
            .as_deref()
            .ok_or_else(|| Error::protocol("device auth message missing binary payload"))?;
        let auth = DeviceAuthMessage::decode(bytes)
            .map_err(|e| Error::Protocol(format!("bad device auth payload: {e}")))?;
        return Ok(RequestMessage {
            header: MessageHeader::default(),
            payload: RequestPayload::DeviceAuth(auth),
            raw,
        });
    }

    let text = raw
        .payload_utf8
        .as_deref()
        .ok_or_else(|| Error::protocol("missing string payload"))?;
    let header: MessageHeader =
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("bad payload: {e}")))?;

    fn body<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("bad payload: {e}")))
    }

    let payload = match (raw.namespace.as_str(), header.message_type.as_str()) {
        (NAMESPACE_CONNECTION, "CONNECT") => RequestPayload::Connect(body(text)?),
        (NAMESPACE_RECEIVER, "GET_APP_AVAILABILITY") => {
            RequestPayload::GetAppAvailability(body(text)?)
        }
        (NAMESPACE_RECEIVER, "GET_STATUS") => RequestPayload::GetReceiverStatus,
        (NAMESPACE_RECEIVER, "LAUNCH") => RequestPayload::Launch(body(text)?),
        (NAMESPACE_RECEIVER, "STOP") => RequestPayload::Stop(body(text)?),
        (NAMESPACE_HEARTBEAT, "PING") => RequestPayload::Ping,
        (NAMESPACE_MEDIA, "GET_STATUS") => RequestPayload::UnknownMedia,
        (NAMESPACE_WEBRTC, "OFFER") => RequestPayload::WebRtcOffer(body(text)?),
        _ => RequestPayload::Unknown,
    };
    Ok(RequestMessage {
        header,
        payload,
        raw,
    })
}
