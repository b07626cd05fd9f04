//! Fluent builder for outbound frames.

use serde::Serialize;

use crate::domain::cast_channel::{CastMessage, PayloadType, ProtocolVersion};
use crate::domain::error::{Error, Result};

/// Builds a response frame, usually seeded from the request being answered.
#[derive(Default)]
pub struct MessageBuilder {
    msg: CastMessage,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self {
            msg: CastMessage {
                protocol_version: ProtocolVersion::Castv2_1_0 as i32,
                ..CastMessage::default()
            },
        }
    }

    /// Copy protocol version and namespace from a received frame and invert
    /// source/destination, so the reply goes back the way the request came.
    pub fn apply_received(mut self, received: &CastMessage) -> Self {
        self.msg.protocol_version = received.protocol_version;
        self.msg.source_id = received.destination_id.clone();
        self.msg.destination_id = received.source_id.clone();
        self.msg.namespace = received.namespace.clone();
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.msg.namespace = namespace.into();
        self
    }

    /// STRING payload; clears any binary payload.
    pub fn json_payload<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let text = serde_json::to_string(body)
            .map_err(|e| Error::Protocol(format!("failed encoding payload: {e}")))?;
        self.msg.payload_type = PayloadType::String as i32;
        self.msg.payload_utf8 = Some(text);
        self.msg.payload_binary = None;
        Ok(self)
    }

    /// BINARY payload; clears any string payload.
    pub fn binary_payload(mut self, body: Vec<u8>) -> Self {
        self.msg.payload_type = PayloadType::Binary as i32;
        self.msg.payload_binary = Some(body);
        self.msg.payload_utf8 = None;
        self
    }

    /// BINARY payload from a protobuf message.
    pub fn proto_payload<M: prost::Message>(self, body: &M) -> Self {
        self.binary_payload(body.encode_to_vec())
    }

    pub fn build(self) -> CastMessage {
        self.msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::MessageHeader;

    #[test]
    fn inverts_source_and_destination() {
        let received = CastMessage {
            protocol_version: ProtocolVersion::Castv2_1_0 as i32,
            source_id: "sender-1".into(),
            destination_id: "receiver-0".into(),
            namespace: "urn:x-cast:test".into(),
            payload_type: PayloadType::String as i32,
            payload_utf8: Some("{}".into()),
            payload_binary: None,
        };
        let reply = MessageBuilder::new()
            .apply_received(&received)
            .json_payload(&MessageHeader::new("PONG"))
            .unwrap()
            .build();
        assert_eq!(reply.source_id, "receiver-0");
        assert_eq!(reply.destination_id, "sender-1");
        assert_eq!(reply.namespace, received.namespace);
        assert_eq!(reply.payload_utf8.as_deref(), Some(r#"{"type":"PONG"}"#));
    }

    #[test]
    fn payload_fields_are_exclusive() {
        let msg = MessageBuilder::new()
            .json_payload(&MessageHeader::new("PING"))
            .unwrap()
            .binary_payload(vec![1, 2, 3])
            .build();
        assert!(msg.payload_utf8.is_none());
        assert_eq!(msg.payload_binary, Some(vec![1, 2, 3]));
        assert_eq!(msg.payload_type, PayloadType::Binary as i32);
    }
}
