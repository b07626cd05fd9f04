//! Cast V2 channel protobuf schema.
//!
//! Hand-written `prost` messages matching the `extensions.api.cast_channel`
//! proto2 definitions: one `CastMessage` frame per length-prefixed wire blob,
//! plus the device-auth challenge/response carried as a BINARY payload on the
//! deviceauth namespace.

/// One framed message on the control channel.
///
/// Exactly one of `payload_utf8` / `payload_binary` is populated, selected by
/// `payload_type`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CastMessage {
    #[prost(enumeration = "ProtocolVersion", required, tag = "1")]
    pub protocol_version: i32,
    #[prost(string, required, tag = "2")]
    pub source_id: String,
    #[prost(string, required, tag = "3")]
    pub destination_id: String,
    #[prost(string, required, tag = "4")]
    pub namespace: String,
    #[prost(enumeration = "PayloadType", required, tag = "5")]
    pub payload_type: i32,
    #[prost(string, optional, tag = "6")]
    pub payload_utf8: Option<String>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub payload_binary: Option<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ProtocolVersion {
    Castv2_1_0 = 0,
    Castv2_1_1 = 1,
    Castv2_1_2 = 2,
    Castv2_1_3 = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PayloadType {
    String = 0,
    Binary = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SignatureAlgorithm {
    Unspecified = 0,
    RsassaPkcs1v15 = 1,
    RsassaPss = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum HashAlgorithm {
    Sha1 = 0,
    Sha256 = 1,
}

/// Sender-issued challenge: sign my nonce so I can verify your device chain.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthChallenge {
    #[prost(
        enumeration = "SignatureAlgorithm",
        optional,
        tag = "1",
        default = "RsassaPkcs1v15"
    )]
    pub signature_algorithm: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub sender_nonce: Option<Vec<u8>>,
    #[prost(enumeration = "HashAlgorithm", optional, tag = "3", default = "Sha1")]
    pub hash_algorithm: Option<i32>,
}

/// Receiver's reply: signature over `nonce ‖ peer-cert-DER` plus the chain.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthResponse {
    #[prost(bytes = "vec", required, tag = "1")]
    pub signature: Vec<u8>,
    #[prost(bytes = "vec", required, tag = "2")]
    pub client_auth_certificate: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub intermediate_certificate: Vec<Vec<u8>>,
    #[prost(
        enumeration = "SignatureAlgorithm",
        optional,
        tag = "4",
        default = "RsassaPkcs1v15"
    )]
    pub signature_algorithm: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub sender_nonce: Option<Vec<u8>>,
    #[prost(enumeration = "HashAlgorithm", optional, tag = "6", default = "Sha1")]
    pub hash_algorithm: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub crl: Option<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum AuthErrorType {
    InternalError = 0,
    NoTls = 1,
    SignatureAlgorithmUnavailable = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthError {
    #[prost(enumeration = "AuthErrorType", optional, tag = "1", default = "InternalError")]
    pub error_type: Option<i32>,
}

/// Envelope on the deviceauth namespace; exactly one field is set.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceAuthMessage {
    #[prost(message, optional, tag = "1")]
    pub challenge: Option<AuthChallenge>,
    #[prost(message, optional, tag = "2")]
    pub response: Option<AuthResponse>,
    #[prost(message, optional, tag = "3")]
    pub error: Option<AuthError>,
}
