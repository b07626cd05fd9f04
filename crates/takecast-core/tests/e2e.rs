//! End-to-end protocol scenarios.
//!
//! Most tests drive a channel over an in-memory duplex pair, exercising the
//! real handshake, dispatch, and mirroring paths; the TLS test runs the full
//! server stack over loopback (mDNS disabled so CI never touches the
//! network).

use std::sync::{Arc, OnceLock};

use serde_json::{json, Value};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;

use takecast_core::adapters::crypto::cert::{
    generate_intermediate_ca, generate_root_ca, generate_standard,
};
use takecast_core::adapters::wire::{codec, CastConn, ConnCerts};
use takecast_core::application::ports::Conn;
use takecast_core::application::{Channel, MirrorApplication, MirrorConfig, Receiver};
use takecast_core::domain::cast_channel::{
    AuthChallenge, CastMessage, DeviceAuthMessage, HashAlgorithm, PayloadType, ProtocolVersion,
    SignatureAlgorithm,
};
use takecast_core::domain::error::Error;
use takecast_core::domain::message::{
    NAMESPACE_CONNECTION, NAMESPACE_DEVICE_AUTH, NAMESPACE_HEARTBEAT, NAMESPACE_RECEIVER,
    NAMESPACE_WEBRTC,
};

// ── Shared helpers ─────────────────────────────────────────────────────────

fn certs() -> ConnCerts {
    static CERTS: OnceLock<ConnCerts> = OnceLock::new();
    CERTS
        .get_or_init(|| {
            let root = generate_root_ca(None, None).expect("root ca");
            let inter = generate_intermediate_ca(&root, None, None).expect("intermediate ca");
            let peer = generate_standard(&inter, None, None).expect("peer cert");
            let auth = generate_standard(&inter, None, None).expect("auth cert");
            ConnCerts {
                intermediates: Arc::new(vec![inter]),
                peer: Arc::new(peer),
                auth: Arc::new(auth),
            }
        })
        .clone()
}

struct Sender {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
}

impl Sender {
    async fn send(&mut self, msg: CastMessage) {
        codec::write_message(&mut self.writer, &msg).await.expect("send");
    }

    async fn send_json(&mut self, namespace: &str, body: Value) {
        self.send(CastMessage {
            protocol_version: ProtocolVersion::Castv2_1_0 as i32,
            source_id: "sender-1".into(),
            destination_id: "receiver-0".into(),
            namespace: namespace.into(),
            payload_type: PayloadType::String as i32,
            payload_utf8: Some(body.to_string()),
            payload_binary: None,
        })
        .await;
    }

    async fn recv(&mut self) -> CastMessage {
        codec::read_message(&mut self.reader).await.expect("recv")
    }

    async fn recv_json(&mut self) -> (CastMessage, Value) {
        let msg = self.recv().await;
        let body: Value =
            serde_json::from_str(msg.payload_utf8.as_deref().expect("string payload"))
                .expect("json payload");
        (msg, body)
    }
}

fn sender_pair() -> (Sender, Arc<dyn Conn>) {
    let (client, server) = tokio::io::duplex(256 * 1024);
    let (reader, writer) = tokio::io::split(client);
    let conn: Arc<dyn Conn> = Arc::new(CastConn::new(server, certs()));
    (Sender { reader, writer }, conn)
}

/// CONNECT as `sender-1` and hand the accepted channel back.
async fn connect(receiver: &Arc<Receiver>) -> (Sender, Arc<Channel>) {
    let (mut sender, conn) = sender_pair();
    sender
        .send_json(
            NAMESPACE_CONNECTION,
            json!({"type": "CONNECT", "userAgent": "e2e-test"}),
        )
        .await;
    let channel = Arc::clone(receiver)
        .connect_channel(&CancellationToken::new(), conn)
        .await
        .expect("connect channel");
    (sender, channel)
}

fn spawn_run(channel: &Arc<Channel>) -> CancellationToken {
    let ctx = CancellationToken::new();
    let run_ctx = ctx.clone();
    let channel = Arc::clone(channel);
    tokio::spawn(async move {
        let _ = channel.run(run_ctx).await;
    });
    ctx
}

fn mirror() -> Arc<MirrorApplication> {
    MirrorApplication::new(MirrorConfig::default())
}

fn offer_body(seq_num: i64, audio_ssrc: u32, video_ssrc: u32) -> Value {
    let key = hex::encode([7u8; 16]);
    let mask = hex::encode([9u8; 16]);
    json!({
        "type": "OFFER",
        "seqNum": seq_num,
        "offer": {
            "castMode": "mirroring",
            "receiverGetStatus": false,
            "supportedStreams": [
                {
                    "type": "audio_source", "index": 0, "ssrc": audio_ssrc,
                    "aesKey": key, "aesIvMask": mask, "timeBase": "1/48000",
                    "codecName": "opus", "channels": 2
                },
                {
                    "type": "video_source", "index": 1, "ssrc": video_ssrc,
                    "aesKey": key, "aesIvMask": mask, "timeBase": "1/90000",
                    "codecName": "vp8",
                    "resolutions": [{"width": 1280, "height": 720}]
                }
            ]
        }
    })
}

// ── Scenarios ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_then_ping_gets_inverted_pong() {
    let receiver = Receiver::new();
    let (mut sender, channel) = connect(&receiver).await;
    spawn_run(&channel);

    sender
        .send_json(NAMESPACE_HEARTBEAT, json!({"type": "PING"}))
        .await;
    let (msg, body) = sender.recv_json().await;
    assert_eq!(msg.namespace, NAMESPACE_HEARTBEAT);
    assert_eq!(msg.source_id, "receiver-0");
    assert_eq!(msg.destination_id, "sender-1");
    assert_eq!(body["type"], "PONG");
    assert!(body.get("requestId").is_none());
}

#[tokio::test]
async fn device_auth_precedes_connect() {
    let receiver = Receiver::new();
    let (mut sender, conn) = sender_pair();

    let nonce = b"e2e-fixed-nonce".to_vec();
    let auth_request = DeviceAuthMessage {
        challenge: Some(AuthChallenge {
            signature_algorithm: Some(SignatureAlgorithm::RsassaPkcs1v15 as i32),
            sender_nonce: Some(nonce.clone()),
            hash_algorithm: Some(HashAlgorithm::Sha256 as i32),
        }),
        response: None,
        error: None,
    };
    let mut payload = Vec::new();
    prost::Message::encode(&auth_request, &mut payload).unwrap();
    sender
        .send(CastMessage {
            protocol_version: ProtocolVersion::Castv2_1_0 as i32,
            source_id: "sender-1".into(),
            destination_id: "receiver-0".into(),
            namespace: NAMESPACE_DEVICE_AUTH.into(),
            payload_type: PayloadType::Binary as i32,
            payload_utf8: None,
            payload_binary: Some(payload),
        })
        .await;

    let handshake = tokio::spawn({
        let receiver = Arc::clone(&receiver);
        async move {
            receiver
                .connect_channel(&CancellationToken::new(), conn)
                .await
        }
    });

    // Auth response arrives before the CONNECT is even sent.
    let reply = sender.recv().await;
    assert_eq!(reply.namespace, NAMESPACE_DEVICE_AUTH);
    let auth_reply: DeviceAuthMessage =
        prost::Message::decode(reply.payload_binary.as_deref().unwrap()).unwrap();
    let response = auth_reply.response.expect("auth response");
    assert!(auth_reply.error.is_none());

    // The signature must verify over nonce ‖ peerDER with the auth cert key.
    let chain = certs();
    let mut signed = nonce;
    signed.extend_from_slice(chain.peer.der());
    let digest = <sha2::Sha256 as sha2::Digest>::digest(&signed);
    chain
        .auth
        .private_key()
        .to_public_key()
        .verify(
            rsa::Pkcs1v15Sign::new::<sha2::Sha256>(),
            &digest,
            &response.signature,
        )
        .expect("signature verifies");
    assert_eq!(response.client_auth_certificate, chain.auth.der());
    assert_eq!(response.intermediate_certificate.len(), 1);

    sender
        .send_json(NAMESPACE_CONNECTION, json!({"type": "CONNECT"}))
        .await;
    handshake.await.unwrap().expect("handshake completes");
}

#[tokio::test]
async fn non_connect_first_message_is_protocol_error() {
    let receiver = Receiver::new();
    let (mut sender, conn) = sender_pair();
    sender
        .send_json(NAMESPACE_HEARTBEAT, json!({"type": "PING"}))
        .await;
    let err = Arc::clone(&receiver)
        .connect_channel(&CancellationToken::new(), conn)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
}

#[tokio::test]
async fn app_availability_reports_per_id() {
    let receiver = Receiver::new();
    receiver.register_application(mirror()).await.unwrap();
    let (mut sender, channel) = connect(&receiver).await;
    spawn_run(&channel);

    sender
        .send_json(
            NAMESPACE_RECEIVER,
            json!({"type": "GET_APP_AVAILABILITY", "requestId": 5, "appId": ["0F5096E8", "DEADBEEF"]}),
        )
        .await;
    let (_, body) = sender.recv_json().await;
    assert_eq!(body["type"], "GET_APP_AVAILABILITY");
    assert_eq!(body["requestId"], 5);
    assert_eq!(body["availability"]["0F5096E8"], "APP_AVAILABLE");
    assert_eq!(body["availability"]["DEADBEEF"], "APP_UNAVAILABLE");
}

#[tokio::test]
async fn launch_broadcasts_status_with_transport_id() {
    let receiver = Receiver::new();
    receiver.register_application(mirror()).await.unwrap();
    let (mut sender, channel) = connect(&receiver).await;
    spawn_run(&channel);

    sender
        .send_json(
            NAMESPACE_RECEIVER,
            json!({"type": "LAUNCH", "requestId": 1, "appId": "0F5096E8"}),
        )
        .await;

    let (msg, body) = sender.recv_json().await;
    assert_eq!(msg.namespace, NAMESPACE_RECEIVER);
    assert_eq!(body["type"], "RECEIVER_STATUS");
    assert!(body.get("requestId").is_none(), "broadcast has no requestId");
    let app = &body["status"]["applications"][0];
    assert_eq!(app["appId"], "0F5096E8");
    assert_eq!(app["transportId"], "sender-1");
    let session_id = app["sessionId"].as_str().unwrap();
    assert!(!session_id.is_empty());
}

#[tokio::test]
async fn stop_with_wrong_session_id_changes_nothing() {
    let receiver = Receiver::new();
    receiver.register_application(mirror()).await.unwrap();
    let (mut sender, channel) = connect(&receiver).await;
    spawn_run(&channel);

    sender
        .send_json(
            NAMESPACE_RECEIVER,
            json!({"type": "LAUNCH", "requestId": 1, "appId": "0F5096E8"}),
        )
        .await;
    let (_, launch_status) = sender.recv_json().await;
    assert_eq!(launch_status["type"], "RECEIVER_STATUS");

    sender
        .send_json(
            NAMESPACE_RECEIVER,
            json!({"type": "STOP", "requestId": 2, "sessionId": "bogus"}),
        )
        .await;
    let (_, body) = sender.recv_json().await;
    assert_eq!(body["type"], "INVALID_REQUEST");
    assert_eq!(body["requestId"], 2);
    assert_eq!(body["reason"], "INVALID_SESSION_ID");

    // Status unchanged: the app still runs.
    sender
        .send_json(NAMESPACE_RECEIVER, json!({"type": "GET_STATUS", "requestId": 3}))
        .await;
    let (_, status) = sender.recv_json().await;
    assert_eq!(status["status"]["applications"][0]["appId"], "0F5096E8");
}

#[tokio::test]
async fn offer_yields_answer_and_second_offer_fails() {
    let receiver = Receiver::new();
    receiver.register_application(mirror()).await.unwrap();
    let (mut sender, channel) = connect(&receiver).await;
    spawn_run(&channel);

    sender
        .send_json(
            NAMESPACE_RECEIVER,
            json!({"type": "LAUNCH", "requestId": 1, "appId": "0F5096E8"}),
        )
        .await;
    let (_, status) = sender.recv_json().await;
    assert_eq!(status["type"], "RECEIVER_STATUS");

    sender
        .send_json(NAMESPACE_WEBRTC, offer_body(10, 1000, 2000))
        .await;
    let (msg, body) = sender.recv_json().await;
    assert_eq!(msg.namespace, NAMESPACE_WEBRTC);
    assert_eq!(body["type"], "ANSWER");
    assert_eq!(body["seqNum"], 10);
    assert_eq!(body["result"], "ok");
    assert!(body["answer"]["udpPort"].as_u64().unwrap() > 0);
    assert_eq!(body["answer"]["sendIndexes"], json!([0, 1]));
    assert_eq!(body["answer"]["ssrcs"], json!([1001, 2001]));

    sender
        .send_json(NAMESPACE_WEBRTC, offer_body(11, 1000, 2000))
        .await;
    let (_, body) = sender.recv_json().await;
    assert_eq!(body["seqNum"], 11);
    assert_eq!(body["result"], "error");
    assert_eq!(body["error"]["code"], 88);
}

#[tokio::test]
async fn run_called_twice_is_a_state_error() {
    let receiver = Receiver::new();
    let (_sender, channel) = connect(&receiver).await;

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let first = channel.run(cancelled).await.unwrap_err();
    assert!(matches!(first, Error::Cancelled));

    let second = channel.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(second, Error::State(_)));
}

// ── Full TLS stack ─────────────────────────────────────────────────────────

mod tls {
    use super::*;
    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};
    use takecast_core::adapters::server::{Server, ServerConfig};

    #[derive(Debug)]
    struct AcceptAnyCert(Arc<rustls::crypto::CryptoProvider>);

    impl ServerCertVerifier for AcceptAnyCert {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }

    #[tokio::test]
    async fn tls_connect_ping_pong() {
        let root = generate_root_ca(None, None).unwrap();
        let server = Arc::new(
            Server::listen(ServerConfig {
                root_ca: Some(root),
                listen_addr: "127.0.0.1:0".into(),
                advertise: false,
                ..ServerConfig::default()
            })
            .await
            .unwrap(),
        );
        server
            .receiver()
            .register_application(mirror())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let serve = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = serve.serve().await;
        });

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .unwrap()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
            .with_no_client_auth();
        let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

        let tcp = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut stream = connector
            .connect(ServerName::try_from("takecast.local").unwrap(), tcp)
            .await
            .unwrap();

        let connect_msg = CastMessage {
            protocol_version: ProtocolVersion::Castv2_1_0 as i32,
            source_id: "sender-1".into(),
            destination_id: "receiver-0".into(),
            namespace: NAMESPACE_CONNECTION.into(),
            payload_type: PayloadType::String as i32,
            payload_utf8: Some(json!({"type": "CONNECT"}).to_string()),
            payload_binary: None,
        };
        codec::write_message(&mut stream, &connect_msg).await.unwrap();

        let ping = CastMessage {
            namespace: NAMESPACE_HEARTBEAT.into(),
            payload_utf8: Some(json!({"type": "PING"}).to_string()),
            ..connect_msg.clone()
        };
        codec::write_message(&mut stream, &ping).await.unwrap();

        let pong = codec::read_message(&mut stream).await.unwrap();
        assert_eq!(pong.namespace, NAMESPACE_HEARTBEAT);
        assert_eq!(pong.source_id, "receiver-0");
        assert_eq!(pong.destination_id, "sender-1");
        let body: Value = serde_json::from_str(pong.payload_utf8.as_deref().unwrap()).unwrap();
        assert_eq!(body["type"], "PONG");

        server.close().await;
    }
}
