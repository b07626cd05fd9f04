//! Top-level server: TLS listener + mDNS advertisement + per-connection
//! channel tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::crypto::cert::{generate_intermediate_ca, generate_standard};
use crate::adapters::crypto::{CertTemplate, KeyPair};
use crate::adapters::discovery::{AdvertiseConfig, CastAdvertiser};
use crate::adapters::wire::{CastConn, ConnCerts};
use crate::application::ports::Conn;
use crate::application::Receiver;
use crate::domain::error::{Error, Result};

pub struct ServerConfig {
    /// Required when `intermediate_ca_certs` is empty.
    pub root_ca: Option<KeyPair>,
    /// Generated from `root_ca` when empty; the peer and auth certs are
    /// issued from the first entry.
    pub intermediate_ca_certs: Vec<KeyPair>,
    /// Presented on the TLS socket; generated when absent.
    pub peer_cert: Option<KeyPair>,
    /// Signs device-auth challenges; generated when absent.
    pub auth_cert: Option<KeyPair>,
    /// Defaults to `0.0.0.0:0`.
    pub listen_addr: String,
    /// Defaults to "TakeCast".
    pub instance_name: String,
    /// Defaults to "TakeCast".
    pub friendly_name: String,
    /// Empty value deletes the TXT key.
    pub text_overrides: HashMap<String, String>,
    /// Defaults to a random UUIDv4 with dashes removed.
    pub device_id: String,
    /// Disable to run without mDNS (tests).
    pub advertise: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root_ca: None,
            intermediate_ca_certs: Vec::new(),
            peer_cert: None,
            auth_cert: None,
            listen_addr: String::new(),
            instance_name: String::new(),
            friendly_name: String::new(),
            text_overrides: HashMap::new(),
            device_id: String::new(),
            advertise: true,
        }
    }
}

pub struct Server {
    receiver: Arc<Receiver>,
    listener: TcpListener,
    acceptor: TlsAcceptor,
    advertiser: Mutex<Option<CastAdvertiser>>,
    certs: ConnCerts,
    cancel: CancellationToken,
}

impl Server {
    /// Bootstrap missing certificates, bind the TLS listener, and register
    /// the mDNS advertisement.
    pub async fn listen(config: ServerConfig) -> Result<Server> {
        let intermediates = if config.intermediate_ca_certs.is_empty() {
            let root = config.root_ca.as_ref().ok_or_else(|| {
                Error::Configuration(
                    "root CA is required when no intermediate CA is given".into(),
                )
            })?;
            debug!("generating intermediate CA cert");
            vec![generate_intermediate_ca(root, None, None)?]
        } else {
            config.intermediate_ca_certs
        };
        let peer_cert = match config.peer_cert {
            Some(cert) => cert,
            None => {
                debug!("generating peer cert");
                generate_standard(
                    &intermediates[0],
                    Some(CertTemplate::new("TakeCast Peer")),
                    None,
                )?
            }
        };
        let auth_cert = match config.auth_cert {
            Some(cert) => cert,
            None => {
                debug!("generating auth cert");
                generate_standard(
                    &intermediates[0],
                    Some(CertTemplate::new("TakeCast Auth")),
                    None,
                )?
            }
        };

        let (cert_der, key_der) = peer_cert.rustls_identity()?;
        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .map_err(|e| Error::Configuration(format!("bad TLS identity: {e}")))?;
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        let listen_addr = if config.listen_addr.is_empty() {
            "0.0.0.0:0"
        } else {
            &config.listen_addr
        };
        let listener = TcpListener::bind(listen_addr).await?;
        let port = listener.local_addr()?.port();
        info!(%port, "TLS listener started");

        let advertiser = if config.advertise {
            let device_id = if config.device_id.is_empty() {
                Uuid::new_v4().simple().to_string()
            } else {
                config.device_id
            };
            let instance_name = if config.instance_name.is_empty() {
                "TakeCast".to_string()
            } else {
                config.instance_name
            };
            let friendly_name = if config.friendly_name.is_empty() {
                "TakeCast".to_string()
            } else {
                config.friendly_name
            };
            Some(CastAdvertiser::register(AdvertiseConfig {
                instance_name,
                friendly_name,
                device_id,
                port,
                text_overrides: config.text_overrides,
            })?)
        } else {
            None
        };

        Ok(Server {
            receiver: Receiver::new(),
            listener,
            acceptor,
            advertiser: Mutex::new(advertiser),
            certs: ConnCerts {
                intermediates: Arc::new(intermediates),
                peer: Arc::new(peer_cert),
                auth: Arc::new(auth_cert),
            },
            cancel: CancellationToken::new(),
        })
    }

    pub fn receiver(&self) -> &Arc<Receiver> {
        &self.receiver
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop; a listener error is fatal and ends `serve`.
    pub async fn serve(&self) -> Result<()> {
        loop {
            let (socket, peer_addr) = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Closed),
                accepted = self.listener.accept() => accepted?,
            };
            debug!(%peer_addr, "accepted connection");

            let acceptor = self.acceptor.clone();
            let certs = self.certs.clone();
            let receiver = Arc::clone(&self.receiver);
            let ctx = self.cancel.child_token();
            tokio::spawn(async move {
                let stream = match acceptor.accept(socket).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(%peer_addr, "TLS handshake failed: {e}");
                        return;
                    }
                };
                let conn: Arc<dyn Conn> = Arc::new(CastConn::new(stream, certs));
                let channel = match Arc::clone(&receiver).connect_channel(&ctx, conn).await {
                    Ok(channel) => channel,
                    Err(e) => {
                        warn!(%peer_addr, "connect failed: {e}");
                        return;
                    }
                };
                match channel.run(ctx).await {
                    Ok(()) => {}
                    Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        info!(%peer_addr, "sender closed connection");
                    }
                    Err(Error::Cancelled) => {
                        info!(%peer_addr, "receiver closed connection");
                    }
                    Err(e) => warn!(%peer_addr, "connection failed: {e}"),
                }
            });
        }
    }

    /// Stop advertising, close the receiver, and cancel all connections.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.receiver.close().await;
        let advertiser = self
            .advertiser
            .lock()
            .expect("advertiser lock poisoned")
            .take();
        if let Some(advertiser) = advertiser {
            advertiser.unregister();
        }
    }
}
