//! mDNS advertisement: impersonate a Chromecast on the local network.
//!
//! # TXT record keys
//!
//! | Key | Default            | Meaning                                  |
//! |-----|--------------------|------------------------------------------|
//! | id  | random hex UUID    | Unique device id                         |
//! | ve  | `02`               | Protocol version                         |
//! | md  | `Chromecast`       | Model name                               |
//! | fn  | `TakeCast`         | Friendly name                            |
//! | ca  | `5`                | Capabilities bitmask                     |
//! | st  | `0`                | Status                                   |
//! | rs  |                    | Running app status text                  |
//! | ic  | `/setup/icon.png`  | Icon path                                |
//!
//! Overrides: an empty value deletes the key, a non-empty one replaces the
//! default.

use std::collections::HashMap;
use std::net::IpAddr;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{info, warn};

use crate::domain::error::{Error, Result};

pub const SERVICE_TYPE: &str = "_googlecast._tcp.local.";

pub struct AdvertiseConfig {
    pub instance_name: String,
    pub friendly_name: String,
    /// UUIDv4 with dashes removed.
    pub device_id: String,
    pub port: u16,
    pub text_overrides: HashMap<String, String>,
}

/// Active advertisement; call [`unregister`] (or drop) to stop.
pub struct CastAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

impl CastAdvertiser {
    pub fn register(config: AdvertiseConfig) -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| Error::Configuration(format!("failed starting mDNS daemon: {e}")))?;

        let raw_host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "takecast".to_owned());
        let host = format!("{raw_host}.local.");
        let ip = detect_local_ip();

        let mut properties = HashMap::from([
            ("id".to_owned(), config.device_id.clone()),
            ("ve".to_owned(), "02".to_owned()),
            ("md".to_owned(), "Chromecast".to_owned()),
            ("fn".to_owned(), config.friendly_name.clone()),
            ("ca".to_owned(), "5".to_owned()),
            ("st".to_owned(), "0".to_owned()),
            ("rs".to_owned(), String::new()),
            ("ic".to_owned(), "/setup/icon.png".to_owned()),
        ]);
        for (key, value) in &config.text_overrides {
            if value.is_empty() {
                properties.remove(key);
            } else {
                properties.insert(key.clone(), value.clone());
            }
        }

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &config.instance_name,
            &host,
            ip,
            config.port,
            Some(properties),
        )
        .map_err(|e| Error::Configuration(format!("bad mDNS service info: {e}")))?;

        let fullname = service.get_fullname().to_owned();
        daemon
            .register(service)
            .map_err(|e| Error::Configuration(format!("failed registering mDNS service: {e}")))?;
        info!(
            instance = %config.instance_name,
            %ip,
            port = config.port,
            "advertising cast receiver"
        );
        Ok(Self { daemon, fullname })
    }

    pub fn unregister(self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            warn!("failed unregistering mDNS service '{}': {e}", self.fullname);
        }
    }
}

/// Primary LAN IPv4 address from the OS routing table; no packets are sent.
pub fn detect_local_ip() -> IpAddr {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| {
            s.connect("8.8.8.8:80")?;
            s.local_addr()
        })
        .map(|a| a.ip())
        .unwrap_or_else(|_| IpAddr::V4(std::net::Ipv4Addr::LOCALHOST))
}
