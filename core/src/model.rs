//! Domain model types for WireGuard and Xray servers and their clients

use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

/// VPN software flavor managed by a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    WireGuard,
    Xray,
}

impl Flavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flavor::WireGuard => "wg",
            Flavor::Xray => "xray",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Flavor::WireGuard => "WireGuard",
            Flavor::Xray => "Xray",
        }
    }

    /// Transport the server listens on, used for the firewall rule
    pub fn protocol(&self) -> &'static str {
        match self {
            Flavor::WireGuard => "udp",
            Flavor::Xray => "tcp",
        }
    }
}

/// A private key. Serialized as a plain string, never shown by `Debug`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// A generated private/public key pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: Secret,
    pub public_key: String,
}

/// Common view of client records so the registry can handle both flavors
pub trait ClientRecord {
    fn name(&self) -> &str;
}

/// WireGuard server section of the persisted config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireGuardServer {
    pub host: String,
    pub port: u16,
    /// Server address with prefix length, e.g. `10.9.0.1/24`
    pub subnet: String,
    pub interface: String,
    pub dns: Vec<String>,
    pub private_key: Secret,
    pub public_key: String,
}

/// A WireGuard peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireGuardClient {
    pub name: String,
    pub ip: String,
    pub public_key: String,
    pub private_key: Secret,
}

impl ClientRecord for WireGuardClient {
    fn name(&self) -> &str {
        &self.name
    }
}

impl WireGuardClient {
    /// Last octet of the client address, the allocated slot
    pub fn host_number(&self) -> Result<u32> {
        self.ip
            .rsplit('.')
            .next()
            .and_then(|octet| octet.parse().ok())
            .ok_or_else(|| Error::parse(format!("Invalid client address '{}'", self.ip)))
    }
}

/// Complete persisted WireGuard state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireGuardConfig {
    pub clients_dir: PathBuf,
    pub no_ufw: bool,
    pub server: WireGuardServer,
    pub clients: Vec<WireGuardClient>,
}

/// Xray (XTLS-Reality) server section of the persisted config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrayServer {
    pub host: String,
    pub port: u16,
    /// Site impersonated for active probing
    pub reality_host: String,
    pub reality_port: u16,
    pub private_key: Secret,
    pub public_key: String,
}

/// An Xray VLESS user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrayClient {
    pub name: String,
    pub uuid: String,
    pub short_id: String,
    pub email: String,
    pub import_url: String,
}

impl ClientRecord for XrayClient {
    fn name(&self) -> &str {
        &self.name
    }
}

impl XrayClient {
    pub fn short_id_number(&self) -> Result<u32> {
        self.short_id
            .parse()
            .map_err(|_| Error::parse(format!("Invalid short id '{}'", self.short_id)))
    }
}

/// Complete persisted Xray state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrayConfig {
    pub no_ufw: bool,
    pub server: XrayServer,
    pub clients: Vec<XrayClient>,
}

/// Validates a client name; it ends up in file names and URL fragments
pub fn validate_client_name(name: &str) -> Result<()> {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();

    if name.is_empty() {
        return Err(Error::validation("Client name cannot be empty"));
    }

    let re = NAME_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("client name pattern is valid")
    });
    if !re.is_match(name) {
        return Err(Error::validation(format!(
            "Client name '{}' must start with a letter or digit and contain only letters, digits, '.', '_' and '-'",
            name
        )));
    }

    if name.len() > 64 {
        return Err(Error::validation(
            "Client name must be 64 characters or less",
        ));
    }

    Ok(())
}
