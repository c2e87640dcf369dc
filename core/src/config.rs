//! Persisted server state, host paths, and reconciliation of CLI overrides
//! with stored values and defaults

use crate::session::Session;
use crate::{
    keys, system, Flavor, Secret, WireGuardClient, WireGuardConfig, WireGuardServer, XrayClient,
    XrayConfig, XrayServer, Result,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const WIREGUARD_DEFAULT_PORT: u16 = 51820;
pub const WIREGUARD_DEFAULT_SUBNET: &str = "10.9.0.1/24";
pub const WIREGUARD_DEFAULT_INTERFACE: &str = "wg0";

pub const XRAY_DEFAULT_PORT: u16 = 443;
pub const XRAY_DEFAULT_REALITY_HOST: &str = "microsoft.com";
pub const XRAY_DEFAULT_REALITY_PORT: u16 = 443;

pub const DEFAULT_DNS: [&str; 2] = ["1.1.1.1", "1.0.0.1"];

/// Every location on the host a run reads or writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    /// Persisted JSON state
    pub config: PathBuf,
    pub result_log: PathBuf,
    /// Default output directory for generated client files
    pub clients_dir: PathBuf,
    /// Directory holding the daemon's own configuration
    pub daemon_dir: PathBuf,
    pub sysctl: PathBuf,
    pub ufw_before_rules: PathBuf,
    pub ufw_defaults: PathBuf,
    pub sshd_config: PathBuf,
    pub route_table: PathBuf,
    /// Scratch space for downloaded installers
    pub tmp_dir: PathBuf,
}

impl HostPaths {
    /// Standard locations for a flavor on a live host
    pub fn for_flavor(flavor: Flavor) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        let base = Self::system_files(Path::new("/"));
        match flavor {
            Flavor::WireGuard => {
                let state = home.join(".veepeenet").join("wg");
                Self {
                    config: state.join("config.json"),
                    result_log: state.join("result.json"),
                    clients_dir: state.join("clients"),
                    daemon_dir: PathBuf::from("/etc/wireguard"),
                    ..base
                }
            }
            Flavor::Xray => Self {
                config: PathBuf::from("/usr/local/etc/veepeenet/xray/config.json"),
                result_log: PathBuf::from("/var/log/veepeenet/xray/log.json"),
                clients_dir: PathBuf::from("/usr/local/etc/veepeenet/xray/clients"),
                daemon_dir: PathBuf::from("/usr/local/etc/xray"),
                ..base
            },
        }
    }

    /// Same layout with everything below `root`, for staging and tests
    pub fn rooted_at(root: &Path, flavor: Flavor) -> Self {
        let base = Self::system_files(root);
        let state = root.join("veepeenet").join(flavor.as_str());
        Self {
            config: state.join("config.json"),
            result_log: state.join("result.json"),
            clients_dir: state.join("clients"),
            daemon_dir: root.join("etc").join(flavor.as_str()),
            ..base
        }
    }

    fn system_files(root: &Path) -> Self {
        Self {
            config: PathBuf::new(),
            result_log: PathBuf::new(),
            clients_dir: PathBuf::new(),
            daemon_dir: PathBuf::new(),
            sysctl: root.join("etc/sysctl.conf"),
            ufw_before_rules: root.join("etc/ufw/before.rules"),
            ufw_defaults: root.join("etc/default/ufw"),
            sshd_config: root.join("etc/ssh/sshd_config"),
            route_table: root.join("proc/net/route"),
            tmp_dir: root.join("tmp/veepeenet"),
        }
    }
}

/// Values supplied on the command line for a WireGuard run
#[derive(Debug, Clone, Default)]
pub struct WireGuardOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub subnet: Option<String>,
    pub interface: Option<String>,
    pub dns: Option<Vec<String>>,
    pub clients_dir: Option<PathBuf>,
    pub no_ufw: bool,
}

/// Values supplied on the command line for an Xray run
#[derive(Debug, Clone, Default)]
pub struct XrayOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub reality_host: Option<String>,
    pub reality_port: Option<u16>,
    pub no_ufw: bool,
}

// Stored documents are read leniently: any field may be missing
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoredWireGuard {
    clients_dir: Option<PathBuf>,
    no_ufw: Option<bool>,
    server: StoredWireGuardServer,
    clients: Vec<WireGuardClient>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoredWireGuardServer {
    host: Option<String>,
    port: Option<u16>,
    subnet: Option<String>,
    interface: Option<String>,
    dns: Option<Vec<String>>,
    private_key: Option<Secret>,
    public_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoredXray {
    no_ufw: Option<bool>,
    server: StoredXrayServer,
    clients: Vec<XrayClient>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoredXrayServer {
    host: Option<String>,
    port: Option<u16>,
    reality_host: Option<String>,
    reality_port: Option<u16>,
    private_key: Option<Secret>,
    public_key: Option<String>,
}

/// Values that count as "not set" when resolving precedence
trait Blank {
    fn is_blank(&self) -> bool;
}

impl Blank for String {
    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

impl Blank for u16 {
    fn is_blank(&self) -> bool {
        *self == 0
    }
}

impl Blank for Vec<String> {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl Blank for PathBuf {
    fn is_blank(&self) -> bool {
        self.as_os_str().is_empty()
    }
}

impl Blank for Secret {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

/// Flag, else stored value, skipping blanks at both levels
fn pick<T: Blank>(flag: Option<T>, stored: Option<T>) -> Option<T> {
    flag.filter(|v| !v.is_blank())
        .or_else(|| stored.filter(|v| !v.is_blank()))
}

fn read_stored<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn host_or_detect(session: &mut Session, host: Option<String>) -> Result<String> {
    match host {
        Some(host) => Ok(host),
        None => system::detect_ipv4(session),
    }
}

/// Merge the stored WireGuard state with `overrides` and defaults.
/// Missing server keys are generated.
pub fn load_wireguard(
    session: &mut Session,
    overrides: &WireGuardOverrides,
) -> Result<WireGuardConfig> {
    let config_path = session.paths().config.clone();
    let default_clients_dir = session.paths().clients_dir.clone();
    session.step("load_config", config_path.display().to_string(), |s| {
        let stored: StoredWireGuard = read_stored(&config_path)?;
        let server = stored.server;

        let private_key = match pick(None, server.private_key) {
            Some(key) => key,
            None => keys::wireguard_private_key(s)?,
        };
        let public_key = match pick(None, server.public_key) {
            Some(key) => key,
            None => keys::wireguard_public_key(s, &private_key)?,
        };
        let host = host_or_detect(s, pick(overrides.host.clone(), server.host))?;

        Ok(WireGuardConfig {
            clients_dir: pick(overrides.clients_dir.clone(), stored.clients_dir)
                .unwrap_or(default_clients_dir),
            no_ufw: overrides.no_ufw || stored.no_ufw.unwrap_or(false),
            server: WireGuardServer {
                host,
                port: pick(overrides.port, server.port).unwrap_or(WIREGUARD_DEFAULT_PORT),
                subnet: pick(overrides.subnet.clone(), server.subnet)
                    .unwrap_or_else(|| WIREGUARD_DEFAULT_SUBNET.to_string()),
                interface: pick(overrides.interface.clone(), server.interface)
                    .unwrap_or_else(|| WIREGUARD_DEFAULT_INTERFACE.to_string()),
                dns: pick(overrides.dns.clone(), server.dns).unwrap_or_else(default_dns),
                private_key,
                public_key,
            },
            clients: stored.clients,
        })
    })
}

/// Merge the stored Xray state with `overrides` and defaults.
/// Both Reality keys are regenerated if either one is missing.
pub fn load_xray(session: &mut Session, overrides: &XrayOverrides) -> Result<XrayConfig> {
    let config_path = session.paths().config.clone();
    session.step("load_config", config_path.display().to_string(), |s| {
        let stored: StoredXray = read_stored(&config_path)?;
        let server = stored.server;

        let (private_key, public_key) = match (
            pick(None, server.private_key),
            pick(None, server.public_key),
        ) {
            (Some(private_key), Some(public_key)) => (private_key, public_key),
            _ => {
                let pair = keys::xray_key_pair(s)?;
                (pair.private_key, pair.public_key)
            }
        };
        let host = host_or_detect(s, pick(overrides.host.clone(), server.host))?;

        Ok(XrayConfig {
            no_ufw: overrides.no_ufw || stored.no_ufw.unwrap_or(false),
            server: XrayServer {
                host,
                port: pick(overrides.port, server.port).unwrap_or(XRAY_DEFAULT_PORT),
                reality_host: pick(overrides.reality_host.clone(), server.reality_host)
                    .unwrap_or_else(|| XRAY_DEFAULT_REALITY_HOST.to_string()),
                reality_port: pick(overrides.reality_port, server.reality_port)
                    .unwrap_or(XRAY_DEFAULT_REALITY_PORT),
                private_key,
                public_key,
            },
            clients: stored.clients,
        })
    })
}

fn default_dns() -> Vec<String> {
    DEFAULT_DNS.iter().map(|s| s.to_string()).collect()
}

/// Pretty JSON form of the persisted state
pub fn dump_config<T: Serialize>(config: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(config)?)
}

/// Remove the persisted state and any generated client files
pub fn clean_configuration(session: &mut Session, clients_dirs: &[PathBuf]) -> Result<()> {
    let config_path = session.paths().config.clone();
    session.remove_file(&config_path)?;
    for dir in clients_dirs {
        session.remove_path(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::ScriptedRunner;
    use crate::session::testing::session;
    use tempfile::tempdir;

    const WG_PRIVATE: &str = "aFq3Bl0bVh5Hh1c4rYd0yYl0Dq6mQ0JvYbq5e2S0x2c=";
    const WG_PUBLIC: &str = "Xx2kQ3mF9i7pZ1b0cR6tY8uV4wA5sD3eG2hJ1kL0mN8=";
    const HOST: &str = "192.168.1.101";

    fn wg_runner() -> ScriptedRunner {
        ScriptedRunner::new()
            .respond("hostname -i", HOST)
            .respond("wg genkey", WG_PRIVATE)
            .respond("wg pubkey", WG_PUBLIC)
    }

    fn xray_runner() -> ScriptedRunner {
        ScriptedRunner::new()
            .respond("hostname -i", HOST)
            .respond(
                "xray x25519",
                "PrivateKey: iL90SiQVSG4TzYyvLsOKP9unFSalPlagjE7_-tmX5XE\nPassword: nVvbwNvhA7iiS77f2UkFR5h4lZxAnkryO7ZkkqK1eyo\n",
            )
    }

    #[test]
    fn test_wireguard_defaults_without_file_or_flags() {
        let dir = tempdir().unwrap();
        let runner = wg_runner();
        let mut session = session(&runner, dir.path(), Flavor::WireGuard);

        let config = load_wireguard(&mut session, &WireGuardOverrides::default()).unwrap();

        assert_eq!(
            config,
            WireGuardConfig {
                clients_dir: session.paths().clients_dir.clone(),
                no_ufw: false,
                server: WireGuardServer {
                    host: HOST.to_string(),
                    port: WIREGUARD_DEFAULT_PORT,
                    subnet: WIREGUARD_DEFAULT_SUBNET.to_string(),
                    interface: WIREGUARD_DEFAULT_INTERFACE.to_string(),
                    dns: vec!["1.1.1.1".to_string(), "1.0.0.1".to_string()],
                    private_key: Secret::new(WG_PRIVATE),
                    public_key: WG_PUBLIC.to_string(),
                },
                clients: Vec::new(),
            }
        );
    }

    #[test]
    fn test_wireguard_partial_overrides_keep_stored_fields() {
        let dir = tempdir().unwrap();
        let runner = wg_runner();
        let mut session = session(&runner, dir.path(), Flavor::WireGuard);
        let stored = serde_json::json!({
            "clients_dir": "/srv/clients",
            "no_ufw": true,
            "server": {
                "host": "vpn.example.com",
                "port": 51000,
                "subnet": "10.8.0.1/24",
                "interface": "wg1",
                "dns": ["9.9.9.9"],
                "private_key": "stored-private",
                "public_key": "stored-public"
            },
            "clients": [
                {"name": "phone", "ip": "10.8.0.2", "public_key": "p", "private_key": "k"}
            ]
        });
        let config_path = session.paths().config.clone();
        fs::create_dir_all(config_path.parent().unwrap()).unwrap();
        fs::write(&config_path, stored.to_string()).unwrap();

        let overrides = WireGuardOverrides {
            port: Some(443),
            dns: Some(vec!["8.8.8.8".to_string()]),
            ..Default::default()
        };
        let config = load_wireguard(&mut session, &overrides).unwrap();

        assert_eq!(config.server.port, 443);
        assert_eq!(config.server.dns, vec!["8.8.8.8".to_string()]);
        assert_eq!(config.server.host, "vpn.example.com");
        assert_eq!(config.server.subnet, "10.8.0.1/24");
        assert_eq!(config.server.interface, "wg1");
        assert_eq!(config.server.private_key.expose(), "stored-private");
        assert_eq!(config.server.public_key, "stored-public");
        assert_eq!(config.clients_dir, PathBuf::from("/srv/clients"));
        assert!(config.no_ufw);
        assert_eq!(config.clients.len(), 1);
        // nothing had to be generated or detected
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_wireguard_derives_missing_public_key() {
        let dir = tempdir().unwrap();
        let runner = wg_runner();
        let mut session = session(&runner, dir.path(), Flavor::WireGuard);
        let config_path = session.paths().config.clone();
        fs::create_dir_all(config_path.parent().unwrap()).unwrap();
        fs::write(
            &config_path,
            format!(r#"{{"server": {{"host": "h", "private_key": "{}"}}}}"#, WG_PRIVATE),
        )
        .unwrap();

        let config = load_wireguard(&mut session, &WireGuardOverrides::default()).unwrap();

        assert_eq!(config.server.public_key, WG_PUBLIC);
        assert_eq!(runner.calls(), vec!["wg pubkey".to_string()]);
    }

    #[test]
    fn test_xray_defaults_without_file_or_flags() {
        let dir = tempdir().unwrap();
        let runner = xray_runner();
        let mut session = session(&runner, dir.path(), Flavor::Xray);

        let config = load_xray(&mut session, &XrayOverrides::default()).unwrap();

        assert_eq!(config.server.host, HOST);
        assert_eq!(config.server.port, XRAY_DEFAULT_PORT);
        assert_eq!(config.server.reality_host, XRAY_DEFAULT_REALITY_HOST);
        assert_eq!(config.server.reality_port, XRAY_DEFAULT_REALITY_PORT);
        assert_eq!(
            config.server.private_key.expose(),
            "iL90SiQVSG4TzYyvLsOKP9unFSalPlagjE7_-tmX5XE"
        );
        assert_eq!(
            config.server.public_key,
            "nVvbwNvhA7iiS77f2UkFR5h4lZxAnkryO7ZkkqK1eyo"
        );
        assert!(!config.no_ufw);
        assert!(config.clients.is_empty());
    }

    #[test]
    fn test_xray_flags_win_over_file() {
        let dir = tempdir().unwrap();
        let runner = xray_runner();
        let mut session = session(&runner, dir.path(), Flavor::Xray);
        let config_path = session.paths().config.clone();
        fs::create_dir_all(config_path.parent().unwrap()).unwrap();
        fs::write(
            &config_path,
            r#"{"no_ufw": false, "server": {"host": "1.2.3.4", "port": 8443,
                "reality_host": "yahoo.com", "reality_port": 443,
                "private_key": "priv", "public_key": "pub"}, "clients": []}"#,
        )
        .unwrap();

        let overrides = XrayOverrides {
            reality_host: Some("reality.com".to_string()),
            port: Some(0),
            no_ufw: true,
            ..Default::default()
        };
        let config = load_xray(&mut session, &overrides).unwrap();

        assert_eq!(config.server.reality_host, "reality.com");
        // port 0 counts as not given
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.server.host, "1.2.3.4");
        assert_eq!(config.server.private_key.expose(), "priv");
        assert!(config.no_ufw);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let runner = xray_runner();
        let mut session = session(&runner, dir.path(), Flavor::Xray);
        let config_path = session.paths().config.clone();
        fs::create_dir_all(config_path.parent().unwrap()).unwrap();
        fs::write(&config_path, "{ not json").unwrap();

        assert!(load_xray(&mut session, &XrayOverrides::default()).is_err());
        assert!(session.journal().has_error);
    }

    #[test]
    fn test_dump_config_uses_two_space_indent() {
        let dir = tempdir().unwrap();
        let runner = xray_runner();
        let mut session = session(&runner, dir.path(), Flavor::Xray);
        let config = load_xray(&mut session, &XrayOverrides::default()).unwrap();

        let dump = dump_config(&config).unwrap();
        assert!(dump.starts_with("{\n  \"no_ufw\": false,\n  \"server\": {\n    \"host\""));
        let back: XrayConfig = serde_json::from_str(&dump).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_clean_configuration() {
        let dir = tempdir().unwrap();
        let runner = wg_runner();
        let mut session = session(&runner, dir.path(), Flavor::WireGuard);
        let paths = session.paths().clone();
        fs::create_dir_all(&paths.clients_dir).unwrap();
        fs::write(&paths.config, "{}").unwrap();
        fs::write(paths.clients_dir.join("phone.conf"), "x").unwrap();

        clean_configuration(&mut session, &[paths.clients_dir.clone()]).unwrap();

        assert!(!paths.config.exists());
        assert!(!paths.clients_dir.exists());
    }

    #[test]
    fn test_rooted_paths_stay_under_root() {
        let root = Path::new("/tmp/stage");
        let paths = HostPaths::rooted_at(root, Flavor::Xray);
        for path in [
            &paths.config,
            &paths.result_log,
            &paths.daemon_dir,
            &paths.sysctl,
            &paths.route_table,
        ] {
            assert!(path.starts_with(root));
        }
    }
}
