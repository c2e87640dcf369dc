//! Host integration: services, firewall, packages, versions and address
//! detection. Everything goes through the session so it is journaled and
//! honours dry-run.

use crate::session::Session;
use crate::{sysfiles, Error, Flavor, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Used when no public IPv4 can be detected
pub const FALLBACK_HOST: &str = "127.0.0.1";

/// Xray release installed and expected on the host
pub const XRAY_VERSION: &str = "1.8.24";

pub const XRAY_INSTALLER_URL: &str =
    "https://github.com/XTLS/Xray-install/raw/main/install-release.sh";

pub const UNKNOWN_VERSION: &str = "unknown";

fn ipv4_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{1,3}(?:\.\d{1,3}){3}").unwrap())
}

fn xray_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Xray (\d+\.\d+\.\d+)").unwrap())
}

fn wireguard_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bv\d+(?:\.\d+)+").unwrap())
}

/// First non-loopback IPv4 address in `text`
pub fn find_ipv4(text: &str) -> Option<&str> {
    ipv4_re()
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|ip| !ip.starts_with("127."))
}

/// Public address of this host according to `hostname -i`
pub fn detect_ipv4(session: &mut Session) -> Result<String> {
    session.step("detect_ipv4", "", |s| {
        let output = s.run_unchecked("hostname -i")?;
        if output.success() {
            if let Some(ip) = find_ipv4(&output.stdout) {
                return Ok(ip.to_string());
            }
        }
        log::warn!(
            "Could not detect the host address, using {}. Pass --host to set it",
            FALLBACK_HOST
        );
        Ok(FALLBACK_HOST.to_string())
    })
}

/// Systemd unit serving a flavor
pub fn service_name(flavor: Flavor, interface: &str) -> String {
    match flavor {
        Flavor::WireGuard => format!("wg-quick@{}", interface),
        Flavor::Xray => "xray".to_string(),
    }
}

pub fn is_service_running(session: &mut Session, unit: &str) -> Result<bool> {
    session.step("is_service_running", unit, |s| {
        let output = s.run_unchecked(&format!("systemctl is-active --quiet {}", unit))?;
        Ok(output.success())
    })
}

pub fn restart_service(session: &mut Session, unit: &str) -> Result<()> {
    session.step("restart_service", unit, |s| {
        s.run(&format!("systemctl restart {}.service", unit))?;
        Ok(())
    })
}

/// Open the service port and SSH, then (re)enable ufw
pub fn configure_ufw(
    session: &mut Session,
    port: u16,
    ssh_port: u16,
    protocol: &str,
) -> Result<()> {
    let command = format!(
        "ufw allow {}/{} && ufw allow {}/tcp && yes | ufw enable && ufw reload",
        port, protocol, ssh_port
    );
    session.step("configure_ufw", format!("{}/{}", port, protocol), |s| {
        s.run(&command)?;
        Ok(())
    })
}

pub fn apply_sysctl(session: &mut Session) -> Result<()> {
    session.step("apply_sysctl", "", |s| {
        s.run("sysctl -p")?;
        Ok(())
    })
}

/// SSH port from sshd_config; a missing file means the default port
pub fn ssh_port(session: &mut Session) -> Result<u16> {
    let path = session.paths().sshd_config.clone();
    if !path.exists() {
        log::debug!(
            "{} not found, assuming SSH on port {}",
            path.display(),
            sysfiles::DEFAULT_SSH_PORT
        );
        return Ok(sysfiles::DEFAULT_SSH_PORT);
    }
    let content = session.read_file(&path)?;
    session.step("get_ssh_port", path.display().to_string(), |_| {
        sysfiles::ssh_port(&content)
    })
}

/// Interface carrying the default route
pub fn egress_interface(session: &mut Session) -> Result<String> {
    let path = session.paths().route_table.clone();
    let table = session.read_file(&path)?;
    session.step("get_default_interface", path.display().to_string(), |_| {
        sysfiles::default_interface(&table)
            .ok_or_else(|| Error::not_found("No default route in the routing table"))
    })
}

pub fn is_wireguard_installed(session: &mut Session) -> Result<bool> {
    session.step("is_wireguard_package_installed", "", |s| {
        let output = s.run_unchecked("apt list --installed wireguard")?;
        Ok(output
            .stdout
            .lines()
            .any(|line| line.starts_with("wireguard/")))
    })
}

pub fn install_wireguard(session: &mut Session) -> Result<()> {
    session.step("install_wireguard_apt_package", "", |s| {
        s.run("apt update && apt install -y wireguard")?;
        Ok(())
    })
}

/// Version reported by the installed server binary, or `unknown`
pub fn server_version(session: &mut Session, flavor: Flavor) -> Result<String> {
    let command = match flavor {
        Flavor::WireGuard => "wg --version",
        Flavor::Xray => "xray --version",
    };
    session.step("get_server_version", command, |s| {
        let output = s.run_unchecked(command)?;
        Ok(parse_server_version(flavor, &output.stdout)
            .unwrap_or(UNKNOWN_VERSION)
            .to_string())
    })
}

pub fn parse_server_version(flavor: Flavor, stdout: &str) -> Option<&str> {
    match flavor {
        Flavor::WireGuard => wireguard_version_re().find(stdout).map(|m| m.as_str()),
        Flavor::Xray => xray_version_re()
            .captures(stdout)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str()),
    }
}

pub fn is_xray_installed(session: &mut Session, version: &str) -> Result<bool> {
    Ok(server_version(session, Flavor::Xray)? == version)
}

/// Fetch the official installer into the scratch dir and run it
pub fn install_xray(session: &mut Session, version: &str) -> Result<()> {
    let tmp_dir = session.paths().tmp_dir.clone();
    let script = tmp_dir.join("install-release.sh");
    session.step("install_xray", version, |s| {
        s.run(&format!(
            "mkdir -p {} && curl -fsSL -o {} {}",
            tmp_dir.display(),
            script.display(),
            XRAY_INSTALLER_URL
        ))?;
        s.run(&format!("chmod 700 {}", script.display()))?;
        s.run(&format!("{} install --version {}", script.display(), version))?;
        Ok(())
    })
}

/// Install the daemon package unless it is already present
pub fn ensure_installed(session: &mut Session, flavor: Flavor) -> Result<()> {
    match flavor {
        Flavor::WireGuard => {
            if !is_wireguard_installed(session)? {
                log::info!("Installing WireGuard");
                install_wireguard(session)?;
            }
        }
        Flavor::Xray => {
            if !is_xray_installed(session, XRAY_VERSION)? {
                log::info!("Installing Xray {}", XRAY_VERSION);
                install_xray(session, XRAY_VERSION)?;
            }
        }
    }
    Ok(())
}
