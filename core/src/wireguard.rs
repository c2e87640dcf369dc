//! WireGuard reconciliation run

use crate::config::{self, WireGuardOverrides};
use crate::registry::{self, WIREGUARD_HOST_RANGE};
use crate::render::{self, StatusReport};
use crate::session::Session;
use crate::sysfiles;
use crate::system;
use crate::{keys, validate_client_name, Flavor, Result, WireGuardClient, WireGuardConfig};
use std::path::{Path, PathBuf};

/// Everything one `veepeenet wireguard` invocation asks for
#[derive(Debug, Clone, Default)]
pub struct WireGuardRequest {
    pub overrides: WireGuardOverrides,
    pub add_clients: Vec<String>,
    pub remove_clients: Vec<String>,
    pub clean: bool,
    pub status: bool,
}

/// Reconcile the host with the request and return the status report.
///
/// With `status` set the report is produced right after loading the config
/// and nothing is written.
pub fn run(mut session: Session<'_>, request: &WireGuardRequest) -> Result<String> {
    for name in request.add_clients.iter().chain(&request.remove_clients) {
        validate_client_name(name)?;
    }

    if request.clean {
        let mut dirs = vec![session.paths().clients_dir.clone()];
        dirs.extend(request.overrides.clients_dir.clone());
        config::clean_configuration(&mut session, &dirs)?;
    }
    if !request.status {
        system::ensure_installed(&mut session, Flavor::WireGuard)?;
    }
    let mut config = config::load_wireguard(&mut session, &request.overrides)?;

    if request.status {
        return status(&mut session, &config);
    }

    add_clients(&mut session, &mut config, &request.add_clients)?;
    let removed: Vec<String> = config
        .clients
        .iter()
        .filter(|c| request.remove_clients.contains(&c.name))
        .map(|c| c.name.clone())
        .collect();
    config.clients = registry::remove_clients(config.clients, &request.remove_clients);

    write_configs(&mut session, &config)?;
    remove_client_configs(&mut session, &config.clients_dir, &removed)?;
    enable_forwarding(&mut session)?;
    if !config.no_ufw {
        configure_firewall(&mut session, &config)?;
    }

    let unit = system::service_name(Flavor::WireGuard, &config.server.interface);
    system::restart_service(&mut session, &unit)?;

    let report = status(&mut session, &config)?;
    session.finish()?;
    Ok(report)
}

/// Address of host `number` inside the server subnet
fn client_address(subnet: &str, number: u32) -> String {
    let network: Vec<&str> = subnet.split('.').take(3).collect();
    format!("{}.{}", network.join("."), number)
}

fn add_clients(
    session: &mut Session,
    config: &mut WireGuardConfig,
    requested: &[String],
) -> Result<()> {
    for name in registry::new_client_names(requested, &config.clients) {
        let client = new_client(session, &name, &config.clients, &config.server.subnet)?;
        log::info!("Added client {} ({})", client.name, client.ip);
        config.clients.push(client);
    }
    Ok(())
}

fn new_client(
    session: &mut Session,
    name: &str,
    existing: &[WireGuardClient],
    subnet: &str,
) -> Result<WireGuardClient> {
    session.step("generate_new_client", name, |s| {
        let taken = existing
            .iter()
            .map(WireGuardClient::host_number)
            .collect::<Result<Vec<_>>>()?;
        let number = registry::allocate_lowest(WIREGUARD_HOST_RANGE, &taken)?;
        let pair = keys::wireguard_key_pair(s)?;
        Ok(WireGuardClient {
            name: name.to_string(),
            ip: client_address(subnet, number),
            public_key: pair.public_key,
            private_key: pair.private_key,
        })
    })
}

fn write_configs(session: &mut Session, config: &WireGuardConfig) -> Result<()> {
    let config_path = session.paths().config.clone();
    session.write_file(&config_path, &config::dump_config(config)?, Some(0o600))?;

    let daemon_path = session
        .paths()
        .daemon_dir
        .join(format!("{}.conf", config.server.interface));
    session.write_file(
        &daemon_path,
        &render::wireguard_server_config(config),
        Some(0o600),
    )?;

    for client in &config.clients {
        let path = client_config_path(&config.clients_dir, &client.name);
        let text = render::wireguard_client_config(&config.server, client);
        session.write_file(&path, &text, Some(0o600))?;
    }
    Ok(())
}

fn client_config_path(clients_dir: &Path, name: &str) -> PathBuf {
    clients_dir.join(format!("{}.conf", name))
}

fn remove_client_configs(
    session: &mut Session,
    clients_dir: &Path,
    names: &[String],
) -> Result<()> {
    for name in names {
        session.remove_file(&client_config_path(clients_dir, name))?;
    }
    Ok(())
}

fn enable_forwarding(session: &mut Session) -> Result<()> {
    let sysctl = session.paths().sysctl.clone();
    session.patch_file(&sysctl, |content| {
        sysfiles::ensure_line(content, sysfiles::IP_FORWARD_LINE)
    })?;
    system::apply_sysctl(session)
}

fn configure_firewall(session: &mut Session, config: &WireGuardConfig) -> Result<()> {
    let interface = system::egress_interface(session)?;
    let rules = sysfiles::masquerade_rules(
        &sysfiles::masquerade_source(&config.server.subnet),
        &interface,
    );

    let before_rules = session.paths().ufw_before_rules.clone();
    session.patch_file(&before_rules, |content| {
        sysfiles::replace_fenced_block(
            content,
            sysfiles::UFW_BLOCK_BEGIN,
            sysfiles::UFW_BLOCK_END,
            &rules,
        )
    })?;

    let defaults = session.paths().ufw_defaults.clone();
    session.patch_file(&defaults, |content| {
        sysfiles::set_line(
            content,
            sysfiles::FORWARD_POLICY_KEY,
            sysfiles::FORWARD_POLICY_LINE,
        )
    })?;

    let ssh_port = system::ssh_port(session)?;
    system::configure_ufw(
        session,
        config.server.port,
        ssh_port,
        Flavor::WireGuard.protocol(),
    )
}

fn status(session: &mut Session, config: &WireGuardConfig) -> Result<String> {
    let unit = system::service_name(Flavor::WireGuard, &config.server.interface);
    let running = system::is_service_running(session, &unit)?;
    let report = StatusReport {
        version: crate::VERSION,
        server_name: Flavor::WireGuard.display_name(),
        running,
        host: &config.server.host,
        port: config.server.port,
        clients: config
            .clients
            .iter()
            .map(|c| render::wireguard_client_string(&config.clients_dir, c))
            .collect(),
    };
    Ok(report.render())
}
