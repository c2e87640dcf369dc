//! Xray (XTLS-Reality) reconciliation run

use crate::config::{self, XrayOverrides};
use crate::registry::{self, XRAY_SHORT_ID_RANGE};
use crate::render::{self, StatusReport};
use crate::session::Session;
use crate::system;
use crate::{keys, validate_client_name, Flavor, Result, XrayClient, XrayConfig, XrayServer};

/// Everything one `veepeenet xray` invocation asks for
#[derive(Debug, Clone, Default)]
pub struct XrayRequest {
    pub overrides: XrayOverrides,
    pub add_clients: Vec<String>,
    pub remove_clients: Vec<String>,
    pub clean: bool,
    pub status: bool,
}

/// Reconcile the host with the request and return the status report
pub fn run(mut session: Session<'_>, request: &XrayRequest) -> Result<String> {
    for name in request.add_clients.iter().chain(&request.remove_clients) {
        validate_client_name(name)?;
    }

    if request.clean {
        config::clean_configuration(&mut session, &[])?;
    }
    if !request.status {
        system::ensure_installed(&mut session, Flavor::Xray)?;
    }
    let mut config = config::load_xray(&mut session, &request.overrides)?;

    if request.status {
        return status(&mut session, &config);
    }

    for name in registry::new_client_names(&request.add_clients, &config.clients) {
        let client = new_client(&mut session, &name, &config)?;
        log::info!("Added client {} (short id {})", client.name, client.short_id);
        config.clients.push(client);
    }
    config.clients = registry::remove_clients(config.clients, &request.remove_clients);

    let config_path = session.paths().config.clone();
    session.write_file(&config_path, &config::dump_config(&config)?, Some(0o600))?;
    // the daemon runs unprivileged and must be able to read its config
    let daemon_path = session.paths().daemon_dir.join("config.json");
    session.write_file(&daemon_path, &render::xray_server_config(&config)?, None)?;

    if !config.no_ufw {
        let ssh_port = system::ssh_port(&mut session)?;
        system::configure_ufw(
            &mut session,
            config.server.port,
            ssh_port,
            Flavor::Xray.protocol(),
        )?;
    }

    let unit = system::service_name(Flavor::Xray, "");
    system::restart_service(&mut session, &unit)?;

    let report = status(&mut session, &config)?;
    session.finish()?;
    Ok(report)
}

fn new_client(session: &mut Session, name: &str, config: &XrayConfig) -> Result<XrayClient> {
    session.step("generate_new_client", name, |_| {
        let taken = config
            .clients
            .iter()
            .map(XrayClient::short_id_number)
            .collect::<Result<Vec<_>>>()?;
        let short_id = format!("{:04}", registry::allocate_lowest(XRAY_SHORT_ID_RANGE, &taken)?);
        Ok(build_client(&config.server, name, &keys::new_uuid(), &short_id))
    })
}

fn build_client(server: &XrayServer, name: &str, uuid: &str, short_id: &str) -> XrayClient {
    XrayClient {
        name: name.to_string(),
        uuid: uuid.to_string(),
        short_id: short_id.to_string(),
        email: format!("{}@{}", name, server.host),
        import_url: render::xray_import_url(server, name, uuid, short_id),
    }
}

fn status(session: &mut Session, config: &XrayConfig) -> Result<String> {
    let unit = system::service_name(Flavor::Xray, "");
    let running = system::is_service_running(session, &unit)?;
    let report = StatusReport {
        version: crate::VERSION,
        server_name: Flavor::Xray.display_name(),
        running,
        host: &config.server.host,
        port: config.server.port,
        clients: config.clients.iter().map(render::xray_client_string).collect(),
    };
    Ok(report.render())
}
