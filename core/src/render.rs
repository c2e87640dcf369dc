//! Text generation: daemon configs, client configs, import URLs and the
//! status report

use crate::{
    Result, WireGuardClient, WireGuardConfig, WireGuardServer, XrayClient, XrayConfig, XrayServer,
};
use serde::Serialize;
use std::path::Path;

pub const STATUS_WIDTH: usize = 51;

const VLESS_FLOW: &str = "xtls-rprx-vision";

/// `[Interface]` plus one `[Peer]` per client, blank line between sections
pub fn wireguard_server_config(config: &WireGuardConfig) -> String {
    let server = &config.server;
    let mut lines = vec![
        "[Interface]".to_string(),
        format!("Address = {}", server.subnet),
        format!("PrivateKey = {}", server.private_key.expose()),
        format!("ListenPort = {}", server.port),
    ];

    for client in &config.clients {
        lines.push(String::new());
        lines.push("[Peer]".to_string());
        lines.push(format!("AllowedIPs = {}/32", client.ip));
        lines.push(format!("PublicKey = {}", client.public_key));
    }

    lines.push(String::new());
    lines.join("\n")
}

pub fn wireguard_client_config(server: &WireGuardServer, client: &WireGuardClient) -> String {
    let lines = [
        "[Interface]".to_string(),
        format!("Address = {}", client.ip),
        format!("PrivateKey = {}", client.private_key.expose()),
        format!("DNS = {}", server.dns.join(", ")),
        String::new(),
        "[Peer]".to_string(),
        format!("Endpoint = {}:{}", server.host, server.port),
        "AllowedIPs = 0.0.0.0/0".to_string(),
        format!("PublicKey = {}", server.public_key),
        String::new(),
    ];
    lines.join("\n")
}

pub fn wireguard_client_string(clients_dir: &Path, client: &WireGuardClient) -> String {
    format!(
        "{}: {}",
        client.name,
        clients_dir.join(format!("{}.conf", client.name)).display()
    )
}

/// Import link understood by v2rayN/NekoBox style clients
pub fn xray_import_url(server: &XrayServer, name: &str, uuid: &str, short_id: &str) -> String {
    format!(
        "vless://{uuid}@{host}:{port}?flow={flow}&type=tcp&security=reality&fp=chrome\
         &sni={sni}&pbk={pbk}&sid={short_id}&spx=%2F#{name}@{host}",
        uuid = uuid,
        host = server.host,
        port = server.port,
        flow = VLESS_FLOW,
        sni = server.reality_host,
        pbk = server.public_key,
        short_id = short_id,
        name = name,
    )
}

pub fn xray_client_string(client: &XrayClient) -> String {
    format!("{}: {}", client.name, client.import_url)
}

// Xray daemon document. Field order here is the key order on disk.

#[derive(Serialize)]
struct XrayDocument<'a> {
    inbounds: Vec<Inbound<'a>>,
    outbounds: Vec<Outbound>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Inbound<'a> {
    port: u16,
    protocol: &'static str,
    tag: &'static str,
    settings: InboundSettings<'a>,
    stream_settings: StreamSettings<'a>,
    sniffing: Sniffing,
}

#[derive(Serialize)]
struct InboundSettings<'a> {
    clients: Vec<VlessUser<'a>>,
    decryption: &'static str,
}

#[derive(Serialize)]
struct VlessUser<'a> {
    id: &'a str,
    email: &'a str,
    flow: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamSettings<'a> {
    network: &'static str,
    security: &'static str,
    reality_settings: RealitySettings<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealitySettings<'a> {
    show: bool,
    dest: String,
    xver: u8,
    server_names: Vec<&'a str>,
    private_key: &'a str,
    min_client_ver: &'static str,
    max_client_ver: &'static str,
    max_time_diff: u64,
    short_ids: Vec<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Sniffing {
    enabled: bool,
    dest_override: [&'static str; 3],
}

#[derive(Serialize)]
struct Outbound {
    protocol: &'static str,
    tag: &'static str,
}

/// VLESS inbound with Reality transport and a direct outbound
pub fn xray_server_config(config: &XrayConfig) -> Result<String> {
    let server = &config.server;
    let document = XrayDocument {
        inbounds: vec![Inbound {
            port: server.port,
            protocol: "vless",
            tag: "vless_tls",
            settings: InboundSettings {
                clients: config
                    .clients
                    .iter()
                    .map(|c| VlessUser {
                        id: &c.uuid,
                        email: &c.email,
                        flow: VLESS_FLOW,
                    })
                    .collect(),
                decryption: "none",
            },
            stream_settings: StreamSettings {
                network: "tcp",
                security: "reality",
                reality_settings: RealitySettings {
                    show: false,
                    dest: format!("{}:{}", server.reality_host, server.reality_port),
                    xver: 0,
                    server_names: vec![server.reality_host.as_str()],
                    private_key: server.private_key.expose(),
                    min_client_ver: "",
                    max_client_ver: "",
                    max_time_diff: 0,
                    short_ids: config.clients.iter().map(|c| c.short_id.as_str()).collect(),
                },
            },
            sniffing: Sniffing {
                enabled: true,
                dest_override: ["http", "tls", "quic"],
            },
        }],
        outbounds: vec![Outbound {
            protocol: "freedom",
            tag: "direct",
        }],
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// Center `text` in `width` columns. The odd fill character goes right;
/// text wider than `width` is cut.
pub fn center_string(text: &str, width: usize, fill: char) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.chars().take(width).collect();
    }
    let left = (width - len) / 2;
    let right = width - len - left;
    let mut out = String::with_capacity(width);
    out.extend(std::iter::repeat(fill).take(left));
    out.push_str(text);
    out.extend(std::iter::repeat(fill).take(right));
    out
}

/// What `--status` and the end of every run print
#[derive(Debug, Clone)]
pub struct StatusReport<'a> {
    pub version: &'a str,
    pub server_name: &'a str,
    pub running: bool,
    pub host: &'a str,
    pub port: u16,
    pub clients: Vec<String>,
}

impl StatusReport<'_> {
    pub fn render(&self) -> String {
        let mut lines = vec![
            center_string(&format!(" VeePeeNET ({}) ", self.version), STATUS_WIDTH, '-'),
            format!("{} server info:", self.server_name),
            format!(
                "\tstatus: {}",
                if self.running { "Running" } else { "Stopped" }
            ),
            format!("\taddress: {}:{}", self.host, self.port),
            "\tclients:".to_string(),
        ];
        if self.clients.is_empty() {
            lines.push("\t\tServer has no clients".to_string());
        }
        for client in &self.clients {
            lines.push(format!("\t\t{}", client));
        }
        lines.push("-".repeat(STATUS_WIDTH));
        lines.join("\n")
    }
}
