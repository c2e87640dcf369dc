//! Command-line types for the veepeenet binary

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use veepeenet_core::{WireGuardOverrides, WireGuardRequest, XrayOverrides, XrayRequest};

#[derive(Parser)]
#[command(name = "veepeenet", version)]
#[command(about = "Configure WireGuard and Xray (XTLS-Reality) servers")]
#[command(after_help = "VeePeeNET. Make the Internet free =)")]
pub struct Cli {
    /// Debug logging (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Configure the WireGuard VPN server
    Wireguard(WireGuardArgs),
    /// Configure the Xray (XTLS-Reality) server
    Xray(XrayArgs),
}

/// Flags shared by both servers
#[derive(Args)]
pub struct CommonArgs {
    /// Client names to add
    #[arg(long, num_args = 1.., value_name = "CLIENT")]
    pub add_clients: Vec<String>,
    /// Client names to remove. Unknown names are ignored
    #[arg(long, num_args = 1.., value_name = "CLIENT")]
    pub remove_clients: Vec<String>,
    /// Do not touch the Uncomplicated Firewall
    #[arg(long)]
    pub no_ufw: bool,
    /// Remove the existing config first
    #[arg(long)]
    pub clean: bool,
    /// Dry run: print changed files, do not execute commands
    #[arg(long)]
    pub check: bool,
    /// Show server information and exit
    #[arg(long)]
    pub status: bool,
}

#[derive(Args)]
pub struct WireGuardArgs {
    /// Public IP or DNS name of this host. Detected when omitted
    #[arg(long)]
    pub host: Option<String>,
    /// Listen port [default: 51820]
    #[arg(long)]
    pub port: Option<u16>,
    /// Server address inside the tunnel [default: 10.9.0.1/24]
    #[arg(long)]
    pub subnet: Option<String>,
    /// Tunnel interface name [default: wg0]
    #[arg(long)]
    pub interface: Option<String>,
    /// DNS servers pushed to clients [default: 1.1.1.1 1.0.0.1]
    #[arg(long, num_args = 1..)]
    pub dns: Option<Vec<String>>,
    /// Directory for client configs [default: ~/.veepeenet/wg/clients]
    #[arg(long, value_name = "CLIENTS_CONF_DIR")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args)]
pub struct XrayArgs {
    /// Public IP or DNS name of this host. Detected when omitted
    #[arg(long)]
    pub host: Option<String>,
    /// Listen port [default: 443]
    #[arg(long)]
    pub port: Option<u16>,
    /// Site impersonated for active probing [default: microsoft.com]
    #[arg(long)]
    pub reality_host: Option<String>,
    /// Port of the impersonated site [default: 443]
    #[arg(long)]
    pub reality_port: Option<u16>,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl From<WireGuardArgs> for WireGuardRequest {
    fn from(args: WireGuardArgs) -> Self {
        WireGuardRequest {
            overrides: WireGuardOverrides {
                host: args.host,
                port: args.port,
                subnet: args.subnet,
                interface: args.interface,
                dns: args.dns,
                clients_dir: args.output,
                no_ufw: args.common.no_ufw,
            },
            add_clients: args.common.add_clients,
            remove_clients: args.common.remove_clients,
            clean: args.common.clean,
            status: args.common.status,
        }
    }
}

impl From<XrayArgs> for XrayRequest {
    fn from(args: XrayArgs) -> Self {
        XrayRequest {
            overrides: XrayOverrides {
                host: args.host,
                port: args.port,
                reality_host: args.reality_host,
                reality_port: args.reality_port,
                no_ufw: args.common.no_ufw,
            },
            add_clients: args.common.add_clients,
            remove_clients: args.common.remove_clients,
            clean: args.common.clean,
            status: args.common.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_wireguard_flags_map_to_request() {
        let cli = Cli::parse_from([
            "veepeenet",
            "wireguard",
            "--port",
            "51000",
            "--dns",
            "9.9.9.9",
            "149.112.112.112",
            "--add-clients",
            "phone",
            "laptop",
            "--output",
            "/srv/wg",
            "--no-ufw",
        ]);
        let Command::Wireguard(args) = cli.command else {
            panic!("expected the wireguard subcommand");
        };
        let request = WireGuardRequest::from(args);

        assert_eq!(request.overrides.port, Some(51000));
        assert_eq!(
            request.overrides.dns,
            Some(vec!["9.9.9.9".to_string(), "149.112.112.112".to_string()])
        );
        assert_eq!(request.add_clients, vec!["phone", "laptop"]);
        assert_eq!(request.overrides.clients_dir, Some(PathBuf::from("/srv/wg")));
        assert!(request.overrides.no_ufw);
        assert!(!request.status);
    }

    #[test]
    fn test_xray_flags_map_to_request() {
        let cli = Cli::parse_from([
            "veepeenet",
            "-v",
            "xray",
            "--reality-host",
            "www.example.org",
            "--remove-clients",
            "alice",
            "--check",
            "--status",
        ]);
        assert!(cli.verbose);
        let Command::Xray(args) = cli.command else {
            panic!("expected the xray subcommand");
        };
        assert!(args.common.check);
        let request = XrayRequest::from(args);

        assert_eq!(request.overrides.reality_host.as_deref(), Some("www.example.org"));
        assert_eq!(request.overrides.port, None);
        assert_eq!(request.remove_clients, vec!["alice"]);
        assert!(request.status);
    }
}
