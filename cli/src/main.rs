//! VeePeeNET - WireGuard and Xray server configuration
//!
//! Every run merges the command-line flags with the stored state, brings the
//! host in line with it and prints the server status.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use veepeenet_core::{wireguard, xray, Flavor, HostPaths, Session, SystemRunner};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let run_args: Vec<String> = std::env::args().collect();

    let report = match cli.command {
        Command::Wireguard(args) => {
            let runner = SystemRunner::new(args.common.check);
            let paths = HostPaths::for_flavor(Flavor::WireGuard);
            log::debug!("Using {}", paths.config.display());
            let session = Session::new(&runner, paths, run_args);
            wireguard::run(session, &args.into()).context("WireGuard configuration failed")?
        }
        Command::Xray(args) => {
            let runner = SystemRunner::new(args.common.check);
            let paths = HostPaths::for_flavor(Flavor::Xray);
            log::debug!("Using {}", paths.config.display());
            let session = Session::new(&runner, paths, run_args);
            xray::run(session, &args.into()).context("Xray configuration failed")?
        }
    };

    println!("{}", report);
    Ok(())
}
