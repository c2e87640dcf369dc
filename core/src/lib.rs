//! VeePeeNET Core Library
//!
//! Configuration reconciliation for single-host WireGuard and Xray
//! (XTLS-Reality) servers: persisted state, client registry, credential
//! generation, rendering of daemon and client configs, idempotent host file
//! edits and an audit journal of every step.

pub mod config;
pub mod error;
pub mod exec;
pub mod journal;
pub mod keys;
pub mod model;
pub mod registry;
pub mod render;
pub mod session;
pub mod sysfiles;
pub mod system;
pub mod wireguard;
pub mod xray;

pub use config::{HostPaths, WireGuardOverrides, XrayOverrides};
pub use error::{Error, Result};
pub use exec::{CommandOutput, CommandRunner, SystemRunner};
pub use journal::Journal;
pub use model::*;
pub use session::Session;
pub use wireguard::WireGuardRequest;
pub use xray::XrayRequest;

/// Version shown in status reports and recorded in the result log
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
