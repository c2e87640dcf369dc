//! Idempotent edits of host files: sysctl, ufw policy and ufw before-rules,
//! plus the readers for `/proc/net/route` and `sshd_config`.
//!
//! The edit functions are pure (`&str` in, `String` out); applying one twice
//! gives the same text as applying it once.

use crate::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

pub const IP_FORWARD_LINE: &str = "net.ipv4.ip_forward = 1";

pub const FORWARD_POLICY_KEY: &str = "DEFAULT_FORWARD_POLICY=";
pub const FORWARD_POLICY_LINE: &str = "DEFAULT_FORWARD_POLICY=\"ACCEPT\"";

pub const UFW_BLOCK_BEGIN: &str = "# BEGIN VEEPEENET WG VPN UFW RULES #";
pub const UFW_BLOCK_END: &str = "# END VEEPEENET WG VPN UFW RULES #";

pub const DEFAULT_SSH_PORT: u16 = 22;

/// RTF_GATEWAY in the route flags column
const ROUTE_FLAG_GATEWAY: u32 = 0x2;

/// Append `line` unless an identical line is already present
pub fn ensure_line(content: &str, line: &str) -> String {
    if content.lines().any(|l| l == line) {
        return content.to_string();
    }
    let mut out = content.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(line);
    out.push('\n');
    out
}

/// Replace the first line starting with `key` by `line`, or append `line`
pub fn set_line(content: &str, key: &str, line: &str) -> String {
    let mut out = String::with_capacity(content.len() + line.len() + 1);
    let mut replaced = false;
    for raw in content.split_inclusive('\n') {
        if !replaced && raw.starts_with(key) {
            out.push_str(line);
            out.push('\n');
            replaced = true;
        } else {
            out.push_str(raw);
        }
    }
    if replaced {
        out
    } else {
        ensure_line(&out, line)
    }
}

/// Drop the block fenced by `begin`/`end` (inclusive) and put a fresh one at
/// the top of the file. A `begin` without a following `end` is left alone.
pub fn replace_fenced_block(content: &str, begin: &str, end: &str, body: &[String]) -> String {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let is = |raw: &str, marker: &str| raw.trim_end_matches(['\r', '\n']) == marker;

    let fence = lines.iter().position(|l| is(l, begin)).and_then(|start| {
        lines[start..]
            .iter()
            .position(|l| is(l, end))
            .map(|offset| (start, start + offset))
    });

    let mut out = String::new();
    out.push_str(begin);
    out.push('\n');
    for line in body {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(end);
    out.push('\n');

    for (i, raw) in lines.iter().enumerate() {
        if let Some((start, stop)) = fence {
            if (start..=stop).contains(&i) {
                continue;
            }
        }
        out.push_str(raw);
    }
    out
}

/// NAT rules that masquerade VPN traffic leaving through `interface`
pub fn masquerade_rules(source: &str, interface: &str) -> Vec<String> {
    vec![
        "*nat".to_string(),
        ":POSTROUTING ACCEPT [0:0]".to_string(),
        format!("-A POSTROUTING -s {} -o {} -j MASQUERADE", source, interface),
        "COMMIT".to_string(),
    ]
}

/// Source network for the masquerade rule: the first two octets of the
/// server subnet, e.g. `10.9.0.1/24` becomes `10.9.0.0/8`
pub fn masquerade_source(subnet: &str) -> String {
    let octets: Vec<&str> = subnet.split('.').take(2).collect();
    format!("{}.0.0/8", octets.join("."))
}

/// Interface of the default route in `/proc/net/route` format
pub fn default_interface(route_table: &str) -> Option<String> {
    route_table.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields[1] != "00000000" {
            return None;
        }
        let flags = u32::from_str_radix(fields[3], 16).ok()?;
        (flags & ROUTE_FLAG_GATEWAY != 0).then(|| fields[0].to_string())
    })
}

/// Port sshd listens on, from the first uncommented `Port` directive
pub fn ssh_port(sshd_config: &str) -> Result<u16> {
    for line in sshd_config.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        if parts.next() == Some("Port") {
            let value = parts.last().unwrap_or_default();
            return value
                .parse()
                .map_err(|_| Error::parse(format!("Invalid sshd Port value '{}'", value)));
        }
    }
    Ok(DEFAULT_SSH_PORT)
}

/// Write `text` to `path` unless it already holds exactly that text.
///
/// Missing parent directories are created. `mode` is applied on creation and
/// enforced on existing files. In dry-run mode the content is printed instead.
/// Returns whether the file content changed.
pub fn write_text_file(path: &Path, text: &str, mode: Option<u32>, dry_run: bool) -> Result<bool> {
    if dry_run {
        println!("{}:\n{}\n", path.display(), text);
        return Ok(false);
    }

    let unchanged = match fs::read_to_string(path) {
        Ok(existing) => existing == text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            false
        }
        Err(e) => return Err(e.into()),
    };

    if !unchanged {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        if let Some(mode) = mode {
            options.mode(mode);
        }
        let mut file = options.open(path)?;
        file.write_all(text.as_bytes())?;
    }
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    Ok(!unchanged)
}
