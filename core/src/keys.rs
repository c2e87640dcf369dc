//! Credential generation through `wg` and `xray`, parsed from their stdout

use crate::session::Session;
use crate::{Error, KeyPair, Result, Secret};
use regex::Regex;
use std::sync::OnceLock;

/// Curve25519 keys as printed by `wg`: 32 bytes in padded base64
fn wireguard_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9+/]{42}[AEIMQUYcgkosw048]=$").unwrap())
}

fn x25519_private_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(?:Private\s*key|PrivateKey):\s*(\S+)\s*$").unwrap())
}

// Newer xray builds print the public key as "Password"
fn x25519_public_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:Public\s*key|PublicKey|Password):\s*(\S+)\s*$").unwrap()
    })
}

fn check_wireguard_key(key: &str, what: &str) -> Result<()> {
    if !wireguard_key_re().is_match(key) {
        return Err(Error::keys(format!(
            "`wg` returned a malformed {}: '{}'",
            what, key
        )));
    }
    Ok(())
}

pub fn wireguard_private_key(session: &mut Session) -> Result<Secret> {
    session.step("generate_private_key", "", |s| {
        let output = s.run_sensitive("wg genkey")?;
        if s.is_dry_run() {
            return Ok(Secret::default());
        }
        if !output.success() {
            return Err(Error::keys(format!(
                "`wg genkey` exited with code {}",
                output.exit_code
            )));
        }
        // The key itself is not echoed into the error message
        if !wireguard_key_re().is_match(&output.stdout) {
            return Err(Error::keys("`wg genkey` returned a malformed private key"));
        }
        Ok(Secret::new(output.stdout))
    })
}

pub fn wireguard_public_key(session: &mut Session, private_key: &Secret) -> Result<String> {
    session.step("generate_public_key", "", |s| {
        let output = s.run_with_input("wg pubkey", private_key.expose())?;
        if s.is_dry_run() {
            return Ok(String::new());
        }
        check_wireguard_key(&output.stdout, "public key")?;
        Ok(output.stdout)
    })
}

pub fn wireguard_key_pair(session: &mut Session) -> Result<KeyPair> {
    let private_key = wireguard_private_key(session)?;
    let public_key = wireguard_public_key(session, &private_key)?;
    Ok(KeyPair {
        private_key,
        public_key,
    })
}

/// Extract the key pair from `xray x25519` output
pub fn parse_x25519_output(stdout: &str) -> Result<KeyPair> {
    let private_key = x25519_private_re()
        .captures(stdout)
        .and_then(|c| c.get(1));
    let public_key = x25519_public_re().captures(stdout).and_then(|c| c.get(1));

    match (private_key, public_key) {
        (Some(private_key), Some(public_key)) => Ok(KeyPair {
            private_key: Secret::new(private_key.as_str()),
            public_key: public_key.as_str().to_string(),
        }),
        // stdout may hold half a key pair, keep it out of the message
        _ => Err(Error::keys(format!(
            "Keys not found in {} lines of `xray x25519` output",
            stdout.lines().count()
        ))),
    }
}

pub fn xray_key_pair(session: &mut Session) -> Result<KeyPair> {
    session.step("generate_server_keys", "", |s| {
        let output = s.run_sensitive("xray x25519")?;
        if s.is_dry_run() {
            return Ok(KeyPair::default());
        }
        if !output.success() {
            return Err(Error::keys(format!("Code {}", output.exit_code)));
        }
        parse_x25519_output(&output.stdout)
    })
}

/// Fresh VLESS user id
pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
