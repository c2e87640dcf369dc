//! One invocation's context: the command runner, host paths and result journal

use crate::exec::{CommandOutput, CommandRunner};
use crate::journal::Journal;
use crate::sysfiles;
use crate::{HostPaths, Result};
use std::fmt::Debug;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub struct Session<'a> {
    runner: &'a dyn CommandRunner,
    paths: HostPaths,
    journal: Journal,
}

impl<'a> Session<'a> {
    pub fn new(runner: &'a dyn CommandRunner, paths: HostPaths, run_args: Vec<String>) -> Self {
        Self {
            runner,
            paths,
            journal: Journal::new(run_args),
        }
    }

    pub fn paths(&self) -> &HostPaths {
        &self.paths
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn is_dry_run(&self) -> bool {
        self.runner.is_dry_run()
    }

    /// Run `op` as a named step and record its outcome.
    ///
    /// The journal is flushed to disk as soon as a step fails.
    pub fn step<T, F>(&mut self, name: &str, args: impl Into<String>, op: F) -> Result<T>
    where
        T: Debug,
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let args = args.into();
        let outcome = op(self);
        self.journal.record(name, args, &outcome);
        if let Err(e) = &outcome {
            log::error!("{} failed: {}", name, e);
            if let Err(flush_err) = self.flush() {
                log::warn!("Could not write result log: {}", flush_err);
            }
        }
        outcome
    }

    /// Run a command, failing on non-zero exit
    pub fn run(&mut self, command: &str) -> Result<CommandOutput> {
        self.step("run_command", command, |s| s.runner.run_checked(command, None))
    }

    /// Run a command with `stdin`; the input is kept out of the journal
    pub fn run_with_input(&mut self, command: &str, stdin: &str) -> Result<CommandOutput> {
        self.step("run_command", command, |s| {
            s.runner.run_checked(command, Some(stdin))
        })
    }

    /// Run a command whose exit code the caller interprets
    pub fn run_unchecked(&mut self, command: &str) -> Result<CommandOutput> {
        self.step("run_command", command, |s| s.runner.run(command, None))
    }

    /// Like [`Session::run_unchecked`] for commands that print secrets:
    /// only the exit code is journaled
    pub fn run_sensitive(&mut self, command: &str) -> Result<CommandOutput> {
        let mut captured = None;
        self.step("run_command", command, |s| {
            let output = s.runner.run(command, None)?;
            let code = output.exit_code;
            captured = Some(output);
            Ok(code)
        })?;
        Ok(captured.unwrap_or_default())
    }

    pub fn write_file(&mut self, path: &Path, content: &str, mode: Option<u32>) -> Result<bool> {
        let dry_run = self.is_dry_run();
        self.step("write_text_file", path.display().to_string(), |_| {
            sysfiles::write_text_file(path, content, mode, dry_run)
        })
    }

    /// Read-modify-write of an existing file; unchanged content is not rewritten
    pub fn patch_file(&mut self, path: &Path, edit: impl FnOnce(&str) -> String) -> Result<bool> {
        let dry_run = self.is_dry_run();
        self.step("patch_file", path.display().to_string(), |_| {
            let current = fs::read_to_string(path)?;
            let patched = edit(&current);
            if patched == current {
                return Ok(false);
            }
            sysfiles::write_text_file(path, &patched, None, dry_run)
        })
    }

    /// Read a host file; only its size is journaled
    pub fn read_file(&mut self, path: &Path) -> Result<String> {
        let mut content = String::new();
        self.step("read_file", path.display().to_string(), |_| {
            content = fs::read_to_string(path)?;
            Ok(content.len())
        })?;
        Ok(content)
    }

    /// Remove a single file; a missing file is fine, a directory is an error
    pub fn remove_file(&mut self, path: &Path) -> Result<()> {
        let dry_run = self.is_dry_run();
        self.step("remove_file", path.display().to_string(), |_| {
            if dry_run {
                log::info!("[check] remove {}", path.display());
                return Ok(());
            }
            match fs::remove_file(path) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            }
        })
    }

    /// Remove a file or directory tree; missing paths are fine
    pub fn remove_path(&mut self, path: &Path) -> Result<()> {
        let dry_run = self.is_dry_run();
        self.step("remove_path", path.display().to_string(), |_| {
            if dry_run {
                log::info!("[check] remove {}", path.display());
                return Ok(());
            }
            let removed = if path.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            match removed {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            }
        })
    }

    /// Write the result journal to its configured location
    pub fn flush(&self) -> Result<()> {
        let json = self.journal.to_json()?;
        sysfiles::write_text_file(&self.paths.result_log, &json, None, self.is_dry_run())?;
        Ok(())
    }

    /// Flush the journal and hand it back
    pub fn finish(self) -> Result<Journal> {
        self.flush()?;
        Ok(self.journal)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::exec::testing::ScriptedRunner;
    use crate::Flavor;

    pub fn session<'a>(runner: &'a ScriptedRunner, root: &Path, flavor: Flavor) -> Session<'a> {
        Session::new(runner, HostPaths::rooted_at(root, flavor), vec!["test".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::testing::session;
    use super::*;
    use crate::exec::testing::ScriptedRunner;
    use crate::{Error, Flavor};
    use tempfile::tempdir;

    #[test]
    fn test_failed_step_flushes_journal() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::new().fail("systemctl restart xray.service", 1);
        let mut session = session(&runner, dir.path(), Flavor::Xray);

        let err = session.run("systemctl restart xray.service").unwrap_err();
        assert!(matches!(err, Error::CommandFailed { code: 1, .. }));

        let written = fs::read_to_string(&session.paths().result_log).unwrap();
        let journal: Journal = serde_json::from_str(&written).unwrap();
        assert!(journal.has_error);
        assert_eq!(journal.actions[0].name, "run_command");
        assert_eq!(journal.actions[0].args, "systemctl restart xray.service");
    }

    #[test]
    fn test_stdin_stays_out_of_journal() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::new().respond("wg pubkey", "PUB");
        let mut session = session(&runner, dir.path(), Flavor::WireGuard);

        session.run_with_input("wg pubkey", "PRIVATE").unwrap();

        assert_eq!(runner.stdin_of("wg pubkey").as_deref(), Some("PRIVATE"));
        let json = session.journal().to_json().unwrap();
        assert!(!json.contains("PRIVATE"));
    }

    #[test]
    fn test_sensitive_output_stays_out_of_journal() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::new().respond("wg genkey", "SECRET-KEY");
        let mut session = session(&runner, dir.path(), Flavor::WireGuard);

        let output = session.run_sensitive("wg genkey").unwrap();

        assert_eq!(output.stdout, "SECRET-KEY");
        let json = session.journal().to_json().unwrap();
        assert!(!json.contains("SECRET-KEY"));
        assert_eq!(session.journal().actions[0].result.as_deref(), Some("0"));
    }

    #[test]
    fn test_patch_file_skips_unchanged() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let mut session = session(&runner, dir.path(), Flavor::WireGuard);
        let path = dir.path().join("sysctl.conf");
        fs::write(&path, "net.ipv4.ip_forward = 1\n").unwrap();

        let changed = session
            .patch_file(&path, |c| sysfiles::ensure_line(c, sysfiles::IP_FORWARD_LINE))
            .unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_remove_path_tolerates_missing() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let mut session = session(&runner, dir.path(), Flavor::WireGuard);

        let clients = dir.path().join("clients");
        fs::create_dir_all(&clients).unwrap();
        fs::write(clients.join("phone.conf"), "x").unwrap();

        session.remove_path(&clients).unwrap();
        assert!(!clients.exists());
        session.remove_path(&clients).unwrap();
    }

    #[test]
    fn test_remove_file_leaves_directories_alone() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let mut session = session(&runner, dir.path(), Flavor::WireGuard);

        let tree = dir.path().join("keep.conf");
        fs::create_dir_all(tree.join("sub")).unwrap();
        fs::write(tree.join("sub").join("data"), "x").unwrap();

        assert!(session.remove_file(&tree).is_err());
        assert!(tree.join("sub").join("data").exists());

        let file = dir.path().join("phone.conf");
        fs::write(&file, "x").unwrap();
        session.remove_file(&file).unwrap();
        assert!(!file.exists());
        session.remove_file(&file).unwrap();
    }

    #[test]
    fn test_read_file_journals_size_only() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let mut session = session(&runner, dir.path(), Flavor::WireGuard);
        let path = dir.path().join("sshd_config");
        fs::write(&path, "Port 2222\n").unwrap();

        assert_eq!(session.read_file(&path).unwrap(), "Port 2222\n");
        let json = session.journal().to_json().unwrap();
        assert!(!json.contains("Port 2222"));
        assert_eq!(session.journal().actions[0].result.as_deref(), Some("10"));
    }
}
