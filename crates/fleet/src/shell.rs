//! Remote shell with scoped privilege elevation.
//!
//! Commands are never elevated by default. [`RemoteShell::elevate`] returns a
//! guard that turns elevation on and restores the previous value when it is
//! dropped, so a failing command cannot leave the shell elevated.

use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Quote a string for a POSIX shell.
///
/// Strings made only of safe characters are returned bare.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '@' | '%' | '+' | ',')
    }) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Join a file name onto a remote directory.
pub fn remote_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

/// How elevated commands are prefixed.
#[derive(Debug, Clone)]
pub struct Privilege {
    /// Prefix elevated commands with `sudo`
    pub use_sudo: bool,
    /// Variables exported in front of elevated commands via `env`
    pub environment: Vec<(String, String)>,
}

impl Default for Privilege {
    fn default() -> Self {
        Self {
            use_sudo: true,
            environment: Vec::new(),
        }
    }
}

impl Privilege {
    /// Prefix for an elevated command, empty when there is nothing to add.
    pub fn prefix(&self) -> String {
        let mut parts = Vec::new();
        if self.use_sudo {
            parts.push("sudo".to_string());
        }
        if !self.environment.is_empty() {
            parts.push("env".to_string());
            for (key, value) in &self.environment {
                parts.push(format!("{}={}", key, shell_escape(value)));
            }
        }
        parts.join(" ")
    }
}

/// Run `f` for every host on a pool of `jobs` threads.
///
/// Returns only after every host has finished; the first failure in host
/// order is then returned.
pub fn fan_out<F>(hosts: &[&str], jobs: usize, f: F) -> Result<()>
where
    F: Fn(&str) -> Result<()> + Sync,
{
    if hosts.is_empty() {
        return Ok(());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.clamp(1, hosts.len()))
        .build()?;

    let results: Vec<Result<()>> = pool.install(|| hosts.par_iter().map(|host| f(host)).collect());
    results.into_iter().collect()
}

/// Scope guard returned by [`RemoteShell::elevate`].
pub struct Elevation<'s> {
    flag: &'s AtomicBool,
    previous: bool,
}

impl Drop for Elevation<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::SeqCst);
    }
}

/// Issues commands to hosts through a [`Transport`].
pub struct RemoteShell<'t, T: Transport + ?Sized> {
    transport: &'t T,
    privilege: Privilege,
    elevated: AtomicBool,
}

impl<'t, T: Transport + ?Sized> RemoteShell<'t, T> {
    pub fn new(transport: &'t T, privilege: Privilege) -> Self {
        Self {
            transport,
            privilege,
            elevated: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &'t T {
        self.transport
    }

    pub fn privilege(&self) -> &Privilege {
        &self.privilege
    }

    pub fn set_use_sudo(&mut self, use_sudo: bool) {
        self.privilege.use_sudo = use_sudo;
    }

    /// Elevate commands until the returned guard is dropped.
    pub fn elevate(&self) -> Elevation<'_> {
        let previous = self.elevated.swap(true, Ordering::SeqCst);
        Elevation {
            flag: &self.elevated,
            previous,
        }
    }

    pub fn is_elevated(&self) -> bool {
        self.elevated.load(Ordering::SeqCst)
    }

    /// The command line that would be sent right now.
    pub fn command_line(&self, command: &str) -> String {
        if !self.is_elevated() {
            return command.to_string();
        }
        let prefix = self.privilege.prefix();
        if prefix.is_empty() {
            command.to_string()
        } else {
            format!("{prefix} {command}")
        }
    }

    /// Run a command on one host and return its stdout.
    pub fn capture(&self, host: &str, command: &str) -> Result<String> {
        let line = self.command_line(command);
        log::debug!("[{host}] {line}");
        let output = self.transport.exec(host, &line)?;
        if !output.success {
            return Err(Error::RemoteCommand {
                host: host.to_string(),
                stderr: output.stderr_str().trim().to_string(),
            });
        }
        Ok(output.stdout_str())
    }

    /// Run a command on one host.
    pub fn run_on(&self, host: &str, command: &str) -> Result<()> {
        self.capture(host, command).map(|_| ())
    }

    /// Run a command on every host.
    pub fn run(&self, hosts: &[&str], command: &str) -> Result<()> {
        self.run_masked(hosts, command, command)
    }

    /// Run a command on every host, logging `display` instead of it.
    pub fn run_masked(&self, hosts: &[&str], command: &str, display: &str) -> Result<()> {
        let line = self.command_line(command);
        log::info!("{}", self.command_line(display));

        fan_out(hosts, hosts.len(), |host| {
            let output = self.transport.exec(host, &line)?;
            if output.success {
                Ok(())
            } else {
                Err(Error::RemoteCommand {
                    host: host.to_string(),
                    stderr: output.stderr_str().trim().to_string(),
                })
            }
        })
    }

    /// Run a command on every host with elevated privileges.
    pub fn sudo(&self, hosts: &[&str], command: &str) -> Result<()> {
        let _elevation = self.elevate();
        self.run(hosts, command)
    }
}
