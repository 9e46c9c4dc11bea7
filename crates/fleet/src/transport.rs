//! Transport abstraction and the `ssh`/`scp` backend.
//!
//! The [`Transport`] trait is the seam to the remote-execution channel,
//! allowing for:
//! - Real execution via the OpenSSH client binaries
//! - An in-memory mock for tests (`mock` feature)

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use crate::error::{Error, Result};
use crate::shell::shell_escape;

/// Output of a remote or local command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
        }
    }
}

impl CommandOutput {
    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Channel used to run commands on, and copy files to, remote hosts.
pub trait Transport: Send + Sync {
    /// Run a shell command on a host.
    fn exec(&self, host: &str, command: &str) -> Result<CommandOutput>;

    /// Copy a local file to a remote path.
    fn upload(&self, host: &str, local: &Path, remote: &str) -> Result<()>;

    /// Write content to a remote path.
    fn put(&self, host: &str, content: &[u8], remote: &str) -> Result<()>;

    /// Run a shell command on the control host.
    fn run_local(&self, command: &str) -> Result<CommandOutput> {
        let output = Command::new("sh").arg("-c").arg(command).output()?;
        Ok(output.into())
    }
}

/// Transport backed by the `ssh` and `scp` executables.
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    /// Login user (`user@host`), default from ssh config
    pub user: Option<String>,
    /// Port, default from ssh config
    pub port: Option<u16>,
    /// Extra `-o` options, e.g. `StrictHostKeyChecking=no`
    pub options: Vec<String>,
}

impl SshTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn destination(&self, host: &str) -> String {
        match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        }
    }

    fn common_options(&self) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        for option in &self.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args
    }

    fn ssh(&self, host: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.common_options());
        if let Some(port) = self.port {
            cmd.arg("-p").arg(port.to_string());
        }
        cmd.arg(self.destination(host));
        cmd
    }

    fn spawn_error(host: &str, client: &str, e: &std::io::Error) -> Error {
        Error::Transport {
            host: host.to_string(),
            message: format!("failed to execute {client}: {e}"),
        }
    }
}

impl Transport for SshTransport {
    fn exec(&self, host: &str, command: &str) -> Result<CommandOutput> {
        let output = self
            .ssh(host)
            .arg(command)
            .output()
            .map_err(|e| Self::spawn_error(host, "ssh", &e))?;
        Ok(output.into())
    }

    fn upload(&self, host: &str, local: &Path, remote: &str) -> Result<()> {
        let mut cmd = Command::new("scp");
        cmd.arg("-q").args(self.common_options());
        if let Some(port) = self.port {
            cmd.arg("-P").arg(port.to_string());
        }
        let output = cmd
            .arg(local)
            .arg(format!("{}:{}", self.destination(host), remote))
            .output()
            .map_err(|e| Self::spawn_error(host, "scp", &e))?;

        if !output.status.success() {
            return Err(Error::Transfer {
                host: host.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn put(&self, host: &str, content: &[u8], remote: &str) -> Result<()> {
        let mut child = self
            .ssh(host)
            .arg(format!("cat > {}", shell_escape(remote)))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::spawn_error(host, "ssh", &e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(content)?;
        }
        let output = child.wait_with_output()?;

        if !output.status.success() {
            return Err(Error::Transfer {
                host: host.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}
