//! Kitchen archive transfer.
//!
//! Direct mode copies the archive to every host with a bounded number of
//! concurrent uploads. Relay mode uploads it once to S3 and lets every host
//! download it, so the control host's bandwidth is used only once.

use chrono::Utc;
use std::path::Path;

use crate::error::{Error, Result};
use crate::shell::{RemoteShell, fan_out, remote_path, shell_escape};
use crate::transport::Transport;

/// Archive file name inside the remote working directory
pub const REMOTE_ARCHIVE: &str = "kitchen.tar";

/// Default bound on simultaneous direct uploads
pub const DEFAULT_MAX_CONCURRENCY: usize = 100;

/// AWS credentials passed to `aws s3 cp`.
#[derive(Clone)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &"***")
            .field("secret_access_key", &"***")
            .finish()
    }
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    /// Environment assignments for the aws CLI, values shell-escaped.
    pub fn env_prefix(&self) -> String {
        format!(
            "AWS_ACCESS_KEY_ID={} AWS_SECRET_ACCESS_KEY={}",
            shell_escape(&self.access_key_id),
            shell_escape(&self.secret_access_key)
        )
    }

    fn masked_prefix() -> &'static str {
        "AWS_ACCESS_KEY_ID=*** AWS_SECRET_ACCESS_KEY=***"
    }
}

/// How the archive reaches the hosts.
#[derive(Debug, Clone)]
pub enum TransferMode {
    /// Point-to-point upload, at most `max_concurrency` at a time
    Direct { max_concurrency: usize },
    /// One upload to `s3://<bucket>/<stage>/`, then one download per host
    Relay {
        bucket: String,
        credentials: Credentials,
    },
}

impl Default for TransferMode {
    fn default() -> Self {
        Self::Direct {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl TransferMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Direct { .. } => "direct",
            Self::Relay { .. } => "relay",
        }
    }
}

/// Object-storage location used by relay mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayLocation {
    pub bucket: String,
    pub stage: String,
    pub timestamp: i64,
}

impl RelayLocation {
    pub fn url(&self) -> String {
        format!(
            "s3://{}/{}/kitchen-{}.tar",
            self.bucket, self.stage, self.timestamp
        )
    }
}

/// Receives per-host transfer events. Called from worker threads.
pub trait TransferProgress: Sync {
    fn on_start(&self, host: &str);
    fn on_complete(&self, host: &str, success: bool);
}

/// No-op progress.
pub struct NoProgress;

impl TransferProgress for NoProgress {
    fn on_start(&self, _host: &str) {}
    fn on_complete(&self, _host: &str, _success: bool) {}
}

/// What a dispatch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub mode: &'static str,
    pub hosts: usize,
    /// Set in relay mode
    pub relay_url: Option<String>,
}

/// Moves the staged archive to hosts and unpacks it there.
pub struct TransferDispatcher<'a> {
    mode: &'a TransferMode,
    stage: &'a str,
}

impl<'a> TransferDispatcher<'a> {
    pub fn new(mode: &'a TransferMode, stage: &'a str) -> Self {
        Self { mode, stage }
    }

    /// Transfer `archive` into `working_dir` on every host.
    pub fn dispatch<T: Transport + ?Sized>(
        &self,
        shell: &RemoteShell<'_, T>,
        hosts: &[&str],
        archive: &Path,
        working_dir: &str,
        progress: &dyn TransferProgress,
    ) -> Result<TransferReport> {
        self.dispatch_at(
            shell,
            hosts,
            archive,
            working_dir,
            progress,
            Utc::now().timestamp(),
        )
    }

    /// Same as [`Self::dispatch`] with a fixed relay timestamp.
    pub fn dispatch_at<T: Transport + ?Sized>(
        &self,
        shell: &RemoteShell<'_, T>,
        hosts: &[&str],
        archive: &Path,
        working_dir: &str,
        progress: &dyn TransferProgress,
        timestamp: i64,
    ) -> Result<TransferReport> {
        let relay_url = match self.mode {
            TransferMode::Direct { max_concurrency } => {
                Self::direct(shell, hosts, archive, working_dir, *max_concurrency, progress)?;
                None
            }
            TransferMode::Relay {
                bucket,
                credentials,
            } => {
                let location = RelayLocation {
                    bucket: bucket.clone(),
                    stage: self.stage.to_string(),
                    timestamp,
                };
                Self::relay(shell, hosts, archive, working_dir, &location, credentials, progress)?;
                Some(location.url())
            }
        };

        Ok(TransferReport {
            mode: self.mode.name(),
            hosts: hosts.len(),
            relay_url,
        })
    }

    fn unpack_command(working_dir: &str) -> String {
        format!("cd {} && tar -xf {}", shell_escape(working_dir), REMOTE_ARCHIVE)
    }

    fn direct<T: Transport + ?Sized>(
        shell: &RemoteShell<'_, T>,
        hosts: &[&str],
        archive: &Path,
        working_dir: &str,
        max_concurrency: usize,
        progress: &dyn TransferProgress,
    ) -> Result<()> {
        let remote = remote_path(working_dir, REMOTE_ARCHIVE);
        let unpack = Self::unpack_command(working_dir);
        log::info!(
            "Uploading {} to {} hosts (max {} concurrent)",
            archive.display(),
            hosts.len(),
            max_concurrency
        );

        fan_out(hosts, max_concurrency, |host| {
            progress.on_start(host);
            let result = shell
                .transport()
                .upload(host, archive, &remote)
                .and_then(|()| shell.run_on(host, &unpack));
            progress.on_complete(host, result.is_ok());
            result
        })
    }

    fn relay<T: Transport + ?Sized>(
        shell: &RemoteShell<'_, T>,
        hosts: &[&str],
        archive: &Path,
        working_dir: &str,
        location: &RelayLocation,
        credentials: &Credentials,
        progress: &dyn TransferProgress,
    ) -> Result<()> {
        let url = shell_escape(&location.url());
        let local = shell_escape(&archive.to_string_lossy());
        let remote = shell_escape(&remote_path(working_dir, REMOTE_ARCHIVE));

        let push = format!("aws s3 cp {local} {url}");
        log::info!("{} {}", Credentials::masked_prefix(), push);
        let output = shell
            .transport()
            .run_local(&format!("{} {}", credentials.env_prefix(), push))?;
        if !output.success {
            return Err(Error::LocalCommand {
                command: format!("{} {}", Credentials::masked_prefix(), push),
                stderr: output.stderr_str().trim().to_string(),
            });
        }

        let pull = format!("aws s3 cp {url} {remote}");
        hosts.iter().for_each(|h| progress.on_start(h));
        let result = shell
            .run_masked(
                hosts,
                &format!("{} {}", credentials.env_prefix(), pull),
                &format!("{} {}", Credentials::masked_prefix(), pull),
            )
            .and_then(|()| shell.run(hosts, &Self::unpack_command(working_dir)));
        hosts
            .iter()
            .for_each(|h| progress.on_complete(h, result.is_ok()));
        result
    }
}
