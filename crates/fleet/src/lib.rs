//! # Fleet
//!
//! Remote side of a chef-solo deployment.
//!
//! - [`Transport`]: the channel to hosts, with an `ssh`/`scp` backend
//! - [`RemoteShell`]: fan-out command execution with scoped elevation
//! - [`TransferDispatcher`]: direct or relayed archive transfer
//! - [`RemoteConfigGenerator`]: `solo.rb` and `solo.json` placement

pub mod dispatch;
mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod shell;
pub mod solo;
pub mod transport;

pub use dispatch::{
    Credentials, NoProgress, RelayLocation, TransferDispatcher, TransferMode, TransferProgress,
    TransferReport,
};
pub use error::{Error, Result};
pub use shell::{Elevation, Privilege, RemoteShell, fan_out, remote_path, shell_escape};
pub use solo::{RemoteConfigGenerator, SoloConfig};
pub use transport::{CommandOutput, SshTransport, Transport};
