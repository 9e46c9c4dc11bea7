//! In-memory transport for tests.
//!
//! Records every command and file, answers `capture` calls from canned
//! output, and tracks how many uploads were in flight at once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::{CommandOutput, Transport};

/// Something the mock was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Exec { host: String, command: String },
    Upload { host: String, local: PathBuf, remote: String },
    Put { host: String, remote: String },
    Local { command: String },
}

/// Recording transport.
#[derive(Debug, Default)]
pub struct MockTransport {
    events: Mutex<Vec<Event>>,
    files: Mutex<HashMap<(String, String), Vec<u8>>>,
    outputs: HashMap<String, String>,
    fail_on: Vec<String>,
    fail_hosts: Vec<String>,
    upload_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `command` with `stdout` on every host.
    pub fn with_output(mut self, command: &str, stdout: &str) -> Self {
        self.outputs.insert(command.to_string(), stdout.to_string());
        self
    }

    /// Fail any command (remote or local) containing `pattern`.
    pub fn fail_on(mut self, pattern: &str) -> Self {
        self.fail_on.push(pattern.to_string());
        self
    }

    /// Fail every command and transfer to `host`.
    pub fn fail_host(mut self, host: &str) -> Self {
        self.fail_hosts.push(host.to_string());
        self
    }

    /// Make each upload take `delay`.
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    fn fails(&self, host: Option<&str>, command: &str) -> bool {
        host.is_some_and(|h| self.fail_hosts.iter().any(|f| f == h))
            || self.fail_on.iter().any(|p| command.contains(p.as_str()))
    }

    fn record(&self, event: Event) {
        lock(&self.events).push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    /// Commands executed on `host`, in order.
    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Exec { host: h, command } if h == host => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Hosts that ran a command containing `pattern`.
    pub fn hosts_running(&self, pattern: &str) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Exec { host, command } if command.contains(pattern) => Some(host),
                _ => None,
            })
            .collect();
        hosts.sort();
        hosts.dedup();
        hosts
    }

    pub fn local_commands(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Local { command } => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn upload_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Upload { .. }))
            .count()
    }

    /// Content written with `put`.
    pub fn file(&self, host: &str, remote: &str) -> Option<String> {
        lock(&self.files)
            .get(&(host.to_string(), remote.to_string()))
            .map(|b| String::from_utf8_lossy(b).to_string())
    }

    /// Highest number of simultaneous uploads observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn exec(&self, host: &str, command: &str) -> Result<CommandOutput> {
        self.record(Event::Exec {
            host: host.to_string(),
            command: command.to_string(),
        });

        if self.fails(Some(host), command) {
            return Ok(CommandOutput {
                stdout: Vec::new(),
                stderr: b"mock failure".to_vec(),
                success: false,
            });
        }

        let stdout = self.outputs.get(command).cloned().unwrap_or_default();
        Ok(CommandOutput {
            stdout: stdout.into_bytes(),
            stderr: Vec::new(),
            success: true,
        })
    }

    fn upload(&self, host: &str, local: &Path, remote: &str) -> Result<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.upload_delay.is_zero() {
            std::thread::sleep(self.upload_delay);
        }

        self.record(Event::Upload {
            host: host.to_string(),
            local: local.to_path_buf(),
            remote: remote.to_string(),
        });
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fails(Some(host), remote) {
            return Err(Error::Transfer {
                host: host.to_string(),
                message: "mock failure".to_string(),
            });
        }
        Ok(())
    }

    fn put(&self, host: &str, content: &[u8], remote: &str) -> Result<()> {
        self.record(Event::Put {
            host: host.to_string(),
            remote: remote.to_string(),
        });
        if self.fails(Some(host), remote) {
            return Err(Error::Transfer {
                host: host.to_string(),
                message: "mock failure".to_string(),
            });
        }
        lock(&self.files).insert((host.to_string(), remote.to_string()), content.to_vec());
        Ok(())
    }

    fn run_local(&self, command: &str) -> Result<CommandOutput> {
        self.record(Event::Local {
            command: command.to_string(),
        });
        Ok(CommandOutput {
            stdout: Vec::new(),
            stderr: if self.fails(None, command) {
                b"mock failure".to_vec()
            } else {
                Vec::new()
            },
            success: !self.fails(None, command),
        })
    }
}
