//! Run list discovery and cross-host uniqueness.
//!
//! Each host takes its attributes from the first candidate file that exists
//! and parses; nothing is merged across candidates. Hosts with no usable file
//! still deploy, with an empty run list.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::host::{AttributeSet, Host};
use crate::paths::KitchenPaths;

/// Why a host's attributes could not be taken from a candidate file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningKind {
    /// The file exists but could not be read
    Unreadable { path: PathBuf, message: String },
    /// The file is not a valid attribute document
    Unparseable { path: PathBuf, message: String },
    /// No candidate yielded attributes; an empty run list was used
    NotFound { candidates: Vec<PathBuf> },
}

/// A non-fatal discovery problem for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryWarning {
    pub host: String,
    pub kind: WarningKind,
}

impl std::fmt::Display for DiscoveryWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            WarningKind::Unreadable { path, message } => write!(
                f,
                "{}: could not read JSON file {}: {}",
                self.host,
                path.display(),
                message
            ),
            WarningKind::Unparseable { path, message } => write!(
                f,
                "{}: could not parse JSON file {}: {}",
                self.host,
                path.display(),
                message
            ),
            WarningKind::NotFound { candidates } => {
                let names: Vec<String> =
                    candidates.iter().map(|p| p.display().to_string()).collect();
                write!(
                    f,
                    "{}: no JSON file found in [{}]",
                    self.host,
                    names.join(", ")
                )
            }
        }
    }
}

/// Outcome of [`RunListResolver::discover`].
#[derive(Debug, Default)]
pub struct Discovery {
    pub warnings: Vec<DiscoveryWarning>,
}

impl Discovery {
    /// Hosts that fell back to an empty run list.
    pub fn hosts_without_attributes(&self) -> Vec<&str> {
        self.warnings
            .iter()
            .filter(|w| matches!(w.kind, WarningKind::NotFound { .. }))
            .map(|w| w.host.as_str())
            .collect()
    }
}

/// Discovers and evaluates per-host run lists.
pub struct RunListResolver<'a> {
    paths: &'a KitchenPaths,
    roles_auto_discovery: bool,
}

impl<'a> RunListResolver<'a> {
    pub fn new(paths: &'a KitchenPaths, roles_auto_discovery: bool) -> Self {
        Self {
            paths,
            roles_auto_discovery,
        }
    }

    /// Attach attributes to every host.
    ///
    /// Afterwards every host has `Some` attributes with a run list.
    pub fn discover(&self, hosts: &mut [Host]) -> Discovery {
        let mut discovery = Discovery::default();

        for host in hosts.iter_mut() {
            let mut attributes = self.load_attributes(&host.name, &mut discovery.warnings);

            if self.roles_auto_discovery {
                for role in &host.roles {
                    if self.paths.role_exists(role) {
                        attributes.push_run_list(format!("role[{role}]"));
                    } else {
                        log::debug!("{}: role definition not found: {}", host.name, role);
                    }
                }
            }

            log::debug!("{}: run list {:?}", host.name, attributes.run_list());
            host.attributes = Some(attributes);
        }

        discovery
    }

    fn load_attributes(&self, host: &str, warnings: &mut Vec<DiscoveryWarning>) -> AttributeSet {
        let candidates = self.paths.attribute_candidates(host);

        for candidate in &candidates {
            let path = self.paths.absolute(candidate);
            if !path.exists() {
                continue;
            }

            let warning = match fs::read_to_string(&path) {
                Ok(content) => match AttributeSet::from_json(&content) {
                    Ok(attributes) => {
                        log::debug!("{}: attributes from {}", host, candidate.display());
                        return attributes;
                    }
                    Err(e) => WarningKind::Unparseable {
                        path: candidate.clone(),
                        message: e.to_string(),
                    },
                },
                Err(e) => WarningKind::Unreadable {
                    path: candidate.clone(),
                    message: e.to_string(),
                },
            };

            record(warnings, host, warning);
        }

        record(warnings, host, WarningKind::NotFound { candidates });
        AttributeSet::default()
    }

    /// Run lists of all discovered hosts.
    pub fn run_lists<'h>(&self, hosts: &'h [Host]) -> Vec<&'h [String]> {
        hosts
            .iter()
            .filter_map(|h| h.attributes.as_ref())
            .map(AttributeSet::run_list)
            .collect()
    }

    /// Fail when no host has anything to run.
    pub fn ensure(&self, hosts: &[Host]) -> Result<()> {
        if self.run_lists(hosts).iter().all(|list| list.is_empty()) {
            return Err(Error::EmptyRunLists);
        }
        Ok(())
    }

    /// Whether every host shares one run list.
    ///
    /// Always true without role auto-discovery. Comparison is order-sensitive.
    pub fn is_unique(&self, hosts: &[Host]) -> bool {
        if !self.roles_auto_discovery {
            return true;
        }
        let distinct: HashSet<&[String]> = self.run_lists(hosts).into_iter().collect();
        distinct.len() == 1
    }
}

fn record(warnings: &mut Vec<DiscoveryWarning>, host: &str, kind: WarningKind) {
    let warning = DiscoveryWarning {
        host: host.to_string(),
        kind,
    };
    log::warn!("{warning}");
    warnings.push(warning);
}
