//! chef-solo configuration files.
//!
//! `solo.rb` is rendered from a [`SoloConfig`] with every string emitted as
//! an escaped Ruby literal. `solo.json` is the host's attribute set.

use serde::Serialize;
use std::fmt::Write as _;

use crate::error::Result;
use crate::shell::{RemoteShell, fan_out, remote_path};
use crate::transport::Transport;

pub const SOLO_RB: &str = "solo.rb";
pub const SOLO_JSON: &str = "solo.json";

/// Default ohai plugin directory
pub const DEFAULT_OHAI_PLUGIN_PATH: &str = "/opt/chef/plugins";

/// Quote a string as a double-quoted Ruby literal.
pub fn ruby_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '#' => out.push_str("\\#"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Contents of `solo.rb`. All paths are remote and absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoloConfig {
    pub file_cache_path: String,
    pub cookbook_path: Vec<String>,
    pub role_path: String,
    /// Rendered as `environment ""` when unset
    pub environment: Option<String>,
    pub environment_path: String,
    pub data_bag_path: String,
    pub verbose_logging: bool,
    pub ohai_plugin_path: Option<String>,
    /// Only set when the secret file exists locally
    pub encrypted_data_bag_secret: Option<String>,
}

impl SoloConfig {
    pub fn render(&self) -> String {
        let cookbooks: Vec<String> = self.cookbook_path.iter().map(|p| ruby_string(p)).collect();

        let mut out = String::new();
        let _ = writeln!(out, "file_cache_path {}", ruby_string(&self.file_cache_path));
        let _ = writeln!(out, "cookbook_path [{}]", cookbooks.join(", "));
        let _ = writeln!(out, "role_path {}", ruby_string(&self.role_path));
        let _ = writeln!(
            out,
            "environment {}",
            ruby_string(self.environment.as_deref().unwrap_or_default())
        );
        let _ = writeln!(out, "environment_path {}", ruby_string(&self.environment_path));
        let _ = writeln!(out, "data_bag_path {}", ruby_string(&self.data_bag_path));
        let _ = writeln!(out, "verbose_logging {}", self.verbose_logging);
        if let Some(dir) = &self.ohai_plugin_path {
            let _ = writeln!(out, "ohai.plugin_path << {}", ruby_string(dir));
        }
        if let Some(secret) = &self.encrypted_data_bag_secret {
            let _ = writeln!(out, "encrypted_data_bag_secret {}", ruby_string(secret));
        }
        out
    }
}

/// Writes `solo.rb` and `solo.json` into the remote working directory.
pub struct RemoteConfigGenerator<'a> {
    config: &'a SoloConfig,
    working_dir: &'a str,
}

impl<'a> RemoteConfigGenerator<'a> {
    pub fn new(config: &'a SoloConfig, working_dir: &'a str) -> Self {
        Self { config, working_dir }
    }

    pub fn config_path(&self) -> String {
        remote_path(self.working_dir, SOLO_RB)
    }

    pub fn node_path(&self) -> String {
        remote_path(self.working_dir, SOLO_JSON)
    }

    /// Place the shared `solo.rb` and each host's own `solo.json`.
    pub fn place<T, A>(&self, shell: &RemoteShell<'_, T>, nodes: &[(&str, &A)]) -> Result<()>
    where
        T: Transport + ?Sized,
        A: Serialize + Sync,
    {
        let solo_rb = self.config.render();
        let config_path = self.config_path();
        let node_path = self.node_path();
        let hosts: Vec<&str> = nodes.iter().map(|(host, _)| *host).collect();

        log::info!("Placing {} on {} hosts", config_path, hosts.len());
        fan_out(&hosts, hosts.len(), |host| {
            shell.transport().put(host, solo_rb.as_bytes(), &config_path)
        })?;

        let documents = nodes
            .iter()
            .map(|(host, attributes)| Ok((*host, serde_json::to_string(attributes)?)))
            .collect::<Result<Vec<_>>>()?;

        log::info!("Placing {} on {} hosts", node_path, hosts.len());
        fan_out(&hosts, hosts.len(), |host| {
            let json = documents
                .iter()
                .find(|(h, _)| *h == host)
                .map(|(_, json)| json.as_str())
                .unwrap_or("{}");
            shell.transport().put(host, json.as_bytes(), &node_path)
        })
    }
}
