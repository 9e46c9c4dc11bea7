use anyhow::{Context, Result, bail};
use fleet::{Credentials, Privilege, SshTransport, TransferMode};
use kitchen::{Host, KitchenPaths, ManageTool, PathGroup};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;

/// Deployment settings, loaded once from `paratrooper.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Stage name, used in relay object keys
    #[serde(default = "default_stage")]
    pub stage: String,
    #[serde(default)]
    pub kitchen: KitchenSection,
    #[serde(default)]
    pub cookbooks: CookbooksSection,
    #[serde(default)]
    pub remote: RemoteSection,
    #[serde(default)]
    pub chef: ChefSection,
    #[serde(default)]
    pub transfer: TransferSection,
    #[serde(default)]
    pub ssh: SshSection,
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

fn default_stage() -> String {
    "production".to_string()
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KitchenSection {
    /// Project root, relative to the config file's directory
    pub root: String,
    pub path: String,
    pub default_attributes: String,
    pub nodes: String,
    pub cookbooks: PathGroup,
    pub vendor_cookbooks: String,
    pub roles: String,
    pub environments: String,
    pub data_bags: String,
    pub data_bag_secret: String,
    /// Local staging archive
    pub archive: String,
}

impl Default for KitchenSection {
    fn default() -> Self {
        Self {
            root: ".".to_string(),
            path: "config".to_string(),
            default_attributes: "solo.json".to_string(),
            nodes: "nodes".to_string(),
            cookbooks: PathGroup::Many(vec![PathGroup::from("site-cookbooks")]),
            vendor_cookbooks: "vendor/cookbooks".to_string(),
            roles: "roles".to_string(),
            environments: "environments".to_string(),
            data_bags: "data_bags".to_string(),
            data_bag_secret: "data_bag_key".to_string(),
            archive: "/tmp/paratrooper-chef_kitchen.tar".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CookbooksSection {
    /// Run the dependency tool before packaging
    pub download: bool,
    pub manage_tool: ManageTool,
}

impl Default for CookbooksSection {
    fn default() -> Self {
        Self {
            download: true,
            manage_tool: ManageTool::Discover,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteSection {
    pub chef_solo: String,
    /// Defaults to `$HOME/chef-solo` on the first host
    pub working_dir: Option<String>,
    pub cache_dir: String,
    /// Defaults to whether the login user on the first host is not root
    pub use_sudo: Option<bool>,
    /// Variables exported in front of elevated commands, passed verbatim
    pub environment: BTreeMap<String, String>,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            chef_solo: "chef-solo".to_string(),
            working_dir: None,
            cache_dir: "/var/chef/cache".to_string(),
            use_sudo: None,
            environment: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChefSection {
    pub environment: Option<String>,
    pub legacy_mode: bool,
    pub roles_auto_discovery: bool,
    pub verbose_logging: bool,
    pub debug: bool,
    /// Empty string disables the `ohai.plugin_path` line
    pub ohai_plugin_path: String,
}

impl Default for ChefSection {
    fn default() -> Self {
        Self {
            environment: None,
            legacy_mode: false,
            roles_auto_discovery: false,
            verbose_logging: true,
            debug: false,
            ohai_plugin_path: fleet::solo::DEFAULT_OHAI_PLUGIN_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransferSection {
    pub max_concurrency: usize,
    /// Upload once to S3 and let hosts download
    pub relay: Option<RelaySection>,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            max_concurrency: fleet::dispatch::DEFAULT_MAX_CONCURRENCY,
            relay: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    pub bucket: String,
    #[serde(default = "default_access_key")]
    pub access_key_id: String,
    #[serde(default = "default_secret_key")]
    pub secret_access_key: String,
}

fn default_access_key() -> String {
    "$AWS_ACCESS_KEY_ID".to_string()
}

fn default_secret_key() -> String {
    "$AWS_SECRET_ACCESS_KEY".to_string()
}

/// Expanded credential; unset variables and empty values are rejected.
fn relay_credential(key: &str, value: &str) -> Result<String> {
    let expanded = paths::expand_required(value)
        .with_context(|| format!("{key} refers to an unset environment variable"))?;
    if expanded.trim().is_empty() {
        bail!("{key} must not be empty");
    }
    Ok(expanded)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshSection {
    pub user: Option<String>,
    pub port: Option<u16>,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostEntry {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

// ============================================================================
// Loading
// ============================================================================

impl Settings {
    /// Load and validate settings from a TOML file.
    ///
    /// A relative `kitchen.root` is resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let mut settings = Self::parse(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        let root = paths::expand(&settings.kitchen.root);
        if root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new(""));
            settings.kitchen.root = base.join(root).to_string_lossy().into_owned();
        }
        Ok(settings)
    }

    /// Parse and validate settings from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            bail!("No hosts configured; add at least one [[hosts]] entry");
        }
        if let Some(host) = self.hosts.iter().find(|h| h.name.trim().is_empty()) {
            bail!("Host entry with empty name (roles: {:?})", host.roles);
        }
        if self.transfer.max_concurrency == 0 {
            bail!("transfer.max_concurrency must be at least 1");
        }
        if let Some(relay) = &self.transfer.relay {
            if relay.bucket.trim().is_empty() {
                bail!("transfer.relay.bucket must not be empty");
            }
            relay_credential("transfer.relay.access_key_id", &relay.access_key_id)?;
            relay_credential("transfer.relay.secret_access_key", &relay.secret_access_key)?;
        }

        let kitchen = &self.kitchen;
        let mut relative: Vec<(&str, PathBuf)> = vec![
            ("kitchen.path", PathBuf::from(&kitchen.path)),
            ("kitchen.default_attributes", PathBuf::from(&kitchen.default_attributes)),
            ("kitchen.nodes", PathBuf::from(&kitchen.nodes)),
            ("kitchen.vendor_cookbooks", PathBuf::from(&kitchen.vendor_cookbooks)),
            ("kitchen.roles", PathBuf::from(&kitchen.roles)),
            ("kitchen.environments", PathBuf::from(&kitchen.environments)),
            ("kitchen.data_bags", PathBuf::from(&kitchen.data_bags)),
            ("kitchen.data_bag_secret", PathBuf::from(&kitchen.data_bag_secret)),
        ];
        relative.extend(
            kitchen
                .cookbooks
                .flatten()
                .into_iter()
                .map(|p| ("kitchen.cookbooks", p)),
        );
        if let Some((key, path)) = relative.iter().find(|(_, p)| p.is_absolute()) {
            bail!("{key} must be relative to the kitchen, got {}", path.display());
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Conversions
    // ------------------------------------------------------------------------

    pub fn kitchen_paths(&self) -> KitchenPaths {
        let k = &self.kitchen;
        KitchenPaths {
            root: paths::expand(&k.root),
            kitchen: PathBuf::from(&k.path),
            default_attributes: PathBuf::from(&k.default_attributes),
            nodes: PathBuf::from(&k.nodes),
            cookbooks: k.cookbooks.flatten(),
            vendor_cookbooks: PathBuf::from(&k.vendor_cookbooks),
            roles: PathBuf::from(&k.roles),
            environments: PathBuf::from(&k.environments),
            data_bags: PathBuf::from(&k.data_bags),
            data_bag_secret: PathBuf::from(&k.data_bag_secret),
        }
    }

    pub fn archive_path(&self) -> PathBuf {
        paths::expand(&self.kitchen.archive)
    }

    /// Configured hosts, optionally restricted to `only`.
    pub fn hosts(&self, only: &[String]) -> Result<Vec<Host>> {
        if let Some(unknown) = only
            .iter()
            .find(|name| !self.hosts.iter().any(|h| &h.name == *name))
        {
            bail!("Unknown host: {unknown}");
        }

        Ok(self
            .hosts
            .iter()
            .filter(|h| only.is_empty() || only.contains(&h.name))
            .map(|h| Host::new(&h.name).with_roles(h.roles.iter().cloned()))
            .collect())
    }

    pub fn transfer_mode(&self) -> TransferMode {
        match &self.transfer.relay {
            Some(relay) => TransferMode::Relay {
                bucket: relay.bucket.clone(),
                credentials: Credentials::new(
                    paths::expand_str(&relay.access_key_id),
                    paths::expand_str(&relay.secret_access_key),
                ),
            },
            None => TransferMode::Direct {
                max_concurrency: self.transfer.max_concurrency,
            },
        }
    }

    /// Elevation settings; `use_sudo` is resolved later when unset.
    pub fn privilege(&self) -> Privilege {
        Privilege {
            use_sudo: self.remote.use_sudo.unwrap_or(true),
            environment: self
                .remote
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn ssh_transport(&self) -> SshTransport {
        SshTransport {
            user: self.ssh.user.clone(),
            port: self.ssh.port,
            options: self.ssh.options.clone(),
        }
    }

    pub fn ohai_plugin_path(&self) -> Option<String> {
        let path = self.chef.ohai_plugin_path.trim();
        (!path.is_empty()).then(|| path.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
