//! Kitchen directory layout.
//!
//! All paths are kept relative to the project root so they can double as
//! archive entry names, and resolved against the root only when the
//! filesystem is touched.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A configured path or an arbitrarily nested group of paths.
///
/// Deserializes from either a string or a (nested) array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathGroup {
    One(String),
    Many(Vec<PathGroup>),
}

impl PathGroup {
    /// Flatten into an ordered list, dropping empty entries.
    pub fn flatten(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<PathBuf>) {
        match self {
            Self::One(path) if path.is_empty() => {}
            Self::One(path) => out.push(PathBuf::from(path)),
            Self::Many(groups) => groups.iter().for_each(|g| g.flatten_into(out)),
        }
    }
}

impl From<&str> for PathGroup {
    fn from(path: &str) -> Self {
        Self::One(path.to_string())
    }
}

/// Layout of a chef kitchen.
///
/// `kitchen` is relative to `root`; every other entry is relative to
/// `kitchen`.
#[derive(Debug, Clone)]
pub struct KitchenPaths {
    /// Project root (where Berksfile / Cheffile live)
    pub root: PathBuf,
    /// Kitchen directory
    pub kitchen: PathBuf,
    /// Default attribute file shared by every host
    pub default_attributes: PathBuf,
    /// Directory holding `<host>.json` attribute files
    pub nodes: PathBuf,
    /// Cookbook search roots, in configuration order
    pub cookbooks: Vec<PathBuf>,
    /// Cookbook root populated by the dependency tool
    pub vendor_cookbooks: PathBuf,
    pub roles: PathBuf,
    pub environments: PathBuf,
    pub data_bags: PathBuf,
    /// Encrypted data bag secret file
    pub data_bag_secret: PathBuf,
}

impl Default for KitchenPaths {
    fn default() -> Self {
        Self::new(".")
    }
}

impl KitchenPaths {
    /// Conventional layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            kitchen: PathBuf::from("config"),
            default_attributes: PathBuf::from("solo.json"),
            nodes: PathBuf::from("nodes"),
            cookbooks: vec![PathBuf::from("site-cookbooks")],
            vendor_cookbooks: PathBuf::from("vendor/cookbooks"),
            roles: PathBuf::from("roles"),
            environments: PathBuf::from("environments"),
            data_bags: PathBuf::from("data_bags"),
            data_bag_secret: PathBuf::from("data_bag_key"),
        }
    }

    fn in_kitchen(&self, path: &Path) -> PathBuf {
        self.kitchen.join(path)
    }

    /// Resolve a root-relative path against the project root.
    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Configured cookbook roots followed by the vendor root.
    pub fn cookbook_paths(&self) -> Vec<PathBuf> {
        self.cookbooks
            .iter()
            .chain(std::iter::once(&self.vendor_cookbooks))
            .map(|p| self.in_kitchen(p))
            .collect()
    }

    pub fn vendor_cookbooks_path(&self) -> PathBuf {
        self.in_kitchen(&self.vendor_cookbooks)
    }

    pub fn roles_path(&self) -> PathBuf {
        self.in_kitchen(&self.roles)
    }

    pub fn environments_path(&self) -> PathBuf {
        self.in_kitchen(&self.environments)
    }

    pub fn data_bags_path(&self) -> PathBuf {
        self.in_kitchen(&self.data_bags)
    }

    pub fn data_bag_secret_path(&self) -> PathBuf {
        self.in_kitchen(&self.data_bag_secret)
    }

    /// Whether the data bag secret exists locally.
    pub fn has_data_bag_secret(&self) -> bool {
        self.absolute(&self.data_bag_secret_path()).is_file()
    }

    /// Candidate attribute files for a host: its own file, then the default.
    pub fn attribute_candidates(&self, host: &str) -> Vec<PathBuf> {
        vec![
            self.in_kitchen(&self.nodes).join(format!("{host}.json")),
            self.in_kitchen(&self.default_attributes),
        ]
    }

    /// Whether a role definition exists as `<name>.json` or `<name>.rb`.
    pub fn role_exists(&self, name: &str) -> bool {
        let roles = self.absolute(&self.roles_path());
        ["json", "rb"]
            .iter()
            .any(|ext| roles.join(format!("{name}.{ext}")).exists())
    }

    /// Path groups packaged into the kitchen archive, in archive order.
    pub fn archive_groups(&self) -> Vec<Vec<PathBuf>> {
        vec![
            self.cookbook_paths(),
            vec![self.roles_path()],
            vec![self.environments_path()],
            vec![self.data_bags_path()],
            vec![self.data_bag_secret_path()],
        ]
    }
}
