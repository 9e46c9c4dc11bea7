//! Cookbook dependency fetching.
//!
//! Two external tools are supported, each driven by its own manifest in the
//! project root: Berkshelf (`Berksfile`) and librarian-chef (`Cheffile`).
//! The tool is chosen once, when the manifest policy is checked, and kept as
//! a [`CookbookFetcher`] strategy. A tool that is not installed is not an
//! error; cookbooks may be vendored by hand.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::paths::KitchenPaths;

pub const BERKSFILE: &str = "Berksfile";
pub const CHEFFILE: &str = "Cheffile";

/// Which dependency tool manages cookbooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManageTool {
    /// Pick the tool whose manifest exists; both existing is an error
    #[default]
    Discover,
    Berkshelf,
    LibrarianChef,
}

/// A cookbook dependency tool.
pub trait CookbookFetcher: Send + Sync {
    /// Display name
    fn name(&self) -> &'static str;

    /// Executable looked up on `PATH`
    fn binary(&self) -> &'static str;

    /// Resolve dependencies declared in the manifest.
    fn resolve(&self, project_root: &Path, vendor: &Path) -> Result<()>;

    /// Install resolved cookbooks into `vendor`.
    fn install(&self, project_root: &Path, vendor: &Path) -> Result<()>;

    /// Whether the executable can be found.
    fn is_available(&self) -> bool {
        which::which(self.binary()).is_ok()
    }
}

/// Berkshelf: `berks install` then `berks vendor <dir>`.
pub struct Berkshelf;

impl CookbookFetcher for Berkshelf {
    fn name(&self) -> &'static str {
        "berkshelf"
    }

    fn binary(&self) -> &'static str {
        "berks"
    }

    fn resolve(&self, project_root: &Path, _vendor: &Path) -> Result<()> {
        run_tool(self.binary(), &["install"], project_root)
    }

    fn install(&self, project_root: &Path, vendor: &Path) -> Result<()> {
        // berks vendor refuses to write into an existing directory
        if vendor.exists() {
            fs::remove_dir_all(vendor)?;
        }
        if let Some(parent) = vendor.parent() {
            fs::create_dir_all(parent)?;
        }
        let vendor = vendor.to_string_lossy();
        run_tool(self.binary(), &["vendor", vendor.as_ref()], project_root)
    }
}

/// librarian-chef: pin the install path, then `librarian-chef install`.
pub struct LibrarianChef;

impl CookbookFetcher for LibrarianChef {
    fn name(&self) -> &'static str {
        "librarian-chef"
    }

    fn binary(&self) -> &'static str {
        "librarian-chef"
    }

    fn resolve(&self, project_root: &Path, vendor: &Path) -> Result<()> {
        let vendor = vendor.to_string_lossy();
        run_tool(
            self.binary(),
            &["config", "path", vendor.as_ref(), "--local"],
            project_root,
        )
    }

    fn install(&self, project_root: &Path, _vendor: &Path) -> Result<()> {
        run_tool(self.binary(), &["install"], project_root)
    }
}

fn run_tool(binary: &'static str, args: &[&str], cwd: &Path) -> Result<()> {
    log::debug!("executing {} {}", binary, args.join(" "));

    let output = Command::new(binary).args(args).current_dir(cwd).output()?;

    if !output.status.success() {
        return Err(Error::ToolFailed {
            tool: binary,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Result of [`CookbookSource::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched { tool: &'static str },
    Skipped { reason: String },
}

/// Where vendored cookbooks come from for this kitchen.
pub struct CookbookSource {
    fetcher: Option<Box<dyn CookbookFetcher>>,
    project_root: PathBuf,
    vendor: PathBuf,
}

impl std::fmt::Debug for CookbookSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookbookSource")
            .field("tool", &self.tool_name())
            .field("vendor", &self.vendor)
            .finish()
    }
}

impl CookbookSource {
    /// Check the manifest policy and select the fetcher.
    pub fn discover(policy: ManageTool, paths: &KitchenPaths) -> Result<Self> {
        let has_berksfile = paths.root.join(BERKSFILE).exists();
        let has_cheffile = paths.root.join(CHEFFILE).exists();

        let fetcher: Option<Box<dyn CookbookFetcher>> = match policy {
            ManageTool::Discover => match (has_berksfile, has_cheffile) {
                (true, true) => return Err(Error::ConflictingManifests),
                (true, false) => Some(Box::new(Berkshelf)),
                (false, true) => Some(Box::new(LibrarianChef)),
                (false, false) => None,
            },
            ManageTool::Berkshelf if !has_berksfile => {
                return Err(Error::MissingManifest(BERKSFILE));
            }
            ManageTool::Berkshelf => Some(Box::new(Berkshelf)),
            ManageTool::LibrarianChef if !has_cheffile => {
                return Err(Error::MissingManifest(CHEFFILE));
            }
            ManageTool::LibrarianChef => Some(Box::new(LibrarianChef)),
        };

        Ok(Self::with_fetcher(fetcher, paths))
    }

    /// Use a specific fetcher (or none).
    pub fn with_fetcher(fetcher: Option<Box<dyn CookbookFetcher>>, paths: &KitchenPaths) -> Self {
        Self {
            fetcher,
            project_root: paths.root.clone(),
            vendor: paths.absolute(&paths.vendor_cookbooks_path()),
        }
    }

    pub fn tool_name(&self) -> Option<&'static str> {
        self.fetcher.as_ref().map(|f| f.name())
    }

    /// Resolve and install cookbooks into the vendor directory.
    pub fn fetch(&self) -> Result<FetchOutcome> {
        let Some(fetcher) = &self.fetcher else {
            return Ok(FetchOutcome::Skipped {
                reason: "no cookbook manifest".to_string(),
            });
        };

        if !fetcher.is_available() {
            log::debug!("{} not installed, skipping cookbook fetch", fetcher.binary());
            return Ok(FetchOutcome::Skipped {
                reason: format!("{} not installed", fetcher.binary()),
            });
        }

        log::info!("Fetching cookbooks with {}", fetcher.name());
        fetcher.resolve(&self.project_root, &self.vendor)?;
        fetcher.install(&self.project_root, &self.vendor)?;

        Ok(FetchOutcome::Fetched {
            tool: fetcher.name(),
        })
    }
}
