//! # Kitchen
//!
//! Local side of a chef-solo deployment.
//!
//! - [`RunListResolver`]: per-host attribute discovery and run list checks
//! - [`ArchiveBuilder`]: packages the kitchen into one tar archive
//! - [`CookbookSource`]: fetches vendored cookbooks with Berkshelf or
//!   librarian-chef
//!
//! ## Example
//!
//! ```no_run
//! use kitchen::{ArchiveBuilder, Host, KitchenPaths, RunListResolver};
//! use std::path::Path;
//!
//! let paths = KitchenPaths::new(".");
//! let mut hosts = vec![Host::new("web1").with_roles(["web"])];
//!
//! let resolver = RunListResolver::new(&paths, true);
//! let discovery = resolver.discover(&mut hosts);
//! for warning in &discovery.warnings {
//!     eprintln!("{warning}");
//! }
//! resolver.ensure(&hosts)?;
//!
//! let summary = ArchiveBuilder::new(&paths).build(Path::new("/tmp/kitchen.tar"))?;
//! println!("{} entries", summary.entries.len());
//! # Ok::<(), kitchen::Error>(())
//! ```

pub mod archive;
pub mod cookbooks;
mod error;
pub mod host;
pub mod paths;
pub mod run_list;

pub use archive::{ArchiveBuilder, ArchiveEntry, ArchiveSummary, EntryKind};
pub use cookbooks::{CookbookFetcher, CookbookSource, FetchOutcome, ManageTool};
pub use error::{Error, Result};
pub use host::{AttributeSet, Host};
pub use paths::{KitchenPaths, PathGroup};
pub use run_list::{Discovery, DiscoveryWarning, RunListResolver, WarningKind};
