//! Kitchen archive packaging.
//!
//! The archive is a plain tar rebuilt from scratch on every run. Entry names
//! are relative to the project root, so unpacking it inside the remote
//! working directory reproduces the kitchen layout there.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::paths::KitchenPaths;

/// Kind of an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    /// Stored as a link, never followed
    Symlink,
}

/// One entry written to the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// What was packaged.
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    /// Where the archive was written
    pub path: PathBuf,
    /// Kitchen paths that existed and were packaged
    pub roots: Vec<PathBuf>,
    /// Entries in archive order
    pub entries: Vec<ArchiveEntry>,
}

impl ArchiveSummary {
    pub fn file_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::File)
            .count()
    }
}

/// Packages the existing kitchen paths into one tar file.
pub struct ArchiveBuilder<'a> {
    paths: &'a KitchenPaths,
}

impl<'a> ArchiveBuilder<'a> {
    pub fn new(paths: &'a KitchenPaths) -> Self {
        Self { paths }
    }

    /// Configured kitchen paths that currently exist, deduplicated, in
    /// configuration order.
    pub fn kitchen_paths(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        self.configured_paths()
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .filter(|p| self.paths.absolute(p).exists())
            .collect()
    }

    fn configured_paths(&self) -> Vec<PathBuf> {
        self.paths.archive_groups().into_iter().flatten().collect()
    }

    /// Write the archive to `dest`, replacing any previous one.
    pub fn build(&self, dest: &Path) -> Result<ArchiveSummary> {
        let roots = self.kitchen_paths();
        if roots.is_empty() {
            return Err(Error::NoKitchenContent {
                searched: self.configured_paths(),
            });
        }

        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(dest)?;
        let mut builder = tar::Builder::new(BufWriter::new(file));
        builder.follow_symlinks(false);
        let mut entries = Vec::new();
        let mut emitted = HashSet::new();

        for root in &roots {
            let walker = WalkDir::new(self.paths.absolute(root))
                .follow_links(false)
                .sort_by_file_name();

            for entry in walker {
                let entry = entry?;
                let name = entry
                    .path()
                    .strip_prefix(&self.paths.root)
                    .unwrap_or(entry.path())
                    .to_path_buf();

                // Nested roots (e.g. vendor inside a cookbook root) are walked twice
                if !emitted.insert(name.clone()) {
                    continue;
                }

                let file_type = entry.file_type();
                let kind = if file_type.is_symlink() {
                    EntryKind::Symlink
                } else if file_type.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                };

                builder.append_path_with_name(entry.path(), &name)?;
                entries.push(ArchiveEntry { path: name, kind });
            }
        }

        let mut writer = builder.into_inner()?;
        writer.flush()?;

        log::debug!(
            "Packaged {} entries from {} kitchen paths into {}",
            entries.len(),
            roots.len(),
            dest.display()
        );

        Ok(ArchiveSummary {
            path: dest.to_path_buf(),
            roots,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn archive_names(path: &Path) -> Vec<String> {
        let mut archive = tar::Archive::new(File::open(path).unwrap());
        archive
            .entries()
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn test_kitchen_paths_skip_missing() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "config/roles/web.json", "{}");
        write(tmp.path(), "config/data_bag_key", "secret");
        let paths = KitchenPaths::new(tmp.path());

        assert_eq!(
            ArchiveBuilder::new(&paths).kitchen_paths(),
            vec![
                PathBuf::from("config/roles"),
                PathBuf::from("config/data_bag_key")
            ]
        );
    }

    #[test]
    fn test_kitchen_paths_deduplicate_roots() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "config/site-cookbooks/base/metadata.rb", "name 'base'");
        let mut paths = KitchenPaths::new(tmp.path());
        paths.cookbooks = vec![PathBuf::from("site-cookbooks"), PathBuf::from("site-cookbooks")];

        assert_eq!(
            ArchiveBuilder::new(&paths).kitchen_paths(),
            vec![PathBuf::from("config/site-cookbooks")]
        );
    }

    #[test]
    fn test_build_fails_without_content() {
        let tmp = TempDir::new().unwrap();
        let paths = KitchenPaths::new(tmp.path());

        let err = ArchiveBuilder::new(&paths)
            .build(&tmp.path().join("kitchen.tar"))
            .unwrap_err();
        assert!(matches!(err, Error::NoKitchenContent { .. }));
        assert!(!tmp.path().join("kitchen.tar").exists());
    }

    #[test]
    fn test_build_packages_existing_tree_in_order() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "config/site-cookbooks/base/recipes/default.rb", "package 'git'");
        write(tmp.path(), "config/site-cookbooks/base/metadata.rb", "name 'base'");
        write(tmp.path(), "config/roles/web.json", "{}");
        write(tmp.path(), "config/nodes/web1.json", "{}");
        let paths = KitchenPaths::new(tmp.path());
        let dest = tmp.path().join("out/kitchen.tar");

        let summary = ArchiveBuilder::new(&paths).build(&dest).unwrap();

        let expected = vec![
            "config/site-cookbooks",
            "config/site-cookbooks/base",
            "config/site-cookbooks/base/metadata.rb",
            "config/site-cookbooks/base/recipes",
            "config/site-cookbooks/base/recipes/default.rb",
            "config/roles",
            "config/roles/web.json",
        ];
        assert_eq!(archive_names(&dest), expected);
        assert_eq!(summary.entries.len(), expected.len());
        assert_eq!(summary.file_count(), 3);
        assert_eq!(summary.entries[0].kind, EntryKind::Directory);
    }

    #[test]
    fn test_build_skips_nested_root_entries_already_emitted() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "config/cookbooks/vendor/nginx/metadata.rb", "name 'nginx'");
        let mut paths = KitchenPaths::new(tmp.path());
        paths.cookbooks = vec![PathBuf::from("cookbooks")];
        paths.vendor_cookbooks = PathBuf::from("cookbooks/vendor");
        let dest = tmp.path().join("kitchen.tar");

        ArchiveBuilder::new(&paths).build(&dest).unwrap();

        let names = archive_names(&dest);
        let unique: HashSet<&String> = names.iter().collect();
        assert_eq!(names.len(), unique.len());
        assert!(names.contains(&"config/cookbooks/vendor/nginx/metadata.rb".to_string()));
    }

    #[test]
    fn test_build_truncates_previous_archive() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "config/roles/web.json", "{}");
        write(tmp.path(), "config/roles/db.json", "{}");
        let paths = KitchenPaths::new(tmp.path());
        let dest = tmp.path().join("kitchen.tar");

        ArchiveBuilder::new(&paths).build(&dest).unwrap();
        fs::remove_file(tmp.path().join("config/roles/db.json")).unwrap();
        ArchiveBuilder::new(&paths).build(&dest).unwrap();

        assert_eq!(
            archive_names(&dest),
            vec!["config/roles", "config/roles/web.json"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_build_stores_broken_symlink_as_link() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "config/roles/web.json", "{}");
        std::os::unix::fs::symlink(
            tmp.path().join("config/roles/gone.json"),
            tmp.path().join("config/roles/old.json"),
        )
        .unwrap();
        let paths = KitchenPaths::new(tmp.path());
        let dest = tmp.path().join("kitchen.tar");

        let summary = ArchiveBuilder::new(&paths).build(&dest).unwrap();

        let old = summary
            .entries
            .iter()
            .find(|e| e.path == Path::new("config/roles/old.json"))
            .unwrap();
        assert_eq!(old.kind, EntryKind::Symlink);
        assert_eq!(summary.file_count(), 1);
        assert_eq!(
            archive_names(&dest),
            vec!["config/roles", "config/roles/old.json", "config/roles/web.json"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_build_keeps_symlinked_cookbook_as_link() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "shared/nginx/metadata.rb", "name 'nginx'");
        fs::create_dir_all(tmp.path().join("config/site-cookbooks")).unwrap();
        let target = tmp.path().join("shared/nginx");
        std::os::unix::fs::symlink(&target, tmp.path().join("config/site-cookbooks/nginx"))
            .unwrap();
        let paths = KitchenPaths::new(tmp.path());
        let dest = tmp.path().join("kitchen.tar");

        let summary = ArchiveBuilder::new(&paths).build(&dest).unwrap();

        assert_eq!(
            summary.entries,
            vec![
                ArchiveEntry {
                    path: PathBuf::from("config/site-cookbooks"),
                    kind: EntryKind::Directory,
                },
                ArchiveEntry {
                    path: PathBuf::from("config/site-cookbooks/nginx"),
                    kind: EntryKind::Symlink,
                },
            ]
        );

        let mut archive = tar::Archive::new(File::open(&dest).unwrap());
        let link = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .find(|e| e.path().unwrap() == Path::new("config/site-cookbooks/nginx"))
            .unwrap();
        assert!(link.header().entry_type().is_symlink());
        assert_eq!(link.link_name().unwrap().unwrap(), target);
    }
}
