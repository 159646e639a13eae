//! Replacing the live installation tree with a staged package.
//!
//! The merge works on top-level entries of the package root, in lexical
//! order. For each entry:
//!
//! 1. protected names are skipped before anything is deleted
//! 2. mount points (possibly mounted volumes) keep their directory; their
//!    children are replaced one by one
//! 3. everything else: the live entry is removed and the staged one moved in
//!
//! The merge is not transactional over the file tree. A failure part-way
//! leaves the entries replaced so far in place and reports them; only the
//! database can be rolled back.

use crate::core::UpdateError;
use crate::utils::fs::{FileSystem, FsError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Component, Path};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Top-level names the merger never touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectedPaths {
    names: BTreeSet<String>,
}

impl ProtectedPaths {
    /// Build the set from configured entries. `data_dir` is always included.
    pub fn new<I, S>(data_dir: &str, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = std::iter::once(data_dir.to_string())
            .chain(extra.into_iter().map(|s| s.as_ref().to_string()))
            .filter_map(|entry| top_level_name(&entry))
            .collect();
        Self {
            names,
        }
    }

    /// Build from a list whose first element is the data directory.
    #[must_use]
    pub fn from_entries(entries: &[String]) -> Self {
        match entries.split_first() {
            Some((data_dir, rest)) => Self::new(data_dir, rest),
            None => Self::default(),
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        top_level_name(name).is_some_and(|n| self.names.contains(&n))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// `data`, `./data/` and `data/db` all name `data`.
fn top_level_name(entry: &str) -> Option<String> {
    Path::new(entry.trim()).components().find_map(|c| match c {
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    })
}

/// Outcome of a successful merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub replaced: Vec<String>,
    pub skipped: Vec<String>,
}

/// A merge that stopped part-way.
#[derive(Debug, Error)]
#[error("Failed to merge '{entry}' ({} entries already replaced): {source}", replaced.len())]
pub struct MergeFailure {
    pub entry: String,
    pub replaced: Vec<String>,
    #[source]
    pub source: FsError,
}

impl From<MergeFailure> for UpdateError {
    fn from(failure: MergeFailure) -> Self {
        Self::Merge {
            reason: failure.source.to_string(),
            entry: failure.entry,
            replaced: failure.replaced,
        }
    }
}

/// Moves staged entries over the live tree.
#[derive(Debug, Clone)]
pub struct FileTreeMerger {
    fs: Arc<dyn FileSystem>,
    mount_points: BTreeSet<String>,
}

impl FileTreeMerger {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            mount_points: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_mount_points<I, S>(mut self, mount_points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.mount_points = mount_points.into_iter().filter_map(|m| top_level_name(m.as_ref())).collect();
        self
    }

    /// Replace every unprotected top-level entry of `live_root` with the one in `package_root`.
    pub fn merge(
        &self,
        package_root: &Path,
        live_root: &Path,
        protected: &ProtectedPaths,
    ) -> Result<MergeReport, MergeFailure> {
        let mut report = MergeReport::default();
        let fail = |entry: &str, replaced: &[String], source| MergeFailure {
            entry: entry.to_string(),
            replaced: replaced.to_vec(),
            source,
        };

        let entries = self.fs.list_dir(package_root).map_err(|e| fail("", &[], e))?;
        self.fs.create_dir_all(live_root).map_err(|e| fail("", &[], e))?;

        for name in entries {
            if protected.contains(&name) {
                info!("Skipping protected entry '{name}'");
                report.skipped.push(name);
                continue;
            }

            let staged = package_root.join(&name);
            let live = live_root.join(&name);

            let result = if self.mount_points.contains(&name) && self.fs.is_dir(&staged) && self.fs.is_dir(&live) {
                self.merge_children(&staged, &live)
            } else {
                self.replace(&staged, &live)
            };
            result.map_err(|e| fail(&name, &report.replaced, e))?;

            debug!("Replaced '{name}'");
            report.replaced.push(name);
        }

        info!(
            replaced = report.replaced.len(),
            skipped = report.skipped.len(),
            "Merged package into {}",
            live_root.display()
        );
        Ok(report)
    }

    fn replace(&self, staged: &Path, live: &Path) -> Result<(), FsError> {
        if self.fs.exists(live) || self.fs.is_dir(live) {
            self.fs.remove(live)?;
        }
        self.fs.move_entry(staged, live)
    }

    fn merge_children(&self, staged: &Path, live: &Path) -> Result<(), FsError> {
        debug!("Merging mount point {} child by child", live.display());
        for child in self.fs.list_dir(staged)? {
            self.replace(&staged.join(&child), &live.join(&child))?;
        }
        Ok(())
    }
}
