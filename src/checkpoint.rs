//! # Checkpoints
//!
//! Every materialized update is tagged `<version>-<YYMMDD-HHMM>Z`. The tag is
//! derived from the update's date alone, so a later run can tell which updates
//! already exist by asking the backend for its tags.
//!
//! The [`CheckpointStore`] is that answer: a map from tag name to commit id,
//! built once per run from the remote branches and extended in memory as new
//! commits are created. It is never persisted by itself; the tags pushed to the
//! destination are the persistent form.

use std::collections::HashMap;
use std::path::Path;

use log::debug;

use crate::error::Result;
use crate::repository::GitOperations;
use crate::timeline::Update;

/// Returns the checkpoint tag of `update` on the branch `version`.
pub fn tag_name(version: &str, update: &Update) -> String {
    format!("{}-{}", version, update.date.format("%y%m%d-%H%MZ"))
}

/// Remote tracking ref of a version branch.
pub fn remote_ref(version: &str) -> String {
    format!("refs/remotes/origin/{}", version)
}

/// Known checkpoints of a destination repository
#[derive(Debug, Clone, Default)]
pub struct CheckpointStore {
    tags: HashMap<String, String>,
}

impl CheckpointStore {
    /// Creates an empty store, as used when history is rebuilt from scratch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects the tags reachable from the remote branch of each version.
    ///
    /// Versions whose branch does not exist yet contribute nothing.
    pub fn load(git: &dyn GitOperations, dir: &Path, versions: &[String]) -> Result<Self> {
        let mut store = Self::new();
        for version in versions {
            let records = git.list_tags(dir, &remote_ref(version))?;
            debug!("Found {} checkpoint(s) on branch {}", records.len(), version);
            for record in records {
                store.tags.insert(record.name, record.commit);
            }
        }
        Ok(store)
    }

    /// Returns the commit a checkpoint tag points at.
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.tags.get(tag).map(String::as_str)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    /// Records a freshly created checkpoint.
    pub fn insert(&mut self, tag: String, commit: String) {
        self.tags.insert(tag, commit);
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}
