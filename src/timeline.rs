//! # Timeline
//!
//! Groups the packages of one branch into `Update`s, the points in time at
//! which the mirror published something, and links them into a backward chain.
//!
//! Chains are immutable once built. Nodes are shared through `Arc` so that a
//! work plan can hold on to individual updates while the chain is still owned
//! by its `Repository`.
//!
//! Two updates are the *same historical point* when their date, size and
//! package set are equal. Their position in a chain does not matter, which is
//! what lets a branch recognise a node of an independently built trunk chain.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::index::Package;

/// All packages published at one timestamp
#[derive(Debug, Clone)]
pub struct Update {
    pub date: DateTime<Utc>,
    /// Sum of the sizes of `packages`
    pub size: u64,
    /// Packages sorted by archive name
    pub packages: Vec<Package>,
    pub prev: Option<Arc<Update>>,
}

impl PartialEq for Update {
    fn eq(&self, other: &Self) -> bool {
        self.date == other.date && self.size == other.size && self.packages == other.packages
    }
}

impl Eq for Update {}

// Unlink iteratively so dropping a long chain cannot overflow the stack.
impl Drop for Update {
    fn drop(&mut self) {
        let mut prev = self.prev.take();
        while let Some(node) = prev {
            match Arc::try_unwrap(node) {
                Ok(mut update) => prev = update.prev.take(),
                Err(_) => break,
            }
        }
    }
}

impl Update {
    /// Iterates over this update and all its predecessors, newest first.
    pub fn history(&self) -> History<'_> {
        History { next: Some(self) }
    }

    /// Returns every package of the chain ending at this update, oldest first.
    pub fn flatten(&self) -> Vec<Package> {
        let mut updates: Vec<&Update> = self.history().collect();
        updates.reverse();
        updates
            .into_iter()
            .flat_map(|update| update.packages.iter().cloned())
            .collect()
    }

    /// Number of updates in the chain ending at this update.
    pub fn depth(&self) -> usize {
        self.history().count()
    }
}

/// Iterator walking a chain backwards
pub struct History<'a> {
    next: Option<&'a Update>,
}

impl<'a> Iterator for History<'a> {
    type Item = &'a Update;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.prev.as_deref();
        Some(current)
    }
}

/// Builds the update chain of a set of packages and returns its head.
///
/// Returns `None` when there are no packages; callers turn that into an
/// `EmptyIndex` error since they know which branch was being built.
pub fn build_chain(packages: impl IntoIterator<Item = Package>) -> Option<Arc<Update>> {
    let mut groups: BTreeMap<DateTime<Utc>, Vec<Package>> = BTreeMap::new();
    for package in packages {
        groups.entry(package.timestamp).or_default().push(package);
    }

    let mut head: Option<Arc<Update>> = None;
    for (date, mut packages) in groups {
        packages.sort();
        let size = packages.iter().map(|p| p.size).sum();
        head = Some(Arc::new(Update {
            date,
            size,
            packages,
            prev: head.take(),
        }));
    }
    head
}
