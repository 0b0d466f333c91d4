//! # Todo Planner
//!
//! Works out which updates of a branch still need a commit, and which
//! checkpoint each of them starts from.
//!
//! The planner walks the chain backwards from the newest update and stops at
//! the first update that already has a checkpoint. When a trunk is given, it
//! also looks for the point where the branch forked: if the predecessor of the
//! update being considered is also a node of the trunk chain (by value, the
//! chains are built independently) and the trunk has a checkpoint for it, the
//! update starts from that trunk checkpoint and the walk ends there. The shared
//! prefix is the trunk's history and is not duplicated.

use std::sync::Arc;

use log::{debug, warn};

use crate::checkpoint::{tag_name, CheckpointStore};
use crate::error::{Error, Result};
use crate::repository::Repository;
use crate::timeline::Update;

/// One update to materialize
#[derive(Debug, Clone)]
pub struct TodoItem {
    pub update: Arc<Update>,
    /// Checkpoint to start from; `None` creates a new root commit.
    pub start: Option<String>,
}

/// A trunk node shared with the branch being planned
enum Fork {
    /// The trunk tag exists; the branch starts from it.
    Confirmed(String),
    /// The trunk tag does not exist yet.
    Unconfirmed(String),
}

/// Computes the work plan of `repo`, oldest update first.
pub fn plan(
    repo: &Repository,
    store: &CheckpointStore,
    trunk: Option<&Repository>,
) -> Vec<TodoItem> {
    let mut todo = Vec::new();
    let mut unconfirmed: Vec<String> = Vec::new();
    let mut curr = Some(&repo.latest);

    while let Some(update) = curr {
        if store.contains(&tag_name(&repo.version, update)) {
            break;
        }

        match fork_point(update, store, trunk) {
            Some(Fork::Confirmed(start)) => {
                debug!("{} forks from trunk at {}", repo.version, start);
                todo.push(TodoItem {
                    update: Arc::clone(update),
                    start: Some(start),
                });
                break;
            }
            Some(Fork::Unconfirmed(tag)) => unconfirmed.push(tag),
            None => {}
        }

        todo.push(TodoItem {
            update: Arc::clone(update),
            start: update
                .prev
                .as_ref()
                .map(|prev| tag_name(&repo.version, prev)),
        });
        curr = update.prev.as_ref();
    }

    if let Some(latest) = unconfirmed.first() {
        warn!(
            "{} shares {} update(s) with the trunk but none is checkpointed (latest {}), not reusing trunk history",
            repo.version,
            unconfirmed.len(),
            latest
        );
    }

    todo.reverse();
    todo
}

/// Looks up the predecessor of `update` in the trunk chain.
fn fork_point(
    update: &Update,
    store: &CheckpointStore,
    trunk: Option<&Repository>,
) -> Option<Fork> {
    let trunk = trunk?;
    let prev = update.prev.as_deref()?;
    let shared = trunk.latest.history().find(|node| *node == prev)?;

    let trunk_tag = tag_name(&trunk.version, shared);
    if store.contains(&trunk_tag) {
        Some(Fork::Confirmed(trunk_tag))
    } else {
        Some(Fork::Unconfirmed(trunk_tag))
    }
}

/// Rejects a resumed run whose plan would create a new root commit.
///
/// A root commit at the start of a plan replaces the existing history of the
/// branch, which is only acceptable when the caller explicitly restarts.
pub fn ensure_resumable(repo: &Repository, plan: &[TodoItem], should_resume: bool) -> Result<()> {
    match plan.first() {
        Some(item) if should_resume && item.start.is_none() => Err(Error::UnsafeRestart {
            repo: repo.name.clone(),
            version: repo.version.clone(),
        }),
        _ => Ok(()),
    }
}
