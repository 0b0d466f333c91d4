//! # Repositories and the Git Backend
//!
//! A [`Repository`] is one branch being synthesized: a destination repository,
//! the version naming its branch and tags, and the head of the update chain
//! built from that version's index.
//!
//! All version control work goes through the [`GitOperations`] trait so that
//! planning and materialization can be tested without a git binary. The
//! default implementation, [`DefaultGitOperations`], delegates to the
//! subprocess primitives in [`crate::git`].

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::config::Identity;
use crate::error::{Error, Result};
use crate::git::TagRecord;
use crate::index::Package;
use crate::timeline::{self, Update};

/// One branch of a destination repository
#[derive(Debug, Clone)]
pub struct Repository {
    /// Destination repository name, e.g. `jupiter`
    pub name: String,
    /// Version, used as branch name and tag prefix
    pub version: String,
    /// Push URL of the destination repository
    pub url: String,
    pub latest: Arc<Update>,
}

impl Repository {
    /// Builds a repository from the packages of its index.
    ///
    /// Fails with `EmptyIndex` when there are no packages.
    pub fn from_packages(
        name: &str,
        version: &str,
        url: &str,
        packages: Vec<Package>,
    ) -> Result<Self> {
        let latest = timeline::build_chain(packages).ok_or_else(|| Error::EmptyIndex {
            repo: name.to_string(),
            version: version.to_string(),
        })?;

        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            url: url.to_string(),
            latest,
        })
    }
}

/// Version control backend contract
///
/// Every method operates on a local repository directory `dir`.
pub trait GitOperations: Send + Sync {
    /// Creates (or reuses) a repository at `dir` whose `origin` is `url`.
    fn init(&self, dir: &Path, url: &str) -> Result<()>;

    /// Fetches branches and tags from `origin`.
    fn fetch(&self, dir: &Path) -> Result<()>;

    /// Lists the tags reachable from `reference`; a missing reference yields
    /// an empty list.
    fn list_tags(&self, dir: &Path, reference: &str) -> Result<Vec<TagRecord>>;

    /// Checks out `commit` detached, or an empty tree without parent.
    fn checkout(&self, dir: &Path, commit: Option<&str>) -> Result<()>;

    /// Stages everything and commits it with `date` as author and committer
    /// date. Returns the new commit id.
    fn commit(
        &self,
        dir: &Path,
        message: &str,
        date: DateTime<Utc>,
        identity: &Identity,
    ) -> Result<String>;

    fn tag(&self, dir: &Path, name: &str, commit: &str) -> Result<()>;

    /// Pushes `commit` to `refs/heads/<branch>` of `origin`, with `tags`.
    fn push(&self, dir: &Path, commit: &str, branch: &str, tags: &[String], force: bool)
        -> Result<()>;

    /// Creates a bare repository at `path` if there is none.
    fn ensure_bare(&self, path: &Path) -> Result<()>;

    /// Force-pushes all branches of `dir` to `url`, then its tags, restricted
    /// to those matching `tag_filter` when one is given.
    fn push_mirror(&self, dir: &Path, url: &str, tag_filter: Option<&Regex>) -> Result<()>;
}

/// The default implementation of `GitOperations`, which uses the system's
/// `git` command.
pub struct DefaultGitOperations;

impl GitOperations for DefaultGitOperations {
    fn init(&self, dir: &Path, url: &str) -> Result<()> {
        crate::git::init_repository(dir, url)
    }

    fn fetch(&self, dir: &Path) -> Result<()> {
        crate::git::fetch_origin(dir)
    }

    fn list_tags(&self, dir: &Path, reference: &str) -> Result<Vec<TagRecord>> {
        crate::git::list_merged_tags(dir, reference)
    }

    fn checkout(&self, dir: &Path, commit: Option<&str>) -> Result<()> {
        crate::git::checkout(dir, commit)
    }

    fn commit(
        &self,
        dir: &Path,
        message: &str,
        date: DateTime<Utc>,
        identity: &Identity,
    ) -> Result<String> {
        crate::git::commit_all(dir, message, date, identity)
    }

    fn tag(&self, dir: &Path, name: &str, commit: &str) -> Result<()> {
        crate::git::tag(dir, name, commit)
    }

    fn push(
        &self,
        dir: &Path,
        commit: &str,
        branch: &str,
        tags: &[String],
        force: bool,
    ) -> Result<()> {
        crate::git::push(dir, commit, branch, tags, force)
    }

    fn ensure_bare(&self, path: &Path) -> Result<()> {
        crate::git::ensure_bare(path)
    }

    fn push_mirror(&self, dir: &Path, url: &str, tag_filter: Option<&Regex>) -> Result<()> {
        crate::git::push_mirror(dir, url, tag_filter)
    }
}

/// Whether a push destination is a path on this machine rather than a URL.
///
/// Local destinations get a bare repository created on demand.
pub fn is_local_destination(url: &str) -> bool {
    !(url.contains("://") || url.contains('@') || (url.contains(':') && !url.starts_with('/')))
}

/// Joins a destination prefix (a directory or an organisation URL) with a
/// repository name.
pub fn destination_url(remote: &str, name: &str) -> String {
    if remote.ends_with(':') {
        format!("{}{}.git", remote, name)
    } else if is_local_destination(remote) {
        format!("{}/{}", remote.trim_end_matches('/'), name)
    } else {
        format!("{}/{}.git", remote.trim_end_matches('/'), name)
    }
}
