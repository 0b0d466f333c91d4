//! # Materializer
//!
//! Turns a work plan into commits. For each planned update, oldest first:
//!
//! 1. check out the commit of its start checkpoint, or an empty parentless
//!    tree when it has none;
//! 2. rewrite the directory of every package of the update from its archive,
//!    deleting the previous contents first so the tree converges to exactly
//!    what was uploaded;
//! 3. mirror the embedded git sources the packages declare;
//! 4. commit with the update's date, tag the commit with the update's
//!    checkpoint name and record it in the checkpoint store;
//! 5. every `push_every` updates, and after the last one, push the branch with
//!    the tags created since the previous push.
//!
//! Packages whose archive cannot be interpreted are skipped with a warning;
//! any other failure aborts the run, leaving the failed update untagged so the
//! next run picks it up again.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::archive;
use crate::checkpoint::{tag_name, CheckpointStore};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::index::Package;
use crate::mirror::MirrorPusher;
use crate::planner::{self, TodoItem};
use crate::repository::{GitOperations, Repository};
use crate::sources;
use crate::timeline::Update;

/// What a materialization run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    pub commits: usize,
    pub pushes: usize,
    /// Embedded sources mirrored
    pub mirrored: usize,
    /// Packages skipped because their archive could not be interpreted
    pub skipped_packages: usize,
}

/// Packages an update added and updated, by name
#[derive(Debug, Default)]
struct Changes {
    added: Vec<String>,
    updated: Vec<String>,
}

pub struct Materializer<'a> {
    git: &'a dyn GitOperations,
    config: &'a SyncConfig,
    workdir: PathBuf,
    package_dir: PathBuf,
    mirror: &'a MirrorPusher<'a>,
    resume: bool,
}

impl<'a> Materializer<'a> {
    /// `workdir` is the scratch checkout of the destination repository and
    /// `package_dir` holds the downloaded archives. Branch pushes are forced
    /// unless `resume` is set.
    pub fn new(
        git: &'a dyn GitOperations,
        config: &'a SyncConfig,
        workdir: &Path,
        package_dir: &Path,
        mirror: &'a MirrorPusher<'a>,
        resume: bool,
    ) -> Self {
        Self {
            git,
            config,
            workdir: workdir.to_path_buf(),
            package_dir: package_dir.to_path_buf(),
            mirror,
            resume,
        }
    }

    /// Materializes `plan` on the branch of `repo`, registering every new
    /// checkpoint in `store`.
    pub fn run(
        &self,
        repo: &Repository,
        plan: &[TodoItem],
        store: &mut CheckpointStore,
    ) -> Result<MaterializeReport> {
        planner::ensure_resumable(repo, plan, self.resume)?;

        let mut report = MaterializeReport::default();
        let mut pending_tags: Vec<String> = Vec::new();

        for (index, item) in plan.iter().enumerate() {
            let start = match &item.start {
                Some(tag) => Some(
                    store
                        .get(tag)
                        .ok_or_else(|| Error::MissingCheckpoint { tag: tag.clone() })?
                        .to_string(),
                ),
                None => None,
            };
            self.git.checkout(&self.workdir, start.as_deref())?;

            let changes = self.apply_update(&item.update, &mut report)?;
            let message = commit_message(
                &repo.version,
                &item.update,
                &changes.added,
                &changes.updated,
                self.config.list_cap,
            );
            let commit =
                self.git
                    .commit(&self.workdir, &message, item.update.date, &self.config.author)?;

            let tag = tag_name(&repo.version, &item.update);
            self.git.tag(&self.workdir, &tag, &commit)?;
            store.insert(tag.clone(), commit.clone());
            report.commits += 1;
            info!(
                "[{}/{}] {} {}",
                index + 1,
                plan.len(),
                tag,
                message.lines().next().unwrap_or_default()
            );

            pending_tags.push(tag);
            let last = index + 1 == plan.len();
            if last || pending_tags.len() >= self.config.push_every {
                info!(
                    "Pushing {} ({} new tag(s)) to {}",
                    repo.version,
                    pending_tags.len(),
                    repo.url
                );
                self.git.push(
                    &self.workdir,
                    &commit,
                    &repo.version,
                    &pending_tags,
                    !self.resume,
                )?;
                pending_tags.clear();
                report.pushes += 1;
            }
        }

        Ok(report)
    }

    fn apply_update(&self, update: &Update, report: &mut MaterializeReport) -> Result<Changes> {
        let mut changes = Changes::default();
        for package in &update.packages {
            match self.apply_package(package) {
                Ok((name, added, mirrored)) => {
                    report.mirrored += mirrored;
                    if added {
                        changes.added.push(name);
                    } else {
                        changes.updated.push(name);
                    }
                }
                Err(e) if e.is_package_local() => {
                    warn!("Skipping package {}: {}", package.name, e);
                    report.skipped_packages += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(changes)
    }

    /// Rewrites one package directory. Returns the package name, whether the
    /// directory is new and how many embedded sources were mirrored.
    fn apply_package(&self, package: &Package) -> Result<(String, bool, usize)> {
        let archive_path = self.package_dir.join(&package.name);
        let sources = sources::extract_sources(&archive_path, package.pkgname(), self.config)?;
        let name = sources.package_name.clone();

        let target = self.workdir.join(&name);
        let added = !target.exists();
        if !added {
            fs::remove_dir_all(&target)?;
        }
        let written = archive::extract_package(&archive_path, &name, &target, &sources.vcs_dirs)?;
        debug!("{}: wrote {} member(s)", name, written);

        for file in &sources.files {
            if !target.join(file).exists() {
                warn!("{}: source file {} is missing from the archive", name, file);
            }
        }

        let mut mirrored = 0;
        for repo in &sources.repos {
            if self.mirror.push(&archive_path, &name, repo)? {
                mirrored += 1;
            }
        }

        Ok((name, added, mirrored))
    }
}

fn name_list(names: &[String], cap: usize) -> String {
    if !names.is_empty() && names.len() <= cap {
        names.join(", ")
    } else {
        format!("{} packages", names.len())
    }
}

/// Builds the commit message of an update.
///
/// The subject reads `<version>: add <names>, update <names>`, falling back to
/// a package count when more than `list_cap` names would be listed. The body
/// lists every archive of the update with its size.
pub fn commit_message(
    version: &str,
    update: &Update,
    added: &[String],
    updated: &[String],
    list_cap: usize,
) -> String {
    let mut parts = Vec::new();
    if !added.is_empty() {
        parts.push(format!("add {}", name_list(added, list_cap)));
    }
    if !updated.is_empty() || parts.is_empty() {
        parts.push(format!("update {}", name_list(updated, list_cap)));
    }

    let mut message = format!("{}: {}\n\n", version, parts.join(", "));
    for package in &update.packages {
        message.push_str(&format!("- {} ({})\n", package.name, format_size(package.size)));
    }
    message
}

/// Formats a byte count with binary units.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KiB", "MiB", "GiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
