//! # Mirror Pusher
//!
//! Publishes the git sources embedded in package archives as repositories of
//! their own. Each source is extracted into a disposable directory, pushed to
//! `<remote>/<canonical name>` (all branches, then tags) and removed again.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::archive;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::repository::{destination_url, is_local_destination, GitOperations};
use crate::sources::EmbeddedRepo;

pub struct MirrorPusher<'a> {
    git: &'a dyn GitOperations,
    config: &'a SyncConfig,
    remote: String,
    scratch: PathBuf,
}

impl<'a> MirrorPusher<'a> {
    /// `remote` is the destination prefix shared with the synthesized
    /// repositories; `scratch` holds the disposable extraction directories.
    pub fn new(
        git: &'a dyn GitOperations,
        config: &'a SyncConfig,
        remote: &str,
        scratch: &Path,
    ) -> Self {
        Self {
            git,
            config,
            remote: remote.to_string(),
            scratch: scratch.to_path_buf(),
        }
    }

    /// Returns the push URL of a mirrored repository, creating a bare
    /// repository for local destinations.
    fn prepare_destination(&self, name: &str) -> Result<String> {
        let url = destination_url(&self.remote, name);
        if !is_local_destination(&url) {
            return Ok(url);
        }
        let path = std::path::absolute(&url)?;
        self.git.ensure_bare(&path)?;
        Ok(path.display().to_string())
    }

    /// Mirrors one embedded source of the package `package_name` stored in
    /// `archive`.
    ///
    /// Returns `false` when the archive does not contain the source's
    /// directory. Every other failure is returned.
    pub fn push(&self, archive: &Path, package_name: &str, repo: &EmbeddedRepo) -> Result<bool> {
        fs::create_dir_all(&self.scratch)?;
        let work = tempfile::Builder::new()
            .prefix(&format!("{}-", repo.name))
            .tempdir_in(&self.scratch)?;

        let prefix = format!("{}/{}", package_name, repo.subdir);
        let written = archive::extract_subtree(archive, &prefix, work.path())?;
        if written == 0 {
            warn!(
                "{}: embedded source {} has no directory {} in {}",
                package_name,
                repo.source,
                repo.subdir,
                archive.display()
            );
            work.close()?;
            return Ok(false);
        }

        let url = self.prepare_destination(&repo.name)?;
        let tag_filter = self.config.tag_filter_for(&repo.name)?;
        if let Some(filter) = &tag_filter {
            info!(
                "Mirroring {} to {} (tags matching '{}')",
                repo.name,
                url,
                filter.as_str()
            );
        } else {
            info!("Mirroring {} to {}", repo.name, url);
        }

        self.git.push_mirror(work.path(), &url, tag_filter.as_ref())?;
        work.close()?;
        Ok(true)
    }
}
