//! # Sync Orchestration
//!
//! One run synchronises one destination repository across several versions.
//! The first version is the trunk; every other version is a branch that may
//! share its oldest history with the trunk.
//!
//! A run goes through these steps:
//!
//! 1. fetch (or reuse) the index listing of every version and build its update
//!    chain; versions without packages are skipped;
//! 2. prepare the scratch checkout of the destination and, when resuming,
//!    discover the existing checkpoints from its tags;
//! 3. plan every branch, trunk first, so that the archives of all planned
//!    updates can be downloaded in one pass of the fetch pipeline;
//! 4. materialize each branch in turn, planning it again against the live
//!    checkpoint store so branches fork from the trunk commits just created;
//! 5. with `push_all`, mirror the embedded sources of the latest update of
//!    every version once more.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::checkpoint::{tag_name, CheckpointStore};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::fetch::{self, FetchReport, Fetcher};
use crate::index::{self, Package};
use crate::materialize::{MaterializeReport, Materializer};
use crate::mirror::MirrorPusher;
use crate::planner::{self, TodoItem};
use crate::repository::{destination_url, is_local_destination, GitOperations, Repository};
use crate::sources;

/// Default location of the mirror's source package listings.
pub const DEFAULT_SOURCES: &str =
    "https://steamdeck-packages.steamos.cloud/archlinux-mirror/sources";

/// Default versions, trunk first.
pub const DEFAULT_VERSIONS: [&str; 5] = ["main", "3.3.3", "3.5", "3.6", "3.7"];

/// Commit id recorded for checkpoints a dry run only plans to create.
pub const PENDING: &str = "(pending)";

/// Parameters of a run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Destination repository, e.g. `jupiter` or `holo`
    pub repo: String,
    /// Base URL of the index listings
    pub sources: String,
    /// Versions to synchronise; the first one is the trunk
    pub versions: Vec<String>,
    pub cache: PathBuf,
    /// Destination prefix: a directory or a remote organisation
    pub remote: String,
    /// Reuse cached index listings instead of refreshing them
    pub skip_existing: bool,
    /// Rebuild the history from scratch instead of resuming
    pub restart: bool,
    /// Mirror the embedded sources of every latest update
    pub push_all: bool,
    pub show_progress: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            repo: "holo".to_string(),
            sources: DEFAULT_SOURCES.to_string(),
            versions: DEFAULT_VERSIONS.iter().map(|v| v.to_string()).collect(),
            cache: PathBuf::from("./cache"),
            remote: "./repositories".to_string(),
            skip_existing: false,
            restart: false,
            push_all: false,
            show_progress: true,
        }
    }
}

/// The work planned for one version
#[derive(Debug)]
pub struct BranchPlan {
    pub repo: Repository,
    pub todo: Vec<TodoItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchReport {
    pub version: String,
    pub planned: usize,
    pub result: MaterializeReport,
}

/// What a run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub fetched: FetchReport,
    pub branches: Vec<BranchReport>,
    /// Embedded sources mirrored by the `push_all` pass
    pub mirrored_latest: usize,
}

/// Runs synchronisations of one destination repository
pub struct Syncer<'a> {
    options: SyncOptions,
    config: SyncConfig,
    git: &'a dyn GitOperations,
    fetcher: &'a dyn Fetcher,
}

impl<'a> Syncer<'a> {
    pub fn new(
        options: SyncOptions,
        config: SyncConfig,
        git: &'a dyn GitOperations,
        fetcher: &'a dyn Fetcher,
    ) -> Self {
        Self {
            options,
            config,
            git,
            fetcher,
        }
    }

    fn package_dir(&self) -> PathBuf {
        self.options.cache.join("packages")
    }

    fn workdir(&self) -> PathBuf {
        self.options.cache.join("work").join(&self.options.repo)
    }

    fn index_url(&self, version: &str) -> String {
        index::index_url(&self.options.sources, &self.options.repo, version)
    }

    /// Push URL of the destination repository; local paths are made absolute
    /// since git runs from inside the scratch checkout.
    fn destination(&self) -> Result<String> {
        let url = destination_url(&self.options.remote, &self.options.repo);
        if is_local_destination(&url) {
            Ok(std::path::absolute(&url)?.display().to_string())
        } else {
            Ok(url)
        }
    }

    fn trunk<'r>(&self, repos: &'r [Repository]) -> Option<&'r Repository> {
        repos
            .first()
            .filter(|repo| self.options.versions.first() == Some(&repo.version))
    }

    fn load_index(&self, version: &str) -> Result<Vec<Package>> {
        let url = self.index_url(version);
        let path = self
            .options
            .cache
            .join("index")
            .join(format!("{}-{}.html", self.options.repo, version));

        if self.options.skip_existing && path.is_file() {
            debug!("Using cached index {}", path.display());
        } else {
            info!("Fetching index {}", url);
            fetch::download(self.fetcher, &url, &path)?;
        }

        let html = fs::read_to_string(&path)?;
        Ok(index::parse_index(&html))
    }

    /// Builds the repository of every version, in the configured order.
    ///
    /// Versions whose index has no packages are logged and left out.
    pub fn load_repositories(&self) -> Result<Vec<Repository>> {
        let url = self.destination()?;
        let mut repos = Vec::new();

        for version in &self.options.versions {
            let packages = self.load_index(version)?;
            match Repository::from_packages(&self.options.repo, version, &url, packages) {
                Ok(repo) => {
                    info!(
                        "{} ({}): {} update(s)",
                        repo.name,
                        repo.version,
                        repo.latest.depth()
                    );
                    repos.push(repo);
                }
                Err(e @ Error::EmptyIndex { .. }) => {
                    error!("{}, skipping", e);
                }
                Err(e) => return Err(e),
            }
        }

        if self.trunk(&repos).is_none() && !repos.is_empty() {
            warn!("Trunk version has no packages, branches will not share history");
        }
        Ok(repos)
    }

    /// Prepares the scratch checkout of the destination and returns its path.
    fn open_workdir(&self, url: &str) -> Result<PathBuf> {
        let dir = self.workdir();
        fs::create_dir_all(&dir)?;
        if is_local_destination(url) {
            self.git.ensure_bare(Path::new(url))?;
        }
        self.git.init(&dir, url)?;
        if !self.options.restart {
            self.git.fetch(&dir)?;
        }
        Ok(dir)
    }

    fn load_checkpoints(&self, workdir: &Path, repos: &[Repository]) -> Result<CheckpointStore> {
        if self.options.restart {
            info!("Restarting, existing checkpoints are ignored");
            return Ok(CheckpointStore::new());
        }
        let versions: Vec<String> = repos.iter().map(|r| r.version.clone()).collect();
        let store = CheckpointStore::load(self.git, workdir, &versions)?;
        info!("Found {} existing checkpoint(s)", store.len());
        Ok(store)
    }

    /// Plans every repository, trunk first, as a run would execute them.
    ///
    /// Checkpoints planned for earlier repositories are assumed to exist when
    /// planning later ones.
    fn plan_branches(
        &self,
        repos: &[Repository],
        store: &CheckpointStore,
    ) -> Result<Vec<Vec<TodoItem>>> {
        let trunk = self.trunk(repos);
        let mut simulated = store.clone();
        let mut plans = Vec::with_capacity(repos.len());

        for repo in repos {
            let fork_from = trunk.filter(|t| t.version != repo.version);
            let todo = planner::plan(repo, &simulated, fork_from);
            planner::ensure_resumable(repo, &todo, !self.options.restart)?;
            for item in &todo {
                simulated.insert(tag_name(&repo.version, &item.update), PENDING.to_string());
            }
            plans.push(todo);
        }
        Ok(plans)
    }

    /// Computes the work plan of every version without downloading archives
    /// or creating commits.
    pub fn plan(&self) -> Result<Vec<BranchPlan>> {
        let repos = self.load_repositories()?;
        if repos.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.destination()?;
        let workdir = self.open_workdir(&url)?;
        let store = self.load_checkpoints(&workdir, &repos)?;
        let plans = self.plan_branches(&repos, &store)?;

        Ok(repos
            .into_iter()
            .zip(plans)
            .map(|(repo, todo)| BranchPlan { repo, todo })
            .collect())
    }

    /// Runs a full synchronisation.
    pub fn run(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let repos = self.load_repositories()?;
        if repos.is_empty() {
            warn!("No version of {} has packages, nothing to do", self.options.repo);
            return Ok(report);
        }

        let url = self.destination()?;
        let workdir = self.open_workdir(&url)?;
        let mut store = self.load_checkpoints(&workdir, &repos)?;
        let plans = self.plan_branches(&repos, &store)?;

        let package_dir = self.package_dir();
        let mut jobs = BTreeMap::new();
        for (repo, todo) in repos.iter().zip(&plans) {
            let index_url = self.index_url(&repo.version);
            jobs.extend(fetch::plan_jobs(
                &index_url,
                &package_dir,
                todo.iter().map(|item| item.update.as_ref()),
            )?);
            if self.options.push_all {
                jobs.extend(fetch::plan_jobs(
                    &index_url,
                    &package_dir,
                    [repo.latest.as_ref()],
                )?);
            }
        }
        report.fetched = fetch::fetch_all(
            self.fetcher,
            jobs,
            self.config.workers,
            self.options.show_progress,
        )?;

        let mirror = MirrorPusher::new(
            self.git,
            &self.config,
            &self.options.remote,
            &self.options.cache.join("mirror"),
        );
        let materializer = Materializer::new(
            self.git,
            &self.config,
            &workdir,
            &package_dir,
            &mirror,
            !self.options.restart,
        );

        let trunk = self.trunk(&repos);
        for repo in &repos {
            let fork_from = trunk.filter(|t| t.version != repo.version);
            let todo = planner::plan(repo, &store, fork_from);
            if todo.is_empty() {
                info!("{} ({}) is up to date", repo.name, repo.version);
            } else {
                info!(
                    "{} ({}): materializing {} update(s)",
                    repo.name,
                    repo.version,
                    todo.len()
                );
            }
            let result = materializer.run(repo, &todo, &mut store)?;
            report.branches.push(BranchReport {
                version: repo.version.clone(),
                planned: todo.len(),
                result,
            });
        }

        if self.options.push_all {
            report.mirrored_latest = self.push_latest(&repos, &mirror)?;
        }
        Ok(report)
    }

    /// Mirrors the embedded sources of the latest update of every version.
    fn push_latest(&self, repos: &[Repository], mirror: &MirrorPusher<'_>) -> Result<usize> {
        let package_dir = self.package_dir();
        let mut seen = HashSet::new();
        let mut mirrored = 0;

        for repo in repos {
            for package in &repo.latest.packages {
                if !seen.insert(package.name.clone()) {
                    continue;
                }
                let archive = package_dir.join(&package.name);
                let sources =
                    match sources::extract_sources(&archive, package.pkgname(), &self.config) {
                        Ok(sources) => sources,
                        Err(e) if e.is_package_local() => {
                            warn!("Skipping package {}: {}", package.name, e);
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                for embedded in &sources.repos {
                    if mirror.push(&archive, &sources.package_name, embedded)? {
                        mirrored += 1;
                    }
                }
            }
        }

        info!("Mirrored {} embedded source(s) of the latest updates", mirrored);
        Ok(mirrored)
    }
}
