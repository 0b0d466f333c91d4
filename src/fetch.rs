//! # Fetch Pipeline
//!
//! Downloads the package archives a run needs, on a fixed number of worker
//! threads pulling from one shared queue.
//!
//! The pipeline is all-or-abort: the first failing download raises a shared
//! cancellation flag. Workers check it before taking a job, after taking one
//! and after every download, so no new download starts once it is set while
//! downloads already in flight are allowed to finish. The caller gets a single
//! aggregate [`Error::Download`].
//!
//! Every download goes to `<dest>.part` first and is renamed into place once
//! complete. Files already present are skipped, which makes a failed run
//! cheap to retry: only what is still missing is downloaded again.

use std::collections::{BTreeMap, VecDeque};
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::index;
use crate::timeline::Update;

/// Downloads a URL to a local file
pub trait Fetcher: Send + Sync {
    /// Writes the body of `url` to `dest`, failing on any non-success status.
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// `Fetcher` over HTTP(S), using a blocking `reqwest` client.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("evlav/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network {
                url: String::new(),
                message: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let network = |e: reqwest::Error| Error::Network {
            url: url.to_string(),
            message: e.to_string(),
        };

        let mut response = self.client.get(url).send().map_err(network)?;
        if !response.status().is_success() {
            return Err(Error::Network {
                url: url.to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let mut file = File::create(dest)?;
        response.copy_to(&mut file).map_err(network)?;
        Ok(())
    }
}

/// Outcome of a successful pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub downloaded: usize,
    /// Destinations that already existed
    pub skipped: usize,
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Downloads `url` to `dest` through a temporary `.part` file.
///
/// `dest` only ever appears complete; a failed download leaves nothing behind.
pub fn download(fetcher: &dyn Fetcher, url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = partial_path(dest);

    if let Err(e) = fetcher.fetch(url, &partial) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    fs::rename(&partial, dest)?;
    debug!("Downloaded {} to {}", url, dest.display());
    Ok(())
}

/// Maps every package of `updates` to a download job into `package_dir`.
///
/// Package links are resolved against `index_url`, the listing they came
/// from.
pub fn plan_jobs<'a>(
    index_url: &str,
    package_dir: &Path,
    updates: impl IntoIterator<Item = &'a Update>,
) -> Result<BTreeMap<PathBuf, String>> {
    let mut jobs = BTreeMap::new();
    for update in updates {
        for package in &update.packages {
            jobs.insert(
                package_dir.join(&package.name),
                index::package_url(index_url, &package.link)?,
            );
        }
    }
    Ok(jobs)
}

struct Shared<'a> {
    fetcher: &'a dyn Fetcher,
    queue: Mutex<VecDeque<(PathBuf, String)>>,
    cancelled: AtomicBool,
    downloaded: AtomicUsize,
    failures: Mutex<Vec<(String, Error)>>,
    progress: ProgressBar,
}

impl Shared<'_> {
    fn fail(&self, url: String, error: Error) {
        warn!("Download of {} failed: {}", url, error);
        self.cancelled.store(true, Ordering::SeqCst);
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((url, error));
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn work(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let job = self
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some((dest, url)) = job else {
                return;
            };
            if self.is_cancelled() {
                return;
            }

            match download(self.fetcher, &url, &dest) {
                Ok(()) => {
                    self.downloaded.fetch_add(1, Ordering::SeqCst);
                    self.progress.inc(1);
                }
                Err(e) => {
                    self.fail(url, e);
                    return;
                }
            }
        }
    }
}

fn progress_bar(total: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_message("packages");
    bar
}

/// Downloads every job not yet present on disk with `workers` threads.
///
/// Returns once the queue is drained, or once every worker has observed a
/// cancellation; in that case the error names how many downloads failed and
/// the first one that did.
pub fn fetch_all(
    fetcher: &dyn Fetcher,
    jobs: BTreeMap<PathBuf, String>,
    workers: usize,
    show_progress: bool,
) -> Result<FetchReport> {
    let mut report = FetchReport::default();
    let mut queue = VecDeque::new();
    for (dest, url) in jobs {
        if dest.exists() {
            report.skipped += 1;
        } else {
            queue.push_back((dest, url));
        }
    }
    if queue.is_empty() {
        debug!("Nothing to download, {} file(s) already present", report.skipped);
        return Ok(report);
    }

    let total = queue.len();
    let workers = workers.clamp(1, total);
    info!(
        "Downloading {} package(s) with {} worker(s), {} already present",
        total, workers, report.skipped
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("evlav-fetch-{}", i))
        .build()
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

    let shared = Shared {
        fetcher,
        queue: Mutex::new(queue),
        cancelled: AtomicBool::new(false),
        downloaded: AtomicUsize::new(0),
        failures: Mutex::new(Vec::new()),
        progress: progress_bar(total, show_progress),
    };

    pool.scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|_| shared.work());
        }
    });
    shared.progress.finish_and_clear();

    report.downloaded = shared.downloaded.load(Ordering::SeqCst);
    let cancelled = shared.is_cancelled();
    let failures = shared
        .failures
        .into_inner()
        .map_err(|_| Error::LockPoisoned {
            context: "fetch failures".to_string(),
        })?;

    if cancelled {
        let failed = failures.len();
        let (first_url, message) = failures
            .into_iter()
            .next()
            .map(|(url, e)| (url, e.to_string()))
            .unwrap_or_default();
        return Err(Error::Download {
            failed,
            first_url,
            message,
        });
    }

    Ok(report)
}
