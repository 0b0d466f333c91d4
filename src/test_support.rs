//! Fixtures shared by the unit tests: package and update builders, tar.gz
//! archive writers and a recording `GitOperations` mock.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;

use crate::config::Identity;
use crate::error::{Error, Result};
use crate::git::TagRecord;
use crate::index::Package;
use crate::repository::{GitOperations, Repository};
use crate::timeline::Update;

/// A source package `<name>.src.tar.gz` published at midnight UTC.
pub fn package_at(year: i32, month: u32, day: u32, name: &str) -> Package {
    let file = format!("{}.src.tar.gz", name);
    Package {
        name: file.clone(),
        link: file,
        timestamp: Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap(),
        size: 1024,
    }
}

/// A standalone update (no predecessor) holding the named packages.
pub fn update_at(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    names: &[&str],
) -> Update {
    let date: DateTime<Utc> = Utc
        .with_ymd_and_hms(year, month, day, hour, minute, 0)
        .unwrap();
    let mut packages: Vec<Package> = names
        .iter()
        .map(|name| Package {
            timestamp: date,
            ..package_at(year, month, day, name)
        })
        .collect();
    packages.sort();
    Update {
        date,
        size: packages.iter().map(|p| p.size).sum(),
        packages,
        prev: None,
    }
}

/// A repository named `test` pushing to `./dest`.
pub fn repository(version: &str, packages: Vec<Package>) -> Repository {
    Repository::from_packages("test", version, "./dest", packages).unwrap()
}

/// A member of a test archive
pub enum ArchiveMember {
    File { path: String, content: String },
    Dir { path: String },
    Symlink { path: String, target: String },
}

impl ArchiveMember {
    pub fn file(path: &str, content: &str) -> Self {
        Self::File {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    pub fn dir(path: &str) -> Self {
        Self::Dir {
            path: path.to_string(),
        }
    }

    pub fn symlink(path: &str, target: &str) -> Self {
        Self::Symlink {
            path: path.to_string(),
            target: target.to_string(),
        }
    }
}

// Names are copied raw so that tests can build archives `tar::Builder`
// itself would refuse to write (`..` components).
fn set_raw(field: &mut [u8; 100], value: &str) {
    let bytes = value.as_bytes();
    assert!(bytes.len() < field.len(), "member name too long: {}", value);
    field[..bytes.len()].copy_from_slice(bytes);
}

/// Writes a gzip compressed tar archive holding `members`, in order.
pub fn write_archive(path: &Path, members: &[ArchiveMember]) {
    let file = File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    for member in members {
        let mut header = tar::Header::new_gnu();
        header.set_mtime(1_704_067_200);
        let data: &[u8] = match member {
            ArchiveMember::File { path, content } => {
                set_raw(&mut header.as_old_mut().name, path);
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(0o644);
                content.as_bytes()
            }
            ArchiveMember::Dir { path } => {
                set_raw(&mut header.as_old_mut().name, path);
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                &[]
            }
            ArchiveMember::Symlink { path, target } => {
                set_raw(&mut header.as_old_mut().name, path);
                set_raw(&mut header.as_old_mut().linkname, target);
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_mode(0o777);
                &[]
            }
        };
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append(&header, data).unwrap();
    }

    builder.into_inner().unwrap().finish().unwrap();
}

/// Records every backend call; commits are numbered `commit-1`, `commit-2`...
///
/// `checkout` leaves the working directory untouched, so package directories
/// written by one update are still present for the next.
#[derive(Default)]
pub struct MockGitOperations {
    calls: Mutex<Vec<String>>,
    messages: Mutex<Vec<String>>,
    tags: Mutex<HashMap<String, Vec<TagRecord>>>,
    fail_on: Mutex<Option<String>>,
    commits: AtomicUsize,
}

impl MockGitOperations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `list_tags(reference)` return `records`.
    pub fn add_tags(&self, reference: &str, records: Vec<TagRecord>) {
        self.tags
            .lock()
            .unwrap()
            .insert(reference.to_string(), records);
    }

    /// Makes every call of the named operation fail.
    pub fn fail_on(&self, operation: &str) {
        *self.fail_on.lock().unwrap() = Some(operation.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose description starts with `operation`.
    pub fn calls_to(&self, operation: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.split(' ').next() == Some(operation))
            .collect()
    }

    /// Full messages of every commit, in order.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    fn record(&self, operation: &str, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail_on.lock().unwrap().as_deref() == Some(operation) {
            return Err(Error::GitCommand {
                command: operation.to_string(),
                dir: "/mock".to_string(),
                stderr: "mock failure".to_string(),
            });
        }
        Ok(())
    }
}

impl GitOperations for MockGitOperations {
    fn init(&self, dir: &Path, url: &str) -> Result<()> {
        self.record("init", format!("init {} {}", dir.display(), url))
    }

    fn fetch(&self, dir: &Path) -> Result<()> {
        self.record("fetch", format!("fetch {}", dir.display()))
    }

    fn list_tags(&self, _dir: &Path, reference: &str) -> Result<Vec<TagRecord>> {
        self.record("list_tags", format!("list_tags {}", reference))?;
        Ok(self
            .tags
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or_default())
    }

    fn checkout(&self, _dir: &Path, commit: Option<&str>) -> Result<()> {
        self.record("checkout", format!("checkout {}", commit.unwrap_or("<orphan>")))
    }

    fn commit(
        &self,
        _dir: &Path,
        message: &str,
        date: DateTime<Utc>,
        identity: &Identity,
    ) -> Result<String> {
        self.record(
            "commit",
            format!("commit {} {}", date.to_rfc3339(), identity.name),
        )?;
        self.messages.lock().unwrap().push(message.to_string());
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("commit-{}", n))
    }

    fn tag(&self, _dir: &Path, name: &str, commit: &str) -> Result<()> {
        self.record("tag", format!("tag {} {}", name, commit))
    }

    fn push(
        &self,
        _dir: &Path,
        commit: &str,
        branch: &str,
        tags: &[String],
        force: bool,
    ) -> Result<()> {
        self.record(
            "push",
            format!("push {} {} [{}] force={}", commit, branch, tags.join(","), force),
        )
    }

    fn ensure_bare(&self, path: &Path) -> Result<()> {
        self.record("ensure_bare", format!("ensure_bare {}", path.display()))
    }

    fn push_mirror(&self, dir: &Path, url: &str, tag_filter: Option<&Regex>) -> Result<()> {
        let head = if dir.join("HEAD").is_file() { "HEAD" } else { "-" };
        self.record(
            "push_mirror",
            format!(
                "push_mirror {} {} filter={}",
                url,
                head,
                tag_filter.map_or("-", |f| f.as_str())
            ),
        )
    }
}
