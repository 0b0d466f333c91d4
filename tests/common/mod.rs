//! Shared test utilities for integration and E2E tests.
//!
//! Add `mod common;` to a test file, then use the helpers:
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let fixture = TestFixture::new().with_config(configs::MINIMAL);
//!     // ... test code
//! }
//! ```

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_fs::prelude::*;
use flate2::write::GzEncoder;
use flate2::Compression;

use evlav::error::{Error, Result};
use evlav::fetch::Fetcher;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::configs;
    pub use super::TestFixture;
}

/// Configuration YAML snippets for testing.
pub mod configs {
    /// Overrides a couple of settings, keeps the rest at their defaults.
    pub const MINIMAL: &str = r#"
list_cap: 3
push_every: 10
"#;

    /// Invalid YAML for error testing.
    pub const INVALID_YAML: &str = "invalid: yaml: content:";

    /// Well-formed YAML with a tag filter that is not a valid regex.
    pub const INVALID_TAG_FILTER: &str = r#"
tag_filters:
  linux-neptune: "(unclosed"
"#;
}

/// A temporary working directory with an optional configuration file.
pub struct TestFixture {
    pub temp: assert_fs::TempDir,
    config: Option<PathBuf>,
}

impl TestFixture {
    pub fn new() -> Self {
        Self {
            temp: assert_fs::TempDir::new().unwrap(),
            config: None,
        }
    }

    /// Writes `content` as `config.yaml` in the fixture directory.
    pub fn with_config(mut self, content: &str) -> Self {
        let file = self.temp.child("config.yaml");
        file.write_str(content).unwrap();
        self.config = Some(file.path().to_path_buf());
        self
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn config_path(&self) -> &Path {
        self.config
            .as_deref()
            .expect("fixture has no configuration file")
    }
}

/// Renders an index listing in the mirror's table layout.
pub fn listing(rows: &[(&str, &str)]) -> String {
    let mut html = String::from(
        "<html><body><table id=\"list\"><thead><tr><th>File Name</th><th>File Size</th><th>Date</th></tr></thead><tbody>\n",
    );
    for (name, date) in rows {
        html.push_str(&format!(
            "<tr><td class=\"link\"><a href=\"{0}\" title=\"{0}\">{0}</a></td><td class=\"size\">2.0 KiB</td><td class=\"date\">{1}</td></tr>\n",
            name, date
        ));
    }
    html.push_str("</tbody></table></body></html>\n");
    html
}

/// Builds a `.src.tar.gz` package archive.
pub struct PackageArchive {
    pkgname: String,
    files: Vec<(String, Vec<u8>)>,
    trees: Vec<(String, PathBuf)>,
}

impl PackageArchive {
    /// Starts an archive holding `<pkgname>/PKGBUILD`.
    pub fn new(pkgname: &str, build_script: &str) -> Self {
        Self {
            pkgname: pkgname.to_string(),
            files: vec![("PKGBUILD".to_string(), build_script.as_bytes().to_vec())],
            trees: Vec::new(),
        }
    }

    /// Adds a file, relative to the package directory.
    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.files.push((path.to_string(), content.as_bytes().to_vec()));
        self
    }

    /// Adds the directory `source` recursively as `path`.
    pub fn tree(mut self, path: &str, source: &Path) -> Self {
        self.trees.push((path.to_string(), source.to_path_buf()));
        self
    }

    pub fn write(&self, dest: &Path) {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let encoder = GzEncoder::new(fs::File::create(dest).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for (path, content) in &self.files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_cksum();
            builder
                .append_data(
                    &mut header,
                    format!("{}/{}", self.pkgname, path),
                    content.as_slice(),
                )
                .unwrap();
        }
        for (path, source) in &self.trees {
            builder
                .append_dir_all(format!("{}/{}", self.pkgname, path), source)
                .unwrap();
        }

        builder.into_inner().unwrap().finish().unwrap();
    }
}

/// Serves files of a local directory in place of the mirror.
///
/// `<base>/<path>` maps to `<root>/<path>`; a path ending in `/` maps to its
/// `index.html`.
pub struct LocalMirror {
    base: String,
    root: PathBuf,
}

impl LocalMirror {
    pub fn new(base: &str, root: &Path) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            root: root.to_path_buf(),
        }
    }

    /// Local path serving `<base>/<relative>`.
    pub fn path_of(&self, relative: &str) -> PathBuf {
        let mut path = self.root.join(relative);
        if relative.ends_with('/') || relative.is_empty() {
            path = path.join("index.html");
        }
        path
    }

    /// Publishes an index listing for `directory` (e.g. `jupiter-3.7`).
    pub fn publish_listing(&self, directory: &str, rows: &[(&str, &str)]) {
        let path = self.path_of(&format!("{}/", directory));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, listing(rows)).unwrap();
    }

    /// Publishes a package archive under `directory`.
    pub fn publish_archive(&self, directory: &str, file: &str, archive: &PackageArchive) {
        archive.write(&self.path_of(&format!("{}/{}", directory, file)));
    }

    pub fn remove(&self, relative: &str) {
        fs::remove_file(self.path_of(relative)).unwrap();
    }

    fn resolve(&self, url: &str) -> Option<PathBuf> {
        let relative = url.strip_prefix(&self.base)?.trim_start_matches('/');
        Some(self.path_of(relative))
    }
}

impl Fetcher for LocalMirror {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let not_found = || Error::Network {
            url: url.to_string(),
            message: "HTTP status 404 Not Found".to_string(),
        };
        let source = self.resolve(url).ok_or_else(not_found)?;
        if !source.is_file() {
            return Err(not_found());
        }
        fs::copy(&source, dest)?;
        Ok(())
    }
}

/// Runs `git` in `dir` and returns its trimmed stdout, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .env("GIT_AUTHOR_NAME", "fixture")
        .env("GIT_AUTHOR_EMAIL", "fixture@localhost")
        .env("GIT_COMMITTER_NAME", "fixture")
        .env("GIT_COMMITTER_EMAIL", "fixture@localhost")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Lines of `git` output, empty lines dropped.
pub fn git_lines(dir: &Path, args: &[&str]) -> Vec<String> {
    git(dir, args)
        .lines()
        .map(str::to_string)
        .filter(|l| !l.is_empty())
        .collect()
}
