//! # Mirror Index
//!
//! Package records and the parser for the mirror's HTML file listing.
//!
//! The mirror publishes one directory listing per `(repository, version)`.
//! Each row of its listing table names a source package archive, links to it,
//! and carries the publication date and a human readable size. Rows missing a
//! name, link or parsable date are dropped, as are names that are not source
//! archives.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::error::Result;

/// Suffix of the archives kept from an index listing.
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Date format of the listing's date column.
const DATE_FORMAT: &str = "%Y-%b-%d %H:%M";

/// Table ids under which mirrors publish their listing.
const TABLE_IDS: [&str; 3] = ["index", "index-table", "list"];

static TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<table\b([^>]*)>(.*?)</table>").unwrap());
static ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").unwrap());
static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<a\b([^>]*)>").unwrap());
static CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<td\b([^>]*)>(.*?)</td>").unwrap());
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z][a-z0-9_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).unwrap()
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

/// A single source package archive published by the mirror
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Package {
    /// Archive file name, e.g. `jupiter-3.7.0-1.src.tar.gz`
    pub name: String,
    /// Link to the archive, relative to the index page
    pub link: String,
    pub timestamp: DateTime<Utc>,
    /// Size in bytes as advertised by the listing
    pub size: u64,
}

impl Package {
    /// Derives the package name from the archive file name.
    ///
    /// Archives are named `<name>-<version>-<release>.src.tar.gz`, so the
    /// last two dash separated segments are dropped.
    pub fn pkgname(&self) -> Option<&str> {
        let mut name = self.name.as_str();
        for _ in 0..2 {
            let idx = name.rfind('-')?;
            name = &name[..idx];
        }
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

/// Returns the listing URL of a repository version.
///
/// The trunk version `main` lives directly under the repository name, every
/// other version under `<repo>-<version>`.
pub fn index_url(sources: &str, repo: &str, version: &str) -> String {
    let base = sources.trim_end_matches('/');
    if version == "main" {
        format!("{}/{}/", base, repo)
    } else {
        format!("{}/{}-{}/", base, repo, version)
    }
}

/// Resolves a package link against the listing it was found in.
pub fn package_url(index_url: &str, link: &str) -> Result<String> {
    let base = url::Url::parse(index_url)?;
    Ok(base.join(link)?.to_string())
}

/// Parses the packages out of an index listing.
///
/// Returns an empty list when the document holds no listing table; the caller
/// decides whether that is fatal.
pub fn parse_index(html: &str) -> Vec<Package> {
    let mut packages = Vec::new();
    let mut seen = HashSet::new();

    for table in TABLE_RE.captures_iter(html) {
        let is_listing = attr(&table[1], "id")
            .map(|id| TABLE_IDS.contains(&id.as_str()))
            .unwrap_or(false);
        if !is_listing {
            continue;
        }

        for row in ROW_RE.captures_iter(&table[2]) {
            let Some(package) = parse_row(&row[1]) else {
                continue;
            };
            if seen.insert(package.name.clone()) {
                packages.push(package);
            }
        }
    }

    packages
}

fn parse_row(row: &str) -> Option<Package> {
    let anchor = ANCHOR_RE.captures(row)?;
    let link = attr(&anchor[1], "href")?;
    let name = attr(&anchor[1], "title")?;
    if !name.ends_with(ARCHIVE_SUFFIX) || !is_file_name(&name) {
        return None;
    }

    let mut timestamp = None;
    let mut size = None;
    for cell in CELL_RE.captures_iter(row) {
        let text = cell_text(&cell[2]);
        match attr(&cell[1], "class").as_deref() {
            Some("date") => timestamp = parse_date(&text),
            Some("size") => size = parse_size(&text),
            _ => {}
        }
    }

    Some(Package {
        name,
        link,
        timestamp: timestamp?,
        size: size.unwrap_or(0),
    })
}

/// Whether `name` is a single path component, safe to join onto the
/// package cache.
fn is_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Parses a listing size such as `12.5 KiB` or `3 M` into bytes.
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let split = text
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(text.len());
    let (num, unit) = text.split_at(split);
    let num: f64 = num.trim().parse().ok()?;
    let factor = match unit.trim().chars().next() {
        None | Some('B') | Some('b') => 1.0,
        Some('K') | Some('k') => 1024.0,
        Some('M') => 1024.0 * 1024.0,
        Some('G') => 1024.0 * 1024.0 * 1024.0,
        Some(_) => return None,
    };
    Some((num * factor) as u64)
}

/// Parses a listing date, interpreted as UTC.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text.trim(), DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn attr(attrs: &str, name: &str) -> Option<String> {
    ATTR_RE.captures_iter(attrs).find_map(|caps| {
        if !caps[1].eq_ignore_ascii_case(name) {
            return None;
        }
        caps.get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| decode_entities(m.as_str()))
    })
}

fn cell_text(html: &str) -> String {
    decode_entities(TAG_RE.replace_all(html, "").trim())
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
