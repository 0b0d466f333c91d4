//! # Package Sources
//!
//! Reads the build script of a source package and sorts its declared
//! `source=(...)` entries into three kinds:
//!
//! - **local files** shipped inside the archive, which end up in the synthesized
//!   history;
//! - **remote downloads** (`https://...` and friends), which the original build
//!   fetches by itself and which are ignored here;
//! - **embedded git sources** (`[dir::]git+<url>[#fragment]`), shipped as a
//!   git directory inside the archive. Those hosted on internal infrastructure,
//!   or named by an override rule, are recorded for mirroring.
//!
//! Entries may reference shell variables of the build script (`$pkgname`,
//! `${pkgver}`, `$url`, `$_helper`...). Single line top-level assignments are
//! substituted; an embedded or local entry that still contains a `$` afterwards
//! cannot be interpreted and makes the whole package unusable.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use log::debug;
use regex::Regex;

use crate::archive;
use crate::config::SyncConfig;
use crate::error::{Error, Result};

static ASSIGNMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)=(.*)$").unwrap());
static SOURCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?ms)^[ \t]*source[ \t]*=[ \t]*\((.*?)\)").unwrap());
static VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap()
});

/// A git source shipped inside a package archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedRepo {
    /// Name of the repository it is mirrored as
    pub name: String,
    /// Directory of the git tree, relative to the package directory
    pub subdir: String,
    /// The source entry as written in the build script, after substitution
    pub source: String,
}

/// What a package archive contributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sources {
    pub package_name: String,
    /// Local files declared as sources, relative to the package directory
    pub files: Vec<String>,
    /// Embedded git sources to mirror
    pub repos: Vec<EmbeddedRepo>,
    /// Directories of every embedded git source, mirrored or not
    pub vcs_dirs: Vec<String>,
    pub build_script: String,
}

/// Reads and classifies the sources of a package archive.
///
/// `package_name` is the name derived from the archive's file name; when it is
/// not known the archive's top-level directory is used instead.
pub fn extract_sources(
    archive_path: &Path,
    package_name: Option<&str>,
    config: &SyncConfig,
) -> Result<Sources> {
    let missing = || Error::MissingBuildScript {
        archive: archive_path.display().to_string(),
    };

    let package_name = match package_name {
        Some(name) => name.to_string(),
        None => archive::top_level_dir(archive_path)?.ok_or_else(missing)?,
    };

    let member = format!("{}/{}", package_name, config.build_script);
    let build_script = archive::read_text(archive_path, &member)?.ok_or_else(missing)?;

    parse_sources(&package_name, build_script, config)
}

/// Classifies the `source` entries of a build script.
pub fn parse_sources(package_name: &str, build_script: String, config: &SyncConfig) -> Result<Sources> {
    let vars = parse_variables(package_name, &build_script);

    let mut sources = Sources {
        package_name: package_name.to_string(),
        files: Vec::new(),
        repos: Vec::new(),
        vcs_dirs: Vec::new(),
        build_script: String::new(),
    };

    let entries = SOURCE_RE
        .captures(&build_script)
        .map(|caps| shell_words(&caps[1]))
        .unwrap_or_default();
    if entries.is_empty() {
        debug!("No sources declared by {}", package_name);
    }

    for raw in entries {
        let entry = expand(&raw, &vars);
        let (alias, location) = split_alias(&entry);
        let unresolved = || Error::UnresolvedPlaceholder {
            package: package_name.to_string(),
            entry: entry.clone(),
        };

        if let Some(url) = git_url(location) {
            if url.contains('$') {
                return Err(unresolved());
            }
            let basename = repo_basename(url);
            let subdir = alias.unwrap_or(basename).to_string();
            let (name, overridden) = config.canonical_name(basename);

            sources.vcs_dirs.push(subdir.clone());
            if overridden || config.is_internal(url) {
                sources.repos.push(EmbeddedRepo {
                    name,
                    subdir,
                    source: entry.clone(),
                });
            } else {
                debug!("{}: not mirroring external source {}", package_name, url);
            }
        } else if location.contains("://") {
            continue;
        } else {
            if location.contains('$') {
                return Err(unresolved());
            }
            sources.files.push(location.to_string());
        }
    }

    sources.build_script = build_script;
    Ok(sources)
}

/// Returns the clone URL of a git source location.
fn git_url(location: &str) -> Option<&str> {
    let url = if let Some(rest) = location.strip_prefix("git+") {
        rest
    } else if location.starts_with("git://") {
        location
    } else {
        return None;
    };
    url.split(['#', '?']).next()
}

fn repo_basename(url: &str) -> &str {
    let last = url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(url);
    last.strip_suffix(".git").unwrap_or(last)
}

/// Splits `name::location` entries.
fn split_alias(entry: &str) -> (Option<&str>, &str) {
    match entry.split_once("::") {
        Some((alias, location)) if !alias.is_empty() && !alias.contains(['/', ':']) => {
            (Some(alias), location)
        }
        _ => (None, entry),
    }
}

/// Collects top-level single line assignments, each expanded with the
/// variables defined before it.
fn parse_variables(package_name: &str, script: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("pkgname".to_string(), package_name.to_string());
    vars.insert("pkgbase".to_string(), package_name.to_string());

    for line in script.lines() {
        let Some(caps) = ASSIGNMENT_RE.captures(line) else {
            continue;
        };
        let name = &caps[1];
        if name == "source" {
            continue;
        }
        let raw = caps[2].trim();
        let raw = raw.strip_prefix('(').unwrap_or(raw);
        let Some(value) = shell_words(raw).into_iter().next() else {
            continue;
        };
        let value = value.trim_end_matches(')').to_string();
        let value = expand(&value, &vars);
        vars.insert(name.to_string(), value);
    }
    vars
}

/// Substitutes known `$var` and `${var}` references, leaving unknown ones.
fn expand(text: &str, vars: &HashMap<String, String>) -> String {
    VARIABLE_RE
        .replace_all(text, |caps: &regex::Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            match vars.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Splits shell text into words, honouring quotes, backslash escapes and
/// comments.
fn shell_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '#' if !in_word => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
            }
            '\'' => {
                in_word = true;
                for next in chars.by_ref() {
                    if next == '\'' {
                        break;
                    }
                    current.push(next);
                }
            }
            '"' => {
                in_word = true;
                while let Some(next) = chars.next() {
                    match next {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                if !matches!(escaped, '"' | '\\' | '$' | '`') {
                                    current.push('\\');
                                }
                                current.push(escaped);
                            }
                        }
                        other => current.push(other),
                    }
                }
            }
            '\\' => match chars.next() {
                Some('\n') | None => {}
                Some(escaped) => {
                    in_word = true;
                    current.push(escaped);
                }
            },
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}
