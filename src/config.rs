//! # Sync Configuration
//!
//! This module defines `SyncConfig`, the tunable knobs of a synchronisation
//! run, and the logic for loading it from an optional YAML file. Every key is
//! optional; anything left out falls back to the built-in defaults, so an
//! empty file (or no file at all) is a valid configuration.
//!
//! ## Example
//!
//! ```yaml
//! internal_origin: git@gitlab.internal.steamos.cloud
//! name_overrides:
//!   linux-integration: linux-neptune
//! tag_filters:
//!   linux-neptune: "-valve"
//! list_cap: 5
//! push_every: 50
//! workers: 8
//! author:
//!   name: evlav
//!   email: evlav@localhost
//! ```
//!
//! The `name_overrides` table maps the basename of an embedded git source to
//! the repository name it is mirrored under. Upstream renames are common
//! enough that this table is injected rather than compiled in.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Marker identifying sources hosted on the organisation's own infrastructure.
pub const DEFAULT_INTERNAL_ORIGIN: &str = "git@gitlab.internal.steamos.cloud";

/// Identity used as both author and committer of synthesized commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            name: "evlav".to_string(),
            email: "evlav@localhost".to_string(),
        }
    }
}

/// Configuration shared by every stage of a sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Substring of a git source URL that marks it as internal and mirrorable.
    pub internal_origin: String,
    /// Source basename -> canonical repository name.
    pub name_overrides: BTreeMap<String, String>,
    /// Repository name prefix -> regex selecting the tags that may be pushed.
    pub tag_filters: BTreeMap<String, String>,
    /// Package names listed in a commit subject before falling back to a count.
    pub list_cap: usize,
    /// Push the branch after this many materialized updates.
    pub push_every: usize,
    /// Number of concurrent downloads.
    pub workers: usize,
    /// Name of the build descriptor inside each package archive.
    pub build_script: String,
    pub author: Identity,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let mut tag_filters = BTreeMap::new();
        // Upstream kernel tags predating the valve releases are broken.
        tag_filters.insert("linux-neptune".to_string(), "-valve".to_string());

        Self {
            internal_origin: DEFAULT_INTERNAL_ORIGIN.to_string(),
            name_overrides: BTreeMap::new(),
            tag_filters,
            list_cap: 5,
            push_every: 50,
            workers: 8,
            build_script: "PKGBUILD".to_string(),
            author: Identity::default(),
        }
    }
}

impl SyncConfig {
    /// Returns the canonical repository name for a source basename, and
    /// whether an override rule matched.
    pub fn canonical_name(&self, basename: &str) -> (String, bool) {
        match self.name_overrides.get(basename) {
            Some(name) => (name.clone(), true),
            None => (basename.to_string(), false),
        }
    }

    /// Whether a source URL points at internal infrastructure.
    pub fn is_internal(&self, url: &str) -> bool {
        !self.internal_origin.is_empty() && url.contains(&self.internal_origin)
    }

    /// Returns the tag filter applying to a mirrored repository, if any.
    ///
    /// The longest matching prefix wins.
    pub fn tag_filter_for(&self, repo_name: &str) -> Result<Option<Regex>> {
        let rule = self
            .tag_filters
            .iter()
            .filter(|(prefix, _)| repo_name.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len());

        match rule {
            Some((_, pattern)) => Ok(Some(Regex::new(pattern)?)),
            None => Ok(None),
        }
    }

    fn validate(&self) -> Result<()> {
        for (prefix, pattern) in &self.tag_filters {
            if let Err(e) = Regex::new(pattern) {
                return Err(Error::ConfigParse {
                    message: format!("invalid tag filter for '{}': {}", prefix, e),
                    hint: Some("tag filters are regular expressions".to_string()),
                });
            }
        }
        if self.workers == 0 {
            return Err(Error::ConfigParse {
                message: "workers must be at least 1".to_string(),
                hint: None,
            });
        }
        if self.push_every == 0 {
            return Err(Error::ConfigParse {
                message: "push_every must be at least 1".to_string(),
                hint: Some("use 1 to push after every update".to_string()),
            });
        }
        Ok(())
    }
}

/// Parses a YAML string into a validated `SyncConfig`.
///
/// An empty document yields the defaults.
pub fn parse(yaml_content: &str) -> Result<SyncConfig> {
    let config = if yaml_content.trim().is_empty() {
        SyncConfig::default()
    } else {
        serde_yaml::from_str::<SyncConfig>(yaml_content).map_err(|e| Error::ConfigParse {
            message: e.to_string(),
            hint: None,
        })?
    };
    config.validate()?;
    Ok(config)
}

pub fn from_file<P: AsRef<Path>>(path: P) -> Result<SyncConfig> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    parse(&content)
}

/// Loads the configuration from an explicit path, else from
/// `<config_dir>/evlav/config.yaml` when it exists, else the defaults.
pub fn load(explicit: Option<&Path>) -> Result<SyncConfig> {
    if let Some(path) = explicit {
        return from_file(path);
    }
    if let Some(dir) = dirs::config_dir() {
        let path = dir.join("evlav").join("config.yaml");
        if path.is_file() {
            log::debug!("Loading configuration from {}", path.display());
            return from_file(path);
        }
    }
    Ok(SyncConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.internal_origin, DEFAULT_INTERNAL_ORIGIN);
        assert_eq!(config.list_cap, 5);
        assert_eq!(config.build_script, "PKGBUILD");
    }

    #[test]
    fn test_parse_partial_config() {
        let yaml = r#"
list_cap: 2
name_overrides:
  steamos-customizations: steamos-customizations-jupiter
"#;
        let config = parse(yaml).unwrap();
        assert_eq!(config.list_cap, 2);
        assert_eq!(config.push_every, 50);
        assert_eq!(
            config.canonical_name("steamos-customizations"),
            ("steamos-customizations-jupiter".to_string(), true)
        );
        assert_eq!(
            config.canonical_name("mesa"),
            ("mesa".to_string(), false)
        );
    }

    #[test]
    fn test_parse_rejects_invalid_tag_filter() {
        let yaml = r#"
tag_filters:
  broken: "(unclosed"
"#;
        let err = parse(yaml).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_parse_rejects_zero_workers() {
        assert!(parse("workers: 0").is_err());
        assert!(parse("push_every: 0").is_err());
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let err = parse("list_cap: [unclosed").unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }

    #[test]
    fn test_tag_filter_longest_prefix_wins() {
        let mut config = SyncConfig::default();
        config.tag_filters.clear();
        config
            .tag_filters
            .insert("linux".to_string(), "^any".to_string());
        config
            .tag_filters
            .insert("linux-neptune".to_string(), "-valve".to_string());

        let filter = config.tag_filter_for("linux-neptune-61").unwrap().unwrap();
        assert_eq!(filter.as_str(), "-valve");
        let filter = config.tag_filter_for("linux-firmware").unwrap().unwrap();
        assert_eq!(filter.as_str(), "^any");
        assert!(config.tag_filter_for("mesa").unwrap().is_none());
    }

    #[test]
    fn test_is_internal() {
        let config = SyncConfig::default();
        assert!(config.is_internal("git@gitlab.internal.steamos.cloud:jupiter/foo.git"));
        assert!(!config.is_internal("https://github.com/ValveSoftware/gamescope.git"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "workers: 3\n").unwrap();
        let config = from_file(&path).unwrap();
        assert_eq!(config.workers, 3);

        let loaded = load(Some(&path)).unwrap();
        assert_eq!(loaded.workers, 3);
    }
}
