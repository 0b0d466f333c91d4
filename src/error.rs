//! # Error Handling
//!
//! This module defines the centralized error type for `evlav`. It uses the
//! `thiserror` library to build a single `Error` enum covering every failure
//! mode of a synchronisation run, each variant carrying enough context to
//! diagnose the problem from the log alone.
//!
//! ## Key Components
//!
//! - **`Error`**: The main enum. Variants fall into two groups:
//!   - *Package-local* problems (`MissingBuildScript`, `UnresolvedPlaceholder`)
//!     which the materializer recovers from by skipping the offending package
//!     with a warning. See [`Error::is_package_local`].
//!   - Everything else, which is fatal to the enclosing branch or run and is
//!     unwound to the command layer.
//!
//! - **`Result<T>`**: A type alias for `std::result::Result<T, Error>`.
//!
//! There is no rollback for partially pushed state. Re-running the sync is the
//! recovery mechanism: already materialized updates are rediscovered through
//! their tags and skipped.

use thiserror::Error;

/// Main error type for evlav operations
#[derive(Error, Debug)]
pub enum Error {
    /// The package index of a branch contained no usable packages.
    #[error("No packages found in index for {repo} ({version})")]
    EmptyIndex { repo: String, version: String },

    /// A package archive lacks the expected build descriptor.
    #[error("No build script found in archive {archive}")]
    MissingBuildScript { archive: String },

    /// A source entry still contains a `$placeholder` after substitution.
    #[error("Unresolved placeholder in source entry of {package}: {entry}")]
    UnresolvedPlaceholder { package: String, entry: String },

    /// A resumed run was about to recreate the root of an existing history.
    #[error("Refusing to recreate the root commit of {repo} ({version}) while resuming; rerun with --restart to rebuild the history")]
    UnsafeRestart { repo: String, version: String },

    /// A plan item starts from a tag the checkpoint store does not know.
    #[error("Checkpoint {tag} is not known to the checkpoint store")]
    MissingCheckpoint { tag: String },

    /// An invoked `git` command failed.
    #[error("Git command failed in {dir}: git {command} - {stderr}")]
    GitCommand {
        command: String,
        dir: String,
        stderr: String,
    },

    /// One or more downloads of the fetch pipeline failed.
    ///
    /// Downloads that completed before the failure are kept on disk, so
    /// running again only fetches what is still missing.
    #[error("{failed} download(s) failed, first was {first_url}: {message}")]
    Download {
        failed: usize,
        first_url: String,
        message: String,
    },

    /// A single HTTP request failed.
    #[error("Network operation error: {url} - {message}")]
    Network { url: String, message: String },

    /// A package archive could not be read or contains an invalid member.
    #[error("Archive error in {path}: {message}")]
    Archive { path: String, message: String },

    /// The YAML configuration file is invalid.
    #[error("Configuration parsing error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    ConfigParse {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// An error indicating that a mutex or other lock has been poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl Error {
    /// Whether this error only concerns one package of an update.
    ///
    /// The materializer skips such packages with a warning instead of aborting
    /// the update.
    pub fn is_package_local(&self) -> bool {
        matches!(
            self,
            Error::MissingBuildScript { .. } | Error::UnresolvedPlaceholder { .. }
        )
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
