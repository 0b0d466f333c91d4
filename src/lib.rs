//! # evlav
//!
//! Rebuilds a deterministic, incrementally extendable git history from the
//! point-in-time snapshots of a package mirror, and mirrors the git sources
//! embedded in those packages as repositories of their own.
//!
//! The library backs the `evlav` command-line tool.
//!
//! ## Core Concepts
//!
//! - **Updates (`timeline`)**: every timestamp at which the mirror published
//!   packages for a version becomes an immutable `Update`, linked to the
//!   previous one. Two updates with the same date, size and packages are the
//!   same historical point, even across independently built chains.
//! - **Checkpoints (`checkpoint`)**: a materialized update is tagged
//!   `<version>-<YYMMDD-HHMM>Z`. Tags are the only persistent state; a run
//!   rediscovers them to know where to resume.
//! - **Planning (`planner`)**: walks a chain back to its last checkpoint. A
//!   branch whose history starts with updates of the trunk starts from the
//!   trunk's checkpoint instead of duplicating them.
//! - **Fetching (`fetch`)**: archives are downloaded by a bounded worker pool
//!   that stops at the first failure.
//! - **Materialization (`materialize`, `mirror`)**: each planned update
//!   becomes one commit, with embedded git sources force-pushed to their own
//!   repositories.
//!
//! ## Execution Flow
//!
//! `sync::Syncer` drives a run:
//!
//! 1. **Index**: build the update chain of every version from its listing.
//! 2. **Checkpoints**: fetch the destination and read its tags.
//! 3. **Plan**: compute the pending updates of every version, trunk first.
//! 4. **Fetch**: download the archives of all pending updates.
//! 5. **Materialize**: commit, tag and push every version in turn.
//!
//! ## Quick Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use evlav::checkpoint::{tag_name, CheckpointStore};
//! use evlav::index::Package;
//! use evlav::planner::plan;
//! use evlav::repository::Repository;
//!
//! let package = |name: &str, day: u32| Package {
//!     name: name.to_string(),
//!     link: name.to_string(),
//!     timestamp: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
//!     size: 1024,
//! };
//! let repo = Repository::from_packages(
//!     "jupiter",
//!     "main",
//!     "./repositories/jupiter",
//!     vec![package("a-1-1.src.tar.gz", 1), package("a-2-1.src.tar.gz", 2)],
//! )
//! .unwrap();
//!
//! let todo = plan(&repo, &CheckpointStore::new(), None);
//! assert_eq!(todo.len(), 2);
//! assert_eq!(todo[0].start, None);
//! assert_eq!(todo[1].start.as_deref(), Some("main-240101-0000Z"));
//! assert_eq!(tag_name("main", &repo.latest), "main-240102-0000Z");
//! ```

pub mod archive;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod fetch;
pub mod git;
pub mod index;
pub mod materialize;
pub mod mirror;
pub mod planner;
pub mod repository;
pub mod sources;
pub mod sync;
pub mod timeline;

#[cfg(test)]
mod test_support;
