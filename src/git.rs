//! Raw `git` subprocess primitives.
//!
//! These functions use the system git command, which automatically handles
//! SSH keys, credential helpers and anything else configured in
//! `~/.gitconfig`. Every failure is reported as [`Error::GitCommand`] with the
//! captured output of the command.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::config::Identity;
use crate::error::{Error, Result};

/// Branch HEAD points at while building a root commit.
const ORPHAN_REF: &str = "refs/heads/evlav/orphan";

/// Name of the disposable remote used when mirroring.
const MIRROR_REMOTE: &str = "evlav-mirror";

/// Tags pushed per `git push` invocation when pushing a filtered tag set.
const TAG_PUSH_CHUNK: usize = 100;

/// A tag reachable from a branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub name: String,
    pub commit: String,
    pub date: i64,
    pub subject: String,
}

fn command_error(dir: &Path, args: &[&str], message: String) -> Error {
    Error::GitCommand {
        command: args.join(" "),
        dir: dir.display().to_string(),
        stderr: message,
    }
}

fn output(dir: &Path, args: &[&str], envs: &[(&str, String)]) -> Result<Output> {
    Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .envs(envs.iter().map(|(k, v)| (*k, v.as_str())))
        .output()
        .map_err(|e| command_error(dir, args, e.to_string()))
}

fn run_with_env(dir: &Path, args: &[&str], envs: &[(&str, String)]) -> Result<String> {
    let out = output(dir, args, envs)?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        let stdout = String::from_utf8_lossy(&out.stdout);
        let message = if stdout.trim().is_empty() {
            stderr.trim().to_string()
        } else {
            format!("{}\n{}", stderr.trim(), stdout.trim())
        };
        return Err(command_error(dir, args, message));
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// Runs `git -C <dir> <args>` and returns its stdout.
pub fn run(dir: &Path, args: &[&str]) -> Result<String> {
    run_with_env(dir, args, &[])
}

/// Whether `reference` resolves to a commit.
pub fn ref_exists(dir: &Path, reference: &str) -> Result<bool> {
    let spec = format!("{}^{{commit}}", reference);
    let out = output(dir, &["rev-parse", "--verify", "--quiet", &spec], &[])?;
    Ok(out.status.success())
}

/// Initialises `dir` as a repository whose `origin` is `url`.
///
/// An existing repository is reused; only its origin is updated.
pub fn init_repository(dir: &Path, url: &str) -> Result<()> {
    fs::create_dir_all(dir)?;
    if !dir.join(".git").exists() {
        run(dir, &["init", "-q"])?;
    }

    let remotes = run(dir, &["remote"])?;
    if remotes.lines().any(|r| r.trim() == "origin") {
        run(dir, &["remote", "set-url", "origin", url])?;
    } else {
        run(dir, &["remote", "add", "origin", url])?;
    }
    Ok(())
}

/// Fetches all branches and tags of `origin`.
pub fn fetch_origin(dir: &Path) -> Result<()> {
    run(
        dir,
        &[
            "fetch",
            "-q",
            "--prune",
            "--tags",
            "--force",
            "origin",
            "+refs/heads/*:refs/remotes/origin/*",
        ],
    )?;
    Ok(())
}

/// Lists the tags merged into `reference`.
///
/// A reference that does not exist yields no tags.
pub fn list_merged_tags(dir: &Path, reference: &str) -> Result<Vec<TagRecord>> {
    if !ref_exists(dir, reference)? {
        return Ok(Vec::new());
    }

    let stdout = run(
        dir,
        &[
            "for-each-ref",
            "--merged",
            reference,
            "--format=%(refname:strip=2)%00%(objectname)%00%(*objectname)%00%(creatordate:unix)%00%(contents:subject)",
            "refs/tags",
        ],
    )?;

    Ok(stdout.lines().filter_map(parse_tag_line).collect())
}

fn parse_tag_line(line: &str) -> Option<TagRecord> {
    let mut fields = line.split('\0');
    let name = fields.next()?.to_string();
    let object = fields.next()?;
    let peeled = fields.next()?;
    let date = fields.next()?.parse().unwrap_or(0);
    let subject = fields.next().unwrap_or_default().to_string();

    // Annotated tags point at a tag object; the commit is the peeled id.
    let commit = if peeled.is_empty() { object } else { peeled };
    if name.is_empty() || commit.is_empty() {
        return None;
    }

    Some(TagRecord {
        name,
        commit: commit.to_string(),
        date,
        subject,
    })
}

/// Resets the working tree to `commit`, or to an empty unborn branch.
pub fn checkout(dir: &Path, commit: Option<&str>) -> Result<()> {
    match commit {
        Some(commit) => {
            run(dir, &["checkout", "-q", "-f", "--detach", commit])?;
        }
        None => {
            run(dir, &["symbolic-ref", "HEAD", ORPHAN_REF])?;
            if ref_exists(dir, ORPHAN_REF)? {
                run(dir, &["update-ref", "-d", ORPHAN_REF])?;
            }
            run(dir, &["read-tree", "--empty"])?;
        }
    }
    run(dir, &["clean", "-q", "-ffdx"])?;
    Ok(())
}

/// Stages everything and commits it, dated `date`. Returns the commit id.
pub fn commit_all(
    dir: &Path,
    message: &str,
    date: DateTime<Utc>,
    identity: &Identity,
) -> Result<String> {
    run(dir, &["add", "-A"])?;

    let date = date.to_rfc3339();
    let envs = [
        ("GIT_AUTHOR_NAME", identity.name.clone()),
        ("GIT_AUTHOR_EMAIL", identity.email.clone()),
        ("GIT_AUTHOR_DATE", date.clone()),
        ("GIT_COMMITTER_NAME", identity.name.clone()),
        ("GIT_COMMITTER_EMAIL", identity.email.clone()),
        ("GIT_COMMITTER_DATE", date),
    ];
    run_with_env(
        dir,
        &[
            "-c",
            "commit.gpgsign=false",
            "commit",
            "-q",
            "--allow-empty",
            "--no-verify",
            "-m",
            message,
        ],
        &envs,
    )?;

    Ok(run(dir, &["rev-parse", "HEAD"])?.trim().to_string())
}

/// Points the lightweight tag `name` at `commit`, replacing any previous one.
pub fn tag(dir: &Path, name: &str, commit: &str) -> Result<()> {
    run(dir, &["tag", "-f", name, commit])?;
    Ok(())
}

/// Pushes `commit` as `branch` of `origin` together with `tags`.
pub fn push(dir: &Path, commit: &str, branch: &str, tags: &[String], force: bool) -> Result<()> {
    let mut refspecs = vec![format!("{}:refs/heads/{}", commit, branch)];
    refspecs.extend(tags.iter().map(|t| format!("refs/tags/{0}:refs/tags/{0}", t)));

    let mut args = vec!["push", "-q"];
    if force {
        args.push("--force");
    }
    args.push("origin");
    args.extend(refspecs.iter().map(String::as_str));
    run(dir, &args)?;
    Ok(())
}

/// Creates a bare repository at `path` unless one already exists.
pub fn ensure_bare(path: &Path) -> Result<()> {
    if path.join("HEAD").exists() {
        return Ok(());
    }
    fs::create_dir_all(path)?;
    run(path, &["init", "-q", "--bare"])?;
    Ok(())
}

/// Force-pushes all branches and the selected tags of `dir` to `url`.
pub fn push_mirror(dir: &Path, url: &str, tag_filter: Option<&Regex>) -> Result<()> {
    let remotes = run(dir, &["remote"])?;
    if remotes.lines().any(|r| r.trim() == MIRROR_REMOTE) {
        run(dir, &["remote", "remove", MIRROR_REMOTE])?;
    }
    run(dir, &["remote", "add", MIRROR_REMOTE, url])?;

    run(dir, &["push", "-q", "--force", "--all", MIRROR_REMOTE])?;

    match tag_filter {
        None => {
            run(dir, &["push", "-q", "--force", "--tags", MIRROR_REMOTE])?;
        }
        Some(filter) => {
            let tags = run(dir, &["tag", "-l"])?;
            let refspecs: Vec<String> = tags
                .lines()
                .map(str::trim)
                .filter(|t| !t.is_empty() && filter.is_match(t))
                .map(|t| format!("refs/tags/{0}:refs/tags/{0}", t))
                .collect();

            for chunk in refspecs.chunks(TAG_PUSH_CHUNK) {
                let mut args = vec!["push", "-q", "--force", MIRROR_REMOTE];
                args.extend(chunk.iter().map(String::as_str));
                run(dir, &args)?;
            }
        }
    }
    Ok(())
}
