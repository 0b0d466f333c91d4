//! # Package Archives
//!
//! Reading of gzip compressed source package archives. Every archive has one
//! top-level directory named after the package.
//!
//! Extraction is always confined to an archive-relative prefix: members are
//! stripped of the prefix before being written, and members that would land
//! outside the destination (absolute paths, `..` components, links pointing
//! outside, members below a link, hard links) are rejected with a warning
//! instead of being written.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use log::{debug, warn};
use tar::{Archive, EntryType};

use crate::error::{Error, Result};

fn archive_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Archive {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

fn open(path: &Path) -> Result<Archive<GzDecoder<File>>> {
    let file = File::open(path).map_err(|e| archive_error(path, e))?;
    Ok(Archive::new(GzDecoder::new(file)))
}

/// Where an archive member lands relative to an extraction prefix
#[derive(Debug, PartialEq, Eq)]
enum Placement {
    /// Not under the prefix.
    Outside,
    /// Would escape the destination.
    Rejected,
    Inside(PathBuf),
}

/// Splits a relative path into its normal components, or `None` when it is
/// absolute or climbs with `..`.
fn normalize(path: &Path) -> Option<Vec<&OsStr>> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts)
}

fn place(member: &Path, prefix: &[&OsStr]) -> Placement {
    let Some(parts) = normalize(member) else {
        return Placement::Rejected;
    };
    if parts.len() < prefix.len() || parts[..prefix.len()] != *prefix {
        return Placement::Outside;
    }
    Placement::Inside(parts[prefix.len()..].iter().collect())
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink())
}

/// Whether a directory between `dest` and `dest/relative` is a symlink, which
/// would redirect the write elsewhere.
fn crosses_symlink(dest: &Path, relative: &Path) -> bool {
    let mut current = dest.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        current.push(component);
        if is_symlink(&current) {
            return true;
        }
    }
    false
}

/// Whether a link at `dest/relative` pointing to `target` stays inside
/// `dest`. Directories the target walks through must not be links
/// themselves, since a `..` after a link resolves from the link's target.
fn link_is_confined(dest: &Path, relative: &Path, target: &Path) -> bool {
    if target.is_absolute() {
        return false;
    }
    let mut position: Vec<&OsStr> = relative
        .parent()
        .map(|parent| parent.iter().collect())
        .unwrap_or_default();
    let mut components = target.components().peekable();
    while let Some(component) = components.next() {
        match component {
            Component::Normal(part) => {
                position.push(part);
                if components.peek().is_some()
                    && is_symlink(&dest.join(position.iter().collect::<PathBuf>()))
                {
                    return false;
                }
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if position.pop().is_none() {
                    return false;
                }
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// Returns the first top-level directory of the archive.
pub fn top_level_dir(path: &Path) -> Result<Option<String>> {
    let mut archive = open(path)?;
    let entries = archive.entries().map_err(|e| archive_error(path, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| archive_error(path, e))?;
        let member = entry.path().map_err(|e| archive_error(path, e))?;
        if let Some(first) = normalize(&member).and_then(|parts| parts.first().copied()) {
            return Ok(Some(first.to_string_lossy().into_owned()));
        }
    }
    Ok(None)
}

/// Reads the member at `member` (e.g. `jupiter/PKGBUILD`) as text.
///
/// Returns `None` when the archive has no such regular file.
pub fn read_text(path: &Path, member: &str) -> Result<Option<String>> {
    let wanted = Path::new(member);
    let Some(wanted) = normalize(wanted) else {
        return Ok(None);
    };

    let mut archive = open(path)?;
    let entries = archive.entries().map_err(|e| archive_error(path, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| archive_error(path, e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let matches = {
            let member_path = entry.path().map_err(|e| archive_error(path, e))?;
            normalize(&member_path).is_some_and(|parts| parts == wanted)
        };
        if matches {
            let mut content = Vec::new();
            entry
                .read_to_end(&mut content)
                .map_err(|e| archive_error(path, e))?;
            return Ok(Some(String::from_utf8_lossy(&content).into_owned()));
        }
    }
    Ok(None)
}

/// Extracts everything under `prefix/` into `dest`, except the subtrees named
/// in `exclude` (relative to the prefix). Returns the number of members
/// written.
pub fn extract_package(path: &Path, prefix: &str, dest: &Path, exclude: &[String]) -> Result<usize> {
    extract(path, prefix, dest, exclude)
}

/// Extracts only the subtree under `prefix/` into `dest`.
pub fn extract_subtree(path: &Path, prefix: &str, dest: &Path) -> Result<usize> {
    extract(path, prefix, dest, &[])
}

fn extract(path: &Path, prefix: &str, dest: &Path, exclude: &[String]) -> Result<usize> {
    let prefix_path = Path::new(prefix);
    let prefix = normalize(prefix_path).ok_or_else(|| {
        archive_error(path, format!("invalid extraction prefix '{}'", prefix_path.display()))
    })?;
    let exclude: Vec<PathBuf> = exclude.iter().map(PathBuf::from).collect();

    fs::create_dir_all(dest)?;
    let mut archive = open(path)?;
    let entries = archive.entries().map_err(|e| archive_error(path, e))?;
    let mut written = 0;

    for entry in entries {
        let mut entry = entry.map_err(|e| archive_error(path, e))?;
        let member = entry
            .path()
            .map_err(|e| archive_error(path, e))?
            .into_owned();

        let relative = match place(&member, &prefix) {
            Placement::Outside => continue,
            Placement::Rejected => {
                warn!(
                    "Rejecting member {} of {}: escapes the package",
                    member.display(),
                    path.display()
                );
                continue;
            }
            Placement::Inside(relative) => relative,
        };
        if relative.as_os_str().is_empty() || exclude.iter().any(|ex| relative.starts_with(ex)) {
            continue;
        }

        let target = dest.join(&relative);
        if crosses_symlink(dest, &relative) {
            warn!(
                "Rejecting member {} of {}: its directory is a link",
                member.display(),
                path.display()
            );
            continue;
        }
        if is_symlink(&target) {
            fs::remove_file(&target)?;
        }

        let entry_type = entry.header().entry_type();
        match entry_type {
            EntryType::Directory => {
                fs::create_dir_all(&target)?;
                continue;
            }
            EntryType::Regular | EntryType::Continuous => {}
            EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .map_err(|e| archive_error(path, e))?
                    .map(|l| l.into_owned())
                    .unwrap_or_default();
                if !link_is_confined(dest, &relative, &link) {
                    warn!(
                        "Rejecting link {} -> {} in {}: points outside the package",
                        member.display(),
                        link.display(),
                        path.display()
                    );
                    continue;
                }
            }
            EntryType::XGlobalHeader | EntryType::XHeader => continue,
            other => {
                warn!(
                    "Rejecting member {} of {}: unsupported entry type {:?}",
                    member.display(),
                    path.display(),
                    other
                );
                continue;
            }
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        entry
            .unpack(&target)
            .map_err(|e| archive_error(path, e))?;
        written += 1;
    }

    debug!(
        "Extracted {} member(s) of {} under {}",
        written,
        path.display(),
        prefix_path.display()
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{write_archive, ArchiveMember};
    use tempfile::TempDir;

    #[test]
    fn test_place_strips_prefix() {
        let prefix = normalize(Path::new("pkg")).unwrap();
        assert_eq!(
            place(Path::new("pkg/src/file.c"), &prefix),
            Placement::Inside(PathBuf::from("src/file.c"))
        );
        assert_eq!(
            place(Path::new("./pkg/file"), &prefix),
            Placement::Inside(PathBuf::from("file"))
        );
        assert_eq!(place(Path::new("other/file"), &prefix), Placement::Outside);
        assert_eq!(place(Path::new("pkgx/file"), &prefix), Placement::Outside);
        assert_eq!(place(Path::new("pkg/../etc/passwd"), &prefix), Placement::Rejected);
        assert_eq!(place(Path::new("/pkg/file"), &prefix), Placement::Rejected);
    }

    #[test]
    fn test_link_is_confined() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path();
        assert!(link_is_confined(dest, Path::new("a/link"), Path::new("../b")));
        assert!(link_is_confined(dest, Path::new("link"), Path::new("target")));
        assert!(!link_is_confined(dest, Path::new("link"), Path::new("../outside")));
        assert!(!link_is_confined(dest, Path::new("a/link"), Path::new("../../outside")));
        assert!(!link_is_confined(dest, Path::new("link"), Path::new("/etc/passwd")));
    }

    #[test]
    fn test_link_through_existing_link_is_not_confined() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path();
        fs::create_dir_all(dest.join("x")).unwrap();
        std::os::unix::fs::symlink("..", dest.join("x/l")).unwrap();

        // x/l resolves to dest, so x/l/.. is dest's parent.
        assert!(!link_is_confined(dest, Path::new("m"), Path::new("x/l/..")));
        assert!(link_is_confined(dest, Path::new("m"), Path::new("x/l")));
        assert!(crosses_symlink(dest, Path::new("x/l/y")));
        assert!(!crosses_symlink(dest, Path::new("x/l")));
    }

    #[test]
    fn test_read_text_and_top_level_dir() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.src.tar.gz");
        write_archive(
            &archive,
            &[
                ArchiveMember::file("a/PKGBUILD", "pkgname=a\n"),
                ArchiveMember::file("a/a.patch", "diff"),
            ],
        );

        assert_eq!(top_level_dir(&archive).unwrap(), Some("a".to_string()));
        assert_eq!(
            read_text(&archive, "a/PKGBUILD").unwrap(),
            Some("pkgname=a\n".to_string())
        );
        assert_eq!(read_text(&archive, "a/missing").unwrap(), None);
    }

    #[test]
    fn test_extract_package_excludes_subtrees() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.src.tar.gz");
        write_archive(
            &archive,
            &[
                ArchiveMember::dir("a"),
                ArchiveMember::file("a/PKGBUILD", "pkgname=a\n"),
                ArchiveMember::file("a/files/a.conf", "x=1"),
                ArchiveMember::file("a/repo/HEAD", "ref: refs/heads/main"),
                ArchiveMember::file("b/PKGBUILD", "pkgname=b\n"),
            ],
        );

        let dest = temp.path().join("out");
        let written = extract_package(&archive, "a", &dest, &["repo".to_string()]).unwrap();

        assert_eq!(written, 2);
        assert!(dest.join("PKGBUILD").is_file());
        assert_eq!(fs::read_to_string(dest.join("files/a.conf")).unwrap(), "x=1");
        assert!(!dest.join("repo").exists());
        assert!(!temp.path().join("b").exists());
    }

    #[test]
    fn test_extract_rejects_escaping_members() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("evil.src.tar.gz");
        write_archive(
            &archive,
            &[
                ArchiveMember::file("evil/PKGBUILD", "pkgname=evil\n"),
                ArchiveMember::file("evil/../../escaped", "gotcha"),
                ArchiveMember::symlink("evil/link", "../../../etc/passwd"),
                ArchiveMember::symlink("evil/ok-link", "PKGBUILD"),
            ],
        );

        let dest = temp.path().join("work/evil");
        let written = extract_package(&archive, "evil", &dest, &[]).unwrap();

        assert_eq!(written, 2);
        assert!(dest.join("PKGBUILD").is_file());
        assert!(!temp.path().join("escaped").exists());
        assert!(!dest.join("link").exists());
        assert!(dest.join("ok-link").symlink_metadata().is_ok());
    }

    #[test]
    fn test_extract_rejects_members_below_links() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("evil.src.tar.gz");
        write_archive(
            &archive,
            &[
                ArchiveMember::dir("evil/x"),
                ArchiveMember::symlink("evil/x/l", ".."),
                ArchiveMember::symlink("evil/x/l/y", ".."),
                ArchiveMember::file("evil/x/l/y/pwned", "gotcha"),
            ],
        );

        let dest = temp.path().join("work/evil");
        let written = extract_package(&archive, "evil", &dest, &[]).unwrap();

        assert_eq!(written, 1);
        assert!(dest.join("x/l").symlink_metadata().is_ok());
        assert!(!dest.join("y").exists());
        assert!(!temp.path().join("work/pwned").exists());
        assert!(!temp.path().join("pwned").exists());
    }

    #[test]
    fn test_extract_subtree_rejects_members_below_links() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.src.tar.gz");
        write_archive(
            &archive,
            &[
                ArchiveMember::dir("a/repo/d"),
                ArchiveMember::symlink("a/repo/d/up", ".."),
                ArchiveMember::symlink("a/repo/d/up/out", ".."),
                ArchiveMember::file("a/repo/d/up/out/HEAD", "escaped"),
            ],
        );

        let dest = temp.path().join("mirror/repo");
        let written = extract_subtree(&archive, "a/repo", &dest).unwrap();
        assert_eq!(written, 1);
        assert!(!dest.join("out").exists());
        assert!(!temp.path().join("mirror/HEAD").exists());
    }

    #[test]
    fn test_extract_subtree() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.src.tar.gz");
        write_archive(
            &archive,
            &[
                ArchiveMember::file("a/PKGBUILD", "pkgname=a\n"),
                ArchiveMember::file("a/repo/HEAD", "ref: refs/heads/main\n"),
                ArchiveMember::file("a/repo/refs/heads/main", "0000\n"),
                ArchiveMember::file("a/repository/HEAD", "other"),
            ],
        );

        let dest = temp.path().join("mirror");
        let written = extract_subtree(&archive, "a/repo", &dest).unwrap();
        assert_eq!(written, 2);
        assert!(dest.join("HEAD").is_file());
        assert!(dest.join("refs/heads/main").is_file());
        assert!(!dest.join("PKGBUILD").exists());
    }

    #[test]
    fn test_open_missing_archive() {
        let err = top_level_dir(Path::new("/nonexistent/a.src.tar.gz")).unwrap_err();
        assert!(matches!(err, Error::Archive { .. }));
    }
}
