//! Filesystem helpers for pod setup.
//!
//! Provides the `mount(2)` abstraction and path resolution that never
//! leaves an app's root filesystem.

pub mod mount;
pub mod resolve;

use std::path::{Component, Path, PathBuf};

/// Joins `path` under `base`, treating an absolute `path` as relative.
///
/// `Path::join` replaces the base when given an absolute path; pod layout
/// paths are always meant to nest.
#[must_use]
pub fn join_under(base: &Path, path: impl AsRef<Path>) -> PathBuf {
    let mut out = base.to_path_buf();
    for comp in path.as_ref().components() {
        match comp {
            Component::Normal(c) => out.push(c),
            Component::ParentDir => out.push(".."),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Lexically normalizes a path: drops `.` and folds `..` into its parent.
///
/// `..` at the filesystem root stays at the root.
#[must_use]
pub fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !path.is_absolute() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Changes the owner of `path`.
///
/// # Errors
///
/// Returns an I/O error if the kernel refuses the change.
#[cfg(target_os = "linux")]
pub fn set_owner(path: &Path, uid: u32, gid: u32) -> stagehand_common::error::Result<()> {
    use nix::unistd::{Gid, Uid, chown};

    chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
        .map_err(|e| stagehand_common::error::StagehandError::io(path, std::io::Error::from(e)))
}

/// Changes the owner of `path` (unsupported on this platform).
///
/// # Errors
///
/// Always returns an error on non-Linux platforms.
#[cfg(not(target_os = "linux"))]
pub fn set_owner(path: &Path, _uid: u32, _gid: u32) -> stagehand_common::error::Result<()> {
    Err(stagehand_common::error::StagehandError::config(format!(
        "Linux required to change owner of {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_under_nests_absolute_paths() {
        assert_eq!(
            join_under(Path::new("/pod"), "/sys/fs/cgroup"),
            PathBuf::from("/pod/sys/fs/cgroup")
        );
    }

    #[test]
    fn clean_folds_parent_components() {
        assert_eq!(clean(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(clean(Path::new("/..")), PathBuf::from("/"));
    }
}
