//! Path resolution confined to an app's root filesystem.
//!
//! Apps reference paths (executables, mount targets) as seen from inside
//! their own root. Those paths may cross symlinks planted by the image, so
//! they are walked one component at a time from the app root, substituting
//! symlink targets as they are met, and rejecting any step that would land
//! outside the root.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use stagehand_common::error::{Result, ResultExt, StagehandError};

use super::clean;

/// Maximum number of symlinks followed during one resolution, as `ELOOP`.
const MAX_SYMLINK_HOPS: usize = 40;

/// Resolves `path` inside `app_root`, following symlinks without ever
/// leaving the root.
///
/// Absolute symlink targets are re-anchored at the app root; relative ones
/// are resolved against the directory holding the link. A component that
/// does not exist is kept as-is (the rest of the path is expected to be
/// created later) and the walk goes on, so a later `..` returns to a real
/// directory whose remaining components are still checked for symlinks.
///
/// Returns the resolved path relative to the app root, with a leading `/`.
///
/// # Errors
///
/// Returns [`StagehandError::PathEscape`] if any step leaves the root,
/// or an I/O error if a component cannot be inspected.
pub fn resolve_inside_root(app_root: &Path, path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let root = clean(app_root);
    let mut resolved = root.clone();
    let mut pending: VecDeque<OsString> = components(path).collect();
    let mut hops = 0;
    let mut last_link: Option<(PathBuf, PathBuf)> = None;

    let escape = |last_link: &Option<(PathBuf, PathBuf)>| {
        let detail = last_link.as_ref().map_or_else(String::new, |(link, target)| {
            format!(" (symlink {} -> {})", link.display(), target.display())
        });
        StagehandError::PathEscape {
            path: path.display().to_string(),
            detail,
        }
    };

    while let Some(comp) = pending.pop_front() {
        if comp == ".." {
            if resolved == root || !resolved.pop() || !resolved.starts_with(&root) {
                return Err(escape(&last_link));
            }
            continue;
        }

        let next = resolved.join(&comp);
        match std::fs::symlink_metadata(&next) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => resolved = next,
            Err(e) => return Err(StagehandError::io(next, e)),
            Ok(meta) if !meta.file_type().is_symlink() => resolved = next,
            Ok(_) => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(StagehandError::config(format!(
                        "too many levels of symbolic links resolving {}",
                        path.display()
                    )));
                }
                let target = std::fs::read_link(&next).map_err(|e| StagehandError::io(&next, e))?;
                if target.is_absolute() {
                    resolved.clone_from(&root);
                }
                for c in components(&target).collect::<Vec<_>>().into_iter().rev() {
                    pending.push_front(c);
                }
                last_link = Some((next, target));
            }
        }
    }

    let relative = resolved
        .strip_prefix(&root)
        .map_err(|_| escape(&last_link))?;
    Ok(Path::new("/").join(relative))
}

/// Finds `bin` on `search_path` inside the app root.
///
/// `search_path` is split on the platform's list separator. Each candidate
/// is resolved with [`resolve_inside_root`] and accepted if it exists, is
/// not a directory, and has an executable bit set.
///
/// Returns the resolved path relative to the app root.
///
/// # Errors
///
/// Returns [`StagehandError::NotFound`] if no candidate qualifies, or the
/// resolution error if a candidate escapes the root.
pub fn locate_executable(bin: &str, search_path: &str, app_root: &Path) -> Result<PathBuf> {
    for dir in std::env::split_paths(search_path) {
        let candidate = dir.join(bin);
        let resolved = resolve_inside_root(app_root, &candidate)
            .with_context(|| format!("could not evaluate path {}", candidate.display()))?;
        let on_host = super::join_under(app_root, &resolved);
        let Ok(meta) = std::fs::metadata(&on_host) else {
            continue;
        };
        if !meta.is_dir() && meta.permissions().mode() & 0o111 != 0 {
            tracing::debug!(bin, path = %resolved.display(), "executable located");
            return Ok(resolved);
        }
    }
    Err(StagehandError::NotFound {
        kind: "executable",
        id: format!("{bin:?} in {search_path:?}"),
    })
}

fn components(path: &Path) -> impl Iterator<Item = OsString> + '_ {
    path.components().filter_map(|c| match c {
        Component::Normal(n) => Some(n.to_os_string()),
        Component::ParentDir => Some(OsString::from("..")),
        Component::CurDir | Component::RootDir | Component::Prefix(_) => None,
    })
}
