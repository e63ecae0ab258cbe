//! App identity resolution.
//!
//! An app declares its user and group as one of:
//! 1. the literal `root`,
//! 2. an absolute path inside the app, whose owner is used,
//! 3. a decimal id,
//! 4. a name looked up in the app's own `/etc/passwd` or `/etc/group`.
//!
//! The forms are tried in that order. Host files are never consulted.

pub mod passwd;
pub mod uid_range;

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use stagehand_common::error::{Result, ResultExt, StagehandError};

use crate::filesystem::join_under;
use crate::filesystem::resolve::resolve_inside_root;

pub use self::uid_range::UidRange;

/// Which half of the identity is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdKind {
    User,
    Group,
}

impl IdKind {
    const fn noun(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
        }
    }

    const fn id_name(self) -> &'static str {
        match self {
            Self::User => "uid",
            Self::Group => "gid",
        }
    }

    const fn db(self) -> &'static str {
        match self {
            Self::User => "etc/passwd",
            Self::Group => "etc/group",
        }
    }
}

/// Resolves an app's user and group specs to numeric ids.
///
/// Ids taken from file ownership are unshifted by `range` so they are
/// relative to the app's user namespace.
///
/// # Errors
///
/// Returns an error if either spec cannot be resolved; there is no
/// partial result.
pub fn resolve_user_group(
    app_root: &Path,
    user: &str,
    group: &str,
    range: &UidRange,
) -> Result<(u32, u32)> {
    let uid = resolve_id(app_root, user, range, IdKind::User)?;
    let gid = resolve_id(app_root, group, range, IdKind::Group)?;
    tracing::debug!(user, group, uid, gid, "resolved app identity");
    Ok((uid, gid))
}

fn resolve_id(app_root: &Path, spec: &str, range: &UidRange, kind: IdKind) -> Result<u32> {
    if spec == "root" {
        return Ok(0);
    }

    if spec.starts_with('/') {
        let file = owner_file(app_root, spec)
            .with_context(|| format!("unable to get {} from file {spec:?}", kind.id_name()))?;
        let meta = std::fs::symlink_metadata(&file)
            .map_err(|e| StagehandError::io(&file, e))
            .with_context(|| format!("unable to get {} from file {spec:?}", kind.id_name()))?;
        let owner = match kind {
            IdKind::User => meta.uid(),
            IdKind::Group => meta.gid(),
        };
        return range
            .unshift(owner)
            .with_context(|| format!("unable to determine real {}", kind.id_name()));
    }

    if let Ok(id) = spec.parse::<u32>() {
        return Ok(id);
    }

    let db = join_under(app_root, kind.db());
    let looked_up = match kind {
        IdKind::User => passwd::lookup_uid(spec, &db),
        IdKind::Group => passwd::lookup_gid(spec, &db),
    };
    looked_up.with_context(|| format!("cannot lookup {} {spec:?}", kind.noun()))
}

/// Locates a path-form spec inside the app root. Directories on the way are
/// resolved without leaving the root; the last component is not followed,
/// so a symlink reports its own owner.
fn owner_file(app_root: &Path, spec: &str) -> Result<PathBuf> {
    let spec = Path::new(spec);
    let relative = match (spec.parent(), spec.file_name()) {
        (Some(parent), Some(name)) => resolve_inside_root(app_root, parent)?.join(name),
        _ => resolve_inside_root(app_root, spec)?,
    };
    Ok(join_under(app_root, relative))
}
