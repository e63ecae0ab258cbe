//! Sysusers declarations.
//!
//! The supervisor's `User=`/`Group=` need matching entries in stage1's own
//! account database. Each app gets a declaration creating a `gen<N>` group
//! per gid and a `gen<uid>` user; identical entries from several apps are
//! merged by the sysusers tool.

use std::fmt::Write as _;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use stagehand_common::error::{Result, StagehandError};
use stagehand_core::identity::UidRange;

use crate::paths;

/// Renders the declaration: supplementary groups, the main group, then the user.
#[must_use]
pub fn render(uid: u32, gid: u32, supplementary_gids: &[u32]) -> String {
    let mut out = String::new();
    for g in supplementary_gids.iter().chain(std::iter::once(&gid)) {
        let _ = writeln!(out, "g gen{g} {g}");
    }
    let _ = writeln!(out, "u gen{uid} {uid} \"gen{uid}\"");
    out
}

/// Writes the app's declaration under the pod's stage1 rootfs.
///
/// The directory and file are handed to the namespace root owner when
/// `range` is defined.
///
/// # Errors
///
/// Returns an I/O error if the declaration cannot be written or chowned.
pub fn write_sysusers(
    root: &Path,
    app: &str,
    uid: u32,
    gid: u32,
    supplementary_gids: &[u32],
    range: &UidRange,
) -> Result<()> {
    use std::io::Write;

    let dir = paths::sysusers_dir(root);
    std::fs::create_dir_all(&dir).map_err(|e| StagehandError::io(&dir, e))?;

    let file_path = paths::sysusers_file(root, app);
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o640)
        .open(&file_path)
        .map_err(|e| StagehandError::io(&file_path, e))?;
    file.write_all(render(uid, gid, supplementary_gids).as_bytes())
        .map_err(|e| StagehandError::io(&file_path, e))?;

    if range.is_defined() {
        for path in [&dir, &file_path] {
            stagehand_core::filesystem::set_owner(path, range.shift, range.shift)?;
        }
    }
    Ok(())
}
