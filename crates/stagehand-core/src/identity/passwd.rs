//! Lookups in an image's `/etc/passwd` and `/etc/group`.
//!
//! Only the name and numeric id columns are read. Blank lines and `#`
//! comments are skipped, as are lines too short to carry an id.

use std::io::{BufRead, BufReader};
use std::path::Path;

use stagehand_common::error::{Result, StagehandError};

/// Returns the uid of `name` in a passwd-format file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or has no entry for `name`.
pub fn lookup_uid(name: &str, passwd: &Path) -> Result<u32> {
    lookup_id(name, passwd, "user")
}

/// Returns the gid of `name` in a group-format file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or has no entry for `name`.
pub fn lookup_gid(name: &str, group: &Path) -> Result<u32> {
    lookup_id(name, group, "group")
}

/// Both formats keep the name in column 0 and the id in column 2.
fn lookup_id(name: &str, file: &Path, kind: &'static str) -> Result<u32> {
    let f = std::fs::File::open(file).map_err(|e| StagehandError::io(file, e))?;
    for line in BufReader::new(f).lines() {
        let line = line.map_err(|e| StagehandError::io(file, e))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split(':');
        if fields.next() != Some(name) {
            continue;
        }
        if let Some(id) = fields.nth(1).and_then(|id| id.parse().ok()) {
            return Ok(id);
        }
    }
    Err(StagehandError::NotFound {
        kind,
        id: format!("{name} in {}", file.display()),
    })
}
