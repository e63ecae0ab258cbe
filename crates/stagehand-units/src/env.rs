//! Per-app environment files.
//!
//! Two copies are written for every app: a newline-separated one for the
//! supervisor's `EnvironmentFile=` and a NUL-separated one for the helper
//! that enters a running app. Values are written verbatim.

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use stagehand_common::error::{Result, StagehandError};
use stagehand_common::manifest::Environment;
use stagehand_core::identity::UidRange;

/// Record terminator of an environment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// `\n`, for the supervisor.
    Newline,
    /// `\0`, for the enter helper.
    Nul,
}

impl Separator {
    const fn byte(self) -> u8 {
        match self {
            Self::Newline => b'\n',
            Self::Nul => b'\0',
        }
    }
}

/// Renders `KEY=VALUE<sep>` records.
///
/// Defaults come first, in configuration order, for every key the app
/// does not declare; the app's own variables follow in declaration order.
#[must_use]
pub fn render(defaults: &[(String, String)], env: &Environment, sep: Separator) -> Vec<u8> {
    let records = defaults
        .iter()
        .filter(|(k, _)| env.get(k).is_none())
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .chain(env.iter().map(|e| (e.name.as_str(), e.value.as_str())));

    let mut out = Vec::new();
    for (k, v) in records {
        out.extend_from_slice(k.as_bytes());
        out.push(b'=');
        out.extend_from_slice(v.as_bytes());
        out.push(sep.byte());
    }
    out
}

/// Writes an environment file, handing it to the namespace root owner when
/// `range` is defined.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be written or chowned.
pub fn write_env_file(
    path: &Path,
    defaults: &[(String, String)],
    env: &Environment,
    sep: Separator,
    range: &UidRange,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StagehandError::io(parent, e))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .map_err(|e| StagehandError::io(path, e))?;
    file.write_all(&render(defaults, env, sep))
        .map_err(|e| StagehandError::io(path, e))?;

    if range.is_defined() {
        stagehand_core::filesystem::set_owner(path, range.shift, range.shift)?;
    }
    Ok(())
}
