//! Stage1 flavor and supervisor version detection.
//!
//! The flavor is the target of the `flavor` symlink in the stage1 rootfs.
//! Every flavor except `host` ships its own supervisor and records its
//! version in `systemd-version` (a tag such as `v229` or a branch name);
//! the `host` flavor runs the host's `systemctl`, so its version is asked
//! from the binary.

use std::path::Path;

use stagehand_common::constants::{FLAVOR_FILE, SYSTEMD_VERSION_FILE};
use stagehand_common::error::{Result, ResultExt, StagehandError};

/// Flavor that runs the host's supervisor.
pub const HOST_FLAVOR: &str = "host";

/// Flavor carrying the shutdown fixes regardless of its version.
pub const COREOS_FLAVOR: &str = "coreos";

/// Oldest supervisor version accepting `systemctl exit` as PID 1.
const EXIT_VERB_MIN_VERSION: u32 = 227;

/// The stage1 flavor together with its supervisor version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flavor {
    /// Flavor name.
    pub name: String,
    /// Supervisor version; `0` when it could not be determined.
    pub systemd_version: u32,
}

impl Flavor {
    /// Detects the flavor of the stage1 rootfs.
    ///
    /// A non-empty `requested` name takes precedence over the marker symlink.
    ///
    /// # Errors
    ///
    /// Returns an error if the flavor marker, the version marker or the host
    /// `systemctl` cannot be read.
    pub fn detect(stage1_rootfs: &Path, requested: Option<&str>) -> Result<Self> {
        let name = match requested.filter(|f| !f.is_empty()) {
            Some(f) => f.to_string(),
            None => {
                let marker = stage1_rootfs.join(FLAVOR_FILE);
                std::fs::read_link(&marker)
                    .map_err(|e| StagehandError::io(&marker, e))
                    .context("unable to determine stage1 flavor")?
                    .to_string_lossy()
                    .into_owned()
            }
        };

        let systemd_version = if name == HOST_FLAVOR {
            host_systemd_version().context("error finding systemctl version")?
        } else {
            let marker = stage1_rootfs.join(SYSTEMD_VERSION_FILE);
            let raw = std::fs::read_to_string(&marker)
                .map_err(|e| StagehandError::io(&marker, e))
                .context("unable to determine stage1's systemd version")?;
            parse_version_marker(&raw)?
        };

        tracing::debug!(flavor = %name, systemd_version, "stage1 flavor detected");
        Ok(Self {
            name,
            systemd_version,
        })
    }

    /// `systemctl` verb that stops the pod: `halt` for known versions too old
    /// for `exit` (unless coreos), `exit` otherwise.
    #[must_use]
    pub fn shutdown_verb(&self) -> &'static str {
        if self.name != COREOS_FLAVOR
            && self.systemd_version != 0
            && self.systemd_version < EXIT_VERB_MIN_VERSION
        {
            "halt"
        } else {
            "exit"
        }
    }
}

/// Parses a version marker such as `v229`.
///
/// The first character is dropped and the rest read as a number. A marker
/// that is not a number (a branch name) yields `0`.
///
/// # Errors
///
/// Returns an error only for a number too large to represent.
pub fn parse_version_marker(raw: &str) -> Result<u32> {
    let trimmed = raw.trim_matches([' ', '\n']);
    let digits: String = trimmed.chars().skip(1).collect();
    match digits.parse::<u32>() {
        Ok(v) => Ok(v),
        Err(e) if matches!(e.kind(), std::num::IntErrorKind::PosOverflow) => Err(
            StagehandError::config(format!("error parsing stage1's systemd version {trimmed:?}")),
        ),
        Err(_) => Ok(0),
    }
}

/// Parses the first line of `systemctl --version`, e.g. `systemd 229`.
///
/// # Errors
///
/// Returns a configuration error if the line does not have that shape.
pub fn parse_systemctl_version(output: &str) -> Result<u32> {
    let first = output.lines().next().unwrap_or_default();
    first
        .strip_prefix("systemd ")
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| {
            StagehandError::config(format!("cannot parse systemctl version from {first:?}"))
        })
}

fn host_systemd_version() -> Result<u32> {
    let systemctl = which::which("systemctl").map_err(|e| StagehandError::NotFound {
        kind: "executable",
        id: format!("systemctl ({e})"),
    })?;
    let output = std::process::Command::new(&systemctl)
        .arg("--version")
        .output()
        .map_err(|e| StagehandError::io(&systemctl, e))?;
    parse_systemctl_version(&String::from_utf8_lossy(&output.stdout))
}
