//! Mount utilities for pod filesystem setup.
//!
//! Every `mount(2)` issued while building the pod goes through the
//! [`Mounter`] trait. [`SyscallMounter`] performs the real call;
//! [`RecordingMounter`] only records requests, which backs dry runs and
//! lets the cgroup state machine be exercised without privileges.

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};

pub use nix::mount::MsFlags;
use stagehand_common::error::{Result, StagehandError};

/// `nosuid,nodev,noexec`, shared by every pseudo-filesystem mount.
pub const SECURE_FLAGS: MsFlags = MsFlags::MS_NOSUID
    .union(MsFlags::MS_NODEV)
    .union(MsFlags::MS_NOEXEC);

/// Flags of a read-only bind remount with [`SECURE_FLAGS`].
pub const READONLY_REMOUNT_FLAGS: MsFlags = SECURE_FLAGS
    .union(MsFlags::MS_BIND)
    .union(MsFlags::MS_REMOUNT)
    .union(MsFlags::MS_RDONLY);

/// Renders flags as lowercase `mount(8)`-style names without the `MS_`
/// prefix, e.g. `rdonly,nosuid`; `defaults` when empty.
#[must_use]
pub fn flag_names(flags: MsFlags) -> String {
    let names: Vec<String> = flags
        .iter_names()
        .map(|(name, _)| name.trim_start_matches("MS_").to_ascii_lowercase())
        .collect();
    if names.is_empty() {
        "defaults".to_string()
    } else {
        names.join(",")
    }
}

/// One `mount(2)` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// Mount source (device, filesystem name, or bind source).
    pub source: String,
    /// Mount target.
    pub target: PathBuf,
    /// Filesystem type, `None` for bind and remount operations.
    pub fstype: Option<String>,
    /// Mount flags.
    pub flags: MsFlags,
    /// Filesystem-specific data.
    pub data: Option<String>,
}

impl MountRequest {
    /// A fresh mount of a virtual filesystem.
    #[must_use]
    pub fn filesystem(fstype: &str, target: &Path, flags: MsFlags, data: Option<&str>) -> Self {
        Self {
            source: fstype.to_string(),
            target: target.to_path_buf(),
            fstype: Some(fstype.to_string()),
            flags,
            data: data.map(String::from),
        }
    }

    /// A bind mount of `target` over itself.
    #[must_use]
    pub fn bind_self(target: &Path) -> Self {
        Self {
            source: target.display().to_string(),
            target: target.to_path_buf(),
            fstype: None,
            flags: MsFlags::MS_BIND,
            data: None,
        }
    }

    /// A read-only bind remount of `target`.
    #[must_use]
    pub fn remount_readonly(target: &Path) -> Self {
        Self {
            source: target.display().to_string(),
            target: target.to_path_buf(),
            fstype: None,
            flags: READONLY_REMOUNT_FLAGS,
            data: None,
        }
    }
}

impl fmt::Display for MountRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mount -t {} -o {}",
            self.fstype.as_deref().unwrap_or("none"),
            flag_names(self.flags)
        )?;
        if let Some(data) = &self.data {
            write!(f, ",{data}")?;
        }
        write!(f, " {} {}", self.source, self.target.display())
    }
}

/// Issues mount requests.
pub trait Mounter {
    /// Performs one mount.
    ///
    /// # Errors
    ///
    /// Returns [`StagehandError::Mount`] if the kernel rejects the request.
    fn mount(&self, request: &MountRequest) -> Result<()>;
}

/// Mounter that calls `mount(2)` directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyscallMounter;

impl Mounter for SyscallMounter {
    fn mount(&self, request: &MountRequest) -> Result<()> {
        nix::mount::mount(
            Some(request.source.as_str()),
            &request.target,
            request.fstype.as_deref(),
            request.flags,
            request.data.as_deref(),
        )
        .map_err(|e| StagehandError::Mount {
            target: request.target.clone(),
            source: std::io::Error::from(e),
        })?;
        tracing::debug!(request = %request, "mounted");
        Ok(())
    }
}
