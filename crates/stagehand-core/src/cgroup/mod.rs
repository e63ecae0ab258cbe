//! Cgroup v1 tree construction for a pod.
//!
//! The pod sees `/sys/fs/cgroup` as a read-only tmpfs holding one read-only
//! mount per controller hierarchy. Inside each hierarchy, the app cgroups
//! keep the few knobs the supervisor needs bind-mounted over themselves, so
//! they stay writable after the lockdown.
//!
//! Construction is a fixed sequence of [`CgroupPhase`]s. Later read-only
//! remounts rely on the writable bind mounts made earlier, so phases are
//! never skipped or reordered. A failure stops the sequence where it is;
//! nothing is rolled back and the caller must discard the pod root.

pub mod catalog;
pub mod cpuset;
pub mod isolator;

use std::fmt;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use stagehand_common::error::{Result, ResultExt, StagehandError};

use crate::filesystem::join_under;
use crate::filesystem::mount::{MountRequest, Mounter, MsFlags, SECURE_FLAGS};

pub use self::catalog::ControllerCatalog;
pub use self::isolator::{IsolatorMapper, Tunable};

/// Name of the directory left for the sandbox launcher's own hierarchy.
const SYSTEMD_DIR: &str = "systemd";

/// Steps of cgroup tree construction, in order.
///
/// The three controller phases repeat once per hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CgroupPhase {
    /// `<root>/sys` gets a read-only sysfs. Nothing exists yet.
    MountSys,
    /// `<root>/sys/fs/cgroup` gets a writable tmpfs. Requires `/sys`.
    MountCgroupTmpfs,
    /// One hierarchy is mounted under its joined name. The tmpfs must still be writable.
    MountControllers,
    /// App cgroups are created and their knobs bind-mounted over themselves.
    /// The hierarchy must still be writable.
    BindAppKnobs,
    /// The hierarchy is remounted read-only. Every knob bind mount of it must exist.
    RemountControllersReadOnly,
    /// Per-controller aliases of joined hierarchies are linked. The tmpfs must still be writable.
    LinkCombinedControllers,
    /// The empty `systemd` directory is created. The tmpfs must still be writable.
    CreateSystemdDir,
    /// The tmpfs is remounted read-only. Every hierarchy must already be read-only.
    RemountTmpfsReadOnly,
}

impl CgroupPhase {
    /// Returns `true` if `self` may directly follow `prev` (`None` = nothing done yet).
    #[must_use]
    pub const fn may_follow(self, prev: Option<Self>) -> bool {
        matches!(
            (prev, self),
            (None, Self::MountSys)
                | (Some(Self::MountSys), Self::MountCgroupTmpfs)
                | (
                    Some(Self::MountCgroupTmpfs | Self::RemountControllersReadOnly),
                    Self::MountControllers | Self::LinkCombinedControllers
                )
                | (Some(Self::MountControllers), Self::BindAppKnobs)
                | (Some(Self::BindAppKnobs), Self::RemountControllersReadOnly)
                | (Some(Self::LinkCombinedControllers), Self::CreateSystemdDir)
                | (Some(Self::CreateSystemdDir), Self::RemountTmpfsReadOnly)
        )
    }

    const fn name(self) -> &'static str {
        match self {
            Self::MountSys => "mount /sys",
            Self::MountCgroupTmpfs => "mount cgroup tmpfs",
            Self::MountControllers => "mount controller",
            Self::BindAppKnobs => "bind app knobs",
            Self::RemountControllersReadOnly => "remount controller read-only",
            Self::LinkCombinedControllers => "link combined controllers",
            Self::CreateSystemdDir => "create systemd cgroup directory",
            Self::RemountTmpfsReadOnly => "remount cgroup tmpfs read-only",
        }
    }
}

impl fmt::Display for CgroupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Builds the pod's cgroup tree through a [`Mounter`].
#[derive(Debug)]
pub struct CgroupMounter<'a, M: ?Sized> {
    mounter: &'a M,
    catalog: &'a ControllerCatalog,
    phase: Option<CgroupPhase>,
}

impl<'a, M: Mounter + ?Sized> CgroupMounter<'a, M> {
    /// Creates a builder for the hierarchies in `catalog`.
    pub const fn new(mounter: &'a M, catalog: &'a ControllerCatalog) -> Self {
        Self {
            mounter,
            catalog,
            phase: None,
        }
    }

    /// Returns the last phase entered, which is the failing one after an error.
    #[must_use]
    pub const fn phase(&self) -> Option<CgroupPhase> {
        self.phase
    }

    /// Builds `<root>/sys/fs/cgroup`, leaving `<hierarchy>/<subcgroup>/<service>`
    /// writable for every service name.
    ///
    /// # Errors
    ///
    /// Returns the first failure, wrapped with the phase it happened in.
    pub fn build(&mut self, root: &Path, subcgroup: &Path, service_names: &[String]) -> Result<()> {
        let sys = join_under(root, "sys");
        let tmpfs = join_under(root, "sys/fs/cgroup");

        self.enter(CgroupPhase::MountSys)?;
        self.step(|this| {
            create_dir(&sys, 0o700)?;
            this.mounter.mount(&MountRequest::filesystem(
                "sysfs",
                &sys,
                MsFlags::MS_RDONLY | SECURE_FLAGS,
                None,
            ))
        })?;

        self.enter(CgroupPhase::MountCgroupTmpfs)?;
        self.step(|this| {
            create_dir(&tmpfs, 0o700)?;
            this.mounter.mount(&MountRequest::filesystem(
                "tmpfs",
                &tmpfs,
                SECURE_FLAGS | MsFlags::MS_STRICTATIME,
                Some("mode=755"),
            ))
        })?;

        for name in self.catalog.controller_mount_names() {
            let mount_path = tmpfs.join(&name);

            self.enter(CgroupPhase::MountControllers)?;
            self.step(|this| {
                create_dir(&mount_path, 0o700)?;
                this.mounter.mount(&MountRequest::filesystem(
                    "cgroup",
                    &mount_path,
                    SECURE_FLAGS,
                    Some(&name),
                ))?;
                if name == "cpuset" {
                    cpuset::fix_cpuset_knobs(&mount_path);
                }
                Ok(())
            })?;

            self.enter(CgroupPhase::BindAppKnobs)?;
            self.step(|this| {
                let subcgroup_path = join_under(&mount_path, subcgroup);
                this.bind_app_knobs(&name, &subcgroup_path, service_names)
            })?;

            self.enter(CgroupPhase::RemountControllersReadOnly)?;
            self.step(|this| this.mounter.mount(&MountRequest::remount_readonly(&mount_path)))?;

            tracing::debug!(controller = %name, "controller hierarchy locked down");
        }

        self.enter(CgroupPhase::LinkCombinedControllers)?;
        self.step(|this| {
            for (alias, target) in this.catalog.combined_symlinks() {
                let link = tmpfs.join(&alias);
                std::os::unix::fs::symlink(&target, &link)
                    .map_err(|e| StagehandError::io(&link, e))
                    .context("error creating symlink")?;
            }
            Ok(())
        })?;

        self.enter(CgroupPhase::CreateSystemdDir)?;
        self.step(|_| create_dir(&tmpfs.join(SYSTEMD_DIR), 0o700))?;

        self.enter(CgroupPhase::RemountTmpfsReadOnly)?;
        self.step(|this| this.mounter.mount(&MountRequest::remount_readonly(&tmpfs)))?;

        tracing::info!(root = %root.display(), services = service_names.len(), "cgroup tree ready");
        Ok(())
    }

    fn bind_app_knobs(
        &self,
        mount_name: &str,
        subcgroup_path: &Path,
        service_names: &[String],
    ) -> Result<()> {
        let files = catalog::controller_rw_files(mount_name);
        for service in service_names {
            let app_cgroup = subcgroup_path.join(service);
            create_dir(&app_cgroup, 0o755)?;
            for file in &files {
                let knob = app_cgroup.join(file);
                match std::fs::symlink_metadata(&knob) {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        tracing::warn!(
                            knob = %knob.display(),
                            "cgroup knob not available on this kernel, skipping"
                        );
                        continue;
                    }
                    Err(e) => return Err(StagehandError::io(&knob, e)),
                    Ok(_) => {}
                }
                self.mounter
                    .mount(&MountRequest::bind_self(&knob))
                    .with_context(|| format!("error bind mounting {}", knob.display()))?;
            }
        }
        Ok(())
    }

    fn enter(&mut self, next: CgroupPhase) -> Result<()> {
        if !next.may_follow(self.phase) {
            return Err(StagehandError::config(format!(
                "cgroup phase {next} cannot follow {}",
                self.phase.map_or("start", CgroupPhase::name)
            )));
        }
        tracing::trace!(phase = %next, "cgroup phase");
        self.phase = Some(next);
        Ok(())
    }

    fn step<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Self) -> Result<()>,
    {
        let phase = self.phase;
        f(self).with_context(|| {
            format!(
                "cgroup setup failed at phase \"{}\"",
                phase.map_or("start", CgroupPhase::name)
            )
        })
    }
}

/// Reads the kernel catalog and builds the pod's cgroup tree.
///
/// # Errors
///
/// Returns an error if the catalog cannot be read or any phase fails.
pub fn create_cgroups<M: Mounter + ?Sized>(
    mounter: &M,
    proc_cgroups: &Path,
    root: &Path,
    subcgroup: &Path,
    service_names: &[String],
) -> Result<()> {
    let catalog = ControllerCatalog::load(proc_cgroups)?;
    CgroupMounter::new(mounter, &catalog).build(root, subcgroup, service_names)
}

/// Default subcgroup for app services: the caller's `name=systemd` cgroup
/// joined with `system.slice`.
///
/// # Errors
///
/// Returns an error if the caller's cgroup cannot be determined.
pub fn default_subcgroup() -> Result<PathBuf> {
    let own = catalog::own_cgroup_path("name=systemd")?;
    Ok(join_under(Path::new("/"), own).join("system.slice"))
}

fn create_dir(path: &Path, mode: u32) -> Result<()> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .map_err(|e| StagehandError::io(path, e))
}
