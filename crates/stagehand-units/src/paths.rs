//! Pod filesystem layout.
//!
//! These locations are shared with the tools that assemble the pod and
//! launch the sandbox; their shape must not change.

use std::path::{Path, PathBuf};

use stagehand_common::constants::{
    ENV_DIR_ENTEREXEC, ENV_DIR_SYSTEMD, SHARED_VOLUMES_DIR, STAGE1_ROOTFS_DIR, STAGE2_DIR,
    SYSUSERS_DIR, UNITS_DIR,
};

use crate::escape::unit_path_escape;

/// Root filesystem of the stage1 image.
#[must_use]
pub fn stage1_rootfs(root: &Path) -> PathBuf {
    root.join(STAGE1_ROOTFS_DIR)
}

/// Directory holding every generated unit.
#[must_use]
pub fn units_dir(root: &Path) -> PathBuf {
    stage1_rootfs(root).join(UNITS_DIR)
}

/// App root filesystem as seen from inside stage1, e.g. `/opt/stage2/web/rootfs`.
#[must_use]
pub fn rel_app_rootfs(app: &str) -> String {
    format!("/{STAGE2_DIR}/{app}/rootfs")
}

/// App root filesystem on the host.
#[must_use]
pub fn app_rootfs(root: &Path, app: &str) -> PathBuf {
    stage1_rootfs(root).join(STAGE2_DIR).join(app).join("rootfs")
}

/// `<app>.service`.
#[must_use]
pub fn service_unit_name(app: &str) -> String {
    format!("{app}.service")
}

/// `<app>.socket`.
#[must_use]
pub fn socket_unit_name(app: &str) -> String {
    format!("{app}.socket")
}

/// `reaper-<app>.service`.
#[must_use]
pub fn reaper_unit_name(app: &str) -> String {
    format!("reaper-{app}.service")
}

/// Host path of the app's service unit.
#[must_use]
pub fn service_unit_path(root: &Path, app: &str) -> PathBuf {
    units_dir(root).join(service_unit_name(app))
}

/// Host path of the app's socket unit.
#[must_use]
pub fn socket_unit_path(root: &Path, app: &str) -> PathBuf {
    units_dir(root).join(socket_unit_name(app))
}

/// Host path of the app's reaper unit.
#[must_use]
pub fn reaper_unit_path(root: &Path, app: &str) -> PathBuf {
    units_dir(root).join(reaper_unit_name(app))
}

/// Symlink pulling the app's service into the default target.
#[must_use]
pub fn service_want_path(root: &Path, app: &str) -> PathBuf {
    units_dir(root)
        .join("default.target.wants")
        .join(service_unit_name(app))
}

/// Symlink pulling the app's socket into the sockets target.
#[must_use]
pub fn socket_want_path(root: &Path, app: &str) -> PathBuf {
    units_dir(root)
        .join("sockets.target.wants")
        .join(socket_unit_name(app))
}

/// Instance of the prepare-app template for this app's root filesystem.
#[must_use]
pub fn instantiated_prepare_app_unit_name(app: &str) -> String {
    format!("prepare-app@{}.service", unit_path_escape(&rel_app_rootfs(app)))
}

/// Newline-separated environment file read by the supervisor.
#[must_use]
pub fn env_file_systemd(root: &Path, app: &str) -> PathBuf {
    stage1_rootfs(root).join(ENV_DIR_SYSTEMD).join(app)
}

/// NUL-separated environment file read by the enter helper.
#[must_use]
pub fn env_file_enterexec(root: &Path, app: &str) -> PathBuf {
    stage1_rootfs(root).join(ENV_DIR_ENTEREXEC).join(app)
}

/// Supervisor environment file as seen from inside stage1.
#[must_use]
pub fn rel_env_file_systemd(app: &str) -> String {
    format!("/{ENV_DIR_SYSTEMD}/{app}")
}

/// Directory of sysusers declarations.
#[must_use]
pub fn sysusers_dir(root: &Path) -> PathBuf {
    stage1_rootfs(root).join(SYSUSERS_DIR)
}

/// The app's sysusers declaration file.
#[must_use]
pub fn sysusers_file(root: &Path, app: &str) -> PathBuf {
    sysusers_dir(root).join(format!("{}.conf", service_unit_name(app)))
}

/// Directory backing the pod's `empty` volumes.
#[must_use]
pub fn shared_volumes_dir(root: &Path) -> PathBuf {
    root.join(SHARED_VOLUMES_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_stable() {
        let root = Path::new("/var/lib/pods/p1");
        assert_eq!(
            app_rootfs(root, "web"),
            PathBuf::from("/var/lib/pods/p1/stage1/rootfs/opt/stage2/web/rootfs")
        );
        assert_eq!(
            service_want_path(root, "web"),
            PathBuf::from(
                "/var/lib/pods/p1/stage1/rootfs/usr/lib/systemd/system/default.target.wants/web.service"
            )
        );
        assert_eq!(
            sysusers_file(root, "web"),
            PathBuf::from("/var/lib/pods/p1/stage1/rootfs/usr/lib/sysusers.d/web.service.conf")
        );
        assert_eq!(rel_env_file_systemd("web"), "/rkt/env/web");
        assert_eq!(
            shared_volumes_dir(root),
            PathBuf::from("/var/lib/pods/p1/sharedVolumes")
        );
    }

    #[test]
    fn prepare_app_instance_is_path_escaped() {
        assert_eq!(
            instantiated_prepare_app_unit_name("web"),
            "prepare-app@opt-stage2-web-rootfs.service"
        );
    }
}
