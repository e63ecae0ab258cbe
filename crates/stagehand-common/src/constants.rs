//! System-wide constants and well-known pod layout names.
//!
//! The relative paths below are shared with the pod-assembly and
//! sandbox-launch tools, so their shape must not change.

/// Host cgroup v1 mount root, probed to decide controller support.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Kernel listing of compiled-in controllers.
pub const PROC_CGROUPS: &str = "/proc/cgroups";

/// Cgroup membership of the calling process.
pub const PROC_SELF_CGROUP: &str = "/proc/self/cgroup";

/// Pod manifest file, relative to the pod root.
pub const POD_MANIFEST_FILE: &str = "pod";

/// Stage1 root filesystem, relative to the pod root.
pub const STAGE1_ROOTFS_DIR: &str = "stage1/rootfs";

/// Directory holding the per-app stage2 trees, relative to the stage1 rootfs.
pub const STAGE2_DIR: &str = "opt/stage2";

/// Supervisor unit directory, relative to the stage1 rootfs.
pub const UNITS_DIR: &str = "usr/lib/systemd/system";

/// Sysusers declarations directory, relative to the stage1 rootfs.
pub const SYSUSERS_DIR: &str = "usr/lib/sysusers.d";

/// Newline-separated environment files, relative to the stage1 rootfs.
pub const ENV_DIR_SYSTEMD: &str = "rkt/env";

/// NUL-separated environment files, relative to the stage1 rootfs.
pub const ENV_DIR_ENTEREXEC: &str = "rkt/enterexec-env";

/// Shared volumes directory, relative to the pod root.
pub const SHARED_VOLUMES_DIR: &str = "sharedVolumes";

/// Permissions applied to the shared volumes directory.
pub const SHARED_VOLUMES_MODE: u32 = 0o755;

/// Flavor marker (a symlink whose target names the flavor), relative to the stage1 rootfs.
pub const FLAVOR_FILE: &str = "flavor";

/// Systemd version marker, relative to the stage1 rootfs.
pub const SYSTEMD_VERSION_FILE: &str = "systemd-version";

/// Prefix of the machine name handed to the sandbox launcher.
pub const DEFAULT_MACHINE_PREFIX: &str = "rkt-";

/// Application name used in CLI output.
pub const APP_NAME: &str = "stagehand";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "stagehand";
