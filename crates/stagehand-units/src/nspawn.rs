//! Sandbox launcher arguments.
//!
//! The launcher needs the pod identity, the stage1 directory and one bind
//! mount per app volume. Mount targets are resolved inside the app root
//! first: the launcher does not cope with symlinked mount targets.

use std::collections::{HashMap, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use stagehand_common::constants::SHARED_VOLUMES_MODE;
use stagehand_common::error::{Result, ResultExt, StagehandError};
use stagehand_common::manifest::{Mount, MountPoint, Pod, RuntimeApp, Volume, VolumeKind};
use stagehand_core::capability::CapabilitySet;
use stagehand_core::filesystem::{join_under, resolve::resolve_inside_root, set_owner};

use crate::paths;

/// Permissions of an `empty` volume that does not declare any.
const DEFAULT_EMPTY_VOLUME_MODE: &str = "0755";

/// Mounts an app receives: its explicit mounts, then every mount point not
/// already targeted whose name matches a pod volume.
#[must_use]
pub fn generate_mounts(ra: &RuntimeApp, volumes: &HashMap<&str, &Volume>) -> Vec<Mount> {
    let explicit: HashSet<&str> = ra.mounts.iter().map(|m| m.path.as_str()).collect();
    let mut mounts = ra.mounts.clone();
    for mp in &ra.app.mount_points {
        if explicit.contains(mp.path.as_str()) {
            continue;
        }
        if !volumes.contains_key(mp.name.as_str()) {
            tracing::debug!(app = %ra.name, mount_point = %mp.name, "no volume for mount point");
            continue;
        }
        mounts.push(Mount {
            volume: mp.name.clone(),
            path: mp.path.clone(),
        });
    }
    mounts
}

/// A volume's own read-only flag wins; otherwise the mount point named
/// after it decides. Unflagged mounts are writable.
#[must_use]
pub fn is_mount_read_only(volume: &Volume, mount_points: &[MountPoint]) -> bool {
    volume.read_only.unwrap_or_else(|| {
        mount_points
            .iter()
            .find(|mp| mp.name == volume.name)
            .is_some_and(|mp| mp.read_only)
    })
}

/// Renders the launcher arguments for the whole pod.
///
/// # Errors
///
/// Returns an error if a mount references an unknown volume, a mount path
/// escapes its app root, or a volume directory cannot be prepared.
pub fn pod_to_nspawn_args(pod: &Pod, machine_prefix: &str) -> Result<Vec<String>> {
    let mut args = vec![
        format!("--uuid={}", pod.uuid),
        format!("--machine={machine_prefix}{}", pod.uuid),
        format!("--directory={}", paths::stage1_rootfs(&pod.root).display()),
    ];

    let volumes: HashMap<&str, &Volume> = pod
        .manifest
        .volumes
        .iter()
        .map(|v| (v.name.as_str(), v))
        .collect();
    for ra in &pod.manifest.apps {
        args.extend(app_to_nspawn_args(pod, ra, &volumes)?);
    }
    Ok(args)
}

fn app_to_nspawn_args(
    pod: &Pod,
    ra: &RuntimeApp,
    volumes: &HashMap<&str, &Volume>,
) -> Result<Vec<String>> {
    let abs_root =
        std::path::absolute(&pod.root).map_err(|e| StagehandError::io(&pod.root, e))?;
    let shared = paths::shared_volumes_dir(&abs_root);
    std::fs::create_dir_all(&shared)
        .map_err(|e| StagehandError::io(&shared, e))
        .context("could not create shared volumes directory")?;
    std::fs::set_permissions(&shared, std::fs::Permissions::from_mode(SHARED_VOLUMES_MODE))
        .map_err(|e| StagehandError::io(&shared, e))
        .with_context(|| format!("could not change permissions of {}", shared.display()))?;

    let app_root = paths::app_rootfs(&abs_root, &ra.name);
    let rel_root = paths::rel_app_rootfs(&ra.name);
    let mut args = Vec::new();

    for mount in generate_mounts(ra, volumes) {
        let volume = volumes
            .get(mount.volume.as_str())
            .ok_or_else(|| StagehandError::NotFound {
                kind: "volume",
                id: mount.volume.clone(),
            })?;

        let mount_path = resolve_inside_root(&app_root, &mount.path)
            .with_context(|| format!("could not evaluate path {}", mount.path))?;
        let source = match &volume.kind {
            VolumeKind::Host { source } => PathBuf::from(source),
            VolumeKind::Empty { .. } => {
                let dir = shared.join(&volume.name);
                prepare_empty_volume(&dir, volume)?;
                dir
            }
        };
        prepare_mount_target(&join_under(&app_root, &mount_path), &source)?;

        let flag = if is_mount_read_only(volume, &ra.app.mount_points) {
            "--bind-ro="
        } else {
            "--bind="
        };
        args.push(format!(
            "{flag}{}:{}",
            source.display(),
            join_under(Path::new(&rel_root), &mount_path).display()
        ));
    }

    let caps = CapabilitySet::retained_by(&ra.app.isolators);
    args.push(format!("--capability={}", caps.to_comma_list()));
    Ok(args)
}

/// Creates the shared directory behind an `empty` volume with the
/// volume's mode and owner.
fn prepare_empty_volume(dir: &Path, volume: &Volume) -> Result<()> {
    let VolumeKind::Empty { mode, uid, gid } = &volume.kind else {
        return Ok(());
    };
    let mode_str = mode.as_deref().unwrap_or(DEFAULT_EMPTY_VOLUME_MODE);
    let mode = u32::from_str_radix(mode_str, 8).map_err(|_| {
        StagehandError::config(format!(
            "invalid mode {mode_str:?} for volume {:?}",
            volume.name
        ))
    })?;

    tracing::debug!(volume = %volume.name, path = %dir.display(), "creating empty volume");
    std::fs::create_dir_all(dir).map_err(|e| StagehandError::io(dir, e))?;
    set_owner(dir, uid.unwrap_or(0), gid.unwrap_or(0))?;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode))
        .map_err(|e| StagehandError::io(dir, e))
}

/// Creates a missing mount target: an empty file when the source is a file,
/// a directory otherwise.
fn prepare_mount_target(target: &Path, source: &Path) -> Result<()> {
    if std::fs::symlink_metadata(target).is_ok() {
        return Ok(());
    }
    if source.is_file() {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StagehandError::io(parent, e))?;
        }
        let _file = std::fs::File::create(target).map_err(|e| StagehandError::io(target, e))?;
        Ok(())
    } else {
        std::fs::create_dir_all(target).map_err(|e| StagehandError::io(target, e))
    }
}
