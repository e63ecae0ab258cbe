//! Workaround for unconfigured `cpuset` child cgroups.
//!
//! A fresh `system.slice` under the cpuset controller starts with empty
//! `cpuset.mems` and `cpuset.cpus`, which makes any task placement fail.
//! The values are copied from the parent. Older kernels drop the first
//! write, so each value is written twice.

use std::path::Path;

const SLICE: &str = "system.slice";
const KNOBS: [&str; 2] = ["cpuset.mems", "cpuset.cpus"];

/// Makes sure `<cpuset_mount>/system.slice` exists with usable knobs.
///
/// Best effort: every failure is logged and ignored. Knobs that already
/// hold a value, or whose parent value cannot be read, are left alone.
pub fn fix_cpuset_knobs(cpuset_mount: &Path) {
    let slice = cpuset_mount.join(SLICE);
    if let Err(e) = std::fs::create_dir_all(&slice) {
        tracing::debug!(path = %slice.display(), error = %e, "cannot create cpuset slice");
    }

    for knob in KNOBS {
        let child = slice.join(knob);
        let Ok(current) = std::fs::read_to_string(&child) else {
            continue;
        };
        if !current.trim().is_empty() {
            continue;
        }
        let Ok(parent) = std::fs::read(cpuset_mount.join(knob)) else {
            continue;
        };
        for _ in 0..2 {
            if let Err(e) = std::fs::write(&child, &parent) {
                tracing::debug!(knob, error = %e, "cpuset knob write failed");
            }
        }
        tracing::debug!(knob, "cpuset knob copied from parent");
    }
}
