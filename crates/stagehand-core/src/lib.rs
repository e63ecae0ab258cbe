//! # stagehand-core
//!
//! Low-level Linux isolation primitives used while launching a pod.
//!
//! This crate provides:
//! - **Cgroups**: controller discovery from `/proc/cgroups`, the read-only
//!   cgroup v1 tree with per-app writable knobs, and isolator mapping.
//! - **Identity**: user/group spec resolution against the app's own
//!   `/etc/passwd` and `/etc/group`, with user-namespace range unshifting.
//! - **Filesystem**: symlink resolution confined to an app root, executable
//!   lookup, and the `mount(2)` seam.
//! - **Capabilities**: the bounding set handed to each app.
//!
//! All mount syscalls go through [`filesystem::mount::Mounter`] so the
//! cgroup state machine can be driven without privileges.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod capability;
pub mod cgroup;
pub mod filesystem;
pub mod identity;
