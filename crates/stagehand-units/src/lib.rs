//! # stagehand-units
//!
//! Turns a pod manifest into the files the in-pod supervisor boots from:
//! one service, reaper and (optionally) socket unit per app, the pod-wide
//! shutdown unit and default target, sysusers declarations and environment
//! files. Also renders the sandbox launcher's bind-mount arguments.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod emitter;
pub mod env;
pub mod escape;
pub mod flavor;
pub mod nspawn;
pub mod paths;
pub mod service;
pub mod sysusers;
pub mod unit;

pub use emitter::{RenderOptions, UnitEmitter};
