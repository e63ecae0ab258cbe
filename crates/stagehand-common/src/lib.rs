//! # stagehand-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the entire stagehand workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and provides the pod manifest model plus the error type
//! that every other crate propagates.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod manifest;
pub mod quantity;
pub mod types;
