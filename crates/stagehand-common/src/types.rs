//! Domain primitive types used across the stagehand workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StagehandError;

/// Unique identifier of a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodId(uuid::Uuid);

impl PodId {
    /// Wraps an existing UUID.
    #[must_use]
    pub const fn new(id: uuid::Uuid) -> Self {
        Self(id)
    }

    /// Generates a random pod ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for PodId {
    type Err = StagehandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| StagehandError::config(format!("invalid pod UUID {s:?}: {e}")))
    }
}

/// Resource isolators that map onto a cgroup controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// CPU bandwidth, expressed in milli-cores.
    Cpu,
    /// Memory limit, expressed in bytes.
    Memory,
}

impl ResourceKind {
    /// Every kind, in the order isolators are reported.
    pub const ALL: [Self; 2] = [Self::Cpu, Self::Memory];

    /// Name of the cgroup controller that enforces this kind.
    #[must_use]
    pub const fn controller(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
        }
    }

    /// Knob files that must stay writable for the supervisor to enforce the limit.
    #[must_use]
    pub const fn rw_knobs(self) -> &'static [&'static str] {
        match self {
            Self::Cpu => &["cpu.cfs_quota_us"],
            Self::Memory => &["memory.limit_in_bytes"],
        }
    }

    /// Looks up the kind enforced by the named controller.
    #[must_use]
    pub fn from_controller(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.controller() == name)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.controller())
    }
}
