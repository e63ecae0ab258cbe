//! Mapping of resource isolators onto supervisor resource directives.
//!
//! Only CPU and memory isolators are enforced through cgroups. A limit is
//! honored when the host exposes every writable knob the controller needs;
//! otherwise the operator is warned and the app starts unconstrained.

use std::path::{Path, PathBuf};

use stagehand_common::error::{Result, StagehandError};
use stagehand_common::manifest::Isolator;
use stagehand_common::quantity::{MAX_MILLI_VALUE, Quantity};
use stagehand_common::types::ResourceKind;

/// A resource directive for the `[Service]` section of an app unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tunable {
    /// Directive name.
    pub key: &'static str,
    /// Directive value.
    pub value: String,
}

/// Translates isolators into tunables, checking host controller support.
#[derive(Debug, Clone)]
pub struct IsolatorMapper {
    cgroup_root: PathBuf,
}

impl IsolatorMapper {
    /// Creates a mapper probing controllers under `cgroup_root`.
    #[must_use]
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
        }
    }

    /// Returns the probed cgroup root.
    #[must_use]
    pub fn cgroup_root(&self) -> &Path {
        &self.cgroup_root
    }

    /// Returns `true` if every writable knob of the controller exists on the host.
    #[must_use]
    pub fn supports_controller(&self, kind: ResourceKind) -> bool {
        kind.rw_knobs().iter().all(|knob| {
            let path = self.cgroup_root.join(kind.controller()).join(knob);
            !matches!(std::fs::metadata(&path), Err(e) if e.kind() == std::io::ErrorKind::NotFound)
        })
    }

    /// Maps one isolator limit to a tunable.
    ///
    /// Returns `Ok(None)` when there is no limit, or when the controller is
    /// unsupported on this kernel (after warning).
    ///
    /// # Errors
    ///
    /// Returns [`StagehandError::CpuLimitExceeded`] for an unrepresentable CPU limit.
    pub fn apply_isolator(
        &self,
        kind: ResourceKind,
        limit: Option<&Quantity>,
    ) -> Result<Option<Tunable>> {
        let Some(limit) = limit else {
            return Ok(None);
        };
        if !self.supports_controller(kind) {
            tracing::warn!(
                isolator = %kind,
                "resource/{kind} isolator set but support disabled in the kernel, skipping"
            );
            return Ok(None);
        }
        tunable_for(kind, limit).map(Some)
    }

    /// Maps an app's isolators to tunables, in declaration order.
    ///
    /// Only the first isolator of each resource kind that declares a limit is
    /// considered; later ones of the same kind are ignored. Isolators without
    /// a limit and non-resource isolators are skipped.
    ///
    /// # Errors
    ///
    /// Returns the first mapping error.
    pub fn map_isolators(&self, isolators: &[Isolator]) -> Result<Vec<Tunable>> {
        let mut seen: Vec<ResourceKind> = Vec::with_capacity(2);
        let mut tunables = Vec::new();
        for isolator in isolators {
            let (kind, limit) = match isolator {
                Isolator::Cpu { limit } => (ResourceKind::Cpu, limit.as_ref()),
                Isolator::Memory { limit } => (ResourceKind::Memory, limit.as_ref()),
                Isolator::CapabilitiesRetain(_) | Isolator::Other { .. } => continue,
            };
            if limit.is_none() {
                continue;
            }
            if seen.contains(&kind) {
                tracing::debug!(isolator = %kind, "duplicate resource isolator ignored");
                continue;
            }
            seen.push(kind);
            if let Some(t) = self.apply_isolator(kind, limit)? {
                tunables.push(t);
            }
        }
        Ok(tunables)
    }
}

impl Default for IsolatorMapper {
    fn default() -> Self {
        Self::new(stagehand_common::constants::CGROUP_ROOT)
    }
}

/// Converts a limit to its directive without probing the host.
///
/// CPU limits are milli-cores turned into a percentage (`1000m` is `100%`,
/// truncated toward zero); memory limits are a byte count.
///
/// # Errors
///
/// Returns [`StagehandError::CpuLimitExceeded`] if a CPU limit is larger than
/// [`MAX_MILLI_VALUE`].
pub fn tunable_for(kind: ResourceKind, limit: &Quantity) -> Result<Tunable> {
    match kind {
        ResourceKind::Cpu => {
            if limit.value() > MAX_MILLI_VALUE {
                return Err(StagehandError::CpuLimitExceeded {
                    limit: limit.to_string(),
                });
            }
            Ok(Tunable {
                key: "CPUQuota",
                value: format!("{}%", limit.milli_value() / 10),
            })
        }
        ResourceKind::Memory => Ok(Tunable {
            key: "MemoryLimit",
            value: limit.value().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_with(controllers: &[ResourceKind]) -> (tempfile::TempDir, IsolatorMapper) {
        let dir = tempfile::tempdir().unwrap();
        for kind in controllers {
            let ctl = dir.path().join(kind.controller());
            std::fs::create_dir_all(&ctl).unwrap();
            for knob in kind.rw_knobs() {
                std::fs::write(ctl.join(knob), "").unwrap();
            }
        }
        let mapper = IsolatorMapper::new(dir.path());
        (dir, mapper)
    }

    #[test]
    fn cpu_millis_become_percent() {
        let t = tunable_for(ResourceKind::Cpu, &Quantity::from_milli(1000)).unwrap();
        assert_eq!(t, Tunable { key: "CPUQuota", value: "100%".into() });
        let t = tunable_for(ResourceKind::Cpu, &Quantity::from_milli(500)).unwrap();
        assert_eq!(t.value, "50%");
        let t = tunable_for(ResourceKind::Cpu, &Quantity::from_milli(15)).unwrap();
        assert_eq!(t.value, "1%");
    }

    #[test]
    fn cpu_over_limit_fails() {
        let q: Quantity = "10E".parse().unwrap();
        let err = tunable_for(ResourceKind::Cpu, &q).unwrap_err();
        assert!(matches!(err, StagehandError::CpuLimitExceeded { .. }));
    }

    #[test]
    fn memory_is_byte_count() {
        let t = tunable_for(ResourceKind::Memory, &Quantity::from_value(104_857_600)).unwrap();
        assert_eq!(t, Tunable { key: "MemoryLimit", value: "104857600".into() });
    }

    #[test]
    fn supports_controller_probes_knobs() {
        let (_dir, mapper) = host_with(&[ResourceKind::Memory]);
        assert!(mapper.supports_controller(ResourceKind::Memory));
        assert!(!mapper.supports_controller(ResourceKind::Cpu));
    }

    #[test]
    fn unsupported_controller_is_skipped() {
        let (_dir, mapper) = host_with(&[]);
        let t = mapper
            .apply_isolator(ResourceKind::Memory, Some(&Quantity::from_value(1024)))
            .unwrap();
        assert!(t.is_none());
    }

    #[test]
    fn absent_limit_is_not_an_error() {
        let (_dir, mapper) = host_with(&[ResourceKind::Cpu]);
        assert!(mapper.apply_isolator(ResourceKind::Cpu, None).unwrap().is_none());
    }

    #[test]
    fn first_isolator_of_each_kind_wins() {
        let (_dir, mapper) = host_with(&[ResourceKind::Cpu, ResourceKind::Memory]);
        let isolators = vec![
            Isolator::Memory { limit: Some(Quantity::from_value(100)) },
            Isolator::CapabilitiesRetain(vec!["CAP_NET_ADMIN".into()]),
            Isolator::Cpu { limit: Some(Quantity::from_milli(250)) },
            Isolator::Memory { limit: Some(Quantity::from_value(200)) },
            Isolator::Cpu { limit: Some(Quantity::from_milli(750)) },
        ];
        let tunables = mapper.map_isolators(&isolators).unwrap();
        assert_eq!(
            tunables,
            vec![
                Tunable { key: "MemoryLimit", value: "100".into() },
                Tunable { key: "CPUQuota", value: "25%".into() },
            ]
        );
    }

    #[test]
    fn isolator_without_limit_does_not_claim_its_kind() {
        let (_dir, mapper) = host_with(&[ResourceKind::Cpu, ResourceKind::Memory]);
        let isolators = vec![
            Isolator::Cpu { limit: None },
            Isolator::Memory { limit: None },
            Isolator::Cpu { limit: Some(Quantity::from_milli(500)) },
            Isolator::Memory { limit: Some(Quantity::from_value(4096)) },
        ];
        let tunables = mapper.map_isolators(&isolators).unwrap();
        assert_eq!(
            tunables,
            vec![
                Tunable { key: "CPUQuota", value: "50%".into() },
                Tunable { key: "MemoryLimit", value: "4096".into() },
            ]
        );
    }
}
