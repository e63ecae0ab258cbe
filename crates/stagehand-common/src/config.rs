//! Global configuration model for stagehand.
//!
//! The configuration is built once at process start and handed to the
//! cgroup and unit-emission layers explicitly; nothing reads it through a
//! global.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StagehandError};

/// Root configuration for stagehand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagehandConfig {
    /// Environment every app receives unless it declares the key itself.
    ///
    /// Order is preserved when writing environment files.
    pub default_env: Vec<(String, String)>,
    /// Capabilities every app retains in addition to its declared set.
    pub default_capabilities: Vec<String>,
    /// Host cgroup root probed to decide whether a controller is usable.
    pub cgroup_root: PathBuf,
    /// Location of the kernel controller listing.
    pub proc_cgroups: PathBuf,
    /// Prefix prepended to the pod UUID to form the machine name.
    pub machine_prefix: String,
}

impl Default for StagehandConfig {
    fn default() -> Self {
        Self {
            default_env: [
                ("PATH", "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"),
                ("SHELL", "/bin/sh"),
                ("USER", "root"),
                ("LOGNAME", "root"),
                ("HOME", "/root"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            default_capabilities: [
                "CAP_AUDIT_WRITE",
                "CAP_CHOWN",
                "CAP_DAC_OVERRIDE",
                "CAP_FSETID",
                "CAP_FOWNER",
                "CAP_KILL",
                "CAP_MKNOD",
                "CAP_NET_RAW",
                "CAP_NET_BIND_SERVICE",
                "CAP_SETUID",
                "CAP_SETGID",
                "CAP_SETPCAP",
                "CAP_SETFCAP",
                "CAP_SYS_CHROOT",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            cgroup_root: PathBuf::from(crate::constants::CGROUP_ROOT),
            proc_cgroups: PathBuf::from(crate::constants::PROC_CGROUPS),
            machine_prefix: crate::constants::DEFAULT_MACHINE_PREFIX.to_string(),
        }
    }
}

impl StagehandConfig {
    /// Loads a configuration from a JSON file; missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| StagehandError::io(path, e))?;
        let config = serde_json::from_str(&data)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_env_starts_with_path() {
        let config = StagehandConfig::default();
        assert_eq!(config.default_env[0].0, "PATH");
        assert_eq!(config.default_env.len(), 5);
    }

    #[test]
    fn default_capabilities_are_restricted() {
        let config = StagehandConfig::default();
        assert_eq!(config.default_capabilities.len(), 14);
        assert!(!config.default_capabilities.iter().any(|c| c == "CAP_SYS_ADMIN"));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"machine_prefix": "pod-"}"#).unwrap();
        let config = StagehandConfig::load(&path).unwrap();
        assert_eq!(config.machine_prefix, "pod-");
        assert_eq!(config.cgroup_root, PathBuf::from("/sys/fs/cgroup"));
    }
}
