//! Discovery of the cgroup controllers compiled into the running kernel.
//!
//! `/proc/cgroups` lists one controller per line together with the id of
//! the hierarchy it is attached to. Controllers sharing an id are mounted
//! together under a comma-joined name such as `cpu,cpuacct`.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use stagehand_common::error::{Result, ResultExt, StagehandError};
use stagehand_common::types::ResourceKind;

/// Knob that must stay writable in every app cgroup so the supervisor can place processes.
pub const CGROUP_PROCS: &str = "cgroup.procs";

/// Enabled controllers grouped by kernel hierarchy id.
///
/// Controllers keep the order in which the kernel listed them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerCatalog {
    hierarchies: BTreeMap<u32, Vec<String>>,
}

impl ControllerCatalog {
    /// Reads the catalog from a `/proc/cgroups`-format file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or read.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| StagehandError::io(path, e))?;
        Self::parse(BufReader::new(file))
            .with_context(|| format!("error parsing {}", path.display()))
    }

    /// Parses `subsys_name hierarchy num_cgroups enabled` lines.
    ///
    /// The first line is a header and is skipped. Disabled controllers and
    /// lines that do not parse contribute nothing.
    ///
    /// # Errors
    ///
    /// Returns an error only if reading from `reader` fails.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut hierarchies: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for line in reader.lines().skip(1) {
            let line = line.map_err(|e| StagehandError::io("/proc/cgroups", e))?;
            let Some((controller, hierarchy)) = parse_line(&line) else {
                continue;
            };
            hierarchies
                .entry(hierarchy)
                .or_default()
                .push(controller.to_string());
        }
        Ok(Self { hierarchies })
    }

    /// Builds a catalog directly from hierarchy groupings.
    #[must_use]
    pub fn from_hierarchies<I, S>(hierarchies: I) -> Self
    where
        I: IntoIterator<Item = (u32, Vec<S>)>,
        S: Into<String>,
    {
        Self {
            hierarchies: hierarchies
                .into_iter()
                .map(|(id, cs)| (id, cs.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    /// Returns the controllers attached to each hierarchy.
    #[must_use]
    pub const fn hierarchies(&self) -> &BTreeMap<u32, Vec<String>> {
        &self.hierarchies
    }

    /// Returns `true` if no controller is enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hierarchies.is_empty()
    }

    /// Returns the comma-joined mount name of each hierarchy.
    ///
    /// The name doubles as the cgroup mount option and the directory name
    /// under `/sys/fs/cgroup`.
    #[must_use]
    pub fn controller_mount_names(&self) -> Vec<String> {
        self.hierarchies.values().map(|cs| cs.join(",")).collect()
    }

    /// Maps each controller of a joined hierarchy to the joined name.
    ///
    /// Hierarchies with a single controller produce no entry.
    #[must_use]
    pub fn combined_symlinks(&self) -> BTreeMap<String, String> {
        self.hierarchies
            .values()
            .filter(|cs| cs.len() > 1)
            .flat_map(|cs| {
                let joined = cs.join(",");
                cs.iter().map(move |c| (c.clone(), joined.clone()))
            })
            .collect()
    }
}

fn parse_line(line: &str) -> Option<(&str, u32)> {
    let mut fields = line.split_whitespace();
    let controller = fields.next()?;
    let hierarchy = fields.next()?.parse().ok()?;
    let _num_cgroups: u64 = fields.next()?.parse().ok()?;
    let enabled: u8 = fields.next()?.parse().ok()?;
    (enabled == 1).then_some((controller, hierarchy))
}

/// Knobs that must stay writable inside each app cgroup of the named mount.
///
/// The mount name may be joined (`cpu,cpuacct`); the first member with
/// known knobs decides. [`CGROUP_PROCS`] is always added in that case.
/// Mounts with no isolator-backed controller need nothing writable.
#[must_use]
pub fn controller_rw_files(mount_name: &str) -> Vec<&'static str> {
    mount_name
        .split(',')
        .find_map(ResourceKind::from_controller)
        .map(|kind| {
            let mut files = kind.rw_knobs().to_vec();
            files.push(CGROUP_PROCS);
            files
        })
        .unwrap_or_default()
}

/// Returns the caller's cgroup path in the hierarchy containing `controller`.
///
/// # Errors
///
/// Returns an error if `/proc/self/cgroup` cannot be read, is malformed,
/// or does not mention the controller.
pub fn own_cgroup_path(controller: &str) -> Result<String> {
    let path = Path::new(stagehand_common::constants::PROC_SELF_CGROUP);
    let file = std::fs::File::open(path).map_err(|e| StagehandError::io(path, e))?;
    parse_own_cgroup(BufReader::new(file), controller)
}

/// Parses `hierarchy-id:controller-list:path` lines and returns the path for `controller`.
///
/// # Errors
///
/// Returns an error on a malformed line or when the controller is absent.
pub fn parse_own_cgroup<R: BufRead>(reader: R, controller: &str) -> Result<String> {
    for line in reader.lines() {
        let line = line.map_err(|e| StagehandError::io("/proc/self/cgroup", e))?;
        let mut parts = line.splitn(3, ':');
        let (Some(_), Some(controllers), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(StagehandError::config(format!(
                "error parsing /proc/self/cgroup line {line:?}"
            )));
        };
        if controllers.split(',').any(|c| c == controller) {
            return Ok(path.to_string());
        }
    }
    Err(StagehandError::NotFound {
        kind: "controller",
        id: controller.to_string(),
    })
}
