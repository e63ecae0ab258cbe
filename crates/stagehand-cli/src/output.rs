//! Formatted output helpers for CLI commands.
//!
//! Dry runs print the planned mount requests either as aligned text or as
//! a JSON array.

use serde::Serialize;
use stagehand_core::filesystem::mount::{MountRequest, flag_names};

/// Serializable view of one planned mount.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct MountReport {
    /// Zero-based position in the mount sequence.
    pub step: usize,
    /// Mount source.
    pub source: String,
    /// Mount target.
    pub target: String,
    /// Filesystem type, absent for bind and remount operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fstype: Option<String>,
    /// Comma-separated mount options.
    pub options: String,
}

impl MountReport {
    /// Builds the report rows for a recorded mount sequence.
    #[must_use]
    pub fn from_requests(requests: &[MountRequest]) -> Vec<Self> {
        requests
            .iter()
            .enumerate()
            .map(|(step, r)| Self {
                step,
                source: r.source.clone(),
                target: r.target.display().to_string(),
                fstype: r.fstype.clone(),
                options: match &r.data {
                    Some(data) => format!("{},{data}", flag_names(r.flags)),
                    None => flag_names(r.flags),
                },
            })
            .collect()
    }
}

/// Renders report rows as an aligned table with a header line.
#[must_use]
pub fn format_mount_table(rows: &[MountReport]) -> String {
    let mut out = format!(
        "{:<4} {:<8} {:<40} {:<50} {}\n",
        "STEP", "TYPE", "OPTIONS", "TARGET", "SOURCE"
    );
    for r in rows {
        out.push_str(&format!(
            "{:<4} {:<8} {:<40} {:<50} {}\n",
            r.step,
            r.fstype.as_deref().unwrap_or("-"),
            r.options,
            r.target,
            r.source
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use stagehand_core::filesystem::mount::{MsFlags, SECURE_FLAGS};

    use super::*;

    fn requests() -> Vec<MountRequest> {
        vec![
            MountRequest::filesystem(
                "tmpfs",
                Path::new("/pod/sys/fs/cgroup"),
                SECURE_FLAGS | MsFlags::MS_STRICTATIME,
                Some("mode=755"),
            ),
            MountRequest::remount_readonly(Path::new("/pod/sys/fs/cgroup/memory")),
        ]
    }

    #[test]
    fn report_numbers_steps_and_joins_data() {
        let rows = MountReport::from_requests(&requests());
        assert_eq!(rows[0].step, 0);
        assert_eq!(rows[0].options, "nosuid,nodev,noexec,strictatime,mode=755");
        assert_eq!(rows[1].step, 1);
        assert_eq!(rows[1].fstype, None);
        assert_eq!(rows[1].options, "rdonly,nosuid,nodev,noexec,remount,bind");
    }

    #[test]
    fn json_omits_missing_fstype() {
        let rows = MountReport::from_requests(&requests());
        let json = serde_json::to_value(&rows).unwrap();
        assert_eq!(json[0]["fstype"], "tmpfs");
        assert!(json[1].get("fstype").is_none());
        assert_eq!(json[1]["target"], "/pod/sys/fs/cgroup/memory");
    }

    #[test]
    fn table_has_header_and_one_line_per_row() {
        let table = format_mount_table(&MountReport::from_requests(&requests()));
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("STEP"));
        assert!(lines[2].starts_with("1    -"));
    }
}
