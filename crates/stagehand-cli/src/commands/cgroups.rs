//! `stagehand cgroups` — Build the pod's read-only cgroup tree.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use stagehand_common::config::StagehandConfig;
use stagehand_core::cgroup::{create_cgroups, default_subcgroup};
use stagehand_core::filesystem::mount::{RecordingMounter, SyscallMounter};

use crate::output::{MountReport, format_mount_table};

/// Arguments for the `cgroups` command.
#[derive(Args, Debug)]
pub struct CgroupsArgs {
    /// Stage1 root filesystem the tree is built under.
    #[arg(long)]
    pub root: PathBuf,

    /// Subcgroup holding the app services; defaults to the caller's
    /// `name=systemd` cgroup joined with `system.slice`.
    #[arg(long)]
    pub subcgroup: Option<PathBuf>,

    /// Print the planned mounts instead of performing them.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the dry-run plan as JSON.
    #[arg(long, requires = "dry_run")]
    pub json: bool,

    /// Service names whose controller knobs become writable.
    pub services: Vec<String>,
}

/// Executes the `cgroups` command.
///
/// # Errors
///
/// Returns an error if the subcgroup cannot be determined or any mount
/// phase fails.
pub fn execute(args: CgroupsArgs, config: &StagehandConfig) -> anyhow::Result<()> {
    let subcgroup = match args.subcgroup {
        Some(s) => s,
        None => default_subcgroup().context("could not determine the pod subcgroup")?,
    };
    tracing::info!(
        root = %args.root.display(),
        subcgroup = %subcgroup.display(),
        services = args.services.len(),
        dry_run = args.dry_run,
        "building cgroup tree"
    );

    if !args.dry_run {
        create_cgroups(
            &SyscallMounter,
            &config.proc_cgroups,
            &args.root,
            &subcgroup,
            &args.services,
        )?;
        return Ok(());
    }

    let mounter = RecordingMounter::new();
    create_cgroups(
        &mounter,
        &config.proc_cgroups,
        &args.root,
        &subcgroup,
        &args.services,
    )?;
    let rows = MountReport::from_requests(&mounter.requests());
    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print!("{}", format_mount_table(&rows));
    }
    Ok(())
}
