//! `stagehand units` — Render the pod manifest into supervisor units.

use std::path::PathBuf;

use clap::Args;
use stagehand_common::config::StagehandConfig;
use stagehand_common::manifest::Pod;
use stagehand_common::types::PodId;
use stagehand_units::emitter::pod_to_units;

/// Arguments for the `units` command.
#[derive(Args, Debug)]
pub struct UnitsArgs {
    /// Pod directory containing the `pod` manifest.
    #[arg(long)]
    pub root: PathBuf,

    /// Pod UUID.
    #[arg(long)]
    pub uuid: PodId,

    /// Attach apps to the console instead of the journal.
    #[arg(long)]
    pub interactive: bool,

    /// Stage1 flavor overriding the rootfs marker.
    #[arg(long, default_value = "")]
    pub flavor: String,

    /// User-namespace shift as `SHIFT:COUNT`; empty for none.
    #[arg(long, default_value = "")]
    pub private_users: String,

    /// Metadata service URL exported to apps as `AC_METADATA_URL`.
    #[arg(long)]
    pub metadata_url: Option<String>,
}

/// Executes the `units` command.
///
/// # Errors
///
/// Returns an error if the manifest cannot be loaded or any unit fails to
/// render.
pub fn execute(args: UnitsArgs, config: &StagehandConfig) -> anyhow::Result<()> {
    let mut pod = Pod::load(&args.root, args.uuid)?;
    pod.metadata_service_url = args.metadata_url;
    pod_to_units(
        &pod,
        config,
        args.interactive,
        &args.flavor,
        &args.private_users,
    )?;
    Ok(())
}
