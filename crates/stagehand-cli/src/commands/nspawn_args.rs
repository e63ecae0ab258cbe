//! `stagehand nspawn-args` — Print the sandbox launcher arguments.

use std::path::PathBuf;

use clap::Args;
use stagehand_common::config::StagehandConfig;
use stagehand_common::manifest::Pod;
use stagehand_common::types::PodId;
use stagehand_units::nspawn::pod_to_nspawn_args;

/// Arguments for the `nspawn-args` command.
#[derive(Args, Debug)]
pub struct NspawnArgsArgs {
    /// Pod directory containing the `pod` manifest.
    #[arg(long)]
    pub root: PathBuf,

    /// Pod UUID.
    #[arg(long)]
    pub uuid: PodId,

    /// Print the arguments as a JSON array.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `nspawn-args` command.
///
/// Volume directories are prepared as a side effect, so the command is
/// meant to run right before the launcher.
///
/// # Errors
///
/// Returns an error if the manifest cannot be loaded or a mount cannot be
/// prepared.
pub fn execute(args: &NspawnArgsArgs, config: &StagehandConfig) -> anyhow::Result<()> {
    let pod = Pod::load(&args.root, args.uuid)?;
    let launcher_args = pod_to_nspawn_args(&pod, &config.machine_prefix)?;
    if args.json {
        println!("{}", serde_json::to_string(&launcher_args)?);
    } else {
        for arg in &launcher_args {
            println!("{arg}");
        }
    }
    Ok(())
}
