//! CLI command definitions and dispatch.

pub mod cgroups;
pub mod nspawn_args;
pub mod units;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use stagehand_common::config::StagehandConfig;

/// Stagehand: pod launch helper.
#[derive(Parser, Debug)]
#[command(name = "stagehand", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// JSON configuration file; built-in defaults apply when absent.
    #[arg(long, global = true, env = "STAGEHAND_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Log output formats.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the pod's read-only cgroup tree.
    Cgroups(cgroups::CgroupsArgs),
    /// Render the pod manifest into supervisor units.
    Units(units::UnitsArgs),
    /// Print the sandbox launcher arguments, one per line.
    NspawnArgs(nspawn_args::NspawnArgsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => StagehandConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => StagehandConfig::default(),
    };
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Command::Cgroups(args) => cgroups::execute(args, &config),
        Command::Units(args) => units::execute(args, &config),
        Command::NspawnArgs(args) => nspawn_args::execute(&args, &config),
    }
}
