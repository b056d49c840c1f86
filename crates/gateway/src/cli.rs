//! Command-line interface for the gateway binary.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use weft_domain::config::Config;

#[derive(Debug, Parser)]
#[command(name = "weft", about = "Timeline gateway for the weft agent workstation")]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "weft.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway server (the default).
    Serve,
    /// Inspect or validate the configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version and exit.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and report issues.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

/// Load the config file (defaults apply when it does not exist).
pub fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("loading config from {}", path.display()))
}
