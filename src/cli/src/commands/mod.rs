//! CLI command definitions and dispatch.

mod component_descriptor;
mod version;

use std::path::{Path, PathBuf};

use canopy_core::config::LogLevel;
use canopy_core::CanopyConfig;
use clap::{Parser, Subcommand};

/// Canopy - installation orchestration over component registries.
#[derive(Parser)]
#[command(name = "canopy", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Work with component descriptors
    #[command(name = "component-descriptor", visible_alias = "cd")]
    ComponentDescriptor(component_descriptor::ComponentDescriptorArgs),
    /// Show version information
    Version(version::VersionArgs),
}

impl Cli {
    /// Configuration file named on the command line, if any.
    pub fn config_path(&self) -> Option<&Path> {
        match &self.command {
            Command::ComponentDescriptor(args) => args.config_path(),
            Command::Version(_) => None,
        }
    }
}

/// Log filter used when `RUST_LOG` is unset: the configured level, or the
/// default one when there is no readable configuration. Configuration
/// errors are left for the command itself to report.
pub fn default_log_filter(config: Option<&Path>) -> &'static str {
    config
        .and_then(|path| CanopyConfig::from_file(path).ok())
        .map(|config| config.log_level)
        .unwrap_or_default()
        .as_str()
}

/// Return the default artifact cache directory (~/.canopy/cache).
pub(crate) fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".canopy"))
        .unwrap_or_else(|| PathBuf::from(".canopy"))
        .join("cache")
}

/// Load the configuration file, or defaults when none is given.
pub(crate) fn load_config(path: Option<&Path>) -> Result<CanopyConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(CanopyConfig::from_file(path)?),
        None => Ok(CanopyConfig::default()),
    }
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::ComponentDescriptor(args) => component_descriptor::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
