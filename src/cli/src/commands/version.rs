//! `canopy version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("canopy version {}", canopy_core::VERSION);
    Ok(())
}
