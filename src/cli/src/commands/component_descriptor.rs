//! `canopy component-descriptor` subcommands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use canopy_core::descriptor::{ComponentReference, RepositoryContext};
use canopy_core::{with_deadline, CancellationToken, ComponentDescriptor};
use canopy_runtime::registry::{Keyring, OciDistributionTransport, RegistryManager, RemoteManifestBackend};
use canopy_runtime::ArtifactCache;
use clap::{Args, Subcommand, ValueEnum};

/// Work with component descriptors.
#[derive(Args)]
pub struct ComponentDescriptorArgs {
    #[command(subcommand)]
    pub command: ComponentDescriptorCommand,
}

/// Component descriptor subcommands.
#[derive(Subcommand)]
pub enum ComponentDescriptorCommand {
    /// Fetch a component descriptor from an OCI registry
    Get(GetArgs),
}

#[derive(Args)]
pub struct GetArgs {
    /// Registry base URL (e.g., "registry.example.com/components")
    pub base_url: String,

    /// Component name (e.g., "example.com/ingress")
    pub name: String,

    /// Component version (e.g., "v0.1.0")
    pub version: String,

    /// Configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Artifact cache directory [default: ~/.canopy/cache]
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Keep fetched artifacts in memory only
    #[arg(long, conflicts_with = "cache_dir")]
    pub no_cache: bool,

    /// Talk plain HTTP to the registry
    #[arg(long)]
    pub plain_http: bool,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub output: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Yaml,
    Json,
}

impl ComponentDescriptorArgs {
    pub(super) fn config_path(&self) -> Option<&std::path::Path> {
        match &self.command {
            ComponentDescriptorCommand::Get(args) => args.config.as_deref(),
        }
    }
}

pub async fn execute(args: ComponentDescriptorArgs) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        ComponentDescriptorCommand::Get(args) => get(args).await,
    }
}

async fn get(args: GetArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(args.config.as_deref())?;
    let oci = config.registry.oci.unwrap_or_default();

    let cache = if args.no_cache {
        ArtifactCache::in_memory()
    } else {
        let dir = args
            .cache_dir
            .or_else(|| oci.cache.as_ref().map(|c| c.path.clone()))
            .unwrap_or_else(super::default_cache_dir);
        ArtifactCache::persistent(&dir)?
    };

    let keyring = Keyring::builder()
        .with_config_files(&oci.effective_config_files())
        .build()?;
    let transport = OciDistributionTransport::with_plain_http(args.plain_http || oci.allow_plain_http);

    let mut manager = RegistryManager::new(Arc::new(cache));
    let remote = RemoteManifestBackend::new(
        Arc::new(transport),
        manager.shared_cache(),
        Arc::new(keyring),
    );
    manager.set(remote);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });
    let deadline = with_deadline(&cancel, Duration::from_secs(args.timeout));

    let location = RepositoryContext::oci_registry(&args.base_url);
    let reference = ComponentReference::new(&args.name, &args.version);
    tracing::debug!(location = %location, component = %reference, "Fetching component descriptor");

    let descriptor = manager.resolve(&location, &reference, &deadline).await?;
    print!("{}", render(&descriptor, args.output)?);
    Ok(())
}

fn render(
    descriptor: &ComponentDescriptor,
    format: OutputFormat,
) -> Result<String, Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Yaml => Ok(descriptor.to_yaml()?),
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(descriptor)?)),
    }
}
