//! Component registry resolution.
//!
//! - `reference`: canonical OCI references of component descriptors
//! - `credentials`: registry credentials from docker configs and pull secrets
//! - `transport`: OCI distribution transport seam
//! - `local` / `remote`: the two backend kinds
//! - `manager`: dispatch over the configured backends

pub mod credentials;
pub mod local;
pub mod manager;
pub mod reference;
pub mod remote;
pub mod transport;

pub use credentials::{AnonymousResolver, CredentialResolver, Keyring, KeyringBuilder, RegistryAuth};
pub use local::LocalFilesystemBackend;
pub use manager::{RegistryBackend, RegistryManager};
pub use reference::{build_reference, reference_string, DescriptorReference};
pub use remote::RemoteManifestBackend;
pub use transport::{FetchedManifest, OciDistributionTransport, OciTransport};
