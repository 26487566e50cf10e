//! Sluice Registry
//!
//! Tracks the capabilities (models, plugins, binaries) installed on this host
//! and knows how to install new ones from a package directory.

mod error;
mod fs_registry;
mod manifest;
mod provider;
mod registry;

pub use error::RegistryError;
pub use fs_registry::FsCapabilityRegistry;
pub use manifest::CapabilityManifest;
pub use provider::{CapabilityProvider, MirrorProvider};
pub use registry::{CapabilityRegistry, InstalledCapability};
