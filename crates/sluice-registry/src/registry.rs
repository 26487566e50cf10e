use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::RegistryError;
use crate::manifest::CapabilityManifest;

/// A capability present on this host.
#[derive(Debug, Clone)]
pub struct InstalledCapability {
  /// The capability manifest.
  pub manifest: CapabilityManifest,

  /// Capability directory. This is the concrete location handed to
  /// execution units.
  pub location: PathBuf,
}

/// Registry of installed capabilities.
#[async_trait]
pub trait CapabilityRegistry: Send + Sync {
  /// Get an installed capability by name, optionally at a specific version.
  /// If version is None, returns the latest installed version.
  async fn get(
    &self,
    name: &str,
    version: Option<&str>,
  ) -> Result<Option<InstalledCapability>, RegistryError>;

  /// Install a capability from a package directory containing `capability.json`.
  async fn install(&self, package_path: &Path) -> Result<InstalledCapability, RegistryError>;

  /// List all installed capabilities.
  async fn list(&self) -> Result<Vec<CapabilityManifest>, RegistryError>;

  /// Remove an installed capability.
  async fn remove(&self, name: &str, version: &str) -> Result<(), RegistryError>;
}
