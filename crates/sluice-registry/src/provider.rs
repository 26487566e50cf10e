use std::path::PathBuf;

use async_trait::async_trait;
use sluice_config::CapabilityRequirement;

use crate::error::RegistryError;

/// A source that can supply installable packages for missing capabilities.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
  /// Locate a package directory for `requirement`.
  ///
  /// Returns `Ok(None)` when this provider does not know the capability.
  async fn locate(
    &self,
    requirement: &CapabilityRequirement,
  ) -> Result<Option<PathBuf>, RegistryError>;
}

/// Provider backed by a local package mirror laid out like the registry:
/// `{root}/{name--version}/capability.json`.
pub struct MirrorProvider {
  root: PathBuf,
}

impl MirrorProvider {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }
}

#[async_trait]
impl CapabilityProvider for MirrorProvider {
  async fn locate(
    &self,
    requirement: &CapabilityRequirement,
  ) -> Result<Option<PathBuf>, RegistryError> {
    let package = self
      .root
      .join(sluice_config::dir_name(&requirement.name, &requirement.version));
    if tokio::fs::try_exists(package.join("capability.json")).await? {
      Ok(Some(package))
    } else {
      Ok(None)
    }
  }
}
