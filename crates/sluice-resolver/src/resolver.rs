use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use sluice_config::CapabilityRequirement;
use sluice_packet::Packet;
use sluice_registry::{CapabilityProvider, CapabilityRegistry, InstalledCapability, RegistryError};

use crate::error::{DependencyError, MissingCapability};

/// Capability name to the concrete location handed to execution units.
pub type ResolvedCapabilities = BTreeMap<String, PathBuf>;

/// Checks that everything a packet requires is available.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
  /// Resolve every declared capability of `packet`.
  ///
  /// On failure the error lists all unsatisfied requirements, not only the
  /// first one found.
  async fn ensure_ready(&self, packet: &Packet) -> Result<ResolvedCapabilities, DependencyError>;
}

/// Resolver backed by a capability registry and an optional provider for
/// install-on-demand.
pub struct StandardResolver<R: CapabilityRegistry> {
  registry: R,
  provider: Option<Box<dyn CapabilityProvider>>,
  /// Requirements that have already had their one install attempt.
  attempted: Mutex<HashSet<CapabilityRequirement>>,
}

impl<R: CapabilityRegistry> StandardResolver<R> {
  pub fn new(registry: R) -> Self {
    Self {
      registry,
      provider: None,
      attempted: Mutex::new(HashSet::new()),
    }
  }

  pub fn with_provider(mut self, provider: impl CapabilityProvider + 'static) -> Self {
    self.provider = Some(Box::new(provider));
    self
  }

  pub fn registry(&self) -> &R {
    &self.registry
  }

  /// Resolve a single requirement, installing it if allowed.
  async fn resolve_one(
    &self,
    requirement: &CapabilityRequirement,
  ) -> Result<Result<PathBuf, MissingCapability>, RegistryError> {
    if let Some(installed) = self
      .registry
      .get(&requirement.name, Some(&requirement.version))
      .await?
    {
      return Ok(check_kind(requirement, installed));
    }

    let Some(provider) = &self.provider else {
      return Ok(Err(missing(requirement, "not installed")));
    };

    // Installs are serialized so concurrent requests for the same
    // requirement share the single attempt.
    let mut attempted = self.attempted.lock().await;
    if let Some(installed) = self
      .registry
      .get(&requirement.name, Some(&requirement.version))
      .await?
    {
      return Ok(check_kind(requirement, installed));
    }
    if !attempted.insert(requirement.clone()) {
      debug!(capability = %requirement, "install_already_attempted");
      return Ok(Err(missing(
        requirement,
        "not installed; install already attempted",
      )));
    }

    let package = match provider.locate(requirement).await {
      Ok(Some(package)) => package,
      Ok(None) => return Ok(Err(missing(requirement, "not installed; no provider offers it"))),
      Err(e) => {
        warn!(capability = %requirement, error = %e, "capability_locate_failed");
        return Ok(Err(missing(requirement, &format!("provider failed: {e}"))));
      }
    };

    info!(capability = %requirement, package = %package.display(), "capability_install_on_demand");
    match self.registry.install(&package).await {
      Ok(installed)
        if installed.manifest.name == requirement.name
          && installed.manifest.version == requirement.version =>
      {
        Ok(check_kind(requirement, installed))
      }
      Ok(installed) => {
        let e = RegistryError::PackageMismatch {
          expected: requirement.to_string(),
          actual: format!("{}@{}", installed.manifest.name, installed.manifest.version),
        };
        warn!(capability = %requirement, error = %e, "capability_install_failed");
        Ok(Err(missing(requirement, &e.to_string())))
      }
      Err(e) => {
        warn!(capability = %requirement, error = %e, "capability_install_failed");
        Ok(Err(missing(requirement, &format!("install failed: {e}"))))
      }
    }
  }
}

fn missing(requirement: &CapabilityRequirement, reason: &str) -> MissingCapability {
  MissingCapability {
    requirement: requirement.clone(),
    reason: reason.to_string(),
  }
}

fn check_kind(
  requirement: &CapabilityRequirement,
  installed: InstalledCapability,
) -> Result<PathBuf, MissingCapability> {
  if installed.manifest.kind != requirement.kind {
    return Err(missing(
      requirement,
      &format!(
        "installed as {}, required {}",
        installed.manifest.kind, requirement.kind
      ),
    ));
  }
  Ok(installed.location)
}

#[async_trait]
impl<R: CapabilityRegistry> DependencyResolver for StandardResolver<R> {
  #[instrument(skip(self, packet), fields(packet = %packet.id))]
  async fn ensure_ready(&self, packet: &Packet) -> Result<ResolvedCapabilities, DependencyError> {
    let mut resolved = ResolvedCapabilities::new();
    let mut unsatisfied = Vec::new();

    for requirement in &packet.requires {
      match self.resolve_one(requirement).await? {
        Ok(location) => {
          resolved.insert(requirement.name.clone(), location);
        }
        Err(missing) => unsatisfied.push(missing),
      }
    }

    if unsatisfied.is_empty() {
      debug!(count = resolved.len(), "dependencies_ready");
      Ok(resolved)
    } else {
      warn!(missing = unsatisfied.len(), "dependencies_missing");
      Err(DependencyError::Missing(unsatisfied))
    }
  }
}
