use sluice_config::CapabilityRequirement;
use thiserror::Error;

/// A requirement that could not be satisfied, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingCapability {
  pub requirement: CapabilityRequirement,
  pub reason: String,
}

impl std::fmt::Display for MissingCapability {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} ({})", self.requirement, self.reason)
  }
}

/// Errors that can occur while gating a packet on its dependencies.
#[derive(Debug, Error)]
pub enum DependencyError {
  /// One or more declared capabilities are unavailable.
  #[error("missing dependencies: {}", format_missing(.0))]
  Missing(Vec<MissingCapability>),

  /// The registry itself could not be read.
  #[error("registry error: {0}")]
  Registry(#[from] sluice_registry::RegistryError),
}

impl DependencyError {
  pub fn missing(&self) -> &[MissingCapability] {
    match self {
      DependencyError::Missing(missing) => missing,
      DependencyError::Registry(_) => &[],
    }
  }
}

fn format_missing(missing: &[MissingCapability]) -> String {
  missing
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join(", ")
}
