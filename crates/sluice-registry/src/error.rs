use thiserror::Error;

/// Errors that can occur when working with the capability registry.
#[derive(Debug, Error)]
pub enum RegistryError {
  /// Capability version not found.
  #[error("capability version not found: {name}@{version}")]
  VersionNotFound { name: String, version: String },

  /// IO error when reading/writing capability files.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// Failed to parse capability.json.
  #[error("invalid capability manifest: {0}")]
  InvalidManifest(#[from] serde_json::Error),

  /// Capability already exists in the registry.
  #[error("capability already exists: {name}@{version}")]
  AlreadyExists { name: String, version: String },

  /// The package installed under a different name or version than requested.
  #[error("package provides {actual}, expected {expected}")]
  PackageMismatch { expected: String, actual: String },
}
