use serde::{Deserialize, Serialize};
use sluice_config::CapabilityKind;

/// Metadata describing an installed capability (`capability.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityManifest {
  /// Capability name, e.g. "vendor/model-X"
  pub name: String,

  /// Version string, e.g. "1.0"
  pub version: String,

  #[serde(default)]
  pub kind: CapabilityKind,

  #[serde(default)]
  pub description: String,
}

impl CapabilityManifest {
  /// Directory name for this capability: "name--version" with slashes
  /// replaced by double dashes.
  pub fn dir_name(&self) -> String {
    sluice_config::dir_name(&self.name, &self.version)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_dir_name() {
    let manifest = CapabilityManifest {
      name: "vendor/model-X".to_string(),
      version: "1.0".to_string(),
      kind: CapabilityKind::Model,
      description: "Base diffusion model".to_string(),
    };

    assert_eq!(manifest.dir_name(), "vendor--model-X--1.0");
  }

  #[test]
  fn test_kind_defaults_to_model() {
    let manifest: CapabilityManifest =
      serde_json::from_str(r#"{ "name": "upscaler", "version": "2" }"#).unwrap();
    assert_eq!(manifest.kind, CapabilityKind::Model);
    assert!(manifest.description.is_empty());
  }
}
