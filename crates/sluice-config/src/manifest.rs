use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::param::ParamType;

/// Packet manifest: declared capabilities, parameter bindings and outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestDef {
  /// Packet name, e.g. "studio/txt2img"
  pub name: String,

  /// Packet version, e.g. "1.2.0"
  pub version: String,

  /// Optional packet kind, used to pick a per-kind strategy within a tier.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub kind: Option<String>,

  /// External capabilities that must be present before execution.
  #[serde(default)]
  pub requires: Vec<CapabilityRequirement>,

  /// Logical parameter name -> the graph input it controls.
  #[serde(default)]
  pub parameters: HashMap<String, ParameterBinding>,

  /// Explicit application order. Required when two parameters target the
  /// same `{label, input_name}`; the later one in this list wins.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parameter_order: Option<Vec<String>>,

  /// Output paths relative to the request's output directory.
  #[serde(default)]
  pub outputs: Vec<String>,
}

/// A named, versioned capability a packet depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityRequirement {
  pub name: String,
  pub version: String,
  #[serde(default)]
  pub kind: CapabilityKind,
}

impl std::fmt::Display for CapabilityRequirement {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}@{}", self.name, self.version)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
  #[default]
  Model,
  Plugin,
  Binary,
}

impl std::fmt::Display for CapabilityKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      CapabilityKind::Model => "model",
      CapabilityKind::Plugin => "plugin",
      CapabilityKind::Binary => "binary",
    })
  }
}

/// Pointer from a logical parameter into the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterBinding {
  pub label: String,
  pub input_name: String,
  #[serde(rename = "type")]
  pub param_type: ParamType,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_minimal_manifest_defaults() {
    let manifest: ManifestDef = serde_json::from_value(json!({
      "name": "studio/txt2img",
      "version": "1.2.0"
    }))
    .unwrap();

    assert!(manifest.requires.is_empty());
    assert!(manifest.parameters.is_empty());
    assert!(manifest.parameter_order.is_none());
    assert!(manifest.outputs.is_empty());
  }

  #[test]
  fn test_parameter_binding_type_field() {
    let manifest: ManifestDef = serde_json::from_value(json!({
      "name": "studio/txt2img",
      "version": "1.2.0",
      "requires": [{ "name": "model-X", "version": "1.0" }],
      "parameters": {
        "seed": { "label": "seed_input", "input_name": "seed", "type": "integer" }
      }
    }))
    .unwrap();

    let seed = &manifest.parameters["seed"];
    assert_eq!(seed.label, "seed_input");
    assert_eq!(seed.param_type, ParamType::Integer);
    assert_eq!(manifest.requires[0].kind, CapabilityKind::Model);
    assert_eq!(manifest.requires[0].to_string(), "model-X@1.0");
  }
}
