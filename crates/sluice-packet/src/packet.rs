use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sluice_config::{CapabilityRequirement, GraphDef, ManifestDef, ParamType};

use crate::error::PacketError;
use crate::graph::Graph;

/// Packet identity: `(name, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketId {
  pub name: String,
  pub version: String,
}

impl PacketId {
  pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      version: version.into(),
    }
  }
}

impl std::fmt::Display for PacketId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}@{}", self.name, self.version)
  }
}

/// A manifest parameter resolved against the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
  pub name: String,
  pub label: String,
  pub input_name: String,
  pub param_type: ParamType,
  /// Arena index of the labelled node.
  pub node_index: usize,
}

/// A locked packet: validated graph plus resolved manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
  pub id: PacketId,
  pub kind: Option<String>,
  pub graph: Graph,
  pub requires: Vec<CapabilityRequirement>,
  pub parameters: HashMap<String, Parameter>,
  /// Order in which supplied parameters are applied.
  pub parameter_order: Vec<String>,
  pub outputs: Vec<String>,
}

impl Packet {
  /// Cross-validate a graph and manifest into a locked packet.
  pub fn from_defs(graph: GraphDef, manifest: ManifestDef) -> Result<Self, PacketError> {
    let graph = Graph::from_def(graph)?;

    // Capabilities are addressed by name once resolved.
    let mut required = HashMap::new();
    for requirement in &manifest.requires {
      if let Some(first) = required.insert(requirement.name.as_str(), requirement) {
        return Err(PacketError::DuplicateRequirement {
          name: requirement.name.clone(),
          first: first.version.clone(),
          second: requirement.version.clone(),
        });
      }
    }

    let mut parameters = HashMap::new();
    for (name, binding) in &manifest.parameters {
      let parameter = resolve_parameter(&graph, name, binding)?;
      parameters.insert(name.clone(), parameter);
    }

    let parameter_order = application_order(&parameters, manifest.parameter_order.as_deref())?;

    Ok(Self {
      id: PacketId::new(manifest.name, manifest.version),
      kind: manifest.kind,
      graph,
      requires: manifest.requires,
      parameters,
      parameter_order,
      outputs: manifest.outputs,
    })
  }

  pub fn parameter(&self, name: &str) -> Option<&Parameter> {
    self.parameters.get(name)
  }
}

fn resolve_parameter(
  graph: &Graph,
  name: &str,
  binding: &sluice_config::ParameterBinding,
) -> Result<Parameter, PacketError> {
  let node_index =
    graph
      .index_of_label(&binding.label)
      .ok_or_else(|| PacketError::UnknownLabel {
        parameter: name.to_string(),
        label: binding.label.clone(),
      })?;
  let node = &graph.nodes()[node_index];

  let input = node
    .inputs
    .get(&binding.input_name)
    .ok_or_else(|| PacketError::UnknownInput {
      parameter: name.to_string(),
      label: binding.label.clone(),
      input: binding.input_name.clone(),
    })?;

  if input.as_link().is_some() {
    return Err(PacketError::LinkedInput {
      parameter: name.to_string(),
      label: binding.label.clone(),
      input: binding.input_name.clone(),
    });
  }

  if let Some(expected) = node.expected_type(&binding.input_name)
    && !binding.param_type.fits(expected)
  {
    return Err(PacketError::TypeMismatch {
      parameter: name.to_string(),
      declared: binding.param_type,
      expected,
    });
  }

  Ok(Parameter {
    name: name.to_string(),
    label: binding.label.clone(),
    input_name: binding.input_name.clone(),
    param_type: binding.param_type,
    node_index,
  })
}

/// Unlisted parameters first (by name), then `explicit` in its own order.
///
/// Parameters that target the same input must all be listed explicitly.
fn application_order(
  parameters: &HashMap<String, Parameter>,
  explicit: Option<&[String]>,
) -> Result<Vec<String>, PacketError> {
  let explicit = explicit.unwrap_or_default();

  let mut listed = HashSet::new();
  for name in explicit {
    if !parameters.contains_key(name) {
      return Err(PacketError::UnknownOrderedParameter {
        parameter: name.clone(),
      });
    }
    if !listed.insert(name.as_str()) {
      return Err(PacketError::DuplicateOrderedParameter {
        parameter: name.clone(),
      });
    }
  }

  let mut names: Vec<&String> = parameters.keys().collect();
  names.sort();

  let mut targets: HashMap<(usize, &str), &str> = HashMap::new();
  for name in &names {
    let parameter = &parameters[name.as_str()];
    let target = (parameter.node_index, parameter.input_name.as_str());
    if let Some(first) = targets.insert(target, name.as_str())
      && !(listed.contains(first) && listed.contains(name.as_str()))
    {
      return Err(PacketError::AliasedParameters {
        first: first.to_string(),
        second: name.to_string(),
        label: parameter.label.clone(),
        input: parameter.input_name.clone(),
      });
    }
  }

  let mut order: Vec<String> = names
    .into_iter()
    .filter(|n| !listed.contains(n.as_str()))
    .cloned()
    .collect();
  order.extend(explicit.iter().cloned());
  Ok(order)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn graph() -> GraphDef {
    serde_json::from_value(json!({
      "nodes": [
        { "id": "1", "kind": "LoadModel", "inputs": { "ckpt": "base" } },
        { "id": "3", "kind": "Sampler", "label": "seed_input",
          "inputs": { "seed": 0, "cfg": 7.5, "model": { "$link": { "node": "1" } } } },
        { "id": "6", "kind": "Prompt", "label": "prompt", "inputs": { "text": "a cat" } }
      ]
    }))
    .unwrap()
  }

  fn manifest(parameters: serde_json::Value) -> ManifestDef {
    serde_json::from_value(json!({
      "name": "studio/txt2img",
      "version": "1.0.0",
      "parameters": parameters
    }))
    .unwrap()
  }

  #[test]
  fn test_resolves_parameters() {
    let packet = Packet::from_defs(
      graph(),
      manifest(json!({
        "seed": { "label": "seed_input", "input_name": "seed", "type": "integer" },
        "prompt": { "label": "prompt", "input_name": "text", "type": "string" }
      })),
    )
    .unwrap();

    assert_eq!(packet.id.to_string(), "studio/txt2img@1.0.0");
    let seed = packet.parameter("seed").unwrap();
    assert_eq!(packet.graph.node(seed.node_index).unwrap().id, "3");
    assert_eq!(packet.parameter_order, vec!["prompt", "seed"]);
  }

  #[test]
  fn test_unknown_label() {
    let result = Packet::from_defs(
      graph(),
      manifest(json!({ "seed": { "label": "nope", "input_name": "seed", "type": "integer" } })),
    );
    assert!(matches!(result, Err(PacketError::UnknownLabel { .. })));
  }

  #[test]
  fn test_unknown_input() {
    let result = Packet::from_defs(
      graph(),
      manifest(json!({ "seed": { "label": "seed_input", "input_name": "noise", "type": "integer" } })),
    );
    assert!(matches!(result, Err(PacketError::UnknownInput { .. })));
  }

  #[test]
  fn test_linked_input() {
    let result = Packet::from_defs(
      graph(),
      manifest(json!({ "model": { "label": "seed_input", "input_name": "model", "type": "string" } })),
    );
    assert!(matches!(result, Err(PacketError::LinkedInput { .. })));
  }

  #[test]
  fn test_type_mismatch() {
    let result = Packet::from_defs(
      graph(),
      manifest(json!({ "seed": { "label": "seed_input", "input_name": "seed", "type": "string" } })),
    );
    assert!(matches!(
      result,
      Err(PacketError::TypeMismatch { declared: ParamType::String, expected: ParamType::Integer, .. })
    ));
  }

  #[test]
  fn test_integer_parameter_fits_number_input() {
    let packet = Packet::from_defs(
      graph(),
      manifest(json!({ "cfg": { "label": "seed_input", "input_name": "cfg", "type": "integer" } })),
    );
    assert!(packet.is_ok());
  }

  #[test]
  fn test_aliased_parameters_without_order_is_integrity_error() {
    let result = Packet::from_defs(
      graph(),
      manifest(json!({
        "seed": { "label": "seed_input", "input_name": "seed", "type": "integer" },
        "noise_seed": { "label": "seed_input", "input_name": "seed", "type": "integer" }
      })),
    );
    assert!(matches!(result, Err(PacketError::AliasedParameters { .. })));
  }

  #[test]
  fn test_aliased_parameters_with_explicit_order() {
    let mut manifest = manifest(json!({
      "seed": { "label": "seed_input", "input_name": "seed", "type": "integer" },
      "noise_seed": { "label": "seed_input", "input_name": "seed", "type": "integer" },
      "prompt": { "label": "prompt", "input_name": "text", "type": "string" }
    }));
    manifest.parameter_order = Some(vec!["seed".to_string(), "noise_seed".to_string()]);

    let packet = Packet::from_defs(graph(), manifest).unwrap();
    assert_eq!(packet.parameter_order, vec!["prompt", "seed", "noise_seed"]);
  }

  #[test]
  fn test_capability_required_twice() {
    let mut manifest = manifest(json!({}));
    manifest.requires = serde_json::from_value(json!([
      { "name": "sd-base", "version": "1.0" },
      { "name": "sd-base", "version": "2.0" }
    ]))
    .unwrap();
    let Err(PacketError::DuplicateRequirement { name, first, second }) =
      Packet::from_defs(graph(), manifest)
    else {
      panic!("expected a duplicate requirement error");
    };
    assert_eq!((name.as_str(), first.as_str(), second.as_str()), ("sd-base", "1.0", "2.0"));
  }

  #[test]
  fn test_order_naming_unknown_parameter() {
    let mut manifest = manifest(json!({}));
    manifest.parameter_order = Some(vec!["ghost".to_string()]);
    assert!(matches!(
      Packet::from_defs(graph(), manifest),
      Err(PacketError::UnknownOrderedParameter { .. })
    ));
  }

  #[test]
  fn test_order_listing_parameter_twice() {
    let mut manifest = manifest(json!({
      "seed": { "label": "seed_input", "input_name": "seed", "type": "integer" }
    }));
    manifest.parameter_order = Some(vec!["seed".to_string(), "seed".to_string()]);
    assert!(matches!(
      Packet::from_defs(graph(), manifest),
      Err(PacketError::DuplicateOrderedParameter { .. })
    ));
  }
}
