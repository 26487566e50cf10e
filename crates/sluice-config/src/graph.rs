//! Graph definition types.
//!
//! A graph is a list of typed nodes. Edges are not listed separately: an
//! input bound to another node's output carries a `$link` placeholder, and
//! the edge set is derived from those links.
//!
//! ```json
//! {
//!   "nodes": [
//!     { "id": "1", "kind": "LoadModel", "inputs": { "ckpt": "base.safetensors" } },
//!     { "id": "3", "kind": "Sampler", "label": "seed_input",
//!       "inputs": { "seed": 0, "model": { "$link": { "node": "1", "output": 0 } } } }
//!   ]
//! }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::param::ParamType;

/// An authored computation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
  pub nodes: Vec<NodeDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  /// Opaque node id, unique within the graph.
  pub id: String,
  /// Node type as understood by the execution unit.
  pub kind: String,
  /// Human-assigned address used by manifest parameters. Carries no
  /// execution semantics.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
  #[serde(default)]
  pub inputs: HashMap<String, InputValue>,
  /// Pinned input types. Inputs not listed here take the type of their
  /// authored literal.
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub input_types: HashMap<String, ParamType>,
}

/// A node input: either a literal value or a reference to another node's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
  Link {
    #[serde(rename = "$link")]
    link: LinkRef,
  },
  Literal(serde_json::Value),
}

impl InputValue {
  pub fn as_link(&self) -> Option<&LinkRef> {
    match self {
      InputValue::Link { link } => Some(link),
      InputValue::Literal(_) => None,
    }
  }

  pub fn as_literal(&self) -> Option<&serde_json::Value> {
    match self {
      InputValue::Literal(value) => Some(value),
      InputValue::Link { .. } => None,
    }
  }
}

/// Edge-bound placeholder: output slot `output` of node `node`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkRef {
  pub node: String,
  #[serde(default)]
  pub output: u32,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_link_and_literal_inputs() {
    let node: NodeDef = serde_json::from_value(json!({
      "id": "3",
      "kind": "Sampler",
      "label": "seed_input",
      "inputs": {
        "seed": 0,
        "model": { "$link": { "node": "1", "output": 2 } }
      }
    }))
    .unwrap();

    assert_eq!(node.label.as_deref(), Some("seed_input"));
    assert_eq!(node.inputs["seed"].as_literal(), Some(&json!(0)));
    assert_eq!(
      node.inputs["model"].as_link(),
      Some(&LinkRef {
        node: "1".to_string(),
        output: 2,
      })
    );
  }

  #[test]
  fn test_plain_object_literal_is_not_a_link() {
    let value: InputValue = serde_json::from_value(json!({ "width": 512 })).unwrap();
    assert_eq!(value.as_literal(), Some(&json!({ "width": 512 })));
  }

  #[test]
  fn test_link_serializes_with_marker() {
    let value = InputValue::Link {
      link: LinkRef {
        node: "1".to_string(),
        output: 0,
      },
    };
    assert_eq!(
      serde_json::to_value(&value).unwrap(),
      json!({ "$link": { "node": "1", "output": 0 } })
    );
  }
}
