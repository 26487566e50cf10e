use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use sluice_config::{GraphDef, InputValue, NodeDef, ParamType};

use crate::error::PacketError;

/// A node in the arena.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
  pub id: String,
  pub kind: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
  pub inputs: HashMap<String, InputValue>,
  #[serde(skip_serializing_if = "HashMap::is_empty")]
  pub input_types: HashMap<String, ParamType>,
}

impl Node {
  /// The type an input expects: the pinned type if declared, otherwise the
  /// type of the authored literal. Edge-bound inputs have no literal type.
  pub fn expected_type(&self, input: &str) -> Option<ParamType> {
    if let Some(pinned) = self.input_types.get(input) {
      return Some(*pinned);
    }
    self
      .inputs
      .get(input)
      .and_then(InputValue::as_literal)
      .and_then(ParamType::of_value)
  }
}

/// A derived edge: output `output` of `from` feeds input `input` of `to`.
/// Endpoints are arena indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
  pub from: usize,
  pub output: u32,
  pub to: usize,
  pub input: String,
}

/// Graph stored as a dense node arena with id and label indexes.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
  nodes: Vec<Node>,
  by_id: HashMap<String, usize>,
  by_label: HashMap<String, usize>,
  edges: Vec<Edge>,
  /// Arena indexes in dependency order.
  order: Vec<usize>,
}

impl Graph {
  /// Build and validate a graph from its definition.
  ///
  /// Checks, in order: unique ids, unique labels, link targets, authored
  /// defaults and acyclicity.
  pub fn from_def(def: GraphDef) -> Result<Self, PacketError> {
    let mut nodes = Vec::with_capacity(def.nodes.len());
    let mut by_id = HashMap::new();
    let mut by_label: HashMap<String, usize> = HashMap::new();

    for (index, node_def) in def.nodes.into_iter().enumerate() {
      let NodeDef {
        id,
        kind,
        label,
        inputs,
        input_types,
      } = node_def;

      if by_id.insert(id.clone(), index).is_some() {
        return Err(PacketError::DuplicateNodeId { node_id: id });
      }

      if let Some(label) = &label
        && let Some(&first) = by_label.get(label)
      {
        let first: &Node = &nodes[first];
        return Err(PacketError::DuplicateLabel {
          label: label.clone(),
          first: first.id.clone(),
          second: id,
        });
      }
      if let Some(label) = &label {
        by_label.insert(label.clone(), index);
      }

      nodes.push(Node {
        id,
        kind,
        label,
        inputs,
        input_types,
      });
    }

    let edges = Self::derive_edges(&nodes, &by_id)?;
    Self::check_defaults(&nodes)?;
    let order = Self::topological_order(nodes.len(), &edges).ok_or(PacketError::CycleDetected)?;

    Ok(Self {
      nodes,
      by_id,
      by_label,
      edges,
      order,
    })
  }

  /// Resolve every `$link` input into an edge.
  fn derive_edges(nodes: &[Node], by_id: &HashMap<String, usize>) -> Result<Vec<Edge>, PacketError> {
    let mut edges = Vec::new();
    for (to, node) in nodes.iter().enumerate() {
      for (input, value) in &node.inputs {
        if let Some(link) = value.as_link() {
          let from = by_id
            .get(&link.node)
            .copied()
            .ok_or_else(|| PacketError::UnknownLink {
              node_id: node.id.clone(),
              input: input.clone(),
              target: link.node.clone(),
            })?;
          edges.push(Edge {
            from,
            output: link.output,
            to,
            input: input.clone(),
          });
        }
      }
    }
    Ok(edges)
  }

  fn check_defaults(nodes: &[Node]) -> Result<(), PacketError> {
    for node in nodes {
      for (input, value) in &node.inputs {
        if matches!(value, InputValue::Literal(serde_json::Value::Null)) {
          return Err(PacketError::MissingDefault {
            node_id: node.id.clone(),
            input: input.clone(),
          });
        }
      }
    }
    Ok(())
  }

  /// Kahn's algorithm. Returns `None` when the edges contain a cycle.
  fn topological_order(node_count: usize, edges: &[Edge]) -> Option<Vec<usize>> {
    let mut in_degree = vec![0usize; node_count];
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    for edge in edges {
      in_degree[edge.to] += 1;
      downstream[edge.from].push(edge.to);
    }

    let mut ready: VecDeque<usize> = (0..node_count).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(node_count);

    while let Some(index) = ready.pop_front() {
      order.push(index);
      for &next in &downstream[index] {
        in_degree[next] -= 1;
        if in_degree[next] == 0 {
          ready.push_back(next);
        }
      }
    }

    (order.len() == node_count).then_some(order)
  }

  pub fn nodes(&self) -> &[Node] {
    &self.nodes
  }

  pub fn node(&self, index: usize) -> Option<&Node> {
    self.nodes.get(index)
  }

  /// Get a node by its id.
  pub fn get_node(&self, node_id: &str) -> Option<&Node> {
    self.by_id.get(node_id).map(|&i| &self.nodes[i])
  }

  /// Arena index of the node carrying `label`, from the load-time index.
  pub fn index_of_label(&self, label: &str) -> Option<usize> {
    self.by_label.get(label).copied()
  }

  /// Every arena index whose node carries `label`, found by scanning the
  /// arena rather than trusting the index.
  pub fn nodes_with_label(&self, label: &str) -> Vec<usize> {
    self
      .nodes
      .iter()
      .enumerate()
      .filter(|(_, n)| n.label.as_deref() == Some(label))
      .map(|(i, _)| i)
      .collect()
  }

  pub fn edges(&self) -> &[Edge] {
    &self.edges
  }

  /// Node ids in dependency order (every node after the nodes it links to).
  pub fn execution_order(&self) -> Vec<&str> {
    self
      .order
      .iter()
      .map(|&i| self.nodes[i].id.as_str())
      .collect()
  }

  /// Upstream node ids for a given node.
  pub fn upstream(&self, node_id: &str) -> Vec<&str> {
    let Some(&index) = self.by_id.get(node_id) else {
      return Vec::new();
    };
    self
      .edges
      .iter()
      .filter(|e| e.to == index)
      .map(|e| self.nodes[e.from].id.as_str())
      .collect()
  }

  /// Replace a literal input on the node at `index`.
  ///
  /// Returns `false` (and leaves the graph untouched) if the node or input
  /// does not exist or the input is edge-bound.
  pub fn set_literal(&mut self, index: usize, input: &str, value: serde_json::Value) -> bool {
    let Some(slot) = self
      .nodes
      .get_mut(index)
      .and_then(|n| n.inputs.get_mut(input))
    else {
      return false;
    };
    if slot.as_link().is_some() {
      return false;
    }
    *slot = InputValue::Literal(value);
    true
  }

  /// Inputs whose value is missing (`null`). Empty for every loaded graph;
  /// kept as a check on materialized instances.
  pub fn missing_inputs(&self) -> Vec<(String, String)> {
    let mut missing = Vec::new();
    for node in &self.nodes {
      for (input, value) in &node.inputs {
        if matches!(value, InputValue::Literal(serde_json::Value::Null)) {
          missing.push((node.id.clone(), input.clone()));
        }
      }
    }
    missing
  }

  /// Back to the authored wire format, nodes in dependency order.
  pub fn to_def(&self) -> GraphDef {
    GraphDef {
      nodes: self
        .order
        .iter()
        .map(|&i| {
          let node = &self.nodes[i];
          NodeDef {
            id: node.id.clone(),
            kind: node.kind.clone(),
            label: node.label.clone(),
            inputs: node.inputs.clone(),
            input_types: node.input_types.clone(),
          }
        })
        .collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn graph(value: serde_json::Value) -> Result<Graph, PacketError> {
    Graph::from_def(serde_json::from_value(value).unwrap())
  }

  fn chain() -> serde_json::Value {
    json!({
      "nodes": [
        { "id": "save", "kind": "Save", "inputs": { "images": { "$link": { "node": "sample" } } } },
        { "id": "load", "kind": "LoadModel", "inputs": { "ckpt": "base" } },
        { "id": "sample", "kind": "Sampler", "label": "seed_input",
          "inputs": { "seed": 0, "model": { "$link": { "node": "load", "output": 0 } } } }
      ]
    })
  }

  #[test]
  fn test_builds_label_index_and_edges() {
    let graph = graph(chain()).unwrap();

    assert_eq!(graph.nodes().len(), 3);
    assert_eq!(graph.edges().len(), 2);
    let index = graph.index_of_label("seed_input").unwrap();
    assert_eq!(graph.node(index).unwrap().id, "sample");
    assert_eq!(graph.nodes_with_label("seed_input"), vec![index]);
    assert_eq!(graph.upstream("sample"), vec!["load"]);
  }

  #[test]
  fn test_execution_order_respects_links() {
    let graph = graph(chain()).unwrap();
    assert_eq!(graph.execution_order(), vec!["load", "sample", "save"]);
  }

  #[test]
  fn test_duplicate_node_id() {
    let result = graph(json!({
      "nodes": [
        { "id": "a", "kind": "K" },
        { "id": "a", "kind": "K" }
      ]
    }));
    assert!(matches!(result, Err(PacketError::DuplicateNodeId { .. })));
  }

  #[test]
  fn test_duplicate_label() {
    let result = graph(json!({
      "nodes": [
        { "id": "a", "kind": "K", "label": "x" },
        { "id": "b", "kind": "K", "label": "x" }
      ]
    }));
    assert!(matches!(
      result,
      Err(PacketError::DuplicateLabel { first, second, .. }) if first == "a" && second == "b"
    ));
  }

  #[test]
  fn test_unknown_link() {
    let result = graph(json!({
      "nodes": [
        { "id": "a", "kind": "K", "inputs": { "x": { "$link": { "node": "ghost" } } } }
      ]
    }));
    assert!(matches!(result, Err(PacketError::UnknownLink { .. })));
  }

  #[test]
  fn test_cycle() {
    let result = graph(json!({
      "nodes": [
        { "id": "a", "kind": "K", "inputs": { "x": { "$link": { "node": "b" } } } },
        { "id": "b", "kind": "K", "inputs": { "x": { "$link": { "node": "a" } } } }
      ]
    }));
    assert!(matches!(result, Err(PacketError::CycleDetected)));
  }

  #[test]
  fn test_null_literal_has_no_default() {
    let result = graph(json!({
      "nodes": [ { "id": "a", "kind": "K", "inputs": { "prompt": null } } ]
    }));
    assert!(matches!(result, Err(PacketError::MissingDefault { .. })));
  }

  #[test]
  fn test_expected_type_prefers_pinned() {
    let graph = graph(json!({
      "nodes": [ { "id": "a", "kind": "K", "inputs": { "cfg": 7, "steps": 20 },
                   "input_types": { "cfg": "number" } } ]
    }))
    .unwrap();
    let node = graph.get_node("a").unwrap();
    assert_eq!(node.expected_type("cfg"), Some(ParamType::Number));
    assert_eq!(node.expected_type("steps"), Some(ParamType::Integer));
    assert_eq!(node.expected_type("missing"), None);
  }

  #[test]
  fn test_set_literal_refuses_links() {
    let mut graph = graph(chain()).unwrap();
    let index = graph.index_of_label("seed_input").unwrap();

    assert!(graph.set_literal(index, "seed", json!(42)));
    assert!(!graph.set_literal(index, "model", json!("x")));
    assert!(!graph.set_literal(index, "missing", json!(1)));
    assert_eq!(
      graph.node(index).unwrap().inputs["seed"].as_literal(),
      Some(&json!(42))
    );
  }

  #[test]
  fn test_to_def_round_trips() {
    let graph = graph(chain()).unwrap();
    let rebuilt = Graph::from_def(graph.to_def()).unwrap();
    assert_eq!(rebuilt.execution_order(), graph.execution_order());
    assert!(rebuilt.missing_inputs().is_empty());
  }
}
