use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use sluice_config::{GraphDef, ParamType};
use sluice_packet::{Graph, Packet, PacketId, Parameter};
use tracing::debug;

use crate::error::ParameterError;

const LINK_KEY: &str = "$link";

/// A fully materialized graph instance, ready to hand to an execution unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnableGraph {
  packet: PacketId,
  graph: Graph,
  applied: BTreeMap<String, Value>,
}

impl RunnableGraph {
  pub fn packet(&self) -> &PacketId {
    &self.packet
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  /// The parameter values that were written into the graph.
  pub fn applied(&self) -> &BTreeMap<String, Value> {
    &self.applied
  }

  /// Value of `input` on the node carrying `label`, if it is a literal.
  pub fn literal(&self, label: &str, input: &str) -> Option<&Value> {
    let index = self.graph.index_of_label(label)?;
    self.graph.node(index)?.inputs.get(input)?.as_literal()
  }

  /// The graph in its wire format, nodes in dependency order.
  pub fn to_def(&self) -> GraphDef {
    self.graph.to_def()
  }
}

/// Materialize `packet` with the supplied parameter values.
///
/// Every supplied name must be a declared parameter and every value must
/// match the declared type; nothing is written until all values pass.
/// Parameters that are not supplied keep the graph's authored default.
pub fn materialize(
  packet: &Packet,
  values: &HashMap<String, Value>,
) -> Result<RunnableGraph, ParameterError> {
  let mut names: Vec<&String> = values.keys().collect();
  names.sort();
  for name in names {
    let parameter = packet
      .parameter(name)
      .ok_or_else(|| ParameterError::UnknownParameter { name: name.clone() })?;
    check_type(parameter, &values[name])?;
  }

  let mut graph = packet.graph.clone();
  let mut applied = BTreeMap::new();

  for name in &packet.parameter_order {
    let Some(value) = values.get(name) else {
      continue;
    };
    let Some(parameter) = packet.parameter(name) else {
      continue;
    };

    let index = resolve_target(parameter, &graph.nodes_with_label(&parameter.label))?;
    if !graph.set_literal(index, &parameter.input_name, value.clone()) {
      return Err(unresolved(parameter));
    }
    applied.insert(name.clone(), value.clone());
  }

  debug!(packet = %packet.id, applied = applied.len(), "graph_materialized");
  Ok(RunnableGraph {
    packet: packet.id.clone(),
    graph,
    applied,
  })
}

fn check_type(parameter: &Parameter, value: &Value) -> Result<(), ParameterError> {
  if value.as_object().is_some_and(|map| map.contains_key(LINK_KEY)) {
    return Err(ParameterError::LinkValue {
      name: parameter.name.clone(),
    });
  }
  if parameter.param_type.accepts(value) {
    return Ok(());
  }
  Err(ParameterError::TypeMismatch {
    name: parameter.name.clone(),
    expected: parameter.param_type,
    actual: ParamType::of_value(value)
      .map(|t| t.as_str())
      .unwrap_or("null")
      .to_string(),
  })
}

/// Pick the single node a parameter writes to. Ambiguity fails closed.
fn resolve_target(parameter: &Parameter, matches: &[usize]) -> Result<usize, ParameterError> {
  match matches {
    [index] => Ok(*index),
    [] => Err(unresolved(parameter)),
    _ => Err(ParameterError::AmbiguousLabel {
      name: parameter.name.clone(),
      label: parameter.label.clone(),
      count: matches.len(),
    }),
  }
}

fn unresolved(parameter: &Parameter) -> ParameterError {
  ParameterError::UnresolvedTarget {
    name: parameter.name.clone(),
    label: parameter.label.clone(),
    input: parameter.input_name.clone(),
  }
}
