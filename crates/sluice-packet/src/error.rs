use std::path::PathBuf;

use sluice_config::ParamType;
use thiserror::Error;

/// Errors raised while loading a packet.
///
/// Everything except [`PacketError::NotFound`] is an integrity error: the
/// packet as authored is malformed and stays rejected until it is corrected.
#[derive(Debug, Error)]
pub enum PacketError {
  #[error("packet not found: {name}@{version}")]
  NotFound { name: String, version: String },

  #[error("failed to read {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid {file}: {source}")]
  Parse {
    file: String,
    #[source]
    source: serde_json::Error,
  },

  /// The manifest describes a different packet than the one requested.
  #[error("manifest declares {actual}, expected {expected}")]
  IdentityMismatch { expected: String, actual: String },

  #[error("duplicate node id: {node_id}")]
  DuplicateNodeId { node_id: String },

  #[error("label '{label}' is used by nodes '{first}' and '{second}'")]
  DuplicateLabel {
    label: String,
    first: String,
    second: String,
  },

  #[error("input '{input}' of node '{node_id}' links to unknown node '{target}'")]
  UnknownLink {
    node_id: String,
    input: String,
    target: String,
  },

  #[error("cycle detected in packet graph")]
  CycleDetected,

  /// An authored input is `null`, so the graph has no default for it.
  #[error("input '{input}' of node '{node_id}' has no default value")]
  MissingDefault { node_id: String, input: String },

  /// Resolved capabilities are keyed by name, so each name may appear once.
  #[error("capability '{name}' is required at both {first} and {second}")]
  DuplicateRequirement {
    name: String,
    first: String,
    second: String,
  },

  #[error("parameter '{parameter}' references unknown label '{label}'")]
  UnknownLabel { parameter: String, label: String },

  #[error("parameter '{parameter}' references unknown input '{input}' on node labelled '{label}'")]
  UnknownInput {
    parameter: String,
    label: String,
    input: String,
  },

  /// Parameters may only replace literal inputs, not edge-bound ones.
  #[error("parameter '{parameter}' targets edge-bound input '{input}' on node labelled '{label}'")]
  LinkedInput {
    parameter: String,
    label: String,
    input: String,
  },

  #[error("parameter '{parameter}' is declared {declared} but its input expects {expected}")]
  TypeMismatch {
    parameter: String,
    declared: ParamType,
    expected: ParamType,
  },

  /// Two parameters write the same input and the manifest gives no order.
  #[error(
    "parameters '{first}' and '{second}' both target '{label}.{input}' without an explicit parameter_order"
  )]
  AliasedParameters {
    first: String,
    second: String,
    label: String,
    input: String,
  },

  #[error("parameter_order names unknown parameter '{parameter}'")]
  UnknownOrderedParameter { parameter: String },

  #[error("parameter_order lists '{parameter}' more than once")]
  DuplicateOrderedParameter { parameter: String },
}

impl PacketError {
  /// Whether this error means the packet itself is malformed.
  pub fn is_integrity(&self) -> bool {
    !matches!(self, PacketError::NotFound { .. })
  }
}
