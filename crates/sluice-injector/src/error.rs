use sluice_config::ParamType;
use thiserror::Error;

/// Caller-fixable errors in supplied parameter values.
#[derive(Debug, Error, PartialEq)]
pub enum ParameterError {
  /// The manifest declares no parameter with this name.
  #[error("unknown parameter: {name}")]
  UnknownParameter { name: String },

  #[error("parameter '{name}' expects {expected}, got {actual}")]
  TypeMismatch {
    name: String,
    expected: ParamType,
    actual: String,
  },

  /// An object value carrying the `$link` key would be read back as an edge.
  #[error("parameter '{name}' may not carry a '$link' key")]
  LinkValue { name: String },

  /// More than one node carries the parameter's label.
  #[error("parameter '{name}' is ambiguous: {count} nodes are labelled '{label}'")]
  AmbiguousLabel {
    name: String,
    label: String,
    count: usize,
  },

  /// The parameter's target is not a settable input of the graph.
  #[error("parameter '{name}' has no settable target '{label}.{input}'")]
  UnresolvedTarget {
    name: String,
    label: String,
    input: String,
  },
}
