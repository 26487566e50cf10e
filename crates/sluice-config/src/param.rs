use serde::{Deserialize, Serialize};

/// Value type of a manifest parameter or a graph input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
  String,
  Integer,
  Number,
  Boolean,
  Array,
  Object,
}

impl ParamType {
  /// The type an authored literal carries. `null` has no type.
  pub fn of_value(value: &serde_json::Value) -> Option<Self> {
    match value {
      serde_json::Value::Null => None,
      serde_json::Value::Bool(_) => Some(ParamType::Boolean),
      serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Some(ParamType::Integer),
      serde_json::Value::Number(_) => Some(ParamType::Number),
      serde_json::Value::String(_) => Some(ParamType::String),
      serde_json::Value::Array(_) => Some(ParamType::Array),
      serde_json::Value::Object(_) => Some(ParamType::Object),
    }
  }

  /// Whether a supplied value is acceptable for this type.
  ///
  /// No coercion happens: `"42"` is not an integer.
  pub fn accepts(&self, value: &serde_json::Value) -> bool {
    match (self, value) {
      (ParamType::String, serde_json::Value::String(_)) => true,
      (ParamType::Integer, serde_json::Value::Number(n)) => n.is_i64() || n.is_u64(),
      (ParamType::Number, serde_json::Value::Number(_)) => true,
      (ParamType::Boolean, serde_json::Value::Bool(_)) => true,
      (ParamType::Array, serde_json::Value::Array(_)) => true,
      (ParamType::Object, serde_json::Value::Object(_)) => true,
      _ => false,
    }
  }

  /// Whether values of this type may be written into an input expecting `expected`.
  ///
  /// Integers widen to numbers; nothing else widens.
  pub fn fits(&self, expected: ParamType) -> bool {
    *self == expected || (*self == ParamType::Integer && expected == ParamType::Number)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ParamType::String => "string",
      ParamType::Integer => "integer",
      ParamType::Number => "number",
      ParamType::Boolean => "boolean",
      ParamType::Array => "array",
      ParamType::Object => "object",
    }
  }
}

impl std::fmt::Display for ParamType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}
