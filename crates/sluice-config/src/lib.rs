//! Sluice Config
//!
//! This crate contains the serializable types for sluice. They describe
//! packets as authored (graph and manifest, before load-time validation) and
//! the engine configuration (execution strategies, quality tiers, supervision
//! and relay policy).
//!
//! Packets are read from a directory per `(name, version)`:
//! ```text
//! {packets_dir}/
//! └── studio--txt2img--1.2.0/
//!     ├── graph.json
//!     └── manifest.json
//! ```
//!
//! The packet store takes these definitions, cross-validates them and builds
//! the locked, read-only packet used by the rest of the engine.

mod engine;
mod error;
mod graph;
mod manifest;
mod param;

pub use engine::{
  CapacityPolicy, DisconnectPolicy, EngineConfig, RelayConfig, StrategyDef, SupervisionConfig,
  TierDef,
};
pub use error::ConfigError;
pub use graph::{GraphDef, InputValue, LinkRef, NodeDef};
pub use manifest::{CapabilityKind, CapabilityRequirement, ManifestDef, ParameterBinding};
pub use param::ParamType;

/// Directory name for a `(name, version)` pair: slashes in the name become
/// double dashes, then `--{version}` is appended.
///
/// Example: `"studio/txt2img"` version `"1.2.0"` becomes
/// `"studio--txt2img--1.2.0"`.
pub fn dir_name(name: &str, version: &str) -> String {
  let sanitized_name = name.replace('/', "--");
  format!("{}--{}", sanitized_name, version)
}

/// Parse a directory name into `(name, version)`.
///
/// The last `--` separates the version, and the first `--` of what remains
/// (if any) is the organization separator.
pub fn parse_dir_name(dir_name: &str) -> Option<(String, String)> {
  let last_sep = dir_name.rfind("--")?;
  let name_part = &dir_name[..last_sep];
  let version = &dir_name[last_sep + 2..];
  if name_part.is_empty() || version.is_empty() {
    return None;
  }

  let name = if let Some(first_sep) = name_part.find("--") {
    format!(
      "{}/{}",
      &name_part[..first_sep],
      &name_part[first_sep + 2..]
    )
  } else {
    name_part.to_string()
  };

  Some((name, version.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_dir_name_with_org() {
    assert_eq!(dir_name("studio/txt2img", "1.2.0"), "studio--txt2img--1.2.0");
  }

  #[test]
  fn test_dir_name_round_trips_through_parse() {
    let parsed = parse_dir_name(&dir_name("studio/txt2img", "1.2.0"));
    assert_eq!(
      parsed,
      Some(("studio/txt2img".to_string(), "1.2.0".to_string()))
    );
  }

  #[test]
  fn test_parse_dir_name_without_org() {
    assert_eq!(
      parse_dir_name("upscaler--2.1.0"),
      Some(("upscaler".to_string(), "2.1.0".to_string()))
    );
  }

  #[test]
  fn test_parse_dir_name_invalid() {
    assert_eq!(parse_dir_name("no-version-here"), None);
    assert_eq!(parse_dir_name("trailing--"), None);
  }
}
