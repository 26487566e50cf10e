use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sluice_config::{ConfigError, EngineConfig, StrategyDef, TierDef};

use crate::error::OrchestratorError;

/// A concrete way to run a unit, by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
  pub name: String,
  pub def: StrategyDef,
}

/// The tier a request runs at and the strategy serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
  pub tier: String,
  pub strategy: String,
}

/// Immutable map from quality tier (and packet kind) to execution strategy.
///
/// Built once from configuration and shared read-only.
#[derive(Debug)]
pub struct StrategyMap {
  strategies: HashMap<String, Arc<Strategy>>,
  tiers: HashMap<String, TierDef>,
}

impl StrategyMap {
  pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
    config.validate()?;
    let strategies = config
      .strategies
      .iter()
      .map(|(name, def)| {
        (
          name.clone(),
          Arc::new(Strategy {
            name: name.clone(),
            def: def.clone(),
          }),
        )
      })
      .collect();
    Ok(Self {
      strategies,
      tiers: config.tiers.clone(),
    })
  }

  pub fn strategy(&self, name: &str) -> Option<Arc<Strategy>> {
    self.strategies.get(name).cloned()
  }

  pub fn strategies(&self) -> impl Iterator<Item = &Arc<Strategy>> {
    self.strategies.values()
  }

  pub fn has_tier(&self, tier: &str) -> bool {
    self.tiers.contains_key(tier)
  }

  /// Strategy for `tier`, honouring a per-kind override.
  pub fn select(&self, tier: &str, kind: Option<&str>) -> Result<Selection, OrchestratorError> {
    let def = self
      .tiers
      .get(tier)
      .ok_or_else(|| OrchestratorError::UnknownTier {
        tier: tier.to_string(),
      })?;
    let strategy = kind
      .and_then(|k| def.kinds.get(k))
      .unwrap_or(&def.strategy);
    Ok(Selection {
      tier: tier.to_string(),
      strategy: strategy.clone(),
    })
  }

  /// Tiers below `tier` along its `degrade_to` chain, nearest first.
  pub fn degrade_chain(&self, tier: &str, kind: Option<&str>) -> Vec<Selection> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([tier.to_string()]);
    let mut current = self.tiers.get(tier).and_then(|t| t.degrade_to.clone());
    while let Some(next) = current {
      if !seen.insert(next.clone()) {
        break;
      }
      let Ok(selection) = self.select(&next, kind) else {
        break;
      };
      current = self.tiers.get(&next).and_then(|t| t.degrade_to.clone());
      chain.push(selection);
    }
    chain
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn map() -> StrategyMap {
    let config: EngineConfig = serde_json::from_value(json!({
      "strategies": {
        "gpu": { "command": "run-gpu" },
        "gpu-large": { "command": "run-gpu", "args": ["--large"] },
        "cpu": { "command": "run-cpu", "capacity": 4 }
      },
      "tiers": {
        "final": { "strategy": "gpu", "kinds": { "video": "gpu-large" }, "degrade_to": "preview" },
        "preview": { "strategy": "gpu", "degrade_to": "draft" },
        "draft": { "strategy": "cpu" }
      }
    }))
    .unwrap();
    StrategyMap::from_config(&config).unwrap()
  }

  #[test]
  fn test_select_by_tier() {
    let selection = map().select("draft", Some("image")).unwrap();
    assert_eq!(selection.strategy, "cpu");
  }

  #[test]
  fn test_kind_override() {
    let map = map();
    assert_eq!(map.select("final", Some("video")).unwrap().strategy, "gpu-large");
    assert_eq!(map.select("final", Some("image")).unwrap().strategy, "gpu");
    assert_eq!(map.select("final", None).unwrap().strategy, "gpu");
  }

  #[test]
  fn test_unknown_tier() {
    assert_eq!(
      map().select("ultra", None),
      Err(OrchestratorError::UnknownTier {
        tier: "ultra".to_string()
      })
    );
  }

  #[test]
  fn test_degrade_chain_is_ordered() {
    let chain = map().degrade_chain("final", None);
    let tiers: Vec<&str> = chain.iter().map(|s| s.tier.as_str()).collect();
    assert_eq!(tiers, vec!["preview", "draft"]);
    assert!(map().degrade_chain("draft", None).is_empty());
  }

  #[test]
  fn test_invalid_config_is_rejected() {
    let config: EngineConfig = serde_json::from_value(json!({
      "tiers": { "final": { "strategy": "missing" } }
    }))
    .unwrap();
    assert!(StrategyMap::from_config(&config).is_err());
  }
}
