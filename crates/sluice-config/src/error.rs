use thiserror::Error;

/// Errors raised while loading or validating the engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file: {0}")]
  Io(#[from] std::io::Error),

  #[error("invalid config: {0}")]
  Parse(#[from] serde_json::Error),

  /// A tier (or one of its per-kind overrides) names a strategy that is not defined.
  #[error("tier '{tier}' references unknown strategy '{strategy}'")]
  UnknownStrategy { tier: String, strategy: String },

  /// `degrade_to` names a tier that is not defined.
  #[error("tier '{tier}' degrades to unknown tier '{target}'")]
  UnknownDegradeTarget { tier: String, target: String },

  /// Following `degrade_to` links returns to a tier already visited.
  #[error("degrade chain starting at tier '{tier}' loops")]
  DegradeLoop { tier: String },

  #[error("strategy '{strategy}' must have a non-empty command")]
  EmptyCommand { strategy: String },

  #[error("strategy '{strategy}' must have a capacity of at least 1")]
  ZeroCapacity { strategy: String },
}
