use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while placing a request, before anything is launched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrchestratorError {
  #[error("unknown quality tier: {tier}")]
  UnknownTier { tier: String },

  /// No slot is free and the capacity policy is `reject`.
  #[error("no capacity for tier '{tier}' (strategy '{strategy}')")]
  CapacityExhausted { tier: String, strategy: String },
}

/// An execution unit could not be started.
#[derive(Debug, Error)]
pub enum LaunchError {
  #[error("failed to prepare {}: {source}", path.display())]
  Prepare {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to render {what}: {source}")]
  Template {
    what: String,
    #[source]
    source: minijinja::Error,
  },

  #[error("failed to spawn '{command}': {source}")]
  Spawn {
    command: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to serialize {what}: {source}")]
  Serialize {
    what: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("{0}")]
  Unavailable(String),
}
