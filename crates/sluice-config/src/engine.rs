//! Engine configuration.
//!
//! Read from `sluice.json` in the data directory. Every field has a default,
//! so an empty object (or a missing file) is a valid configuration with no
//! strategies.
//!
//! ```json
//! {
//!   "strategies": {
//!     "gpu": { "command": "python3", "args": ["run.py", "{{ graph_path }}"], "capacity": 1 }
//!   },
//!   "tiers": {
//!     "final": { "strategy": "gpu", "degrade_to": "draft" },
//!     "draft": { "strategy": "cpu" }
//!   },
//!   "capacity_policy": "queue"
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Packet directory. Relative paths are resolved against the data directory.
  pub packets_dir: PathBuf,
  /// Installed capabilities.
  pub capabilities_dir: PathBuf,
  /// Local package mirror used for install-on-demand.
  pub packages_dir: PathBuf,
  /// Shared data area handed to execution units.
  pub data_area: PathBuf,
  pub strategies: HashMap<String, StrategyDef>,
  pub tiers: HashMap<String, TierDef>,
  pub capacity_policy: CapacityPolicy,
  pub supervision: SupervisionConfig,
  pub relay: RelayConfig,
  /// Number of terminal execution records kept for status queries and
  /// idempotent resubmission.
  pub history_limit: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      packets_dir: PathBuf::from("packets"),
      capabilities_dir: PathBuf::from("capabilities"),
      packages_dir: PathBuf::from("packages"),
      data_area: PathBuf::from("data"),
      strategies: HashMap::new(),
      tiers: HashMap::new(),
      capacity_policy: CapacityPolicy::default(),
      supervision: SupervisionConfig::default(),
      relay: RelayConfig::default(),
      history_limit: 1024,
    }
  }
}

impl EngineConfig {
  /// Read and validate a configuration file.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: EngineConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
  }

  /// Read a configuration file, falling back to the defaults when it does not exist.
  pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
    if path.exists() {
      Self::from_file(path)
    } else {
      Ok(Self::default())
    }
  }

  /// Resolve relative directories against `base`.
  pub fn with_base_dir(mut self, base: &Path) -> Self {
    for dir in [
      &mut self.packets_dir,
      &mut self.capabilities_dir,
      &mut self.packages_dir,
      &mut self.data_area,
    ] {
      if dir.is_relative() {
        *dir = base.join(&*dir);
      }
    }
    self
  }

  /// Check cross-references between tiers and strategies.
  pub fn validate(&self) -> Result<(), ConfigError> {
    for (name, strategy) in &self.strategies {
      if strategy.command.trim().is_empty() {
        return Err(ConfigError::EmptyCommand {
          strategy: name.clone(),
        });
      }
      if strategy.capacity == 0 {
        return Err(ConfigError::ZeroCapacity {
          strategy: name.clone(),
        });
      }
    }

    for (tier_name, tier) in &self.tiers {
      let referenced = std::iter::once(&tier.strategy).chain(tier.kinds.values());
      for strategy in referenced {
        if !self.strategies.contains_key(strategy) {
          return Err(ConfigError::UnknownStrategy {
            tier: tier_name.clone(),
            strategy: strategy.clone(),
          });
        }
      }

      if let Some(target) = &tier.degrade_to
        && !self.tiers.contains_key(target)
      {
        return Err(ConfigError::UnknownDegradeTarget {
          tier: tier_name.clone(),
          target: target.clone(),
        });
      }
    }

    for tier_name in self.tiers.keys() {
      let mut seen = HashSet::from([tier_name.as_str()]);
      let mut current = tier_name.as_str();
      while let Some(next) = self
        .tiers
        .get(current)
        .and_then(|t| t.degrade_to.as_deref())
      {
        if !seen.insert(next) {
          return Err(ConfigError::DegradeLoop {
            tier: tier_name.clone(),
          });
        }
        current = next;
      }
    }

    Ok(())
  }
}

/// How to launch an execution unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDef {
  /// Program to run.
  pub command: String,
  /// Arguments; each is a minijinja template.
  #[serde(default)]
  pub args: Vec<String>,
  /// Extra environment; values are minijinja templates.
  #[serde(default)]
  pub env: HashMap<String, String>,
  /// Concurrent execution slots for this strategy.
  #[serde(default = "default_capacity")]
  pub capacity: usize,
  /// Overrides `supervision.max_silence_ms` for units of this strategy.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_silence_ms: Option<u64>,
}

fn default_capacity() -> usize {
  1
}

/// A quality tier: which strategy serves it and where it may degrade to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierDef {
  pub strategy: String,
  /// Per packet-kind strategy overrides.
  #[serde(default)]
  pub kinds: HashMap<String, String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub degrade_to: Option<String>,
}

/// What to do when the requested tier has no free slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityPolicy {
  /// Wait in `Queued` until a slot frees.
  #[default]
  Queue,
  /// Try the `degrade_to` chain, announcing the substitution; queue if nothing is free.
  Degrade,
  /// Reject the submission.
  Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisionConfig {
  /// Fail a unit that sends no progress signal for this long.
  pub max_silence_ms: u64,
  /// Time between the graceful termination signal and the forced kill.
  pub cancel_grace_ms: u64,
  /// Launch attempts after the first one.
  pub launch_retries: u32,
  pub launch_backoff_ms: u64,
  pub launch_backoff_max_ms: u64,
}

impl Default for SupervisionConfig {
  fn default() -> Self {
    Self {
      max_silence_ms: 300_000,
      cancel_grace_ms: 5_000,
      launch_retries: 2,
      launch_backoff_ms: 250,
      launch_backoff_max_ms: 4_000,
    }
  }
}

impl SupervisionConfig {
  pub fn max_silence(&self) -> Duration {
    Duration::from_millis(self.max_silence_ms)
  }

  pub fn cancel_grace(&self) -> Duration {
    Duration::from_millis(self.cancel_grace_ms)
  }

  /// Backoff before launch retry `attempt` (1-based), doubling and capped.
  pub fn launch_backoff(&self, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    let delay = self
      .launch_backoff_ms
      .saturating_mul(factor)
      .min(self.launch_backoff_max_ms);
    Duration::from_millis(delay)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
  pub disconnect_policy: DisconnectPolicy,
  /// Per-session queue bound; the oldest event is dropped beyond it.
  pub session_buffer: usize,
  /// Detached sessions retained under the `buffer` policy; the longest
  /// detached is forgotten beyond it.
  pub max_detached: usize,
}

impl Default for RelayConfig {
  fn default() -> Self {
    Self {
      disconnect_policy: DisconnectPolicy::default(),
      session_buffer: 1024,
      max_detached: 64,
    }
  }
}

/// What the relay does with events for a session that has disconnected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectPolicy {
  /// Keep queueing (bounded) until the session reattaches.
  #[default]
  Buffer,
  /// Forget the session's subscriptions.
  Drop,
}
