use sluice_injector::ParameterError;
use sluice_orchestrator::OrchestratorError;
use sluice_packet::PacketError;
use sluice_resolver::DependencyError;
use thiserror::Error;

/// Why a submission was refused. Nothing has been launched when this is
/// returned.
#[derive(Debug, Error)]
pub enum Rejection {
  #[error("unknown packet: {name}@{version}")]
  UnknownPacket { name: String, version: String },

  #[error("packet integrity error: {0}")]
  PacketIntegrity(PacketError),

  #[error("dependency unsatisfied: {0}")]
  DependencyUnsatisfied(#[from] DependencyError),

  #[error("invalid parameter: {0}")]
  InvalidParameter(#[from] ParameterError),

  #[error("no capacity for tier '{tier}' (strategy '{strategy}')")]
  CapacityExhausted { tier: String, strategy: String },

  #[error("unknown quality tier: {tier}")]
  UnknownTier { tier: String },

  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

impl Rejection {
  /// Stable machine-readable reason.
  pub fn reason(&self) -> &'static str {
    match self {
      Rejection::UnknownPacket { .. } => "unknown_packet",
      Rejection::PacketIntegrity(_) => "packet_integrity",
      Rejection::DependencyUnsatisfied(_) => "dependency_unsatisfied",
      Rejection::InvalidParameter(_) => "invalid_parameter",
      Rejection::CapacityExhausted { .. } => "capacity_exhausted",
      Rejection::UnknownTier { .. } => "unknown_tier",
      Rejection::InvalidRequest(_) => "invalid_request",
    }
  }
}

impl From<PacketError> for Rejection {
  fn from(e: PacketError) -> Self {
    match e {
      PacketError::NotFound { name, version } => Rejection::UnknownPacket { name, version },
      other => Rejection::PacketIntegrity(other),
    }
  }
}

impl From<OrchestratorError> for Rejection {
  fn from(e: OrchestratorError) -> Self {
    match e {
      OrchestratorError::UnknownTier { tier } => Rejection::UnknownTier { tier },
      OrchestratorError::CapacityExhausted { tier, strategy } => {
        Rejection::CapacityExhausted { tier, strategy }
      }
    }
  }
}
