use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use sluice_config::{CapacityPolicy, ConfigError, EngineConfig, SupervisionConfig};
use sluice_injector::RunnableGraph;
use sluice_packet::Packet;
use sluice_relay::{EventEmitter, EventPublisher, RequestState};
use tracing::{debug, info};

use crate::capacity::{CapacityTable, SlotGuard};
use crate::data_area::DataArea;
use crate::error::OrchestratorError;
use crate::execution::{Execution, ExecutionRecord};
use crate::strategy::{Selection, StrategyMap};
use crate::supervisor::Supervisor;
use crate::unit::UnitLauncher;

/// A gated, materialized request ready to be placed.
#[derive(Debug, Clone)]
pub struct Job {
  pub request_id: String,
  pub tier: String,
  pub packet: Arc<Packet>,
  pub graph: RunnableGraph,
  /// Capability name to concrete location.
  pub capabilities: BTreeMap<String, PathBuf>,
}

/// Where a request will run, decided synchronously at submission.
#[derive(Debug)]
pub struct Placement {
  pub requested: Selection,
  pub selection: Selection,
  /// A slot claimed up front; `None` means the request waits in `Queued`.
  pub slot: Option<SlotGuard>,
  /// Set when the request was moved to another tier.
  pub note: Option<String>,
}

impl Placement {
  pub fn is_queued(&self) -> bool {
    self.slot.is_none()
  }
}

/// Runs one supervisor task per request over a shared capacity table.
pub struct Orchestrator {
  pub(crate) strategies: Arc<StrategyMap>,
  pub(crate) capacity: CapacityTable,
  pub(crate) data: DataArea,
  pub(crate) launcher: Arc<dyn UnitLauncher>,
  pub(crate) supervision: SupervisionConfig,
  policy: CapacityPolicy,
}

impl Orchestrator {
  pub fn new(config: &EngineConfig, launcher: Arc<dyn UnitLauncher>) -> Result<Self, ConfigError> {
    let strategies = StrategyMap::from_config(config)?;
    let capacity = CapacityTable::new(
      strategies
        .strategies()
        .map(|s| (s.name.as_str(), s.def.capacity)),
    );
    Ok(Self {
      strategies: Arc::new(strategies),
      capacity,
      data: DataArea::new(&config.data_area),
      launcher,
      supervision: config.supervision.clone(),
      policy: config.capacity_policy,
    })
  }

  pub fn strategies(&self) -> &StrategyMap {
    &self.strategies
  }

  pub fn capacity(&self) -> &CapacityTable {
    &self.capacity
  }

  pub fn data_area(&self) -> &DataArea {
    &self.data
  }

  /// Pick a strategy for `tier` and apply the capacity policy.
  pub fn place(&self, tier: &str, kind: Option<&str>) -> Result<Placement, OrchestratorError> {
    let requested = self.strategies.select(tier, kind)?;
    if let Some(slot) = self.capacity.try_claim(&requested.strategy) {
      return Ok(Placement {
        selection: requested.clone(),
        requested,
        slot: Some(slot),
        note: None,
      });
    }

    match self.policy {
      CapacityPolicy::Queue => {}
      CapacityPolicy::Reject => {
        return Err(OrchestratorError::CapacityExhausted {
          tier: requested.tier,
          strategy: requested.strategy,
        });
      }
      CapacityPolicy::Degrade => {
        for candidate in self.strategies.degrade_chain(tier, kind) {
          if let Some(slot) = self.capacity.try_claim(&candidate.strategy) {
            let note = format!(
              "tier '{}' has no capacity; degraded to '{}'",
              requested.tier, candidate.tier
            );
            info!(requested = %requested.tier, served = %candidate.tier, "tier_degraded");
            return Ok(Placement {
              requested,
              selection: candidate,
              slot: Some(slot),
              note: Some(note),
            });
          }
        }
      }
    }

    debug!(tier, strategy = %requested.strategy, "request_will_queue");
    Ok(Placement {
      selection: requested.clone(),
      requested,
      slot: None,
      note: None,
    })
  }

  /// Start supervising `job`. The `queued` transition is published before
  /// this returns.
  pub fn start(
    &self,
    job: Job,
    placement: Placement,
    publisher: Arc<dyn EventPublisher>,
  ) -> Arc<Execution> {
    let mut record = ExecutionRecord::new(&job.request_id, &job.packet.id.to_string(), &job.tier);
    record.state = RequestState::Queued;
    let execution = Arc::new(Execution::new(record));

    let mut emitter = EventEmitter::new(job.request_id.clone(), publisher);
    emitter.transition(RequestState::Queued, None);

    let supervisor = Supervisor::new(self, job, execution.clone(), emitter);
    tokio::spawn(supervisor.run(placement));
    execution
  }
}
