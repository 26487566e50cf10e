//! The submission pipeline.
//!
//! `submit` gates a request synchronously, in order: request id, tier,
//! packet store, dependency resolver, parameter injector, placement. Only a
//! request that passes every gate reaches the orchestrator; everything after
//! that is reported through the event relay.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sluice_config::{ConfigError, EngineConfig};
use sluice_orchestrator::{
  CancelOutcome, Execution, ExecutionRecord, Job, Orchestrator, ProcessLauncher, UnitLauncher,
  valid_request_id,
};
use sluice_packet::{FsPacketSource, PacketSource, PacketStore};
use sluice_registry::{FsCapabilityRegistry, MirrorProvider};
use sluice_relay::{EventRelay, RequestState, Session, SessionId};
use sluice_resolver::{DependencyResolver, StandardResolver};
use tracing::{info, instrument, warn};

use crate::error::Rejection;
use crate::request::{Checked, SubmitRequest, Submission, generate_request_id};
use crate::table::RequestTable;

/// Declarative workflow engine.
pub struct Engine<S: PacketSource = FsPacketSource> {
  packets: PacketStore<S>,
  resolver: Arc<dyn DependencyResolver>,
  orchestrator: Orchestrator,
  relay: EventRelay,
  requests: Mutex<RequestTable>,
}

impl Engine<FsPacketSource> {
  /// Engine over the directories named in `config`, running units as local
  /// processes.
  pub fn open(config: &EngineConfig) -> Result<Self, ConfigError> {
    let registry = FsCapabilityRegistry::new(&config.capabilities_dir);
    let resolver =
      StandardResolver::new(registry).with_provider(MirrorProvider::new(&config.packages_dir));
    Self::new(
      config,
      FsPacketSource::new(&config.packets_dir),
      Arc::new(resolver),
      Arc::new(ProcessLauncher::new()),
    )
  }
}

impl<S: PacketSource> Engine<S> {
  pub fn new(
    config: &EngineConfig,
    source: S,
    resolver: Arc<dyn DependencyResolver>,
    launcher: Arc<dyn UnitLauncher>,
  ) -> Result<Self, ConfigError> {
    Ok(Self {
      packets: PacketStore::new(source),
      resolver,
      orchestrator: Orchestrator::new(config, launcher)?,
      relay: EventRelay::new(&config.relay),
      requests: Mutex::new(RequestTable::new(config.history_limit)),
    })
  }

  pub fn packets(&self) -> &PacketStore<S> {
    &self.packets
  }

  pub fn orchestrator(&self) -> &Orchestrator {
    &self.orchestrator
  }

  pub fn relay(&self) -> &EventRelay {
    &self.relay
  }

  fn requests(&self) -> MutexGuard<'_, RequestTable> {
    self.requests.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Run every pre-dispatch gate without starting anything.
  pub async fn check(&self, request: &SubmitRequest) -> Result<Checked, Rejection> {
    if !self.orchestrator.strategies().has_tier(&request.tier) {
      return Err(Rejection::UnknownTier {
        tier: request.tier.clone(),
      });
    }
    let packet = self.packets.load(&request.packet, &request.version).await?;
    let capabilities = self.resolver.ensure_ready(&packet).await?;
    let graph = sluice_injector::materialize(&packet, &request.parameters)?;
    Ok(Checked {
      packet,
      graph,
      capabilities,
    })
  }

  /// Submit a request.
  ///
  /// Resubmitting a known id returns the existing execution instead of
  /// starting another one.
  #[instrument(skip_all, fields(packet = %request.packet, tier = %request.tier))]
  pub async fn submit(&self, request: SubmitRequest) -> Result<Submission, Rejection> {
    let request_id = match &request.request_id {
      Some(id) if valid_request_id(id) => id.clone(),
      Some(id) => {
        warn!(request_id = %id, "request_id_invalid");
        return Err(Rejection::InvalidRequest(format!("invalid request id: {id:?}")));
      }
      None => generate_request_id(),
    };

    if let Some(existing) = self.existing(&request_id) {
      return Ok(existing);
    }

    let checked = match self.check(&request).await {
      Ok(checked) => checked,
      Err(rejection) => {
        info!(request_id = %request_id, reason = rejection.reason(), error = %rejection, "request_rejected");
        return Err(rejection);
      }
    };

    let mut requests = self.requests();
    // A concurrent submission of the same id may have won while we were gating.
    if let Some(execution) = requests.get(&request_id) {
      return Ok(Submission {
        request_id,
        existing: true,
        state: execution.state(),
      });
    }

    let placement = match self
      .orchestrator
      .place(&request.tier, checked.packet.kind.as_deref())
    {
      Ok(placement) => placement,
      Err(e) => {
        let rejection = Rejection::from(e);
        info!(request_id = %request_id, reason = rejection.reason(), error = %rejection, "request_rejected");
        return Err(rejection);
      }
    };

    let job = Job {
      request_id: request_id.clone(),
      tier: request.tier.clone(),
      packet: checked.packet,
      graph: checked.graph,
      capabilities: checked.capabilities,
    };
    let execution = self
      .orchestrator
      .start(job, placement, Arc::new(self.relay.clone()));
    let state = execution.state();
    requests.insert(request_id.clone(), execution);
    info!(request_id = %request_id, "request_accepted");

    Ok(Submission {
      request_id,
      existing: false,
      state,
    })
  }

  /// Subscribe `session` to the request before submitting it, so the
  /// session sees every event from `queued` on.
  pub async fn submit_from(
    &self,
    session: &Session,
    mut request: SubmitRequest,
  ) -> Result<Submission, Rejection> {
    let request_id = request
      .request_id
      .get_or_insert_with(generate_request_id)
      .clone();
    session.subscribe(&request_id);
    let result = self.submit(request).await;
    if result.is_err() {
      session.unsubscribe(&request_id);
    }
    result
  }

  fn existing(&self, request_id: &str) -> Option<Submission> {
    let execution = self.requests().get(request_id)?;
    Some(Submission {
      request_id: request_id.to_string(),
      existing: true,
      state: execution.state(),
    })
  }

  pub fn cancel(&self, request_id: &str) -> CancelOutcome {
    let Some(execution) = self.requests().get(request_id) else {
      return CancelOutcome::NotFound;
    };
    let outcome = execution.request_cancel();
    info!(request_id, outcome = ?outcome, "cancel_requested");
    outcome
  }

  pub fn status(&self, request_id: &str) -> Option<RequestState> {
    self.requests().get(request_id).map(|e| e.state())
  }

  pub fn record(&self, request_id: &str) -> Option<ExecutionRecord> {
    self.requests().get(request_id).map(|e| e.record())
  }

  pub fn execution(&self, request_id: &str) -> Option<Arc<Execution>> {
    self.requests().get(request_id)
  }

  /// Wait for a request to reach a terminal state.
  pub async fn wait(&self, request_id: &str) -> Option<ExecutionRecord> {
    let execution = self.execution(request_id)?;
    Some(execution.wait().await)
  }

  pub fn connect(&self) -> Session {
    self.relay.connect()
  }

  pub fn reattach(&self, session: SessionId) -> Option<Session> {
    self.relay.reattach(session)
  }
}
