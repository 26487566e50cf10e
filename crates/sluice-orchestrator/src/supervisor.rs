use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sluice_config::SupervisionConfig;
use sluice_relay::{EventEmitter, FailureKind, RequestState};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::capacity::CapacityTable;
use crate::data_area::{DataArea, UnitPaths, collect_outputs};
use crate::error::LaunchError;
use crate::execution::{Execution, Failure, UnitRecord, UnitStatus};
use crate::orchestrator::{Job, Orchestrator, Placement};
use crate::strategy::{Strategy, StrategyMap};
use crate::unit::{LaunchSpec, RunningUnit, UnitLauncher, UnitSignal};

/// How a request ended, before cancellation is taken into account.
#[derive(Debug)]
enum Outcome {
  Succeeded(Vec<PathBuf>),
  Failed(FailureKind, String),
  Cancelled,
}

enum Launch {
  Started(Box<dyn RunningUnit>, UnitPaths),
  Failed(LaunchError),
  Cancelled,
}

/// Drives one request through `Queued -> Dispatched -> Running -> terminal`.
pub(crate) struct Supervisor {
  strategies: Arc<StrategyMap>,
  capacity: CapacityTable,
  data: DataArea,
  launcher: Arc<dyn UnitLauncher>,
  supervision: SupervisionConfig,
  job: Job,
  execution: Arc<Execution>,
  emitter: EventEmitter,
}

impl Supervisor {
  pub(crate) fn new(
    orchestrator: &Orchestrator,
    job: Job,
    execution: Arc<Execution>,
    emitter: EventEmitter,
  ) -> Self {
    Self {
      strategies: orchestrator.strategies.clone(),
      capacity: orchestrator.capacity.clone(),
      data: orchestrator.data.clone(),
      launcher: orchestrator.launcher.clone(),
      supervision: orchestrator.supervision.clone(),
      job,
      execution,
      emitter,
    }
  }

  #[instrument(skip_all, fields(request_id = %self.job.request_id, tier = %self.job.tier))]
  pub(crate) async fn run(mut self, placement: Placement) {
    let cancel = self.execution.cancel_token();
    let Placement {
      requested,
      selection,
      slot,
      note,
    } = placement;

    let slot = match slot {
      Some(slot) => slot,
      None => {
        debug!(strategy = %selection.strategy, "request_queued");
        tokio::select! {
          biased;
          _ = cancel.cancelled() => {
            self.finish(Outcome::Cancelled);
            return;
          }
          slot = self.capacity.claim(&selection.strategy) => slot,
        }
      }
    };

    let Some(strategy) = self.strategies.strategy(&selection.strategy) else {
      self.finish(Outcome::Failed(
        FailureKind::Launch,
        format!("strategy '{}' is not configured", selection.strategy),
      ));
      return;
    };

    let unit_id = uuid::Uuid::new_v4().to_string();
    {
      let mut inner = self.execution.lock();
      inner.record.unit = Some(UnitRecord {
        unit_id: unit_id.clone(),
        strategy: strategy.name.clone(),
        status: UnitStatus::Pending,
        started_at: None,
        ended_at: None,
      });
      if selection.tier != requested.tier {
        inner.record.served_tier = Some(selection.tier.clone());
      }
    }
    self.transition(RequestState::Dispatched, note);

    let (mut unit, paths) = match self.launch(&strategy, &selection.tier, &unit_id, &cancel).await {
      Launch::Started(unit, paths) => (unit, paths),
      Launch::Failed(e) => {
        self.finish(Outcome::Failed(FailureKind::Launch, e.to_string()));
        return;
      }
      Launch::Cancelled => {
        self.finish(Outcome::Cancelled);
        return;
      }
    };

    {
      let mut inner = self.execution.lock();
      if let Some(unit) = inner.record.unit.as_mut() {
        unit.status = UnitStatus::Running;
        unit.started_at = Some(Utc::now());
      }
    }
    self.transition(RequestState::Running, None);

    let silence = strategy
      .def
      .max_silence_ms
      .map(Duration::from_millis)
      .unwrap_or_else(|| self.supervision.max_silence());
    let outcome = self
      .supervise(unit.as_mut(), &paths, silence, &cancel)
      .await;
    self.finish(outcome);

    // No-op for a unit that already exited.
    unit.terminate(self.supervision.cancel_grace()).await;
    drop(unit);
    drop(slot);
  }

  /// Record and publish a non-terminal transition.
  fn transition(&mut self, to: RequestState, note: Option<String>) {
    let mut inner = self.execution.lock();
    inner.record.state = to;
    self.emitter.transition(to, note);
  }

  /// Record and publish the terminal state. A cancellation that was
  /// acknowledged wins over whatever the unit did.
  fn finish(&mut self, outcome: Outcome) {
    let mut inner = self.execution.lock();
    let outcome = if inner.cancel_requested {
      Outcome::Cancelled
    } else {
      outcome
    };

    let (state, unit_status) = match &outcome {
      Outcome::Succeeded(_) => (RequestState::Succeeded, UnitStatus::Succeeded),
      Outcome::Failed(..) => (RequestState::Failed, UnitStatus::Failed),
      Outcome::Cancelled => (RequestState::Cancelled, UnitStatus::Cancelled),
    };
    inner.record.state = state;
    if let Some(unit) = inner.record.unit.as_mut() {
      unit.status = unit_status;
      unit.ended_at = Some(Utc::now());
    }

    match outcome {
      Outcome::Succeeded(outputs) => {
        info!(outputs = outputs.len(), "request_succeeded");
        inner.record.output_locations = outputs.clone();
        self.emitter.succeed(outputs);
      }
      Outcome::Failed(kind, message) => {
        warn!(kind = %kind, message = %message, "request_failed");
        inner.record.failure = Some(Failure {
          kind,
          message: message.clone(),
        });
        self.emitter.fail(kind, message);
      }
      Outcome::Cancelled => {
        info!("request_cancelled");
        self.emitter.cancel(None);
      }
    }
    drop(inner);
    self.execution.mark_finished();
  }

  /// Prepare the data area and launch the unit, retrying with backoff.
  async fn launch(
    &self,
    strategy: &Arc<Strategy>,
    tier: &str,
    unit_id: &str,
    cancel: &CancellationToken,
  ) -> Launch {
    let graph = match serde_json::to_vec_pretty(&self.job.graph.to_def()) {
      Ok(graph) => graph,
      Err(source) => {
        return Launch::Failed(LaunchError::Serialize {
          what: "graph".to_string(),
          source,
        });
      }
    };

    let mut attempt = 0;
    loop {
      if cancel.is_cancelled() {
        return Launch::Cancelled;
      }

      let result = match self.data.prepare(&self.job.request_id, &graph).await {
        Ok(paths) => {
          let spec = LaunchSpec {
            unit_id: unit_id.to_string(),
            request_id: self.job.request_id.clone(),
            packet: self.job.packet.id.clone(),
            tier: tier.to_string(),
            strategy: strategy.clone(),
            paths: paths.clone(),
            data_dir: self.data.root().to_path_buf(),
            capabilities: self.job.capabilities.clone(),
          };
          self.launcher.launch(&spec).await.map(|unit| (unit, paths))
        }
        Err(e) => Err(e),
      };

      match result {
        Ok((unit, paths)) => return Launch::Started(unit, paths),
        Err(e) if attempt < self.supervision.launch_retries => {
          attempt += 1;
          let delay = self.supervision.launch_backoff(attempt);
          warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "unit_launch_retry"
          );
          tokio::select! {
            biased;
            _ = cancel.cancelled() => return Launch::Cancelled,
            _ = tokio::time::sleep(delay) => {}
          }
        }
        Err(e) => return Launch::Failed(e),
      }
    }
  }

  /// Watch a running unit until it exits, goes silent or is cancelled.
  async fn supervise(
    &mut self,
    unit: &mut dyn RunningUnit,
    paths: &UnitPaths,
    silence: Duration,
    cancel: &CancellationToken,
  ) -> Outcome {
    let watchdog = tokio::time::sleep(silence);
    tokio::pin!(watchdog);

    loop {
      tokio::select! {
        biased;
        _ = cancel.cancelled() => return Outcome::Cancelled,
        _ = &mut watchdog => {
          return Outcome::Failed(
            FailureKind::Timeout,
            format!("no progress from unit for {}ms", silence.as_millis()),
          );
        }
        signal = unit.next_signal() => match signal {
          UnitSignal::Progress(update) => {
            watchdog.as_mut().reset(Instant::now() + silence);
            self.emitter.progress(update);
          }
          UnitSignal::Exited(report) if report.success => {
            return match collect_outputs(&paths.output_dir, &self.job.packet.outputs).await {
              Ok(outputs) => Outcome::Succeeded(outputs),
              Err(message) => Outcome::Failed(FailureKind::Runtime, message),
            };
          }
          UnitSignal::Exited(report) => {
            return Outcome::Failed(
              FailureKind::Runtime,
              format!("unit exited abnormally ({})", report.description),
            );
          }
        }
      }
    }
  }
}
