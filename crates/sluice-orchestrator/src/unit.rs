use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sluice_packet::PacketId;
use sluice_relay::ProgressUpdate;

use crate::data_area::UnitPaths;
use crate::error::LaunchError;
use crate::strategy::Strategy;

/// Everything an execution unit is started with.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
  pub unit_id: String,
  pub request_id: String,
  pub packet: PacketId,
  pub tier: String,
  pub strategy: Arc<Strategy>,
  pub paths: UnitPaths,
  /// Shared data area root.
  pub data_dir: PathBuf,
  /// Capability name to concrete location.
  pub capabilities: BTreeMap<String, PathBuf>,
}

/// How a unit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
  pub success: bool,
  pub code: Option<i32>,
  pub description: String,
}

/// What a running unit reports.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitSignal {
  Progress(ProgressUpdate),
  Exited(ExitReport),
}

/// Starts execution units.
#[async_trait]
pub trait UnitLauncher: Send + Sync {
  async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn RunningUnit>, LaunchError>;
}

/// A launched execution unit.
#[async_trait]
pub trait RunningUnit: Send {
  /// Next signal from the unit. Once it has exited, every call returns the
  /// same `Exited` report.
  async fn next_signal(&mut self) -> UnitSignal;

  /// Stop the unit: a graceful request first, forced after `grace`.
  async fn terminate(&mut self, grace: Duration);
}
