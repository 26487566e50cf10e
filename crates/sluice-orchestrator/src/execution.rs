use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sluice_relay::{FailureKind, RequestState};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
  Acknowledged,
  AlreadyTerminal,
  NotFound,
}

/// Lifecycle of the execution unit serving a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
  Pending,
  Running,
  Succeeded,
  Failed,
  Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
  pub unit_id: String,
  pub strategy: String,
  pub status: UnitStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
  pub kind: FailureKind,
  pub message: String,
}

/// Result-location bookkeeping for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
  pub request_id: String,
  pub packet: String,
  /// Tier the caller asked for.
  pub tier: String,
  /// Tier actually used, when it differs after a degrade.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub served_tier: Option<String>,
  pub state: RequestState,
  pub submitted_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub unit: Option<UnitRecord>,
  pub output_locations: Vec<PathBuf>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failure: Option<Failure>,
}

impl ExecutionRecord {
  pub fn new(request_id: &str, packet: &str, tier: &str) -> Self {
    Self {
      request_id: request_id.to_string(),
      packet: packet.to_string(),
      tier: tier.to_string(),
      served_tier: None,
      state: RequestState::Queued,
      submitted_at: Utc::now(),
      unit: None,
      output_locations: Vec::new(),
      failure: None,
    }
  }
}

/// Shared handle on one in-flight request.
///
/// Cancellation and the terminal decision go through the same lock: once
/// cancel has been acknowledged the request ends `Cancelled`, and once a
/// terminal state is recorded cancel reports `AlreadyTerminal`.
#[derive(Debug)]
pub struct Execution {
  inner: Mutex<ExecutionInner>,
  cancel: CancellationToken,
  finished: watch::Sender<bool>,
}

#[derive(Debug)]
pub(crate) struct ExecutionInner {
  pub(crate) record: ExecutionRecord,
  pub(crate) cancel_requested: bool,
}

impl Execution {
  pub fn new(record: ExecutionRecord) -> Self {
    Self {
      inner: Mutex::new(ExecutionInner {
        record,
        cancel_requested: false,
      }),
      cancel: CancellationToken::new(),
      finished: watch::Sender::new(false),
    }
  }

  pub(crate) fn lock(&self) -> MutexGuard<'_, ExecutionInner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn request_id(&self) -> String {
    self.lock().record.request_id.clone()
  }

  pub fn record(&self) -> ExecutionRecord {
    self.lock().record.clone()
  }

  pub fn state(&self) -> RequestState {
    self.lock().record.state
  }

  pub fn is_terminal(&self) -> bool {
    self.state().is_terminal()
  }

  pub(crate) fn cancel_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  /// Ask for the request to be cancelled.
  pub fn request_cancel(&self) -> CancelOutcome {
    let mut inner = self.lock();
    if inner.record.state.is_terminal() {
      return CancelOutcome::AlreadyTerminal;
    }
    inner.cancel_requested = true;
    drop(inner);
    self.cancel.cancel();
    CancelOutcome::Acknowledged
  }

  pub(crate) fn mark_finished(&self) {
    self.finished.send_replace(true);
  }

  /// Wait until the request is terminal and return its record.
  pub async fn wait(&self) -> ExecutionRecord {
    let mut finished = self.finished.subscribe();
    // The sender lives in `self`, so this only ends once finished is set.
    let _ = finished.wait_for(|done| *done).await;
    self.record()
  }
}
