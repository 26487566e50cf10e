use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an execution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
  Queued,
  Dispatched,
  Running,
  Succeeded,
  Failed,
  Cancelled,
}

impl RequestState {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      RequestState::Succeeded | RequestState::Failed | RequestState::Cancelled
    )
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      RequestState::Queued => "queued",
      RequestState::Dispatched => "dispatched",
      RequestState::Running => "running",
      RequestState::Succeeded => "succeeded",
      RequestState::Failed => "failed",
      RequestState::Cancelled => "cancelled",
    }
  }
}

impl std::fmt::Display for RequestState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Failure taxonomy for errors reported after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  /// The execution unit could not be started.
  Launch,
  /// The unit ran and exited abnormally, or produced no declared output.
  Runtime,
  /// The silence watchdog fired.
  Timeout,
}

impl std::fmt::Display for FailureKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      FailureKind::Launch => "launch",
      FailureKind::Runtime => "runtime",
      FailureKind::Timeout => "timeout",
    })
  }
}

/// Progress reported by an execution unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub progress: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub node: Option<String>,
}

/// Kind and payload of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EventBody {
  StateChanged {
    /// `None` for the first transition of a request.
    from: Option<RequestState>,
    to: RequestState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
  },
  Progress(ProgressUpdate),
  Succeeded {
    outputs: Vec<PathBuf>,
  },
  Failed {
    kind: FailureKind,
    message: String,
  },
}

/// An event on the wire:
/// `{"request_id": "...", "sequence": 3, "kind": "progress", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  pub request_id: String,
  /// Position within the request's event stream, starting at 0.
  pub sequence: u64,
  #[serde(flatten)]
  pub body: EventBody,
}

impl Event {
  /// Whether no further events may follow this one for its request.
  pub fn is_final(&self) -> bool {
    match &self.body {
      EventBody::Succeeded { .. } | EventBody::Failed { .. } => true,
      EventBody::StateChanged { to, .. } => *to == RequestState::Cancelled,
      EventBody::Progress(_) => false,
    }
  }

  /// The state this event moves the request into, if it is a transition.
  pub fn new_state(&self) -> Option<RequestState> {
    match &self.body {
      EventBody::StateChanged { to, .. } => Some(*to),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_wire_format() {
    let event = Event {
      request_id: "r1".to_string(),
      sequence: 2,
      body: EventBody::StateChanged {
        from: Some(RequestState::Queued),
        to: RequestState::Dispatched,
        note: None,
      },
    };
    assert_eq!(
      serde_json::to_value(&event).unwrap(),
      json!({
        "request_id": "r1",
        "sequence": 2,
        "kind": "state_changed",
        "payload": { "from": "queued", "to": "dispatched" }
      })
    );

    let failed: Event = serde_json::from_value(json!({
      "request_id": "r1",
      "sequence": 5,
      "kind": "failed",
      "payload": { "kind": "timeout", "message": "no progress for 300s" }
    }))
    .unwrap();
    assert!(failed.is_final());
    assert!(matches!(
      failed.body,
      EventBody::Failed {
        kind: FailureKind::Timeout,
        ..
      }
    ));
  }

  #[test]
  fn test_final_events() {
    let event = |body| Event {
      request_id: "r".to_string(),
      sequence: 0,
      body,
    };
    assert!(!event(EventBody::StateChanged {
      from: Some(RequestState::Running),
      to: RequestState::Succeeded,
      note: None
    })
    .is_final());
    assert!(event(EventBody::StateChanged {
      from: Some(RequestState::Running),
      to: RequestState::Cancelled,
      note: None
    })
    .is_final());
    assert!(event(EventBody::Succeeded { outputs: vec![] }).is_final());
    assert!(!event(EventBody::Progress(ProgressUpdate::default())).is_final());
  }
}
