use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::event::{Event, EventBody, FailureKind, ProgressUpdate, RequestState};

/// Destination for published events. Publishing must never block.
pub trait EventPublisher: Send + Sync {
  fn publish(&self, event: Event);
}

/// Publisher that discards everything.
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
  fn publish(&self, _event: Event) {}
}

/// Sequenced event stream for one request.
///
/// Every transition is published as exactly one `state_changed` event.
/// Once a final event has gone out, everything else is dropped.
pub struct EventEmitter {
  request_id: String,
  publisher: Arc<dyn EventPublisher>,
  next_sequence: u64,
  state: Option<RequestState>,
  finished: bool,
}

impl EventEmitter {
  pub fn new(request_id: impl Into<String>, publisher: Arc<dyn EventPublisher>) -> Self {
    Self {
      request_id: request_id.into(),
      publisher,
      next_sequence: 0,
      state: None,
      finished: false,
    }
  }

  pub fn request_id(&self) -> &str {
    &self.request_id
  }

  /// The last state published.
  pub fn state(&self) -> Option<RequestState> {
    self.state
  }

  pub fn is_finished(&self) -> bool {
    self.finished
  }

  fn emit(&mut self, body: EventBody) -> bool {
    if self.finished {
      warn!(request_id = %self.request_id, "event_after_final_dropped");
      return false;
    }
    let event = Event {
      request_id: self.request_id.clone(),
      sequence: self.next_sequence,
      body,
    };
    self.next_sequence += 1;
    self.finished = event.is_final();
    self.publisher.publish(event);
    true
  }

  /// Publish a transition into `to`.
  pub fn transition(&mut self, to: RequestState, note: Option<String>) -> bool {
    if self.state == Some(to) {
      return false;
    }
    let from = self.state;
    if self.emit(EventBody::StateChanged { from, to, note }) {
      self.state = Some(to);
      true
    } else {
      false
    }
  }

  pub fn progress(&mut self, update: ProgressUpdate) -> bool {
    self.emit(EventBody::Progress(update))
  }

  /// `state_changed -> succeeded`, then the `succeeded` result event.
  pub fn succeed(&mut self, outputs: Vec<PathBuf>) {
    if self.transition(RequestState::Succeeded, None) {
      self.emit(EventBody::Succeeded { outputs });
    }
  }

  /// `state_changed -> failed`, then the `failed` event carrying the detail.
  pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) {
    if self.transition(RequestState::Failed, None) {
      self.emit(EventBody::Failed {
        kind,
        message: message.into(),
      });
    }
  }

  pub fn cancel(&mut self, note: Option<String>) {
    self.transition(RequestState::Cancelled, note);
  }
}
