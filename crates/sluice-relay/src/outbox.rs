use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;
use tracing::warn;

use crate::event::Event;

/// Bounded single-consumer queue behind a session.
pub(crate) struct Outbox {
  state: Mutex<OutboxState>,
  notify: Notify,
  capacity: usize,
}

struct OutboxState {
  events: VecDeque<Event>,
  closed: bool,
  dropped: u64,
}

impl Outbox {
  pub(crate) fn new(capacity: usize) -> Self {
    Self {
      state: Mutex::new(OutboxState {
        events: VecDeque::new(),
        closed: false,
        dropped: 0,
      }),
      notify: Notify::new(),
      capacity: capacity.max(1),
    }
  }

  /// Queue an event, dropping the oldest one when full. Never blocks.
  pub(crate) fn push(&self, session: u64, event: Event) {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    if state.closed {
      return;
    }
    if state.events.len() >= self.capacity
      && let Some(oldest) = state.events.pop_front()
    {
      state.dropped += 1;
      warn!(
        session,
        request_id = %oldest.request_id,
        sequence = oldest.sequence,
        dropped = state.dropped,
        "session_buffer_full"
      );
    }
    state.events.push_back(event);
    drop(state);
    self.notify.notify_one();
  }

  pub(crate) fn try_pop(&self) -> Option<Event> {
    self
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .events
      .pop_front()
  }

  /// Wait for the next event. `None` once closed and drained.
  pub(crate) async fn pop(&self) -> Option<Event> {
    loop {
      {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(event) = state.events.pop_front() {
          return Some(event);
        }
        if state.closed {
          return None;
        }
      }
      // A push between the check and this await leaves a stored permit.
      self.notify.notified().await;
    }
  }

  pub(crate) fn close(&self) {
    self
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .closed = true;
    self.notify.notify_one();
  }

  pub(crate) fn len(&self) -> usize {
    self
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .events
      .len()
  }

  pub(crate) fn dropped(&self) -> u64 {
    self
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .dropped
  }
}
