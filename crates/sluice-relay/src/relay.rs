use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::Stream;
use serde::{Deserialize, Serialize};
use sluice_config::{DisconnectPolicy, RelayConfig};
use tracing::{debug, info, trace};

use crate::emitter::EventPublisher;
use crate::event::Event;
use crate::outbox::Outbox;

/// Identifies a client session across disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Fans events out to the sessions subscribed to their request id.
#[derive(Clone)]
pub struct EventRelay {
  inner: Arc<RelayInner>,
}

struct RelayInner {
  policy: DisconnectPolicy,
  session_buffer: usize,
  max_detached: usize,
  next_session: AtomicU64,
  state: Mutex<RelayState>,
}

#[derive(Default)]
struct RelayState {
  sessions: HashMap<SessionId, SessionEntry>,
  /// request id -> subscribed sessions, in subscription order.
  subscribers: HashMap<String, Vec<SessionId>>,
  /// Detached sessions, longest detached first.
  detached: VecDeque<SessionId>,
}

impl RelayState {
  fn remove_session(&mut self, id: SessionId) -> bool {
    let Some(entry) = self.sessions.remove(&id) else {
      return false;
    };
    for request_id in &entry.subscriptions {
      remove_subscriber(&mut self.subscribers, request_id, id);
    }
    self.detached.retain(|d| *d != id);
    entry.outbox.close();
    true
  }
}

struct SessionEntry {
  outbox: Arc<Outbox>,
  attached: bool,
  subscriptions: HashSet<String>,
}

impl EventRelay {
  pub fn new(config: &RelayConfig) -> Self {
    Self {
      inner: Arc::new(RelayInner {
        policy: config.disconnect_policy,
        session_buffer: config.session_buffer,
        max_detached: config.max_detached,
        next_session: AtomicU64::new(1),
        state: Mutex::new(RelayState::default()),
      }),
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, RelayState> {
    self
      .inner
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Open a new session.
  pub fn connect(&self) -> Session {
    let id = SessionId(self.inner.next_session.fetch_add(1, Ordering::Relaxed));
    let outbox = Arc::new(Outbox::new(self.inner.session_buffer));
    self.lock().sessions.insert(
      id,
      SessionEntry {
        outbox: outbox.clone(),
        attached: true,
        subscriptions: HashSet::new(),
      },
    );
    debug!(session = %id, "session_connected");
    Session {
      id,
      outbox,
      relay: self.clone(),
      detached: false,
    }
  }

  /// Resume a detached session. Events buffered while it was away are
  /// delivered first.
  ///
  /// Returns `None` if the session is unknown or still attached.
  pub fn reattach(&self, id: SessionId) -> Option<Session> {
    let mut state = self.lock();
    let entry = state.sessions.get_mut(&id)?;
    if entry.attached {
      return None;
    }
    entry.attached = true;
    let outbox = entry.outbox.clone();
    state.detached.retain(|d| *d != id);
    info!(session = %id, buffered = outbox.len(), "session_reattached");
    Some(Session {
      id,
      outbox,
      relay: self.clone(),
      detached: false,
    })
  }

  /// Discard a session and anything buffered for it.
  pub fn forget(&self, id: SessionId) -> bool {
    let removed = self.lock().remove_session(id);
    if removed {
      debug!(session = %id, "session_forgotten");
    }
    removed
  }

  /// Close every session; pending `recv` calls return `None` once drained.
  pub fn shutdown(&self) {
    let mut state = self.lock();
    for entry in state.sessions.values() {
      entry.outbox.close();
    }
    state.sessions.clear();
    state.subscribers.clear();
    state.detached.clear();
  }

  pub fn session_count(&self) -> usize {
    self.lock().sessions.len()
  }

  /// Number of sessions currently subscribed to `request_id`.
  pub fn subscriber_count(&self, request_id: &str) -> usize {
    self
      .lock()
      .subscribers
      .get(request_id)
      .map_or(0, Vec::len)
  }

  fn subscribe(&self, id: SessionId, request_id: &str) {
    let mut state = self.lock();
    let Some(entry) = state.sessions.get_mut(&id) else {
      return;
    };
    if !entry.subscriptions.insert(request_id.to_string()) {
      return;
    }
    state
      .subscribers
      .entry(request_id.to_string())
      .or_default()
      .push(id);
    trace!(session = %id, request_id, "session_subscribed");
  }

  fn unsubscribe(&self, id: SessionId, request_id: &str) {
    let mut state = self.lock();
    if let Some(entry) = state.sessions.get_mut(&id) {
      entry.subscriptions.remove(request_id);
    }
    remove_subscriber(&mut state.subscribers, request_id, id);
  }

  fn detach(&self, id: SessionId) {
    match self.inner.policy {
      DisconnectPolicy::Buffer => {
        let mut state = self.lock();
        let Some(entry) = state.sessions.get_mut(&id) else {
          return;
        };
        // Nothing to replay and nothing left to wait for.
        if entry.subscriptions.is_empty() && entry.outbox.len() == 0 {
          state.remove_session(id);
          debug!(session = %id, "session_closed");
          return;
        }
        entry.attached = false;
        state.detached.push_back(id);
        info!(session = %id, "session_detached");

        while state.detached.len() > self.inner.max_detached {
          let Some(oldest) = state.detached.front().copied() else {
            break;
          };
          state.remove_session(oldest);
          info!(session = %oldest, "detached_session_evicted");
        }
      }
      DisconnectPolicy::Drop => {
        self.forget(id);
        info!(session = %id, "session_dropped");
      }
    }
  }
}

fn remove_subscriber(
  subscribers: &mut HashMap<String, Vec<SessionId>>,
  request_id: &str,
  id: SessionId,
) {
  if let Some(ids) = subscribers.get_mut(request_id) {
    ids.retain(|s| *s != id);
    if ids.is_empty() {
      subscribers.remove(request_id);
    }
  }
}

impl EventPublisher for EventRelay {
  fn publish(&self, event: Event) {
    let mut guard = self.lock();
    let RelayState {
      sessions,
      subscribers,
      ..
    } = &mut *guard;

    let Some(ids) = subscribers.get(&event.request_id) else {
      trace!(request_id = %event.request_id, sequence = event.sequence, "event_unobserved");
      return;
    };
    for id in ids {
      if let Some(entry) = sessions.get(id) {
        entry.outbox.push(id.0, event.clone());
      }
    }

    // The request is over; release its subscriptions.
    if event.is_final()
      && let Some(ids) = subscribers.remove(&event.request_id)
    {
      for id in ids {
        if let Some(entry) = sessions.get_mut(&id) {
          entry.subscriptions.remove(&event.request_id);
        }
      }
    }
  }
}

/// A client's view of the relay.
///
/// Dropping a session detaches it, as does [`Session::disconnect`].
pub struct Session {
  id: SessionId,
  outbox: Arc<Outbox>,
  relay: EventRelay,
  detached: bool,
}

impl Session {
  pub fn id(&self) -> SessionId {
    self.id
  }

  /// Receive events for `request_id` from now on.
  pub fn subscribe(&self, request_id: &str) {
    self.relay.subscribe(self.id, request_id);
  }

  pub fn unsubscribe(&self, request_id: &str) {
    self.relay.unsubscribe(self.id, request_id);
  }

  /// Next event for any subscribed request. `None` once the relay has
  /// closed this session.
  pub async fn recv(&self) -> Option<Event> {
    self.outbox.pop().await
  }

  pub fn try_recv(&self) -> Option<Event> {
    self.outbox.try_pop()
  }

  /// Events queued and not yet received.
  pub fn pending(&self) -> usize {
    self.outbox.len()
  }

  /// Events discarded because the session's buffer was full.
  pub fn dropped(&self) -> u64 {
    self.outbox.dropped()
  }

  /// Detach from the relay, returning the id to reattach with.
  pub fn disconnect(mut self) -> SessionId {
    self.detached = true;
    self.relay.detach(self.id);
    self.id
  }

  /// The session as a stream of events.
  pub fn into_stream(self) -> impl Stream<Item = Event> + Send {
    futures::stream::unfold(self, |session| async move {
      let event = session.recv().await?;
      Some((event, session))
    })
  }
}

impl Drop for Session {
  fn drop(&mut self) {
    if !self.detached {
      self.relay.detach(self.id);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::emitter::EventEmitter;
  use crate::event::{EventBody, ProgressUpdate, RequestState};

  fn relay(policy: DisconnectPolicy, session_buffer: usize) -> EventRelay {
    EventRelay::new(&RelayConfig {
      disconnect_policy: policy,
      session_buffer,
      max_detached: 8,
    })
  }

  fn emitter(relay: &EventRelay, request_id: &str) -> EventEmitter {
    EventEmitter::new(request_id, Arc::new(relay.clone()))
  }

  #[tokio::test]
  async fn test_only_subscribed_sessions_receive() {
    let relay = relay(DisconnectPolicy::Buffer, 16);
    let a = relay.connect();
    let b = relay.connect();
    a.subscribe("r1");
    b.subscribe("r2");

    let mut r1 = emitter(&relay, "r1");
    r1.transition(RequestState::Queued, None);

    let event = a.recv().await.unwrap();
    assert_eq!(event.request_id, "r1");
    assert!(b.try_recv().is_none());
  }

  #[tokio::test]
  async fn test_per_request_order_is_preserved() {
    let relay = relay(DisconnectPolicy::Buffer, 64);
    let session = relay.connect();
    session.subscribe("r1");
    session.subscribe("r2");

    let mut r1 = emitter(&relay, "r1");
    let mut r2 = emitter(&relay, "r2");
    for i in 0..10 {
      r1.progress(ProgressUpdate {
        progress: Some(i as f64 / 10.0),
        ..Default::default()
      });
      r2.progress(ProgressUpdate::default());
    }

    let mut last: HashMap<String, u64> = HashMap::new();
    while let Some(event) = session.try_recv() {
      if let Some(previous) = last.get(&event.request_id) {
        assert!(event.sequence > *previous);
      }
      last.insert(event.request_id.clone(), event.sequence);
    }
    assert_eq!(last["r1"], 9);
    assert_eq!(last["r2"], 9);
  }

  #[tokio::test]
  async fn test_full_buffer_drops_oldest() {
    let relay = relay(DisconnectPolicy::Buffer, 3);
    let session = relay.connect();
    session.subscribe("r1");

    let mut r1 = emitter(&relay, "r1");
    for _ in 0..5 {
      r1.progress(ProgressUpdate::default());
    }

    assert_eq!(session.pending(), 3);
    assert_eq!(session.dropped(), 2);
    assert_eq!(session.try_recv().unwrap().sequence, 2);
  }

  #[tokio::test]
  async fn test_buffer_policy_replays_on_reattach() {
    let relay = relay(DisconnectPolicy::Buffer, 16);
    let session = relay.connect();
    session.subscribe("r1");
    let id = session.disconnect();

    let mut r1 = emitter(&relay, "r1");
    r1.transition(RequestState::Queued, None);
    r1.transition(RequestState::Dispatched, None);

    let session = relay.reattach(id).unwrap();
    assert!(relay.reattach(id).is_none());
    assert_eq!(session.recv().await.unwrap().sequence, 0);
    assert_eq!(session.recv().await.unwrap().sequence, 1);
  }

  #[tokio::test]
  async fn test_drop_policy_removes_session() {
    let relay = relay(DisconnectPolicy::Drop, 16);
    let session = relay.connect();
    session.subscribe("r1");
    let id = session.disconnect();

    assert_eq!(relay.session_count(), 0);
    assert_eq!(relay.subscriber_count("r1"), 0);
    assert!(relay.reattach(id).is_none());

    // Publishing to nobody is fine.
    emitter(&relay, "r1").transition(RequestState::Queued, None);
  }

  #[tokio::test]
  async fn test_detached_sessions_are_bounded() {
    let relay = EventRelay::new(&RelayConfig {
      disconnect_policy: DisconnectPolicy::Buffer,
      session_buffer: 16,
      max_detached: 2,
    });
    let mut ids = Vec::new();
    for request_id in ["r1", "r2", "r3"] {
      let session = relay.connect();
      session.subscribe(request_id);
      ids.push(session.disconnect());
    }

    assert_eq!(relay.session_count(), 2);
    assert_eq!(relay.subscriber_count("r1"), 0);
    assert!(relay.reattach(ids[0]).is_none());
    assert!(relay.reattach(ids[2]).is_some());
  }

  #[tokio::test]
  async fn test_idle_session_is_closed_on_disconnect() {
    let relay = relay(DisconnectPolicy::Buffer, 16);
    let session = relay.connect();
    session.subscribe("r1");
    let mut r1 = emitter(&relay, "r1");
    r1.transition(RequestState::Running, None);
    r1.cancel(None);
    while session.try_recv().is_some() {}

    let id = session.disconnect();
    assert_eq!(relay.session_count(), 0);
    assert!(relay.reattach(id).is_none());
  }

  #[tokio::test]
  async fn test_dropping_session_detaches() {
    let relay = relay(DisconnectPolicy::Buffer, 16);
    let id = {
      let session = relay.connect();
      session.subscribe("r1");
      session.id()
    };
    emitter(&relay, "r1").transition(RequestState::Queued, None);

    let session = relay.reattach(id).unwrap();
    assert_eq!(session.pending(), 1);
  }

  #[tokio::test]
  async fn test_final_event_releases_subscription() {
    let relay = relay(DisconnectPolicy::Buffer, 16);
    let session = relay.connect();
    session.subscribe("r1");

    let mut r1 = emitter(&relay, "r1");
    r1.transition(RequestState::Running, None);
    r1.cancel(None);
    assert_eq!(relay.subscriber_count("r1"), 0);

    let events: Vec<Event> = std::iter::from_fn(|| session.try_recv()).collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].new_state(), Some(RequestState::Cancelled));
  }

  #[tokio::test]
  async fn test_recv_wakes_on_publish() {
    let relay = relay(DisconnectPolicy::Buffer, 16);
    let session = relay.connect();
    session.subscribe("r1");

    let publisher = relay.clone();
    let handle = tokio::spawn(async move {
      tokio::time::sleep(std::time::Duration::from_millis(20)).await;
      emitter(&publisher, "r1").progress(ProgressUpdate::default());
    });

    let event = tokio::time::timeout(std::time::Duration::from_secs(2), session.recv())
      .await
      .unwrap()
      .unwrap();
    assert!(matches!(event.body, EventBody::Progress(_)));
    handle.await.unwrap();
  }

  #[tokio::test]
  async fn test_shutdown_ends_stream() {
    use futures::StreamExt;

    let relay = relay(DisconnectPolicy::Buffer, 16);
    let session = relay.connect();
    session.subscribe("r1");
    emitter(&relay, "r1").transition(RequestState::Queued, None);
    relay.shutdown();

    let events: Vec<Event> = session.into_stream().collect().await;
    assert_eq!(events.len(), 1);
  }
}
