use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use sluice_orchestrator::Execution;
use tracing::debug;

/// Known requests, in submission order.
///
/// Non-terminal requests are never evicted. Terminal ones are kept up to
/// `history_limit`, oldest evicted first.
pub(crate) struct RequestTable {
  executions: HashMap<String, Arc<Execution>>,
  order: VecDeque<String>,
  history_limit: usize,
}

impl RequestTable {
  pub(crate) fn new(history_limit: usize) -> Self {
    Self {
      executions: HashMap::new(),
      order: VecDeque::new(),
      history_limit,
    }
  }

  pub(crate) fn get(&self, request_id: &str) -> Option<Arc<Execution>> {
    self.executions.get(request_id).cloned()
  }

  pub(crate) fn insert(&mut self, request_id: String, execution: Arc<Execution>) {
    if self.executions.insert(request_id.clone(), execution).is_none() {
      self.order.push_back(request_id);
    }
    self.prune();
  }

  pub(crate) fn len(&self) -> usize {
    self.executions.len()
  }

  fn prune(&mut self) {
    let terminal: Vec<&String> = self
      .order
      .iter()
      .filter(|id| self.executions.get(*id).is_some_and(|e| e.is_terminal()))
      .collect();
    let excess = terminal.len().saturating_sub(self.history_limit);
    if excess == 0 {
      return;
    }

    let evict: Vec<String> = terminal.into_iter().take(excess).cloned().collect();
    for id in &evict {
      self.executions.remove(id);
      debug!(request_id = %id, "request_evicted");
    }
    self.order.retain(|id| self.executions.contains_key(id));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use sluice_orchestrator::ExecutionRecord;
  use sluice_relay::RequestState;

  fn execution(id: &str, state: RequestState) -> Arc<Execution> {
    let mut record = ExecutionRecord::new(id, "p@1", "draft");
    record.state = state;
    Arc::new(Execution::new(record))
  }

  #[test]
  fn test_terminal_records_are_bounded() {
    let mut table = RequestTable::new(1);
    table.insert("a".into(), execution("a", RequestState::Succeeded));
    table.insert("b".into(), execution("b", RequestState::Running));
    table.insert("c".into(), execution("c", RequestState::Failed));

    assert!(table.get("a").is_none());
    assert!(table.get("b").is_some());
    assert!(table.get("c").is_some());
    assert_eq!(table.len(), 2);
  }

  #[test]
  fn test_active_requests_are_never_evicted() {
    let mut table = RequestTable::new(0);
    table.insert("a".into(), execution("a", RequestState::Queued));
    table.insert("b".into(), execution("b", RequestState::Running));
    assert_eq!(table.len(), 2);
  }
}
