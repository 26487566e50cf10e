use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;
use tracing::trace;

/// Execution slots per strategy.
///
/// This table is the only state shared between supervisors. Slots are held
/// through [`SlotGuard`]s and returned when the guard drops.
#[derive(Clone)]
pub struct CapacityTable {
  inner: Arc<CapacityInner>,
}

struct CapacityInner {
  slots: Mutex<HashMap<String, Slots>>,
  released: Notify,
}

#[derive(Debug, Clone, Copy)]
struct Slots {
  capacity: usize,
  in_use: usize,
}

impl CapacityTable {
  pub fn new<'a>(strategies: impl IntoIterator<Item = (&'a str, usize)>) -> Self {
    let slots = strategies
      .into_iter()
      .map(|(name, capacity)| {
        (
          name.to_string(),
          Slots {
            capacity,
            in_use: 0,
          },
        )
      })
      .collect();
    Self {
      inner: Arc::new(CapacityInner {
        slots: Mutex::new(slots),
        released: Notify::new(),
      }),
    }
  }

  /// Take a slot if one is free right now.
  pub fn try_claim(&self, strategy: &str) -> Option<SlotGuard> {
    let mut slots = self
      .inner
      .slots
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    let entry = slots.get_mut(strategy)?;
    if entry.in_use >= entry.capacity {
      return None;
    }
    entry.in_use += 1;
    trace!(strategy, in_use = entry.in_use, "slot_claimed");
    Some(SlotGuard {
      table: self.clone(),
      strategy: strategy.to_string(),
    })
  }

  /// Wait until a slot is free and take it.
  pub async fn claim(&self, strategy: &str) -> SlotGuard {
    loop {
      let released = self.inner.released.notified();
      tokio::pin!(released);
      // Register before checking so a release in between is not missed.
      released.as_mut().enable();
      if let Some(guard) = self.try_claim(strategy) {
        return guard;
      }
      released.await;
    }
  }

  /// Free slots for `strategy`.
  pub fn available(&self, strategy: &str) -> usize {
    self
      .inner
      .slots
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(strategy)
      .map_or(0, |s| s.capacity.saturating_sub(s.in_use))
  }

  fn release(&self, strategy: &str) {
    {
      let mut slots = self
        .inner
        .slots
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
      if let Some(entry) = slots.get_mut(strategy) {
        entry.in_use = entry.in_use.saturating_sub(1);
        trace!(strategy, in_use = entry.in_use, "slot_released");
      }
    }
    self.inner.released.notify_waiters();
  }
}

/// A claimed execution slot.
#[derive(Debug)]
pub struct SlotGuard {
  table: CapacityTable,
  strategy: String,
}

impl SlotGuard {
  pub fn strategy(&self) -> &str {
    &self.strategy
  }
}

impl Drop for SlotGuard {
  fn drop(&mut self) {
    self.table.release(&self.strategy);
  }
}

impl std::fmt::Debug for CapacityTable {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CapacityTable").finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn test_claim_up_to_capacity() {
    let table = CapacityTable::new([("gpu", 2)]);
    let a = table.try_claim("gpu").unwrap();
    let _b = table.try_claim("gpu").unwrap();
    assert!(table.try_claim("gpu").is_none());

    drop(a);
    assert_eq!(table.available("gpu"), 1);
    assert!(table.try_claim("gpu").is_some());
  }

  #[test]
  fn test_unknown_strategy_has_no_slots() {
    let table = CapacityTable::new([("gpu", 1)]);
    assert!(table.try_claim("tpu").is_none());
    assert_eq!(table.available("tpu"), 0);
  }

  #[tokio::test]
  async fn test_waiter_proceeds_after_release() {
    let table = CapacityTable::new([("gpu", 1)]);
    let held = table.try_claim("gpu").unwrap();

    let waiter = {
      let table = table.clone();
      tokio::spawn(async move { table.claim("gpu").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    drop(held);
    let guard = tokio::time::timeout(Duration::from_secs(2), waiter)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(guard.strategy(), "gpu");
    assert_eq!(table.available("gpu"), 0);
  }
}
