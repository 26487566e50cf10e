use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::error::PacketError;
use crate::packet::{Packet, PacketId};
use crate::source::PacketSource;

/// Process-wide cache of locked packets.
///
/// A packet is validated once per `(name, version)` and then shared as an
/// immutable `Arc<Packet>`. Failed loads are not cached, so a corrected
/// packet can be loaded on the next request.
pub struct PacketStore<S: PacketSource> {
  source: S,
  cache: RwLock<HashMap<PacketId, Arc<Packet>>>,
}

impl<S: PacketSource> PacketStore<S> {
  pub fn new(source: S) -> Self {
    Self {
      source,
      cache: RwLock::new(HashMap::new()),
    }
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  /// Load a packet, validating it on first use.
  pub async fn load(&self, name: &str, version: &str) -> Result<Arc<Packet>, PacketError> {
    let id = PacketId::new(name, version);
    if let Some(packet) = self.cached(&id) {
      return Ok(packet);
    }

    let (graph, manifest) =
      self
        .source
        .fetch(name, version)
        .await?
        .ok_or_else(|| PacketError::NotFound {
          name: name.to_string(),
          version: version.to_string(),
        })?;

    let declared = PacketId::new(manifest.name.clone(), manifest.version.clone());
    if declared != id {
      warn!(packet = %id, declared = %declared, "packet_identity_mismatch");
      return Err(PacketError::IdentityMismatch {
        expected: id.to_string(),
        actual: declared.to_string(),
      });
    }

    let packet = match Packet::from_defs(graph, manifest) {
      Ok(packet) => Arc::new(packet),
      Err(e) => {
        warn!(packet = %id, error = %e, "packet_rejected");
        return Err(e);
      }
    };

    let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
    // Another task may have loaded the same version concurrently; keep the first.
    let packet = cache.entry(id.clone()).or_insert(packet).clone();
    info!(
      packet = %id,
      nodes = packet.graph.nodes().len(),
      parameters = packet.parameters.len(),
      "packet_loaded"
    );
    Ok(packet)
  }

  fn cached(&self, id: &PacketId) -> Option<Arc<Packet>> {
    self
      .cache
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(id)
      .cloned()
  }

  /// Drop one cached version so the next load re-reads it.
  pub fn invalidate(&self, name: &str, version: &str) -> bool {
    let removed = self
      .cache
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&PacketId::new(name, version))
      .is_some();
    debug!(name, version, removed, "packet_invalidated");
    removed
  }

  pub fn invalidate_all(&self) {
    self
      .cache
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .clear();
  }

  /// Number of packets currently cached.
  pub fn len(&self) -> usize {
    self
      .cache
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
