use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sluice_config::{GraphDef, ManifestDef};

use crate::error::PacketError;

/// Where authored packets come from.
#[async_trait]
pub trait PacketSource: Send + Sync {
  /// Fetch the authored definitions for `(name, version)`.
  ///
  /// Returns `Ok(None)` when the source has no such packet.
  async fn fetch(
    &self,
    name: &str,
    version: &str,
  ) -> Result<Option<(GraphDef, ManifestDef)>, PacketError>;
}

/// Packet source reading `{root}/{name--version}/{graph,manifest}.json`.
pub struct FsPacketSource {
  root: PathBuf,
}

impl FsPacketSource {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn packet_dir(&self, name: &str, version: &str) -> PathBuf {
    self.root.join(sluice_config::dir_name(name, version))
  }
}

async fn read_json<T: DeserializeOwned>(path: &Path, file: &str) -> Result<T, PacketError> {
  let content = tokio::fs::read_to_string(path)
    .await
    .map_err(|source| PacketError::Io {
      path: path.to_path_buf(),
      source,
    })?;
  serde_json::from_str(&content).map_err(|source| PacketError::Parse {
    file: file.to_string(),
    source,
  })
}

#[async_trait]
impl PacketSource for FsPacketSource {
  async fn fetch(
    &self,
    name: &str,
    version: &str,
  ) -> Result<Option<(GraphDef, ManifestDef)>, PacketError> {
    let dir = self.packet_dir(name, version);
    let manifest_path = dir.join("manifest.json");

    let exists = tokio::fs::try_exists(&manifest_path)
      .await
      .map_err(|source| PacketError::Io {
        path: manifest_path.clone(),
        source,
      })?;
    if !exists {
      return Ok(None);
    }

    let manifest: ManifestDef = read_json(&manifest_path, "manifest.json").await?;
    let graph: GraphDef = read_json(&dir.join("graph.json"), "graph.json").await?;
    Ok(Some((graph, manifest)))
  }
}

/// In-memory packet source, keyed by `(name, version)`.
#[derive(Default)]
pub struct MemoryPacketSource {
  packets: Mutex<HashMap<(String, String), (GraphDef, ManifestDef)>>,
}

impl MemoryPacketSource {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add or replace a packet, keyed by the manifest's identity.
  pub fn insert(&self, graph: GraphDef, manifest: ManifestDef) {
    let key = (manifest.name.clone(), manifest.version.clone());
    self
      .packets
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(key, (graph, manifest));
  }

  /// Add a packet under an explicit key, regardless of what its manifest says.
  pub fn insert_as(&self, name: &str, version: &str, graph: GraphDef, manifest: ManifestDef) {
    self
      .packets
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert((name.to_string(), version.to_string()), (graph, manifest));
  }

  pub fn remove(&self, name: &str, version: &str) {
    self
      .packets
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&(name.to_string(), version.to_string()));
  }
}

#[async_trait]
impl PacketSource for MemoryPacketSource {
  async fn fetch(
    &self,
    name: &str,
    version: &str,
  ) -> Result<Option<(GraphDef, ManifestDef)>, PacketError> {
    Ok(
      self
        .packets
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&(name.to_string(), version.to_string()))
        .cloned(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn write_packet(root: &Path, dir: &str, graph: &str, manifest: &str) {
    let dir = root.join(dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("graph.json"), graph).unwrap();
    std::fs::write(dir.join("manifest.json"), manifest).unwrap();
  }

  #[tokio::test]
  async fn test_fs_fetch() {
    let dir = tempfile::tempdir().unwrap();
    write_packet(
      dir.path(),
      "studio--txt2img--1.0.0",
      r#"{ "nodes": [ { "id": "1", "kind": "Prompt", "inputs": { "text": "hi" } } ] }"#,
      r#"{ "name": "studio/txt2img", "version": "1.0.0" }"#,
    );

    let source = FsPacketSource::new(dir.path());
    let (graph, manifest) = source
      .fetch("studio/txt2img", "1.0.0")
      .await
      .unwrap()
      .unwrap();
    assert_eq!(graph.nodes.len(), 1);
    assert_eq!(manifest.name, "studio/txt2img");
  }

  #[tokio::test]
  async fn test_fs_fetch_missing() {
    let dir = tempfile::tempdir().unwrap();
    let source = FsPacketSource::new(dir.path());
    assert!(source.fetch("nope", "1.0.0").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_fs_fetch_malformed_graph() {
    let dir = tempfile::tempdir().unwrap();
    write_packet(
      dir.path(),
      "broken--1.0.0",
      "{ not json",
      r#"{ "name": "broken", "version": "1.0.0" }"#,
    );

    let source = FsPacketSource::new(dir.path());
    let result = source.fetch("broken", "1.0.0").await;
    assert!(matches!(result, Err(PacketError::Parse { ref file, .. }) if file == "graph.json"));
  }
}
