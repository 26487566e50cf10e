use std::path::Path;

use serde_json::json;
use sluice_packet::Packet;
use sluice_registry::{CapabilityRegistry, FsCapabilityRegistry, MirrorProvider};
use sluice_resolver::{DependencyError, DependencyResolver, StandardResolver};

fn write_package(root: &Path, name: &str, version: &str) {
  let dir = root.join(sluice_config::dir_name(name, version));
  std::fs::create_dir_all(&dir).unwrap();
  std::fs::write(
    dir.join("capability.json"),
    json!({ "name": name, "version": version, "kind": "model" }).to_string(),
  )
  .unwrap();
  std::fs::write(dir.join("weights.bin"), b"0123").unwrap();
}

fn packet() -> Packet {
  let graph = serde_json::from_value(json!({
    "nodes": [ { "id": "1", "kind": "Load", "inputs": { "ckpt": "model-X" } } ]
  }))
  .unwrap();
  let manifest = serde_json::from_value(json!({
    "name": "p",
    "version": "1",
    "requires": [
      { "name": "vendor/model-X", "version": "1.0" },
      { "name": "model-Y", "version": "2" }
    ]
  }))
  .unwrap();
  Packet::from_defs(graph, manifest).unwrap()
}

#[tokio::test]
async fn test_installs_from_mirror_into_registry() {
  let capabilities = tempfile::tempdir().unwrap();
  let packages = tempfile::tempdir().unwrap();
  write_package(packages.path(), "vendor/model-X", "1.0");
  write_package(packages.path(), "model-Y", "2");

  let resolver = StandardResolver::new(FsCapabilityRegistry::new(capabilities.path()))
    .with_provider(MirrorProvider::new(packages.path()));

  let resolved = resolver.ensure_ready(&packet()).await.unwrap();
  let location = &resolved["vendor/model-X"];
  assert!(location.starts_with(capabilities.path()));
  assert!(location.join("weights.bin").exists());

  let installed = resolver.registry().list().await.unwrap();
  assert_eq!(installed.len(), 2);
}

#[tokio::test]
async fn test_missing_from_mirror_is_reported() {
  let capabilities = tempfile::tempdir().unwrap();
  let packages = tempfile::tempdir().unwrap();
  write_package(packages.path(), "vendor/model-X", "1.0");

  let resolver = StandardResolver::new(FsCapabilityRegistry::new(capabilities.path()))
    .with_provider(MirrorProvider::new(packages.path()));

  let err = resolver.ensure_ready(&packet()).await.unwrap_err();
  match err {
    DependencyError::Missing(missing) => {
      assert_eq!(missing.len(), 1);
      assert_eq!(missing[0].requirement.name, "model-Y");
    }
    other => panic!("unexpected error: {other}"),
  }

  // model-X was still installed by the first pass.
  assert!(
    resolver
      .registry()
      .get("vendor/model-X", Some("1.0"))
      .await
      .unwrap()
      .is_some()
  );
}
