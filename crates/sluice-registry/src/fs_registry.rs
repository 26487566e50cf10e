use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::manifest::CapabilityManifest;
use crate::registry::{CapabilityRegistry, InstalledCapability};

const MANIFEST_FILE: &str = "capability.json";
const STAGING_SUFFIX: &str = ".partial";

/// Directories an install is still being copied into.
fn is_staging(dir_name: &str) -> bool {
  dir_name.starts_with('.')
}

/// Filesystem-based capability registry.
///
/// Capabilities are stored in a directory structure:
/// ```text
/// {root}/
/// └── vendor--model-X--1.0/
///     ├── capability.json
///     └── ... (weights, plugin files, binaries)
/// ```
pub struct FsCapabilityRegistry {
  root: PathBuf,
}

impl FsCapabilityRegistry {
  /// Create a new filesystem registry at the given root path.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Get the root directory of the registry.
  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Read the manifest from a capability directory.
  async fn read_manifest(&self, dir: &Path) -> Result<CapabilityManifest, RegistryError> {
    let content = fs::read_to_string(dir.join(MANIFEST_FILE)).await?;
    let manifest: CapabilityManifest = serde_json::from_str(&content)?;
    Ok(manifest)
  }

  async fn load_capability(&self, location: PathBuf) -> Result<InstalledCapability, RegistryError> {
    let manifest = self.read_manifest(&location).await?;
    Ok(InstalledCapability { manifest, location })
  }

  /// All installed versions of `name`.
  async fn versions_of(&self, name: &str) -> Result<Vec<InstalledCapability>, RegistryError> {
    let mut matching = Vec::new();
    let mut entries = fs::read_dir(&self.root).await?;

    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if !path.is_dir() {
        continue;
      }

      let dir_name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) if !is_staging(n) => n,
        _ => continue,
      };

      if let Some((parsed_name, _)) = sluice_config::parse_dir_name(dir_name)
        && parsed_name == name
      {
        matching.push(self.load_capability(path).await?);
      }
    }

    Ok(matching)
  }
}

#[async_trait]
impl CapabilityRegistry for FsCapabilityRegistry {
  async fn get(
    &self,
    name: &str,
    version: Option<&str>,
  ) -> Result<Option<InstalledCapability>, RegistryError> {
    if !self.root.exists() {
      return Ok(None);
    }

    if let Some(v) = version {
      let dir = self.root.join(sluice_config::dir_name(name, v));
      if !dir.join(MANIFEST_FILE).is_file() {
        return Ok(None);
      }
      return self.load_capability(dir).await.map(Some);
    }

    // Latest version (simple string sort)
    let mut versions = self.versions_of(name).await?;
    versions.sort_by(|a, b| b.manifest.version.cmp(&a.manifest.version));
    Ok(versions.into_iter().next())
  }

  async fn install(&self, package_path: &Path) -> Result<InstalledCapability, RegistryError> {
    let manifest = self.read_manifest(package_path).await?;
    let target_dir = self.root.join(manifest.dir_name());

    if target_dir.exists() {
      return Err(RegistryError::AlreadyExists {
        name: manifest.name.clone(),
        version: manifest.version.clone(),
      });
    }

    // Copy beside the target and rename into place, so an interrupted
    // copy is never mistaken for an installed capability.
    let staging_dir = self
      .root
      .join(format!(".{}{STAGING_SUFFIX}", manifest.dir_name()));
    if staging_dir.exists() {
      fs::remove_dir_all(&staging_dir).await?;
    }

    debug!(
      package = %package_path.display(),
      target = %target_dir.display(),
      "copying capability package"
    );
    if let Err(e) = copy_dir_recursive(package_path, &staging_dir).await {
      if let Err(cleanup) = fs::remove_dir_all(&staging_dir).await {
        warn!(staging = %staging_dir.display(), error = %cleanup, "staging_cleanup_failed");
      }
      return Err(e.into());
    }
    fs::rename(&staging_dir, &target_dir).await?;

    info!(
      name = %manifest.name,
      version = %manifest.version,
      "capability_installed"
    );
    self.load_capability(target_dir).await
  }

  async fn list(&self) -> Result<Vec<CapabilityManifest>, RegistryError> {
    let mut manifests = Vec::new();

    if !self.root.exists() {
      return Ok(manifests);
    }

    let mut entries = fs::read_dir(&self.root).await?;
    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      let staging = entry.file_name().to_str().is_none_or(is_staging);
      if path.is_dir()
        && !staging
        && let Ok(manifest) = self.read_manifest(&path).await
      {
        manifests.push(manifest);
      }
    }

    manifests.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
    Ok(manifests)
  }

  async fn remove(&self, name: &str, version: &str) -> Result<(), RegistryError> {
    match self.get(name, Some(version)).await? {
      Some(c) => {
        fs::remove_dir_all(&c.location).await?;
        Ok(())
      }
      None => Err(RegistryError::VersionNotFound {
        name: name.to_string(),
        version: version.to_string(),
      }),
    }
  }
}

/// Recursively copy a directory.
async fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<(), std::io::Error> {
  fs::create_dir_all(dest).await?;

  let mut entries = fs::read_dir(src).await?;
  while let Some(entry) = entries.next_entry().await? {
    let src_path = entry.path();
    let dest_path = dest.join(entry.file_name());

    if src_path.is_dir() {
      Box::pin(copy_dir_recursive(&src_path, &dest_path)).await?;
    } else {
      fs::copy(&src_path, &dest_path).await?;
    }
  }

  Ok(())
}
