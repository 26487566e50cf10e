use std::path::{Component, Path, PathBuf};

use tokio::fs;

use crate::error::LaunchError;

/// Shared data area, isolated by path per request.
///
/// ```text
/// {root}/
/// ├── runs/{request_id}/graph.json
/// └── outputs/{request_id}/...
/// ```
#[derive(Debug, Clone)]
pub struct DataArea {
  root: PathBuf,
}

/// Paths assigned to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitPaths {
  pub run_dir: PathBuf,
  pub graph_path: PathBuf,
  pub output_dir: PathBuf,
}

/// Whether `id` is usable as a request id (and therefore as a path segment).
pub fn valid_request_id(id: &str) -> bool {
  !id.is_empty()
    && id.len() <= 128
    && id != "."
    && id != ".."
    && id
      .bytes()
      .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

impl DataArea {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn paths(&self, request_id: &str) -> UnitPaths {
    let run_dir = self.root.join("runs").join(request_id);
    UnitPaths {
      graph_path: run_dir.join("graph.json"),
      run_dir,
      output_dir: self.root.join("outputs").join(request_id),
    }
  }

  /// Create the request's directories and write the materialized graph.
  ///
  /// Anything left under the request's paths by an earlier run is removed
  /// first, so outputs are only ever attributed to this run.
  pub async fn prepare(&self, request_id: &str, graph: &[u8]) -> Result<UnitPaths, LaunchError> {
    let paths = self.paths(request_id);
    for dir in [&paths.run_dir, &paths.output_dir] {
      match fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
          return Err(LaunchError::Prepare {
            path: dir.clone(),
            source,
          });
        }
      }
      fs::create_dir_all(dir)
        .await
        .map_err(|source| LaunchError::Prepare {
          path: dir.clone(),
          source,
        })?;
    }
    fs::write(&paths.graph_path, graph)
      .await
      .map_err(|source| LaunchError::Prepare {
        path: paths.graph_path.clone(),
        source,
      })?;
    Ok(paths)
  }
}

/// Declared outputs that exist and are non-empty.
///
/// With nothing declared, the output directory itself must be non-empty.
/// Returns an error message when no output qualifies.
pub async fn collect_outputs(output_dir: &Path, declared: &[String]) -> Result<Vec<PathBuf>, String> {
  if declared.is_empty() {
    return if non_empty(output_dir).await {
      Ok(vec![output_dir.to_path_buf()])
    } else {
      Err(format!(
        "unit reported success but {} is empty",
        output_dir.display()
      ))
    };
  }

  let mut found = Vec::new();
  for relative in declared {
    let Some(path) = contained(output_dir, relative) else {
      continue;
    };
    if non_empty(&path).await {
      found.push(path);
    }
  }

  if found.is_empty() {
    Err(format!(
      "unit reported success but no declared output exists: {}",
      declared.join(", ")
    ))
  } else {
    Ok(found)
  }
}

/// `relative` under `base`, refusing absolute paths and parent components.
fn contained(base: &Path, relative: &str) -> Option<PathBuf> {
  let relative = Path::new(relative);
  relative
    .components()
    .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    .then(|| base.join(relative))
}

/// A file with content, or a directory with at least one entry.
async fn non_empty(path: &Path) -> bool {
  let Ok(metadata) = fs::metadata(path).await else {
    return false;
  };
  if metadata.is_dir() {
    match fs::read_dir(path).await {
      Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
      Err(_) => false,
    }
  } else {
    metadata.len() > 0
  }
}
