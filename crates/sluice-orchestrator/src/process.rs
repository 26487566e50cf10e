//! Process execution units.
//!
//! A unit is the strategy's command, spawned in its own process group with
//! the request's paths in its environment. Its stdout is read line by line:
//! a line that parses as a progress object becomes a progress signal, and
//! everything else (stdout or stderr) is logged at debug level only.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use minijinja::{Environment, UndefinedBehavior, Value};
use serde::Deserialize;
use serde_json::json;
use sluice_relay::ProgressUpdate;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::LaunchError;
use crate::unit::{ExitReport, LaunchSpec, RunningUnit, UnitLauncher, UnitSignal};

/// Launches units as local processes.
pub struct ProcessLauncher {
  templates: Environment<'static>,
}

impl Default for ProcessLauncher {
  fn default() -> Self {
    Self::new()
  }
}

impl ProcessLauncher {
  pub fn new() -> Self {
    let mut templates = Environment::new();
    templates.set_undefined_behavior(UndefinedBehavior::Strict);
    Self { templates }
  }

  fn render(&self, what: &str, template: &str, context: &Value) -> Result<String, LaunchError> {
    self
      .templates
      .render_str(template, context.clone())
      .map_err(|source| LaunchError::Template {
        what: what.to_string(),
        source,
      })
  }
}

fn template_context(spec: &LaunchSpec) -> Value {
  let capabilities: BTreeMap<&str, String> = spec
    .capabilities
    .iter()
    .map(|(name, path)| (name.as_str(), path.display().to_string()))
    .collect();
  Value::from_serialize(json!({
    "graph_path": spec.paths.graph_path.display().to_string(),
    "output_dir": spec.paths.output_dir.display().to_string(),
    "run_dir": spec.paths.run_dir.display().to_string(),
    "data_dir": spec.data_dir.display().to_string(),
    "request_id": spec.request_id,
    "capabilities": capabilities,
    "packet_name": spec.packet.name,
    "packet_version": spec.packet.version,
    "tier": spec.tier,
  }))
}

#[async_trait]
impl UnitLauncher for ProcessLauncher {
  async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn RunningUnit>, LaunchError> {
    let def = &spec.strategy.def;
    let context = template_context(spec);

    let args = def
      .args
      .iter()
      .enumerate()
      .map(|(i, arg)| self.render(&format!("argument {i}"), arg, &context))
      .collect::<Result<Vec<_>, _>>()?;

    let capabilities =
      serde_json::to_string(&spec.capabilities).map_err(|source| LaunchError::Serialize {
        what: "capabilities".to_string(),
        source,
      })?;

    let mut command = Command::new(&def.command);
    command
      .args(&args)
      .current_dir(&spec.paths.run_dir)
      .env("SLUICE_REQUEST_ID", &spec.request_id)
      .env("SLUICE_GRAPH", &spec.paths.graph_path)
      .env("SLUICE_OUTPUT_DIR", &spec.paths.output_dir)
      .env("SLUICE_DATA_DIR", &spec.data_dir)
      .env("SLUICE_CAPABILITIES", capabilities)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);
    for (key, template) in &def.env {
      command.env(key, self.render(&format!("env {key}"), template, &context)?);
    }
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
      command: def.command.clone(),
      source,
    })?;

    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
      tokio::spawn(read_stdout(stdout, spec.unit_id.clone(), progress_tx));
    }
    if let Some(stderr) = child.stderr.take() {
      tokio::spawn(read_stderr(stderr, spec.unit_id.clone()));
    }

    info!(
      unit_id = %spec.unit_id,
      request_id = %spec.request_id,
      strategy = %spec.strategy.name,
      pid = ?child.id(),
      "unit_spawned"
    );
    Ok(Box::new(ProcessUnit {
      unit_id: spec.unit_id.clone(),
      pid: child.id(),
      child,
      progress: progress_rx,
      progress_open: true,
      exited: None,
    }))
  }
}

/// Wire shape of a progress line. At least one field must be present.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ProgressLine {
  progress: Option<f64>,
  message: Option<String>,
  node: Option<String>,
}

/// Parse a stdout line as a progress signal.
pub fn parse_progress(line: &str) -> Option<ProgressUpdate> {
  let line = line.trim();
  if !line.starts_with('{') {
    return None;
  }
  let parsed: ProgressLine = serde_json::from_str(line).ok()?;
  if parsed.progress.is_none() && parsed.message.is_none() && parsed.node.is_none() {
    return None;
  }
  Some(ProgressUpdate {
    progress: parsed.progress.map(|p| p.clamp(0.0, 1.0)),
    message: parsed.message,
    node: parsed.node,
  })
}

async fn read_stdout(
  stdout: impl AsyncRead + Unpin,
  unit_id: String,
  progress: mpsc::UnboundedSender<ProgressUpdate>,
) {
  let mut lines = BufReader::new(stdout).lines();
  while let Ok(Some(line)) = lines.next_line().await {
    match parse_progress(&line) {
      Some(update) => {
        if progress.send(update).is_err() {
          break;
        }
      }
      None => debug!(unit_id = %unit_id, stream = "stdout", %line, "unit_output"),
    }
  }
}

async fn read_stderr(stderr: impl AsyncRead + Unpin, unit_id: String) {
  let mut lines = BufReader::new(stderr).lines();
  while let Ok(Some(line)) = lines.next_line().await {
    debug!(unit_id = %unit_id, stream = "stderr", %line, "unit_output");
  }
}

/// How long stdout may stay open after the unit's main process exits.
const STDOUT_DRAIN: Duration = Duration::from_secs(1);

struct ProcessUnit {
  unit_id: String,
  /// Also the process group id; kept because `Child::id` is gone once reaped.
  pid: Option<u32>,
  child: Child,
  progress: mpsc::UnboundedReceiver<ProgressUpdate>,
  progress_open: bool,
  exited: Option<ExitReport>,
}

impl ProcessUnit {
  fn record_exit(&mut self, status: std::io::Result<std::process::ExitStatus>) -> ExitReport {
    let report = match status {
      Ok(status) => ExitReport {
        success: status.success(),
        code: status.code(),
        description: status.to_string(),
      },
      Err(e) => ExitReport {
        success: false,
        code: None,
        description: format!("failed to wait for unit: {e}"),
      },
    };
    debug!(unit_id = %self.unit_id, status = %report.description, "unit_exited");
    self.exited = Some(report.clone());
    report
  }

  #[cfg(unix)]
  fn signal_group(&self, sig: nix::sys::signal::Signal) {
    use nix::sys::signal;
    use nix::unistd::Pid;

    if let Some(pid) = self.pid
      && let Err(e) = signal::kill(Pid::from_raw(-(pid as i32)), sig)
    {
      debug!(unit_id = %self.unit_id, error = %e, "unit_signal_failed");
    }
  }
}

#[async_trait]
impl RunningUnit for ProcessUnit {
  async fn next_signal(&mut self) -> UnitSignal {
    loop {
      if let Some(report) = &self.exited {
        // Progress printed just before exit is still delivered first.
        if self.progress_open {
          match tokio::time::timeout(STDOUT_DRAIN, self.progress.recv()).await {
            Ok(Some(update)) => return UnitSignal::Progress(update),
            _ => self.progress_open = false,
          }
          continue;
        }
        return UnitSignal::Exited(report.clone());
      }
      tokio::select! {
        biased;
        update = self.progress.recv(), if self.progress_open => match update {
          Some(update) => return UnitSignal::Progress(update),
          None => self.progress_open = false,
        },
        status = self.child.wait() => {
          self.record_exit(status);
        }
      }
    }
  }

  async fn terminate(&mut self, grace: Duration) {
    if self.exited.is_some() {
      // Background children may outlive the main process.
      #[cfg(unix)]
      self.signal_group(nix::sys::signal::Signal::SIGTERM);
      return;
    }

    #[cfg(unix)]
    {
      self.signal_group(nix::sys::signal::Signal::SIGTERM);
      if let Ok(status) = tokio::time::timeout(grace, self.child.wait()).await {
        self.record_exit(status);
        return;
      }
      warn!(unit_id = %self.unit_id, grace_ms = grace.as_millis() as u64, "unit_ignored_sigterm");
      self.signal_group(nix::sys::signal::Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = self.child.kill().await {
      debug!(unit_id = %self.unit_id, error = %e, "unit_kill_failed");
    }
    let status = self.child.wait().await;
    self.record_exit(status);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_progress_line() {
    assert_eq!(
      parse_progress(r#"{"progress": 0.5, "node": "3"}"#),
      Some(ProgressUpdate {
        progress: Some(0.5),
        message: None,
        node: Some("3".to_string()),
      })
    );
    assert_eq!(
      parse_progress(r#"{"progress": 7}"#).unwrap().progress,
      Some(1.0)
    );
  }

  #[test]
  fn test_other_lines_are_not_progress() {
    assert_eq!(parse_progress("step 3/20 complete"), None);
    assert_eq!(parse_progress("{}"), None);
    assert_eq!(parse_progress(r#"{"level": "info"}"#), None);
    assert_eq!(parse_progress(r#"["progress"]"#), None);
  }
}
