#![cfg(unix)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use sluice_config::EngineConfig;
use sluice_orchestrator::{CancelOutcome, Execution, Job, Orchestrator, ProcessLauncher};
use sluice_packet::Packet;
use sluice_relay::{Event, EventBody, EventPublisher, FailureKind, RequestState};

#[derive(Default)]
struct Recorder(Mutex<Vec<Event>>);

impl EventPublisher for Recorder {
  fn publish(&self, event: Event) {
    self.0.lock().unwrap().push(event);
  }
}

struct Harness {
  dir: tempfile::TempDir,
  orchestrator: Orchestrator,
  events: Arc<Recorder>,
}

impl Harness {
  fn new(command: &str, args: &[&str]) -> Self {
    let dir = tempfile::tempdir().unwrap();
    let config: EngineConfig = serde_json::from_value(json!({
      "data_area": dir.path().join("data"),
      "strategies": { "local": { "command": command, "args": args, "capacity": 2 } },
      "tiers": { "draft": { "strategy": "local" } },
      "supervision": {
        "max_silence_ms": 10000,
        "cancel_grace_ms": 200,
        "launch_retries": 0
      }
    }))
    .unwrap();
    let orchestrator = Orchestrator::new(&config, Arc::new(ProcessLauncher::new())).unwrap();
    Self {
      dir,
      orchestrator,
      events: Arc::new(Recorder::default()),
    }
  }

  fn shell(script: &str) -> Self {
    Self::new("/bin/sh", &["-c", script])
  }

  fn start(&self, request_id: &str) -> Arc<Execution> {
    let graph = serde_json::from_value(json!({
      "nodes": [{ "id": "6", "kind": "Prompt", "label": "prompt", "inputs": { "text": "a cat" } }]
    }))
    .unwrap();
    let manifest = serde_json::from_value(json!({
      "name": "studio/txt2img",
      "version": "1.0.0",
      "parameters": { "prompt": { "label": "prompt", "input_name": "text", "type": "string" } },
      "outputs": ["out.png"]
    }))
    .unwrap();
    let packet = Arc::new(Packet::from_defs(graph, manifest).unwrap());
    let values = serde_json::from_value(json!({ "prompt": "a dog" })).unwrap();
    let graph = sluice_injector::materialize(&packet, &values).unwrap();
    let job = Job {
      request_id: request_id.to_string(),
      tier: "draft".to_string(),
      packet,
      graph,
      capabilities: BTreeMap::new(),
    };
    let placement = self.orchestrator.place("draft", None).unwrap();
    self.orchestrator.start(job, placement, self.events.clone())
  }

  fn bodies(&self) -> Vec<EventBody> {
    self
      .events
      .0
      .lock()
      .unwrap()
      .iter()
      .map(|e| e.body.clone())
      .collect()
  }
}

async fn finish(execution: &Execution) -> sluice_orchestrator::ExecutionRecord {
  tokio::time::timeout(Duration::from_secs(10), execution.wait())
    .await
    .expect("request did not finish")
}

#[tokio::test]
async fn test_unit_writes_output_and_reports_progress() {
  let harness = Harness::shell(
    r#"echo '{"progress": 0.5, "node": "6"}'; echo "warming up"; cat "$SLUICE_GRAPH" > "$SLUICE_OUTPUT_DIR/out.png""#,
  );
  let execution = harness.start("r1");
  let record = finish(&execution).await;

  assert_eq!(record.state, RequestState::Succeeded);
  let output = harness.dir.path().join("data/outputs/r1/out.png");
  assert_eq!(record.output_locations, vec![output.clone()]);

  // The unit saw the materialized graph, not the authored one.
  let written: serde_json::Value = serde_json::from_slice(&std::fs::read(output).unwrap()).unwrap();
  assert_eq!(written["nodes"][0]["inputs"]["text"], "a dog");

  let bodies = harness.bodies();
  assert!(bodies.iter().any(|b| matches!(
    b,
    EventBody::Progress(update) if update.progress == Some(0.5) && update.node.as_deref() == Some("6")
  )));
  assert!(matches!(bodies.last(), Some(EventBody::Succeeded { .. })));
}

#[tokio::test]
async fn test_arguments_are_templated() {
  let harness = Harness::new(
    "/bin/sh",
    &["-c", r#"printf '%s' "$1" > "$SLUICE_OUTPUT_DIR/out.png""#, "sh", "{{ request_id }}:{{ tier }}"],
  );
  let execution = harness.start("r-templated");
  let record = finish(&execution).await;

  assert_eq!(record.state, RequestState::Succeeded);
  let content = std::fs::read_to_string(&record.output_locations[0]).unwrap();
  assert_eq!(content, "r-templated:draft");
}

#[tokio::test]
async fn test_clean_exit_without_output_fails() {
  let harness = Harness::shell("exit 0");
  let record = finish(&harness.start("r1")).await;

  assert_eq!(record.state, RequestState::Failed);
  assert_eq!(record.failure.unwrap().kind, FailureKind::Runtime);
}

#[tokio::test]
async fn test_nonzero_exit_fails() {
  let harness = Harness::shell(r#"printf x > "$SLUICE_OUTPUT_DIR/out.png"; exit 3"#);
  let record = finish(&harness.start("r1")).await;

  assert_eq!(record.state, RequestState::Failed);
  let failure = record.failure.unwrap();
  assert_eq!(failure.kind, FailureKind::Runtime);
  assert!(failure.message.contains('3'));
}

#[tokio::test]
async fn test_missing_command_is_a_launch_failure() {
  let harness = Harness::new("/nonexistent/sluice-unit", &[]);
  let record = finish(&harness.start("r1")).await;

  assert_eq!(record.state, RequestState::Failed);
  assert_eq!(record.failure.unwrap().kind, FailureKind::Launch);
}

#[tokio::test]
async fn test_cancel_kills_unit_that_ignores_sigterm() {
  let harness = Harness::shell("trap '' TERM; while true; do sleep 0.05; done");
  let execution = harness.start("r1");

  tokio::time::timeout(Duration::from_secs(5), async {
    while execution.state() != RequestState::Running {
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .unwrap();

  let started = Instant::now();
  assert_eq!(execution.request_cancel(), CancelOutcome::Acknowledged);
  let record = finish(&execution).await;
  assert_eq!(record.state, RequestState::Cancelled);

  // The slot comes back once the process group is gone.
  tokio::time::timeout(Duration::from_secs(5), async {
    while harness.orchestrator.capacity().available("local") < 2 {
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .unwrap();
  assert!(started.elapsed() < Duration::from_secs(5));
  assert!(matches!(
    harness.bodies().last(),
    Some(EventBody::StateChanged {
      to: RequestState::Cancelled,
      ..
    })
  ));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_background_children_are_stopped_after_exit() {
  let harness = Harness::shell(
    r#"sleep 30 >/dev/null 2>&1 & echo $! > "$SLUICE_OUTPUT_DIR/bg.pid"; printf x > "$SLUICE_OUTPUT_DIR/out.png""#,
  );
  let record = finish(&harness.start("r1")).await;
  assert_eq!(record.state, RequestState::Succeeded);

  let pid_file = harness.dir.path().join("data/outputs/r1/bg.pid");
  let pid = std::fs::read_to_string(pid_file).unwrap().trim().to_string();
  let stat = format!("/proc/{pid}/stat");

  // Gone, or a zombie waiting for its new parent to reap it.
  tokio::time::timeout(Duration::from_secs(5), async {
    loop {
      match std::fs::read_to_string(&stat) {
        Err(_) => break,
        Ok(line) if line.contains(") Z ") => break,
        Ok(_) => tokio::time::sleep(Duration::from_millis(20)).await,
      }
    }
  })
  .await
  .expect("background child survived the unit");
}
