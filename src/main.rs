use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sluice_config::EngineConfig;
use sluice_engine::{
  CancelOutcome, Engine, ExecutionRecord, RequestState, Session, SubmitRequest, Submission,
  generate_request_id,
};
use sluice_registry::{CapabilityRegistry, FsCapabilityRegistry};

/// Sluice - a declarative workflow execution engine
#[derive(Parser)]
#[command(name = "sluice")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.sluice)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Engine configuration file (default: <data-dir>/sluice.json)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a packet and stream its events to stdout
  Run {
    #[command(flatten)]
    target: PacketArgs,

    /// Request id (generated when omitted)
    #[arg(long)]
    id: Option<String>,
  },

  /// Validate a packet and print the materialized graph without running it
  Check {
    #[command(flatten)]
    target: PacketArgs,
  },

  /// Serve JSON-lines commands on stdin, writing replies and events to stdout
  Serve,

  /// Manage installed capabilities
  Capability {
    #[command(subcommand)]
    command: CapabilityCommand,
  },
}

#[derive(clap::Args)]
struct PacketArgs {
  /// Packet name, e.g. studio/txt2img
  packet: String,

  /// Packet version
  version: String,

  /// Quality tier
  #[arg(long, default_value = "draft")]
  tier: String,

  /// Parameter value as NAME=VALUE; VALUE is parsed as JSON, else taken as a string
  #[arg(long = "param", value_parser = parse_param)]
  params: Vec<(String, Value)>,

  /// JSON object of parameter values, applied before --param
  #[arg(long)]
  params_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum CapabilityCommand {
  /// List installed capabilities
  List,

  /// Install a capability from a package directory
  Install {
    /// Directory containing capability.json
    package: PathBuf,
  },

  /// Remove an installed capability
  Remove { name: String, version: String },
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
  let (name, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
  let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
  Ok((name.to_string(), value))
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".sluice"),
  };
  let config_path = cli
    .config
    .unwrap_or_else(|| data_dir.join("sluice.json"));

  let Some(command) = cli.command else {
    println!("sluice - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    let config = load_config(&config_path, &data_dir)?;
    match command {
      Commands::Run { target, id } => run_packet(&config, target, id).await,
      Commands::Check { target } => check_packet(&config, target).await,
      Commands::Serve => serve(&config).await,
      Commands::Capability { command } => capability(&config, command).await,
    }
  })
}

fn load_config(path: &Path, data_dir: &Path) -> Result<EngineConfig> {
  let config = EngineConfig::load_or_default(path)
    .with_context(|| format!("failed to load configuration: {}", path.display()))?
    .with_base_dir(data_dir);
  debug!(config = %path.display(), data_dir = %data_dir.display(), "config_loaded");
  Ok(config)
}

async fn build_request(target: PacketArgs, id: Option<String>) -> Result<SubmitRequest> {
  let mut parameters: HashMap<String, Value> = match &target.params_file {
    Some(path) => {
      let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read parameters file: {}", path.display()))?;
      serde_json::from_str(&content)
        .with_context(|| format!("failed to parse parameters file: {}", path.display()))?
    }
    None => HashMap::new(),
  };
  parameters.extend(target.params);

  Ok(SubmitRequest {
    packet: target.packet,
    version: target.version,
    parameters,
    tier: target.tier,
    request_id: id,
  })
}

async fn run_packet(config: &EngineConfig, target: PacketArgs, id: Option<String>) -> Result<()> {
  let engine = Engine::open(config).context("failed to create engine")?;
  let request = build_request(target, id).await?;
  let session = engine.connect();

  let submission = engine
    .submit_from(&session, request)
    .await
    .context("submission rejected")?;
  let request_id = submission.request_id;
  eprintln!("Submitted request: {request_id}");

  loop {
    tokio::select! {
      event = session.recv() => {
        let Some(event) = event else { break };
        println!("{}", serde_json::to_string(&event)?);
        if event.is_final() {
          break;
        }
      }
      _ = tokio::signal::ctrl_c() => {
        let outcome = engine.cancel(&request_id);
        eprintln!("Cancel requested: {outcome:?}");
      }
    }
  }

  let record = engine
    .wait(&request_id)
    .await
    .ok_or_else(|| anyhow!("request {request_id} is no longer tracked"))?;
  for output in &record.output_locations {
    eprintln!("Output: {}", output.display());
  }
  match record.state {
    RequestState::Succeeded => Ok(()),
    state => match &record.failure {
      Some(failure) => bail!("request {request_id} {state} ({}): {}", failure.kind, failure.message),
      None => bail!("request {request_id} {state}"),
    },
  }
}

async fn check_packet(config: &EngineConfig, target: PacketArgs) -> Result<()> {
  let engine = Engine::open(config).context("failed to create engine")?;
  let request = build_request(target, None).await?;

  let checked = engine.check(&request).await.context("check failed")?;
  eprintln!(
    "Packet {} is ready ({} nodes, {} parameters applied)",
    checked.packet.id,
    checked.graph.graph().nodes().len(),
    checked.graph.applied().len()
  );
  for (name, location) in &checked.capabilities {
    eprintln!("Capability {name}: {}", location.display());
  }
  println!("{}", serde_json::to_string_pretty(&checked.graph.to_def())?);
  Ok(())
}

async fn capability(config: &EngineConfig, command: CapabilityCommand) -> Result<()> {
  let registry = FsCapabilityRegistry::new(&config.capabilities_dir);
  match command {
    CapabilityCommand::List => {
      let installed = registry
        .list()
        .await
        .context("failed to list capabilities")?;
      for manifest in installed {
        println!("{}@{}\t{}", manifest.name, manifest.version, manifest.kind);
      }
    }
    CapabilityCommand::Install { package } => {
      let installed = registry
        .install(&package)
        .await
        .with_context(|| format!("failed to install {}", package.display()))?;
      eprintln!(
        "Installed {}@{} at {}",
        installed.manifest.name,
        installed.manifest.version,
        installed.location.display()
      );
    }
    CapabilityCommand::Remove { name, version } => {
      registry
        .remove(&name, &version)
        .await
        .with_context(|| format!("failed to remove {name}@{version}"))?;
      eprintln!("Removed {name}@{version}");
    }
  }
  Ok(())
}

/// A command read from stdin in `serve` mode.
#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ServeCommand {
  Submit(SubmitRequest),
  Cancel { request_id: String },
  Status { request_id: String },
}

/// A reply written to stdout in `serve` mode. Events are written as-is.
#[derive(Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
enum Reply {
  Accepted(Submission),
  Rejected {
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    reason: &'static str,
    message: String,
  },
  Cancel {
    request_id: String,
    outcome: CancelOutcome,
  },
  Status {
    request_id: String,
    record: Option<ExecutionRecord>,
  },
  Error {
    message: String,
  },
}

async fn serve(config: &EngineConfig) -> Result<()> {
  let engine = Arc::new(Engine::open(config).context("failed to create engine")?);
  let session = Arc::new(engine.connect());
  let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

  let writer = tokio::spawn(async move {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = out_rx.recv().await {
      if stdout.write_all(line.as_bytes()).await.is_err()
        || stdout.write_all(b"\n").await.is_err()
        || stdout.flush().await.is_err()
      {
        break;
      }
    }
  });
  let forwarder = tokio::spawn(forward_events(session.clone(), out_tx.clone()));

  info!("serve_started");
  let mut submitted: Vec<String> = Vec::new();
  let mut submissions = Vec::new();
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  loop {
    let line = tokio::select! {
      line = lines.next_line() => line.context("failed to read stdin")?,
      _ = tokio::signal::ctrl_c() => {
        for request_id in &submitted {
          engine.cancel(request_id);
        }
        None
      }
    };
    let Some(line) = line else { break };
    if line.trim().is_empty() {
      continue;
    }

    let command: ServeCommand = match serde_json::from_str(&line) {
      Ok(command) => command,
      Err(e) => {
        warn!(error = %e, "serve_command_invalid");
        send(&out_tx, &Reply::Error {
          message: format!("invalid command: {e}"),
        });
        continue;
      }
    };

    match command {
      ServeCommand::Submit(mut request) => {
        let request_id = request
          .request_id
          .get_or_insert_with(generate_request_id)
          .clone();
        submitted.push(request_id.clone());
        let engine = engine.clone();
        let session = session.clone();
        let out_tx = out_tx.clone();
        submissions.push(tokio::spawn(async move {
          let reply = match engine.submit_from(&session, request).await {
            Ok(submission) => Reply::Accepted(submission),
            Err(rejection) => Reply::Rejected {
              request_id: Some(request_id),
              reason: rejection.reason(),
              message: rejection.to_string(),
            },
          };
          send(&out_tx, &reply);
        }));
      }
      ServeCommand::Cancel { request_id } => {
        let outcome = engine.cancel(&request_id);
        send(&out_tx, &Reply::Cancel {
          request_id,
          outcome,
        });
      }
      ServeCommand::Status { request_id } => {
        let record = engine.record(&request_id);
        send(&out_tx, &Reply::Status { request_id, record });
      }
    }
  }

  // Let in-flight requests finish so their final events reach stdout.
  for submission in submissions {
    let _ = submission.await;
  }
  for request_id in &submitted {
    engine.wait(request_id).await;
  }
  engine.relay().shutdown();
  let _ = forwarder.await;
  drop(out_tx);
  let _ = writer.await;
  info!("serve_stopped");
  Ok(())
}

async fn forward_events(session: Arc<Session>, out: mpsc::UnboundedSender<String>) {
  while let Some(event) = session.recv().await {
    match serde_json::to_string(&event) {
      Ok(line) => {
        if out.send(line).is_err() {
          break;
        }
      }
      Err(e) => warn!(error = %e, "event_encode_failed"),
    }
  }
}

fn send(out: &mpsc::UnboundedSender<String>, reply: &Reply) {
  match serde_json::to_string(reply) {
    Ok(line) => {
      let _ = out.send(line);
    }
    Err(e) => warn!(error = %e, "reply_encode_failed"),
  }
}
