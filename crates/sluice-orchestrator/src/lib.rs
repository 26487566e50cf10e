//! Execution orchestration for sluice.
//!
//! The orchestrator turns a materialized graph into a supervised execution
//! unit. Each request gets its own supervisor task which walks it through
//! `Queued -> Dispatched -> Running` and into exactly one terminal state,
//! publishing every transition through an [`sluice_relay::EventEmitter`].
//!
//! Supervisors share nothing but the [`CapacityTable`]; a slow or stuck unit
//! never blocks another request from being placed or cancelled.
//!
//! # Example
//!
//! ```ignore
//! let orchestrator = Orchestrator::new(&config, Arc::new(ProcessLauncher::new()))?;
//! let placement = orchestrator.place("draft", packet.kind.as_deref())?;
//! let execution = orchestrator.start(job, placement, Arc::new(relay.clone()));
//! let record = execution.wait().await;
//! ```

mod capacity;
mod data_area;
mod error;
mod execution;
mod orchestrator;
mod process;
mod strategy;
mod supervisor;
mod unit;

pub use capacity::{CapacityTable, SlotGuard};
pub use data_area::{DataArea, UnitPaths, collect_outputs, valid_request_id};
pub use error::{LaunchError, OrchestratorError};
pub use execution::{CancelOutcome, Execution, ExecutionRecord, Failure, UnitRecord, UnitStatus};
pub use orchestrator::{Job, Orchestrator, Placement};
pub use process::{ProcessLauncher, parse_progress};
pub use strategy::{Selection, Strategy, StrategyMap};
pub use unit::{ExitReport, LaunchSpec, RunningUnit, UnitLauncher, UnitSignal};
