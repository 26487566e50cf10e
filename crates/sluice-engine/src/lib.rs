//! Sluice Engine
//!
//! The submission, cancellation and session API over the packet store,
//! dependency resolver, parameter injector, orchestrator and event relay.
//!
//! ```ignore
//! let engine = Engine::open(&config)?;
//! let session = engine.connect();
//! let submission = engine
//!   .submit_from(&session, SubmitRequest::new("studio/txt2img", "1.2.0", "draft"))
//!   .await?;
//! while let Some(event) = session.recv().await {
//!   println!("{}", serde_json::to_string(&event)?);
//!   if event.is_final() {
//!     break;
//!   }
//! }
//! ```

mod engine;
mod error;
mod request;
mod table;

pub use engine::Engine;
pub use error::Rejection;
pub use request::{Checked, SubmitRequest, Submission, generate_request_id};

pub use sluice_orchestrator::{CancelOutcome, ExecutionRecord, Failure, UnitRecord, UnitStatus};
pub use sluice_relay::{Event, EventBody, FailureKind, ProgressUpdate, RequestState, Session, SessionId};
