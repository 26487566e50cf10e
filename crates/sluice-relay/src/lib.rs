//! Sluice Relay
//!
//! Typed execution events and the relay that fans them out to client
//! sessions.
//!
//! Events for one request are published by a single [`EventEmitter`], which
//! numbers them and refuses to publish after the request's final event. The
//! [`EventRelay`] delivers each event to the sessions subscribed to its
//! request id, in order, without ever blocking the publisher:
//!
//! - every session has a bounded outbox; when it is full the oldest queued
//!   event is dropped
//! - a disconnected session is either kept (buffering up to the same bound,
//!   replayed on reattach) or removed, depending on [`DisconnectPolicy`]
//!
//! [`DisconnectPolicy`]: sluice_config::DisconnectPolicy

mod emitter;
mod event;
mod outbox;
mod relay;

pub use emitter::{EventEmitter, EventPublisher, NoopPublisher};
pub use event::{Event, EventBody, FailureKind, ProgressUpdate, RequestState};
pub use relay::{EventRelay, Session, SessionId};
