//! Sluice Injector
//!
//! Turns a locked packet plus caller-supplied parameter values into a
//! runnable graph. The packet's cached graph is never mutated; each call
//! works on its own copy.

mod error;
mod materialize;

pub use error::ParameterError;
pub use materialize::{RunnableGraph, materialize};
