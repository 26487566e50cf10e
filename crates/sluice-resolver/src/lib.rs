//! Sluice Resolver
//!
//! Gates a packet on its declared capabilities before any execution unit is
//! launched. Every requirement must be present in the capability registry;
//! a missing one may be installed from a provider, at most once per
//! `(name, version)` for the life of the process.

mod error;
mod resolver;

pub use error::{DependencyError, MissingCapability};
pub use resolver::{DependencyResolver, ResolvedCapabilities, StandardResolver};
