//! Sluice Packet
//!
//! This crate provides the "locked" packet representation for sluice.
//! A locked packet is the validated form of an authored graph plus manifest,
//! cached read-only for the life of the process.
//!
//! Key differences from the `sluice-config` definitions:
//! - Nodes live in a dense arena; id and label lookups go through indexes
//!   built once per packet version
//! - Edges are derived from `$link` inputs and checked (known targets, no cycles)
//! - Every manifest parameter is resolved to exactly one node input whose
//!   expected type is compatible with the declared parameter type
//! - Parameter application order is fixed at load time

mod error;
mod graph;
mod packet;
mod source;
mod store;

pub use error::PacketError;
pub use graph::{Edge, Graph, Node};
pub use packet::{Packet, PacketId, Parameter};
pub use source::{FsPacketSource, MemoryPacketSource, PacketSource};
pub use store::PacketStore;
