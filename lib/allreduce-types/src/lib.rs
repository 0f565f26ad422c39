//! Shared vocabulary types for the allreduce core: participant-set keys, ranks, and the
//! topology constants (`P`, `P2`, `R`, `steps`) the two algorithm engines derive from them.
//!
//! This crate has no dependency on the engines, the transport, or any particular payload type —
//! it is the stable ground both sides build on.

pub mod error;
pub mod rank;
pub mod topology;

pub use error::{Result, TopologyError};
pub use rank::{InstanceId, ParticipantKind, ParticipantSetKey, Rank};
pub use topology::{ParticipantSet, Topology, VirtualRank};
