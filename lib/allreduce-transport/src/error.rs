use allreduce_types::Rank;
use thiserror::Error;

pub type Result<T, E = TransportError> = error_stack::Result<T, E>;

/// Transport-surfaced failures (§7: "surfaced by the transport as a fatal condition; the core
/// does not attempt retry").
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no inbox registered for rank {0}")]
    UnknownDestination(Rank),
    #[error("send to rank {0} failed, the destination's inbox was already dropped")]
    Disconnected(Rank),
}
