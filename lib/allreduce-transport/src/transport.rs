use allreduce_types::{ParticipantSetKey, Rank};

use crate::{envelope::Envelope, error::Result};

/// The consumed messaging surface (§6): a reliable, per-`(src, dest)`-FIFO send and nothing
/// else. The core never blocks on it — `send` enqueues and returns immediately, matching the
/// "no suspension points inside a handler" execution model of §5.
pub trait Transport<T>: Send + Sync {
    /// # Errors
    ///
    /// Returns [`TransportError`](crate::TransportError) if `dest` cannot be reached. The core
    /// treats this as fatal (§7) and does not retry.
    fn send(&self, dest: Rank, envelope: Envelope<T>) -> Result<()>;
}

/// The consumed participant-set surface (§6): an ordered rank list per set, membership, and
/// whether a set is the process-wide default group. Treated as an external collaborator —
/// this crate only ever calls it, never implements the real distributed bookkeeping behind it.
pub trait ParticipantSetService: Send + Sync {
    fn ranks_of(&self, key: ParticipantSetKey) -> Option<Vec<Rank>>;
    fn is_member(&self, key: ParticipantSetKey, rank: Rank) -> bool;
    fn is_default(&self, key: ParticipantSetKey) -> bool;
}
