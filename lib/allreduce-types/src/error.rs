use thiserror::Error;

use crate::ParticipantSetKey;

/// Convenient alias, defaulting the `Err` variant to [`TopologyError`].
pub type Result<T, E = TopologyError> = error_stack::Result<T, E>;

/// Errors raised while deriving or querying a [`ParticipantSet`](crate::ParticipantSet)'s
/// topology.
///
/// These are all programmer contract violations (see the core's error handling design): they
/// indicate the caller asked a question that only makes sense for a member of the set, or handed
/// in a set with no ranks at all.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("participant set {0:?} has no ranks")]
    EmptyParticipantSet(ParticipantSetKey),

    #[error("local rank is not a member of participant set {0:?}")]
    NotAMember(ParticipantSetKey),
}
