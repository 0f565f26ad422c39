use allreduce_types::{InstanceId, ParticipantSetKey};
use thiserror::Error;

pub type Result<T, E = CoreError> = error_stack::Result<T, E>;

/// The fatal error kinds of §7: programmer contract violations, state-store inconsistencies,
/// and transport failure bubbled up from below. Every variant carries enough of
/// `(set_key, instance_id, algorithm, step)` to print a diagnostic without the caller
/// re-deriving it — the documented "process abort with context" is what a binary does with the
/// `Err` this returns, not something the library does itself.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(
        "local rank is not a member of participant set {set_key}, cannot start a reduction on it"
    )]
    NotAMember { set_key: ParticipantSetKey },

    #[error(
        "payload size mismatch for instance {instance_id} on {set_key}: expected {expected} \
         elements, this rank assigned {actual}"
    )]
    PayloadSizeMismatch {
        set_key: ParticipantSetKey,
        instance_id: InstanceId,
        expected: usize,
        actual: usize,
    },

    #[error(
        "duplicate message for step {step} of instance {instance_id} on {set_key} \
         (algorithm: {algorithm})"
    )]
    DuplicateStep {
        set_key: ParticipantSetKey,
        instance_id: InstanceId,
        algorithm: &'static str,
        step: i32,
    },

    #[error(
        "state for instance {instance_id} on {set_key} was requested as {expected} but already \
         holds a {actual} state; this indicates a mis-routed message or memory corruption"
    )]
    StateKindMismatch {
        set_key: ParticipantSetKey,
        instance_id: InstanceId,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("participant set {set_key} has been torn down, instance {instance_id} is invalid")]
    SetTornDown {
        set_key: ParticipantSetKey,
        instance_id: InstanceId,
    },

    #[error("transport failed delivering a message for instance {instance_id} on {set_key}")]
    TransportFailure {
        set_key: ParticipantSetKey,
        instance_id: InstanceId,
    },
}
