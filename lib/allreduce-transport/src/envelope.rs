use allreduce_types::{InstanceId, ParticipantSetKey};
use serde::{Deserialize, Serialize};

/// Which per-step handler a message routes to on arrival (§4.7, §6 message-kind table).
///
/// This is the handler tag the consumed `register(fn_tag, handler)` surface dispatches on —
/// the crate never resolves handlers through a template specialization, only this explicit tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Recursive doubling: adjustment pre-phase exchange between an even/odd adjustment pair.
    RdAdjustment,
    /// Recursive doubling: one step of the main XOR-partner exchange.
    RdReduceIter,
    /// Recursive doubling: final broadcast from an even adjustment member to its excluded odd partner.
    RdExcludedBroadcast,
    /// Rabenseifner: odd adjustment member sends its left half.
    RabAdjustLeft,
    /// Rabenseifner: even adjustment member sends its reduced right half.
    RabAdjustRight,
    /// Rabenseifner: even adjustment member sends the final combined right half back.
    RabAdjustFinal,
    /// Rabenseifner: one step of the reduce-scatter phase.
    RabScatter,
    /// Rabenseifner: one step of the allgather phase.
    RabGather,
    /// Rabenseifner: final broadcast from an even adjustment member to its excluded odd partner.
    RabExcludedBroadcast,
}

/// Header followed by payload, per §6's wire format table. `count` is implicit in
/// `payload.len()` rather than carried as a redundant field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub set_key: ParticipantSetKey,
    pub kind: MessageKind,
    pub instance_id: InstanceId,
    pub step: i32,
    pub payload: Vec<T>,
}

impl<T> Envelope<T> {
    #[must_use]
    pub fn new(
        set_key: ParticipantSetKey,
        kind: MessageKind,
        instance_id: InstanceId,
        step: i32,
        payload: Vec<T>,
    ) -> Self {
        Self {
            set_key,
            kind,
            instance_id,
            step,
            payload,
        }
    }
}
