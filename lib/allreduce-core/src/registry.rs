use std::collections::HashMap;

use allreduce_types::{ParticipantSet, ParticipantSetKey};

use crate::engine::rabenseifner::RabenseifnerEngine;
use crate::engine::recursive_doubling::RecursiveDoublingEngine;
use crate::error::Result;

/// The two engines that may exist for a given participant set, one per algorithm (§4.2). Both
/// share the set's `InstanceId` space in the [`StateStore`](crate::store::StateStore), but each
/// is constructed independently and lazily, the first time its algorithm is actually selected for
/// that set.
#[derive(Default)]
struct EnginePair<T> {
    recursive_doubling: Option<RecursiveDoublingEngine<T>>,
    rabenseifner: Option<RabenseifnerEngine<T>>,
}

/// Maps each participant set this rank belongs to onto its lazily-constructed engines (§4.2's
/// `Registry`). One `Registry` exists per simulated rank (§5.1).
#[derive(Default)]
pub struct Registry<T> {
    pairs: HashMap<ParticipantSetKey, EnginePair<T>>,
}

impl<T: Clone + Send + 'static> Registry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns [`CoreError::NotAMember`](crate::error::CoreError::NotAMember) if the local rank
    /// isn't part of `set` and the engine hasn't already been constructed for it.
    pub fn recursive_doubling(&mut self, set: &ParticipantSet) -> Result<&mut RecursiveDoublingEngine<T>> {
        let pair = self.pairs.entry(set.key()).or_default();
        if pair.recursive_doubling.is_none() {
            pair.recursive_doubling = Some(RecursiveDoublingEngine::new(set)?);
        }
        Ok(pair.recursive_doubling.as_mut().expect("just inserted above"))
    }

    /// # Errors
    ///
    /// Returns [`CoreError::NotAMember`](crate::error::CoreError::NotAMember) if the local rank
    /// isn't part of `set` and the engine hasn't already been constructed for it.
    pub fn rabenseifner(&mut self, set: &ParticipantSet) -> Result<&mut RabenseifnerEngine<T>> {
        let pair = self.pairs.entry(set.key()).or_default();
        if pair.rabenseifner.is_none() {
            pair.rabenseifner = Some(RabenseifnerEngine::new(set)?);
        }
        Ok(pair.rabenseifner.as_mut().expect("just inserted above"))
    }

    /// Drops both engines for `key`, e.g. when its participant set is destroyed. The caller is
    /// responsible for also clearing the matching [`StateStore`](crate::store::StateStore)
    /// entries.
    pub fn remove(&mut self, key: ParticipantSetKey) {
        self.pairs.remove(&key);
    }
}
