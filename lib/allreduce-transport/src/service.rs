use std::collections::HashMap;

use allreduce_types::{ParticipantSetKey, Rank};

use crate::transport::ParticipantSetService;

/// An in-memory stand-in for the participant-set bookkeeping a real runtime would own (ordered
/// rank lists per subgroup, membership, default-group test). Registration is explicit and
/// synchronous — there is no distributed construction to race against, unlike the real thing.
#[derive(Clone, Debug, Default)]
pub struct InMemoryParticipantSetService {
    sets: HashMap<ParticipantSetKey, Vec<Rank>>,
    default_key: Option<ParticipantSetKey>,
}

impl InMemoryParticipantSetService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` with the given ordered rank list. The first registered collection-kind
    /// set is treated as the process-wide default group unless [`Self::set_default`] overrides it.
    pub fn register(&mut self, key: ParticipantSetKey, ranks: Vec<Rank>) -> &mut Self {
        if self.default_key.is_none() {
            self.default_key = Some(key);
        }
        self.sets.insert(key, ranks);
        self
    }

    pub fn set_default(&mut self, key: ParticipantSetKey) -> &mut Self {
        self.default_key = Some(key);
        self
    }
}

impl ParticipantSetService for InMemoryParticipantSetService {
    fn ranks_of(&self, key: ParticipantSetKey) -> Option<Vec<Rank>> {
        self.sets.get(&key).cloned()
    }

    fn is_member(&self, key: ParticipantSetKey, rank: Rank) -> bool {
        self.sets
            .get(&key)
            .is_some_and(|ranks| ranks.contains(&rank))
    }

    fn is_default(&self, key: ParticipantSetKey) -> bool {
        self.default_key == Some(key)
    }
}
