use std::collections::HashMap;

use allreduce_types::{InstanceId, ParticipantKind, ParticipantSetKey};
use error_stack::Report;

use crate::error::{CoreError, Result};
use crate::state::AnyState;

/// The slots allocated for a single participant set (§4.3): a dense, hole-reusing vector of
/// erased per-instance state, plus the cursor the next `allreduce` call on this set resumes
/// scanning from.
#[derive(Default)]
struct SlotTable<T> {
    cursor: usize,
    slots: Vec<Option<Box<dyn AnyState<T>>>>,
}

impl<T> SlotTable<T> {
    fn next_id(&mut self) -> InstanceId {
        let len = self.slots.len();
        for offset in 0..len {
            let index = (self.cursor + offset) % len;
            if self.slots[index].is_none() {
                self.cursor = (index + 1) % len;
                return InstanceId::new(index as u64);
            }
        }
        self.slots.push(None);
        self.cursor = 0;
        InstanceId::new(len as u64)
    }
}

/// Holds every in-flight instance's erased state (§4.3), keyed first by participant-kind (three
/// separate key-spaces, matching the Collection/Subgroup/ObjectGroup reducer maps of the source)
/// and then by the `id` within a [`ParticipantSetKey`].
///
/// `Box<dyn AnyState<T>>` is the one type-erasure boundary in this crate (§9): instance ids are
/// allocated per participant set and shared across both algorithms, so a slot's concrete type
/// isn't known until the first message or local call arrives for it.
#[derive(Default)]
pub struct StateStore<T> {
    collection: HashMap<u64, SlotTable<T>>,
    subgroup: HashMap<u64, SlotTable<T>>,
    object_group: HashMap<u64, SlotTable<T>>,
}

impl<T: Send + 'static> StateStore<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table_mut(&mut self, kind: ParticipantKind) -> &mut HashMap<u64, SlotTable<T>> {
        match kind {
            ParticipantKind::Collection => &mut self.collection,
            ParticipantKind::Subgroup => &mut self.subgroup,
            ParticipantKind::ObjectGroup => &mut self.object_group,
        }
    }

    /// Allocates the next free instance id for `key`, reusing the lowest-indexed hole left by a
    /// prior [`clear_single`](Self::clear_single) before growing the table (§4.3).
    pub fn get_next_id(&mut self, key: ParticipantSetKey) -> InstanceId {
        self.table_mut(key.kind).entry(key.id).or_default().next_id()
    }

    /// Returns the slot for `(key, instance_id)`, lazily constructing it with `S::default()` on
    /// first access — the mechanism that lets messages for an instance arrive before its local
    /// `allreduce` call does (§5's early-arrival buffering).
    pub fn get_state<S>(&mut self, key: ParticipantSetKey, instance_id: InstanceId) -> Result<&mut S>
    where
        S: AnyState<T> + Default,
    {
        let table = self.table_mut(key.kind).entry(key.id).or_default();
        let index = instance_id.get() as usize;
        if index >= table.slots.len() {
            table.slots.resize_with(index + 1, || None);
        }
        let slot = table.slots[index].get_or_insert_with(|| Box::new(S::default()));

        let algorithm = slot.algorithm_name();
        slot.as_any_mut()
            .downcast_mut::<S>()
            .ok_or_else(|| {
                Report::new(CoreError::StateKindMismatch {
                    set_key: key,
                    instance_id,
                    expected: std::any::type_name::<S>(),
                    actual: algorithm,
                })
            })
    }

    /// Frees a single instance's slot, leaving a hole [`get_next_id`](Self::get_next_id) will
    /// reuse.
    pub fn clear_single(&mut self, key: ParticipantSetKey, instance_id: InstanceId) {
        if let Some(table) = self.table_mut(key.kind).get_mut(&key.id) {
            let index = instance_id.get() as usize;
            if index < table.slots.len() {
                table.slots[index] = None;
            }
        }
    }

    /// Tears down every instance belonging to `key`, e.g. when its participant set is destroyed.
    pub fn clear_all(&mut self, key: ParticipantSetKey) {
        self.table_mut(key.kind).remove(&key.id);
    }
}
