use std::marker::PhantomData;

use allreduce_transport::{Envelope, MessageKind, Transport};
use allreduce_types::{InstanceId, ParticipantSet, ParticipantSetKey, Rank, Topology, VirtualRank};
use error_stack::{Report, ResultExt};

use crate::error::{CoreError, Result};
use crate::op::ReduceOp;
use crate::state::RabenseifnerState;
use crate::store::StateStore;

fn reduce_vec<T>(op: &dyn ReduceOp<T>, dst: &mut [T], src: &[T]) {
    for (d, s) in dst.iter_mut().zip(src) {
        op.combine(d, s);
    }
}

/// One rank's view of Rabenseifner's reduce-scatter/allgather topology for a single participant
/// set (§4.5). Like [`RecursiveDoublingEngine`](crate::engine::recursive_doubling::RecursiveDoublingEngine),
/// this carries only the static topology — every instance's butterfly index tables and phase
/// progress live in the [`StateStore`].
pub struct RabenseifnerEngine<T> {
    ranks: Vec<Rank>,
    this_rank_index: usize,
    is_even: bool,
    topology: Topology,
    _elements: PhantomData<fn() -> T>,
}

impl<T: Clone + Send + 'static> RabenseifnerEngine<T> {
    /// # Errors
    ///
    /// Returns [`CoreError::NotAMember`] if the local rank isn't part of `set`.
    pub fn new(set: &ParticipantSet) -> Result<Self> {
        let this_rank_index = set
            .require_member_index()
            .change_context(CoreError::NotAMember { set_key: set.key() })?;
        Ok(Self {
            ranks: set.ranks().to_vec(),
            this_rank_index,
            is_even: this_rank_index % 2 == 0,
            topology: set.topology(),
            _elements: PhantomData,
        })
    }

    pub fn start(
        &self,
        store: &mut StateStore<T>,
        transport: &dyn Transport<T>,
        set_key: ParticipantSetKey,
        instance_id: InstanceId,
        value: Vec<T>,
        op: Box<dyn ReduceOp<T>>,
        callback: Box<dyn FnOnce(Vec<T>) + Send>,
    ) -> Result<()> {
        let state = store.get_state::<RabenseifnerState<T>>(set_key, instance_id)?;
        if !state.common.initialized {
            self.init_state(state);
        }
        state.val = value;
        state.common.size = state.val.len();
        state.common.value_assigned = true;
        state.common.active = true;
        state.common.op = Some(op);
        state.common.callback = Some(callback);
        self.build_index_tables(state);

        if self.ranks.len() < 2 {
            self.execute_final(store, set_key, instance_id)
        } else {
            self.allreduce(store, transport, set_key, instance_id)
        }
    }

    fn init_state(&self, state: &mut RabenseifnerState<T>) {
        let steps = self.topology.steps as usize;
        state.scatter_messages.resize_with(steps, || None);
        state.scatter_steps_recv.resize(steps, false);
        state.scatter_steps_reduced.resize(steps, false);
        state.gather_messages.resize_with(steps, || None);
        state.gather_steps_recv.resize(steps, false);
        state.gather_steps_reduced.resize(steps, false);
        state.r_index = vec![0; steps];
        state.r_count = vec![0; steps];
        state.s_index = vec![0; steps];
        state.s_count = vec![0; steps];

        state.common.finished_adjustment = !self.topology.is_in_adjustment_group(self.this_rank_index);
        state.common.completed = false;
        state.scatter_mask = 1;
        state.scatter_step = 0;
        state.finished_scatter = false;
        state.gather_step = self.topology.steps as i32 - 1;
        state.gather_mask = self.topology.p2 as u32 >> 1;
        state.common.initialized = true;
    }

    /// Computes the per-step send/receive index tables (§4.5's butterfly-halving construction):
    /// at each step, the local half not kept is handed to the partner, recursively halving the
    /// working range for the next step.
    fn build_index_tables(&self, state: &mut RabenseifnerState<T>) {
        let Some(vrt) = self.topology.virtual_rank(self.this_rank_index).active() else {
            return;
        };

        let mut size = state.val.len();
        let mut step = 0usize;
        let mut mask = 1usize;
        while mask < self.topology.p2 {
            let vdest = vrt ^ mask;
            let dest_index = self.topology.real_rank_index(vdest);

            if self.this_rank_index < dest_index {
                state.r_count[step] = size / 2;
                state.s_count[step] = size - state.r_count[step];
                state.s_index[step] = state.r_index[step] + state.r_count[step];
            } else {
                state.s_count[step] = size / 2;
                state.r_count[step] = size - state.s_count[step];
                state.r_index[step] = state.s_index[step] + state.s_count[step];
            }

            if step + 1 < self.topology.steps as usize {
                state.r_index[step + 1] = state.r_index[step];
                state.s_index[step + 1] = state.r_index[step];
                size = state.r_count[step];
                step += 1;
            }
            mask <<= 1;
        }
    }

    fn allreduce(
        &self,
        store: &mut StateStore<T>,
        transport: &dyn Transport<T>,
        set_key: ParticipantSetKey,
        id: InstanceId,
    ) -> Result<()> {
        if self.topology.is_in_adjustment_group(self.this_rank_index) {
            self.adjust_for_power_of_two(store, transport, set_key, id)
        } else {
            self.scatter_reduce_iter(store, transport, set_key, id)
        }
    }

    fn adjust_for_power_of_two(
        &self,
        store: &mut StateStore<T>,
        transport: &dyn Transport<T>,
        set_key: ParticipantSetKey,
        id: InstanceId,
    ) -> Result<()> {
        if self.is_even {
            let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
            let half = state.val.len() / 2;
            let right_half = state.val[half..].to_vec();
            let dest = self.ranks[self.this_rank_index + 1];
            transport
                .send(dest, Envelope::new(set_key, MessageKind::RabAdjustRight, id, 0, right_half))
                .change_context(CoreError::TransportFailure { set_key, instance_id: id })?;

            let pending = {
                let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
                state.left_adjust_message.take()
            };
            if let Some(envelope) = pending {
                self.handle_adjust_left(store, set_key, envelope)?;
            }
        } else {
            let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
            let half = state.val.len() / 2;
            let left_half = state.val[..half].to_vec();
            let dest = self.ranks[self.this_rank_index - 1];
            transport
                .send(dest, Envelope::new(set_key, MessageKind::RabAdjustLeft, id, 0, left_half))
                .change_context(CoreError::TransportFailure { set_key, instance_id: id })?;

            let pending = {
                let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
                state.right_adjust_message.take()
            };
            if let Some(envelope) = pending {
                self.handle_adjust_right(store, transport, set_key, envelope)?;
            }
        }
        Ok(())
    }

    /// Handles `RabAdjustLeft`: the even member receives the odd partner's left half and folds it
    /// into its own left half.
    pub fn handle_adjust_left(
        &self,
        store: &mut StateStore<T>,
        set_key: ParticipantSetKey,
        envelope: Envelope<T>,
    ) -> Result<()> {
        let id = envelope.instance_id;
        let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
        if !state.common.value_assigned {
            if !state.common.initialized {
                self.init_state(state);
            }
            state.left_adjust_message = Some(envelope);
            return Ok(());
        }

        if let Some(op) = state.common.op.as_deref() {
            reduce_vec(op, &mut state.val[..envelope.payload.len()], &envelope.payload);
        }
        Ok(())
    }

    /// Handles `RabAdjustRight`: the odd member receives the even partner's reduced right half,
    /// folds it in, then sends the combined right half back.
    pub fn handle_adjust_right(
        &self,
        store: &mut StateStore<T>,
        transport: &dyn Transport<T>,
        set_key: ParticipantSetKey,
        envelope: Envelope<T>,
    ) -> Result<()> {
        let id = envelope.instance_id;
        let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
        if !state.common.value_assigned {
            if !state.common.initialized {
                self.init_state(state);
            }
            state.right_adjust_message = Some(envelope);
            return Ok(());
        }

        let half = state.val.len() / 2;
        if let Some(op) = state.common.op.as_deref() {
            reduce_vec(op, &mut state.val[half..], &envelope.payload);
        }
        let right_half = state.val[half..].to_vec();
        let dest = self.ranks[self.this_rank_index - 1];
        transport
            .send(dest, Envelope::new(set_key, MessageKind::RabAdjustFinal, id, 0, right_half))
            .change_context(CoreError::TransportFailure { set_key, instance_id: id })
    }

    /// Handles `RabAdjustFinal`: the even member receives the final combined right half and
    /// enters the reduce-scatter phase.
    pub fn handle_adjust_final(
        &self,
        store: &mut StateStore<T>,
        transport: &dyn Transport<T>,
        set_key: ParticipantSetKey,
        envelope: Envelope<T>,
    ) -> Result<()> {
        let id = envelope.instance_id;
        let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
        let half = state.val.len() / 2;
        state.val[half..].clone_from_slice(&envelope.payload);
        state.common.finished_adjustment = true;

        self.scatter_reduce_iter(store, transport, set_key, id)
    }

    fn scatter_all_received(&self, state: &RabenseifnerState<T>) -> bool {
        state.scatter_steps_recv[..state.scatter_step as usize].iter().all(|&done| done)
    }

    fn scatter_is_ready(&self, state: &RabenseifnerState<T>) -> bool {
        ((self.topology.is_in_adjustment_group(self.this_rank_index) && state.common.finished_adjustment)
            && state.scatter_step == 0)
            || self.scatter_all_received(state)
    }

    fn scatter_is_done(&self, state: &RabenseifnerState<T>) -> bool {
        let steps = self.topology.steps;
        state.scatter_step == steps && state.scatter_steps_reduced[..steps as usize].iter().all(|&done| done)
    }

    fn scatter_try_reduce(&self, store: &mut StateStore<T>, set_key: ParticipantSetKey, id: InstanceId, step: usize) -> Result<()> {
        let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
        let ready = step < state.scatter_step as usize
            && !state.scatter_steps_reduced[step]
            && state.scatter_steps_recv[step]
            && state.scatter_steps_reduced[..step].iter().all(|&done| done);

        if ready {
            let RabenseifnerState { val, scatter_messages, common, scatter_steps_reduced, r_index, .. } = state;
            if let (Some(op), Some(envelope)) = (common.op.as_deref(), scatter_messages[step].as_ref()) {
                let dest_start = r_index[envelope.step as usize];
                reduce_vec(op, &mut val[dest_start..dest_start + envelope.payload.len()], &envelope.payload);
            }
            scatter_steps_reduced[step] = true;
        }
        Ok(())
    }

    fn scatter_reduce_iter(
        &self,
        store: &mut StateStore<T>,
        transport: &dyn Transport<T>,
        set_key: ParticipantSetKey,
        id: InstanceId,
    ) -> Result<()> {
        let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
        if !self.scatter_is_ready(state) {
            return Ok(());
        }

        let Some(vrt) = self.topology.virtual_rank(self.this_rank_index).active() else {
            return Ok(());
        };

        let step = state.scatter_step as usize;
        let vdest = vrt ^ (state.scatter_mask as usize);
        let dest = self.ranks[self.topology.real_rank_index(vdest)];
        let send_range = state.s_index[step]..state.s_index[step] + state.s_count[step];
        let payload = state.val[send_range].to_vec();
        state.scatter_mask <<= 1;
        state.scatter_step += 1;

        transport
            .send(dest, Envelope::new(set_key, MessageKind::RabScatter, id, step as i32, payload))
            .change_context(CoreError::TransportFailure { set_key, instance_id: id })?;

        self.scatter_try_reduce(store, set_key, id, step)?;

        let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
        if self.scatter_is_done(state) {
            let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
            state.finished_scatter = true;
            self.gather_iter(store, transport, set_key, id)
        } else if self.scatter_all_received(state) {
            self.scatter_reduce_iter(store, transport, set_key, id)
        } else {
            Ok(())
        }
    }

    /// Handles `RabScatter`: one step of the reduce-scatter phase.
    pub fn handle_scatter(
        &self,
        store: &mut StateStore<T>,
        transport: &dyn Transport<T>,
        set_key: ParticipantSetKey,
        envelope: Envelope<T>,
    ) -> Result<()> {
        let id = envelope.instance_id;
        let step = envelope.step as usize;

        let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
        if !state.common.value_assigned {
            if !state.common.initialized {
                self.init_state(state);
            }
            state.scatter_messages[step] = Some(envelope);
            state.scatter_steps_recv[step] = true;
            return Ok(());
        }

        state.scatter_messages[step] = Some(envelope);
        state.scatter_steps_recv[step] = true;

        if !state.common.finished_adjustment {
            return Ok(());
        }

        self.scatter_try_reduce(store, set_key, id, step)?;

        let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
        let still_folding = (state.scatter_mask as usize) < self.topology.p2;
        if still_folding && self.scatter_all_received(state) {
            self.scatter_reduce_iter(store, transport, set_key, id)
        } else if self.scatter_is_done(state) {
            let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
            state.finished_scatter = true;
            self.gather_iter(store, transport, set_key, id)
        } else {
            Ok(())
        }
    }

    fn gather_all_received(&self, state: &RabenseifnerState<T>) -> bool {
        state.gather_steps_recv[(state.gather_step + 1) as usize..].iter().all(|&done| done)
    }

    fn gather_is_ready(&self, state: &RabenseifnerState<T>) -> bool {
        state.gather_step == self.topology.steps as i32 - 1 || self.gather_all_received(state)
    }

    fn gather_is_done(&self, state: &RabenseifnerState<T>) -> bool {
        state.gather_step < 0 && state.gather_steps_recv.iter().all(|&done| done)
    }

    fn gather_try_reduce(&self, store: &mut StateStore<T>, set_key: ParticipantSetKey, id: InstanceId, step: usize) -> Result<()> {
        let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
        let ready = step as i32 > state.gather_step
            && !state.gather_steps_reduced[step]
            && state.gather_steps_recv[step]
            && state.gather_steps_reduced[step + 1..].iter().all(|&done| done);

        if ready {
            let RabenseifnerState { val, gather_messages, gather_steps_reduced, s_index, .. } = state;
            if let Some(envelope) = gather_messages[step].as_ref() {
                let dest_start = s_index[envelope.step as usize];
                val[dest_start..dest_start + envelope.payload.len()].clone_from_slice(&envelope.payload);
            }
            gather_steps_reduced[step] = true;
        }
        Ok(())
    }

    fn gather_iter(
        &self,
        store: &mut StateStore<T>,
        transport: &dyn Transport<T>,
        set_key: ParticipantSetKey,
        id: InstanceId,
    ) -> Result<()> {
        let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
        if !self.gather_is_ready(state) {
            return Ok(());
        }

        let Some(vrt) = self.topology.virtual_rank(self.this_rank_index).active() else {
            return Ok(());
        };

        let step = state.gather_step as usize;
        let vdest = vrt ^ (state.gather_mask as usize);
        let dest = self.ranks[self.topology.real_rank_index(vdest)];
        let send_range = state.r_index[step]..state.r_index[step] + state.r_count[step];
        let payload = state.val[send_range].to_vec();
        state.gather_mask >>= 1;
        state.gather_step -= 1;

        transport
            .send(dest, Envelope::new(set_key, MessageKind::RabGather, id, step as i32, payload))
            .change_context(CoreError::TransportFailure { set_key, instance_id: id })?;

        self.gather_try_reduce(store, set_key, id, step)?;

        let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
        if self.gather_is_done(state) {
            self.final_part(store, transport, set_key, id)
        } else if self.gather_is_ready(state) {
            self.gather_iter(store, transport, set_key, id)
        } else {
            Ok(())
        }
    }

    /// Handles `RabGather`: one step of the allgather phase.
    pub fn handle_gather(
        &self,
        store: &mut StateStore<T>,
        transport: &dyn Transport<T>,
        set_key: ParticipantSetKey,
        envelope: Envelope<T>,
    ) -> Result<()> {
        let id = envelope.instance_id;
        let step = envelope.step as usize;

        let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
        if !state.common.value_assigned {
            if !state.common.initialized {
                self.init_state(state);
            }
            state.gather_messages[step] = Some(envelope);
            state.gather_steps_recv[step] = true;
            return Ok(());
        }

        state.gather_messages[step] = Some(envelope);
        state.gather_steps_recv[step] = true;

        if !state.finished_scatter {
            return Ok(());
        }

        self.gather_try_reduce(store, set_key, id, step)?;

        let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
        if state.gather_mask > 0 && self.gather_is_ready(state) {
            self.gather_iter(store, transport, set_key, id)
        } else if self.gather_is_done(state) {
            self.final_part(store, transport, set_key, id)
        } else {
            Ok(())
        }
    }

    fn final_part(
        &self,
        store: &mut StateStore<T>,
        transport: &dyn Transport<T>,
        set_key: ParticipantSetKey,
        id: InstanceId,
    ) -> Result<()> {
        let completed = store.get_state::<RabenseifnerState<T>>(set_key, id)?.common.completed;
        if completed {
            return Ok(());
        }
        if self.topology.r > 0 {
            self.send_to_excluded(store, transport, set_key, id)?;
        }
        self.execute_final(store, set_key, id)
    }

    fn send_to_excluded(
        &self,
        store: &mut StateStore<T>,
        transport: &dyn Transport<T>,
        set_key: ParticipantSetKey,
        id: InstanceId,
    ) -> Result<()> {
        if self.topology.is_in_adjustment_group(self.this_rank_index) && self.is_even {
            let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
            let val = state.val.clone();
            let dest = self.ranks[self.this_rank_index + 1];
            transport
                .send(dest, Envelope::new(set_key, MessageKind::RabExcludedBroadcast, id, 0, val))
                .change_context(CoreError::TransportFailure { set_key, instance_id: id })?;
        }
        Ok(())
    }

    /// Handles `RabExcludedBroadcast`: the final result delivered to an odd adjustment member.
    pub fn handle_excluded_broadcast(
        &self,
        store: &mut StateStore<T>,
        set_key: ParticipantSetKey,
        envelope: Envelope<T>,
    ) -> Result<()> {
        let id = envelope.instance_id;
        let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
        state.val = envelope.payload;
        self.execute_final(store, set_key, id)
    }

    fn execute_final(&self, store: &mut StateStore<T>, set_key: ParticipantSetKey, id: InstanceId) -> Result<()> {
        let state = store.get_state::<RabenseifnerState<T>>(set_key, id)?;
        let val = std::mem::take(&mut state.val);
        state.common.completed = true;
        let callback = state.common.callback.take();

        if let Some(callback) = callback {
            callback(val);
        } else {
            return Err(Report::new(CoreError::SetTornDown { set_key, instance_id: id }));
        }

        store.clear_single(set_key, id);
        Ok(())
    }
}
