use std::marker::PhantomData;

use allreduce_transport::{Envelope, MessageKind, Transport};
use allreduce_types::{InstanceId, ParticipantSet, ParticipantSetKey, Rank, Topology, VirtualRank};
use error_stack::{Report, ResultExt};

use crate::error::{CoreError, Result};
use crate::op::ReduceOp;
use crate::state::RecursiveDoublingState;
use crate::store::StateStore;

fn reduce_vec<T>(op: &dyn ReduceOp<T>, dst: &mut [T], src: &[T]) {
    for (d, s) in dst.iter_mut().zip(src) {
        op.combine(d, s);
    }
}

/// One rank's view of the recursive doubling topology for a single participant set (§4.4): an
/// XOR-partner exchange over `log2(P2)` steps, with an adjustment pre-phase folding any remainder
/// onto a power-of-two virtual topology. Carries no per-instance data itself — that lives in the
/// [`StateStore`], keyed by instance id, so one engine serves every concurrent instance on its set.
pub struct RecursiveDoublingEngine<T> {
    ranks: Vec<Rank>,
    this_rank_index: usize,
    is_even: bool,
    topology: Topology,
    _elements: PhantomData<fn() -> T>,
}

impl<T: Clone + Send + 'static> RecursiveDoublingEngine<T> {
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

    /// Assigns this rank's local value for `instance_id` and starts the protocol (§4.4's
    /// `initialize` + `allreduce` combined — local pre-aggregation across multiple local
    /// contributions is out of scope here, §8.1).
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
        let state = store.get_state::<RecursiveDoublingState<T>>(set_key, instance_id)?;
        if !state.common.initialized {
            self.init_state(state);
        }
        state.val = value;
        state.common.size = state.val.len();
        state.common.value_assigned = true;
        state.common.active = true;
        state.common.op = Some(op);
        state.common.callback = Some(callback);

        if self.ranks.len() < 2 {
            self.execute_final(store, set_key, instance_id)
        } else {
            self.allreduce(store, transport, set_key, instance_id)
        }
    }

    fn init_state(&self, state: &mut RecursiveDoublingState<T>) {
        let steps = self.topology.steps as usize;
        state.messages.resize_with(steps, || None);
        state.steps_recv.resize(steps, false);
        state.steps_reduced.resize(steps, false);
        state.step = 0;
        state.mask = 1;
        state.common.completed = false;
        state.common.finished_adjustment = !self.topology.is_in_adjustment_group(self.this_rank_index);
        state.common.initialized = true;
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
            self.reduce_iter(store, transport, set_key, id)
        }
    }

    fn adjust_for_power_of_two(
        &self,
        store: &mut StateStore<T>,
        transport: &dyn Transport<T>,
        set_key: ParticipantSetKey,
        id: InstanceId,
    ) -> Result<()> {
        if !self.is_even {
            let state = store.get_state::<RecursiveDoublingState<T>>(set_key, id)?;
            let val = state.val.clone();
            let dest = self.ranks[self.this_rank_index - 1];
            transport
                .send(dest, Envelope::new(set_key, MessageKind::RdAdjustment, id, 0, val))
                .change_context(CoreError::TransportFailure { set_key, instance_id: id })?;
        } else {
            let pending = {
                let state = store.get_state::<RecursiveDoublingState<T>>(set_key, id)?;
                state.adjust_message.take()
            };
            if let Some(envelope) = pending {
                self.handle_adjustment(store, transport, set_key, envelope)?;
            }
        }
        Ok(())
    }

    /// Handles `RdAdjustment`: the odd adjustment-group partner's half of the pre-phase exchange.
    pub fn handle_adjustment(
        &self,
        store: &mut StateStore<T>,
        transport: &dyn Transport<T>,
        set_key: ParticipantSetKey,
        envelope: Envelope<T>,
    ) -> Result<()> {
        let id = envelope.instance_id;
        let state = store.get_state::<RecursiveDoublingState<T>>(set_key, id)?;
        if !state.common.value_assigned {
            if !state.common.initialized {
                self.init_state(state);
            }
            state.adjust_message = Some(envelope);
            return Ok(());
        }

        if let Some(op) = state.common.op.as_deref() {
            reduce_vec(op, &mut state.val, &envelope.payload);
        }
        state.common.finished_adjustment = true;

        self.reduce_iter(store, transport, set_key, id)
    }

    fn is_ready(&self, store: &mut StateStore<T>, set_key: ParticipantSetKey, id: InstanceId) -> Result<bool> {
        let state = store.get_state::<RecursiveDoublingState<T>>(set_key, id)?;
        let step = state.step as usize;
        let all_received = state.steps_recv[..step].iter().all(|&done| done);
        Ok(
            (self.topology.is_in_adjustment_group(self.this_rank_index)
                && state.common.finished_adjustment
                && step == 0)
                || all_received,
        )
    }

    fn is_done(&self, store: &mut StateStore<T>, set_key: ParticipantSetKey, id: InstanceId) -> Result<bool> {
        let state = store.get_state::<RecursiveDoublingState<T>>(set_key, id)?;
        let step = state.step as usize;
        Ok(step == self.topology.steps as usize && state.steps_recv[..step].iter().all(|&done| done))
    }

    fn reduce_iter(
        &self,
        store: &mut StateStore<T>,
        transport: &dyn Transport<T>,
        set_key: ParticipantSetKey,
        id: InstanceId,
    ) -> Result<()> {
        if !self.is_ready(store, set_key, id)? {
            return Ok(());
        }

        let vrt = match self.topology.virtual_rank(self.this_rank_index) {
            VirtualRank::Active(vrt) => vrt,
            VirtualRank::Excluded => return Ok(()),
        };

        let state = store.get_state::<RecursiveDoublingState<T>>(set_key, id)?;
        let step = state.step;
        let vdest = vrt ^ (state.mask as usize);
        let dest = self.ranks[self.topology.real_rank_index(vdest)];
        let val = state.val.clone();
        state.mask <<= 1;
        state.step += 1;

        transport
            .send(dest, Envelope::new(set_key, MessageKind::RdReduceIter, id, step as i32, val))
            .change_context(CoreError::TransportFailure { set_key, instance_id: id })?;

        self.try_reduce(store, set_key, id, step as usize)?;

        if self.is_done(store, set_key, id)? {
            self.final_part(store, transport, set_key, id)?;
        } else if self.is_ready(store, set_key, id)? {
            self.reduce_iter(store, transport, set_key, id)?;
        }
        Ok(())
    }

    fn try_reduce(
        &self,
        store: &mut StateStore<T>,
        set_key: ParticipantSetKey,
        id: InstanceId,
        step: usize,
    ) -> Result<()> {
        let state = store.get_state::<RecursiveDoublingState<T>>(set_key, id)?;
        let ready = step < state.step as usize
            && !state.steps_reduced[step]
            && state.steps_recv[step]
            && state.steps_reduced[..step].iter().all(|&done| done);

        if ready {
            let RecursiveDoublingState { val, messages, common, steps_reduced, .. } = state;
            if let (Some(op), Some(envelope)) = (common.op.as_deref(), messages[step].as_ref()) {
                reduce_vec(op, val, &envelope.payload);
            }
            steps_reduced[step] = true;
        }
        Ok(())
    }

    /// Handles `RdReduceIter`: one step of the main XOR-partner exchange.
    pub fn handle_reduce_iter(
        &self,
        store: &mut StateStore<T>,
        transport: &dyn Transport<T>,
        set_key: ParticipantSetKey,
        envelope: Envelope<T>,
    ) -> Result<()> {
        let id = envelope.instance_id;
        let step = envelope.step as usize;

        let state = store.get_state::<RecursiveDoublingState<T>>(set_key, id)?;
        if step >= state.messages.len() {
            state.messages.resize_with(step + 1, || None);
            state.steps_recv.resize(step + 1, false);
            state.steps_reduced.resize(step + 1, false);
        }

        if !state.common.value_assigned {
            if !state.common.initialized {
                self.init_state(state);
            }
            state.messages[step] = Some(envelope);
            state.steps_recv[step] = true;
            return Ok(());
        }

        state.messages[step] = Some(envelope);
        state.steps_recv[step] = true;

        if !state.common.finished_adjustment {
            return Ok(());
        }

        self.try_reduce(store, set_key, id, step)?;

        let still_folding = {
            let state = store.get_state::<RecursiveDoublingState<T>>(set_key, id)?;
            (state.mask as usize) < self.topology.p2
        };
        if still_folding && self.is_ready(store, set_key, id)? {
            self.reduce_iter(store, transport, set_key, id)?;
        } else if self.is_done(store, set_key, id)? {
            self.final_part(store, transport, set_key, id)?;
        }
        Ok(())
    }

    fn final_part(
        &self,
        store: &mut StateStore<T>,
        transport: &dyn Transport<T>,
        set_key: ParticipantSetKey,
        id: InstanceId,
    ) -> Result<()> {
        let completed = store.get_state::<RecursiveDoublingState<T>>(set_key, id)?.common.completed;
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
            let state = store.get_state::<RecursiveDoublingState<T>>(set_key, id)?;
            let val = state.val.clone();
            let dest = self.ranks[self.this_rank_index + 1];
            transport
                .send(dest, Envelope::new(set_key, MessageKind::RdExcludedBroadcast, id, 0, val))
                .change_context(CoreError::TransportFailure { set_key, instance_id: id })?;
        }
        Ok(())
    }

    /// Handles `RdExcludedBroadcast`: the final result delivered to an odd adjustment member that
    /// sat out the main exchange.
    pub fn handle_excluded_broadcast(
        &self,
        store: &mut StateStore<T>,
        set_key: ParticipantSetKey,
        envelope: Envelope<T>,
    ) -> Result<()> {
        let id = envelope.instance_id;
        let state = store.get_state::<RecursiveDoublingState<T>>(set_key, id)?;
        state.val = envelope.payload;
        self.execute_final(store, set_key, id)
    }

    fn execute_final(&self, store: &mut StateStore<T>, set_key: ParticipantSetKey, id: InstanceId) -> Result<()> {
        let state = store.get_state::<RecursiveDoublingState<T>>(set_key, id)?;
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
