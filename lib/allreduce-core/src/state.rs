use std::any::Any;

use allreduce_transport::Envelope;

use crate::op::ReduceOp;

/// Fields common to both algorithms' per-instance state (§3 `InstanceState`).
pub struct CommonState<T> {
    pub size: usize,
    pub initialized: bool,
    pub value_assigned: bool,
    pub completed: bool,
    pub active: bool,
    pub finished_adjustment: bool,
    pub op: Option<Box<dyn ReduceOp<T>>>,
    pub callback: Option<Box<dyn FnOnce(Vec<T>) + Send>>,
}

impl<T> Default for CommonState<T> {
    fn default() -> Self {
        Self {
            size: 0,
            initialized: false,
            value_assigned: false,
            completed: false,
            active: false,
            finished_adjustment: false,
            op: None,
            callback: None,
        }
    }
}

/// Per-instance state the recursive doubling engine needs (§4.4).
pub struct RecursiveDoublingState<T> {
    pub common: CommonState<T>,
    pub val: Vec<T>,
    pub mask: u32,
    pub step: u32,
    pub steps_recv: Vec<bool>,
    pub steps_reduced: Vec<bool>,
    pub messages: Vec<Option<Envelope<T>>>,
    pub adjust_message: Option<Envelope<T>>,
}

impl<T> Default for RecursiveDoublingState<T> {
    fn default() -> Self {
        Self {
            common: CommonState::default(),
            val: Vec::new(),
            mask: 1,
            step: 0,
            steps_recv: Vec::new(),
            steps_reduced: Vec::new(),
            messages: Vec::new(),
            adjust_message: None,
        }
    }
}

/// Per-instance state the Rabenseifner engine needs (§4.5): scatter-phase bookkeeping, gather-
/// phase bookkeeping, and the four index tables computed once at initialization.
pub struct RabenseifnerState<T> {
    pub common: CommonState<T>,
    pub val: Vec<T>,

    pub scatter_mask: u32,
    pub scatter_step: u32,
    pub scatter_steps_recv: Vec<bool>,
    pub scatter_steps_reduced: Vec<bool>,
    pub scatter_messages: Vec<Option<Envelope<T>>>,
    pub finished_scatter: bool,

    pub gather_step: i32,
    pub gather_mask: u32,
    pub gather_steps_recv: Vec<bool>,
    pub gather_steps_reduced: Vec<bool>,
    pub gather_messages: Vec<Option<Envelope<T>>>,

    pub r_index: Vec<usize>,
    pub r_count: Vec<usize>,
    pub s_index: Vec<usize>,
    pub s_count: Vec<usize>,

    pub left_adjust_message: Option<Envelope<T>>,
    pub right_adjust_message: Option<Envelope<T>>,
}

impl<T> Default for RabenseifnerState<T> {
    fn default() -> Self {
        Self {
            common: CommonState::default(),
            val: Vec::new(),
            scatter_mask: 1,
            scatter_step: 0,
            scatter_steps_recv: Vec::new(),
            scatter_steps_reduced: Vec::new(),
            scatter_messages: Vec::new(),
            finished_scatter: false,
            gather_step: 0,
            gather_mask: 1,
            gather_steps_recv: Vec::new(),
            gather_steps_reduced: Vec::new(),
            gather_messages: Vec::new(),
            r_index: Vec::new(),
            r_count: Vec::new(),
            s_index: Vec::new(),
            s_count: Vec::new(),
            left_adjust_message: None,
            right_adjust_message: None,
        }
    }
}

/// The erasure boundary the redesign notes call for (§9): a `StateBase`-equivalent trait object
/// kept *only* here, at the seam between the [`StateStore`](crate::store::StateStore)'s shared
/// per-instance-id slots and the concrete per-algorithm state type. Everywhere else in the crate
/// the state types above are used directly and statically typed.
pub trait AnyState<T>: Send + 'static {
    fn common(&self) -> &CommonState<T>;
    fn common_mut(&mut self) -> &mut CommonState<T>;
    fn algorithm_name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Send + 'static> AnyState<T> for RecursiveDoublingState<T> {
    fn common(&self) -> &CommonState<T> {
        &self.common
    }

    fn common_mut(&mut self) -> &mut CommonState<T> {
        &mut self.common
    }

    fn algorithm_name(&self) -> &'static str {
        "recursive-doubling"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<T: Send + 'static> AnyState<T> for RabenseifnerState<T> {
    fn common(&self) -> &CommonState<T> {
        &self.common
    }

    fn common_mut(&mut self) -> &mut CommonState<T> {
        &mut self.common
    }

    fn algorithm_name(&self) -> &'static str {
        "rabenseifner"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
