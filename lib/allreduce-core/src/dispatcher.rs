use std::sync::Arc;

use allreduce_transport::{Envelope, MessageKind, Transport};
use allreduce_types::{InstanceId, ParticipantSet, ParticipantSetKey};
use error_stack::Report;

use crate::config::DispatcherConfig;
use crate::error::{CoreError, Result};
use crate::op::ReduceOp;
use crate::payload::ReducePayload;
use crate::registry::Registry;
use crate::store::StateStore;

/// The single public entry point (§4.1): selects an algorithm by payload size, allocates an
/// instance id, and starts the reduction. One `Dispatcher` owns exactly one `Registry` and one
/// `StateStore`, matching the rank-local process model of §5.1 — never shared across ranks.
pub struct Dispatcher<T> {
    config: DispatcherConfig,
    registry: Registry<T>,
    store: StateStore<T>,
    transport: Arc<dyn Transport<T>>,
}

impl<T: Clone + Send + 'static> Dispatcher<T> {
    #[must_use]
    pub fn new(config: DispatcherConfig, transport: Arc<dyn Transport<T>>) -> Self {
        Self {
            config,
            registry: Registry::new(),
            store: StateStore::new(),
            transport,
        }
    }

    /// Starts a new reduction instance over `set` (§4.1): picks recursive doubling below
    /// [`DispatcherConfig::threshold`] elements, Rabenseifner at or above it, allocates a fresh
    /// `instance_id`, installs `callback`, and kicks off the protocol.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotAMember`] if the local rank isn't in `set`, or
    /// [`CoreError::TransportFailure`] if the first send of the protocol fails.
    pub fn allreduce<P, Op>(
        &mut self,
        set: &ParticipantSet,
        op: Op,
        callback: impl FnOnce(P) + Send + 'static,
        payload: P,
    ) -> Result<InstanceId>
    where
        P: ReducePayload<T>,
        Op: ReduceOp<T> + 'static,
    {
        let elements = payload.into_elements();
        let id = self.store.get_next_id(set.key());
        let boxed_callback: Box<dyn FnOnce(Vec<T>) + Send> =
            Box::new(move |elements| callback(P::from_elements(elements)));

        tracing::debug!(
            set_key = %set.key(),
            instance_id = %id,
            elements = elements.len(),
            threshold = self.config.threshold,
            "starting allreduce"
        );

        if elements.len() < self.config.threshold {
            self.registry.recursive_doubling(set)?.start(
                &mut self.store,
                self.transport.as_ref(),
                set.key(),
                id,
                elements,
                Box::new(op),
                boxed_callback,
            )?;
        } else {
            self.registry.rabenseifner(set)?.start(
                &mut self.store,
                self.transport.as_ref(),
                set.key(),
                id,
                elements,
                Box::new(op),
                boxed_callback,
            )?;
        }
        Ok(id)
    }

    /// Routes one incoming message to the engine and per-step handler its
    /// [`MessageKind`](allreduce_transport::MessageKind) names (§4.7). `set` must describe the
    /// participant set the message's `set_key` identifies — constructing the engine the first
    /// time a message arrives for a set this rank has not yet locally started is exactly the
    /// "benign race between late engine construction and incoming messages" of §7; the early-
    /// arrival buffer inside each handler absorbs it, not this routing step.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotAMember`] if the local rank isn't in `set`, or any error the
    /// selected handler returns.
    pub fn handle_envelope(&mut self, set: &ParticipantSet, envelope: Envelope<T>) -> Result<()> {
        let set_key = envelope.set_key;
        debug_assert_eq!(set_key, set.key(), "envelope routed against the wrong participant set");

        match envelope.kind {
            MessageKind::RdAdjustment => {
                self.registry.recursive_doubling(set)?.handle_adjustment(
                    &mut self.store,
                    self.transport.as_ref(),
                    set_key,
                    envelope,
                )
            }
            MessageKind::RdReduceIter => {
                self.registry.recursive_doubling(set)?.handle_reduce_iter(
                    &mut self.store,
                    self.transport.as_ref(),
                    set_key,
                    envelope,
                )
            }
            MessageKind::RdExcludedBroadcast => self
                .registry
                .recursive_doubling(set)?
                .handle_excluded_broadcast(&mut self.store, set_key, envelope),
            MessageKind::RabAdjustLeft => {
                self.registry.rabenseifner(set)?.handle_adjust_left(&mut self.store, set_key, envelope)
            }
            MessageKind::RabAdjustRight => self.registry.rabenseifner(set)?.handle_adjust_right(
                &mut self.store,
                self.transport.as_ref(),
                set_key,
                envelope,
            ),
            MessageKind::RabAdjustFinal => self.registry.rabenseifner(set)?.handle_adjust_final(
                &mut self.store,
                self.transport.as_ref(),
                set_key,
                envelope,
            ),
            MessageKind::RabScatter => self.registry.rabenseifner(set)?.handle_scatter(
                &mut self.store,
                self.transport.as_ref(),
                set_key,
                envelope,
            ),
            MessageKind::RabGather => self.registry.rabenseifner(set)?.handle_gather(
                &mut self.store,
                self.transport.as_ref(),
                set_key,
                envelope,
            ),
            MessageKind::RabExcludedBroadcast => self
                .registry
                .rabenseifner(set)?
                .handle_excluded_broadcast(&mut self.store, set_key, envelope),
        }
    }

    /// Tears down both engines and all instance state for `key`, e.g. on participant-set
    /// teardown (§4.2's `remove`).
    pub fn remove_set(&mut self, key: ParticipantSetKey) {
        self.registry.remove(key);
        self.store.clear_all(key);
    }
}

/// Wraps a non-member error with the context a top-level caller needs to abort with a
/// diagnostic (§7): "process abort with context" is what a binary does with this `Err`, not
/// something this library does itself.
pub fn not_a_member(set_key: ParticipantSetKey) -> Report<CoreError> {
    Report::new(CoreError::NotAMember { set_key })
}
