//! Shared harness for the end-to-end allreduce scenarios of §8: wires up one tokio task per
//! simulated rank over `allreduce_transport`'s in-memory network, drives each rank's dispatcher
//! until its local callback fires, and hands the caller back every participating rank's result.
//!
//! This lives next to the tests it supports rather than inside a library crate, mirroring the
//! teacher's `apps/engine/tests/units` layout: it is test-only scaffolding, not part of the core.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use allreduce_core::{Dispatcher, DispatcherConfig, ReduceOp, ReducePayload};
use allreduce_transport::{run_rank, Envelope, LocalNetwork, Shutdown, Transport};
use allreduce_types::{ParticipantSet, ParticipantSetKey, Rank};
use tokio::sync::{mpsc, oneshot};

/// Wraps a [`Transport`] and counts every send, so tests can assert the message-count bounds of
/// §8 property 3 without the core exposing any counters of its own.
pub struct CountingTransport<T> {
    inner: Arc<dyn Transport<T>>,
    sent: Arc<AtomicUsize>,
}

impl<T> CountingTransport<T> {
    #[must_use]
    pub fn new(inner: Arc<dyn Transport<T>>) -> (Self, Arc<AtomicUsize>) {
        let sent = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                sent: Arc::clone(&sent),
            },
            sent,
        )
    }
}

impl<T: Send + Sync> Transport<T> for CountingTransport<T> {
    fn send(&self, dest: Rank, envelope: Envelope<T>) -> allreduce_transport::Result<()> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.inner.send(dest, envelope)
    }
}

/// Runs one allreduce instance across every rank in `set_ranks`, each contributing the payload
/// `payload_for` produces for it, and returns the final value each participating rank's callback
/// observed. `all_ranks` may be a superset of `set_ranks` (scenario 6: a subgroup that excludes
/// some ranks of the wider default group) — only `set_ranks` get a task spawned for them.
pub async fn run_allreduce<T, P, Op>(
    key: ParticipantSetKey,
    all_ranks: &[Rank],
    set_ranks: &[Rank],
    op: Op,
    payload_for: impl Fn(Rank) -> P,
) -> HashMap<Rank, P>
where
    T: Clone + Send + Sync + 'static,
    P: ReducePayload<T>,
    Op: ReduceOp<T> + Clone + Send + 'static,
{
    let (network, mut inboxes) = LocalNetwork::<T>::new(all_ranks.iter().copied());
    let shutdown = Shutdown::new();
    let (done_tx, mut done_rx) = mpsc::channel::<(Rank, P)>(set_ranks.len().max(1));

    let mut handles = Vec::with_capacity(set_ranks.len());
    for &rank in set_ranks {
        let transport: Arc<dyn Transport<T>> = Arc::new(network.transport());
        let mut inbox = inboxes.remove(&rank).expect("set_ranks is a subset of all_ranks");
        let watcher = shutdown.watcher();
        let done_tx = done_tx.clone();
        let members = set_ranks.to_vec();
        let payload = payload_for(rank);
        let op = op.clone();

        handles.push(tokio::spawn(async move {
            let set = ParticipantSet::new(key, members, rank).expect("rank was drawn from set_ranks");
            let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), transport);
            let (result_tx, result_rx) = oneshot::channel();
            dispatcher
                .allreduce(
                    &set,
                    op,
                    move |value: P| {
                        let _ = result_tx.send(value);
                    },
                    payload,
                )
                .expect("rank is a member of the set it just built itself from");

            tokio::select! {
                Ok(value) = result_rx => {
                    let _ = done_tx.send((rank, value)).await;
                }
                () = run_rank(&mut inbox, &watcher, |envelope| {
                    if let Err(error) = dispatcher.handle_envelope(&set, envelope) {
                        panic!("fatal error handling envelope on rank {rank}: {error:?}");
                    }
                }) => {}
            }
        }));
    }
    drop(done_tx);

    let mut results = HashMap::new();
    while let Some((rank, value)) = done_rx.recv().await {
        results.insert(rank, value);
    }

    shutdown.signal();
    for handle in handles {
        handle.await.expect("rank task should not panic");
    }

    results
}

#[must_use]
pub fn ranks(count: usize) -> Vec<Rank> {
    (0..count).map(Rank::new).collect()
}
