//! Runs a small scalar-sum allreduce over a simulated topology: one tokio task per rank, wired
//! together by the in-memory transport and participant-set service from `allreduce_transport`
//! (§6.1 of the core's specification) rather than a real network. This is the "rest of the
//! runtime" the core treats as an external collaborator, stood up just far enough to exercise the
//! dispatcher end to end.

use std::sync::Arc;

use allreduce_core::{Dispatcher, DispatcherConfig, SumOp};
use allreduce_transport::{run_rank, InMemoryParticipantSetService, LocalNetwork, ParticipantSetService, Shutdown, Transport};
use allreduce_types::{ParticipantKind, ParticipantSet, ParticipantSetKey, Rank};
use tokio::sync::{mpsc, oneshot};

const NUM_RANKS: usize = 4;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let ranks: Vec<Rank> = (0..NUM_RANKS).map(Rank::new).collect();
    let set_key = ParticipantSetKey::new(ParticipantKind::Collection, 0);

    let mut service = InMemoryParticipantSetService::new();
    service.register(set_key, ranks.clone());
    let ranks = service.ranks_of(set_key).expect("just registered above");

    let (network, mut inboxes) = LocalNetwork::<i64>::new(ranks.iter().copied());
    let shutdown = Shutdown::new();
    let (done_tx, mut done_rx) = mpsc::channel::<(usize, i64)>(ranks.len());

    let mut handles = Vec::with_capacity(ranks.len());
    for &rank in &ranks {
        let transport: Arc<dyn Transport<i64>> = Arc::new(network.transport());
        let mut inbox = inboxes.remove(&rank).expect("one inbox per registered rank");
        let watcher = shutdown.watcher();
        let done_tx = done_tx.clone();
        let ranks = ranks.clone();

        handles.push(tokio::spawn(async move {
            let set = ParticipantSet::new(set_key, ranks, rank)
                .expect("rank was drawn from the set's own registered rank list");
            let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), transport);

            let (result_tx, result_rx) = oneshot::channel();
            dispatcher
                .allreduce(&set, SumOp, move |value: i64| {
                    let _ = result_tx.send(value);
                }, rank.index() as i64)
                .expect("local rank is a member of the set it just built itself from");

            tokio::select! {
                Ok(value) = result_rx => {
                    tracing::info!(rank = rank.index(), value, "allreduce completed");
                    let _ = done_tx.send((rank.index(), value)).await;
                }
                () = run_rank(&mut inbox, &watcher, |envelope| {
                    if let Err(error) = dispatcher.handle_envelope(&set, envelope) {
                        tracing::error!(rank = rank.index(), %error, "fatal error handling envelope");
                    }
                }) => {}
            }
        }));
    }
    drop(done_tx);

    let mut results = Vec::with_capacity(ranks.len());
    while let Some(result) = done_rx.recv().await {
        results.push(result);
    }
    results.sort_unstable_by_key(|&(rank, _)| rank);

    shutdown.signal();
    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!(?results, "scalar-sum allreduce over {} ranks finished", ranks.len());
}
