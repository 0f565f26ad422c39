//! End-to-end allreduce scenarios (§8): the six concrete scenarios specified verbatim, plus the
//! boundary cases §8 requires as explicit tests.

mod support;

use std::sync::Arc;

use allreduce_core::{MaxOp, SumOp};
use allreduce_transport::LocalNetwork;
use allreduce_types::{ParticipantKind, ParticipantSetKey};
use support::{ranks, run_allreduce, CountingTransport};

fn collection_key(id: u64) -> ParticipantSetKey {
    ParticipantSetKey::new(ParticipantKind::Collection, id)
}

fn subgroup_key(id: u64) -> ParticipantSetKey {
    ParticipantSetKey::new(ParticipantKind::Subgroup, id)
}

/// Scenario 1: scalar sum, 4 ranks, each contributing its own index. Expected: 6 everywhere.
#[tokio::test]
async fn scalar_sum_four_ranks() {
    let all = ranks(4);
    let results = run_allreduce::<i64, i64, _>(collection_key(1), &all, &all, SumOp, |rank| {
        rank.index() as i64
    })
    .await;

    assert_eq!(results.len(), 4);
    for value in results.values() {
        assert_eq!(*value, 6);
    }
}

/// Scenario 2: scalar max, 3 ranks (non-power-of-two). Ranks contribute 100, 175, 50.
#[tokio::test]
async fn scalar_max_three_ranks_non_power_of_two() {
    let all = ranks(3);
    let inputs = [100_i64, 175, 50];
    let results = run_allreduce::<i64, i64, _>(collection_key(2), &all, &all, MaxOp, |rank| {
        inputs[rank.index()]
    })
    .await;

    assert_eq!(results.len(), 3);
    for value in results.values() {
        assert_eq!(*value, 175);
    }
}

/// Scenario 3: vector sum, 4 ranks, 100 elements. Rank r contributes a vector filled with r.
#[tokio::test]
async fn vector_sum_four_ranks_hundred_elements() {
    let all = ranks(4);
    let results = run_allreduce::<i64, Vec<i64>, _>(collection_key(3), &all, &all, SumOp, |rank| {
        vec![rank.index() as i64; 100]
    })
    .await;

    assert_eq!(results.len(), 4);
    for value in results.values() {
        assert_eq!(value.len(), 100);
        assert!(value.iter().all(|&element| element == 6));
    }
}

/// Scenario 4: vector sum, 4 ranks, 100 elements, a virtual collection with 3 local elements per
/// rank. Local pre-aggregation is an external collaborator (§1, §8.1), so the test performs it
/// directly with a plain fold before calling into the core: indices 0..11 each contribute a
/// vector filled with the index, and the harness folds each rank's three local elements with
/// `SumOp` before that rank's single payload enters the reduction.
#[tokio::test]
async fn vector_sum_with_local_preaggregation() {
    let all = ranks(4);
    let results = run_allreduce::<i64, Vec<i64>, _>(collection_key(4), &all, &all, SumOp, |rank| {
        let local_elements = [rank.index() * 3, rank.index() * 3 + 1, rank.index() * 3 + 2];
        let mut folded = vec![0_i64; 100];
        for &element in &local_elements {
            for slot in &mut folded {
                *slot += element as i64;
            }
        }
        folded
    })
    .await;

    assert_eq!(results.len(), 4);
    for value in results.values() {
        assert!(value.iter().all(|&element| element == 66));
    }
}

/// Scenario 5: two concurrent instances on the same subgroup with different ops (sum and max),
/// issued in opposite order between ranks, both of which must still deliver the correct value.
#[tokio::test]
async fn two_concurrent_instances_different_ops() {
    use allreduce_core::{Dispatcher, DispatcherConfig};
    use allreduce_transport::{run_rank, Shutdown, Transport};
    use allreduce_types::{ParticipantSet, Rank};
    use tokio::sync::oneshot;

    let all = ranks(4);
    let key = subgroup_key(5);
    let (network, mut inboxes) = LocalNetwork::<i64>::new(all.iter().copied());
    let shutdown = Shutdown::new();

    let (sum_tx, mut sum_rx) = tokio::sync::mpsc::channel::<(Rank, i64)>(4);
    let (max_tx, mut max_rx) = tokio::sync::mpsc::channel::<(Rank, i64)>(4);

    let mut handles = Vec::new();
    for &rank in &all {
        let transport: Arc<dyn Transport<i64>> = Arc::new(network.transport());
        let mut inbox = inboxes.remove(&rank).unwrap();
        let watcher = shutdown.watcher();
        let sum_tx = sum_tx.clone();
        let max_tx = max_tx.clone();
        let members = all.clone();

        handles.push(tokio::spawn(async move {
            let set = ParticipantSet::new(key, members, rank).unwrap();
            let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), transport);

            let (sum_done_tx, sum_done_rx) = oneshot::channel();
            let (max_done_tx, max_done_rx) = oneshot::channel();

            // Out-of-order issuance between ranks: even ranks start the sum instance first, odd
            // ranks start the max instance first. Both instances live in the same registry/store
            // for this rank concurrently regardless of the order they were started in.
            let inputs = [10_i64, 175, 50, 90];
            if rank.index() % 2 == 0 {
                dispatcher
                    .allreduce(&set, SumOp, move |v: i64| { let _ = sum_done_tx.send(v); }, inputs[rank.index()])
                    .unwrap();
                dispatcher
                    .allreduce(&set, MaxOp, move |v: i64| { let _ = max_done_tx.send(v); }, inputs[rank.index()])
                    .unwrap();
            } else {
                dispatcher
                    .allreduce(&set, MaxOp, move |v: i64| { let _ = max_done_tx.send(v); }, inputs[rank.index()])
                    .unwrap();
                dispatcher
                    .allreduce(&set, SumOp, move |v: i64| { let _ = sum_done_tx.send(v); }, inputs[rank.index()])
                    .unwrap();
            }

            let mut sum_result = None;
            let mut max_result = None;
            let mut sum_done_rx = sum_done_rx;
            let mut max_done_rx = max_done_rx;

            while sum_result.is_none() || max_result.is_none() {
                tokio::select! {
                    res = &mut sum_done_rx, if sum_result.is_none() => {
                        sum_result = Some(res.expect("sum instance callback fires"));
                    }
                    res = &mut max_done_rx, if max_result.is_none() => {
                        max_result = Some(res.expect("max instance callback fires"));
                    }
                    () = run_rank(&mut inbox, &watcher, |envelope| {
                        if let Err(error) = dispatcher.handle_envelope(&set, envelope) {
                            panic!("fatal error handling envelope on rank {rank}: {error:?}");
                        }
                    }) => { break; }
                }
            }

            let _ = sum_tx.send((rank, sum_result.expect("sum instance should complete"))).await;
            let _ = max_tx.send((rank, max_result.expect("max instance should complete"))).await;
        }));
    }
    drop(sum_tx);
    drop(max_tx);

    let mut sums = Vec::new();
    while let Some(entry) = sum_rx.recv().await {
        sums.push(entry);
    }
    let mut maxes = Vec::new();
    while let Some(entry) = max_rx.recv().await {
        maxes.push(entry);
    }

    shutdown.signal();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(sums.len(), 4);
    assert!(sums.iter().all(|&(_, v)| v == 10 + 175 + 50 + 90));
    assert_eq!(maxes.len(), 4);
    assert!(maxes.iter().all(|&(_, v)| v == 175));
}

/// Scenario 6: an instance on a non-default subgroup that excludes rank 0. Rank 0 must not
/// receive a callback; every subgroup member must.
#[tokio::test]
async fn subgroup_excludes_rank_zero() {
    let all = ranks(4);
    let subgroup: Vec<_> = all[1..].to_vec();
    let results = run_allreduce::<i64, i64, _>(subgroup_key(6), &all, &subgroup, SumOp, |rank| {
        rank.index() as i64
    })
    .await;

    assert_eq!(results.len(), 3, "only the 3 subgroup members should get a callback");
    assert!(!results.contains_key(&all[0]), "rank 0 is not a subgroup member");
    for value in results.values() {
        assert_eq!(*value, 1 + 2 + 3);
    }
}

/// Boundary: `P = 1`. The callback fires locally with the unchanged input, no messages sent.
#[tokio::test]
async fn single_rank_fires_callback_locally() {
    let all = ranks(1);
    let results = run_allreduce::<i64, i64, _>(collection_key(10), &all, &all, SumOp, |_| 42_i64).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[&all[0]], 42);
}

/// Boundary: `P = 2`. One recursive-doubling step, no adjustment pre-phase (`R = 0`).
#[tokio::test]
async fn two_ranks_is_one_step_no_adjustment() {
    let all = ranks(2);
    let results = run_allreduce::<i64, i64, _>(collection_key(11), &all, &all, SumOp, |rank| {
        rank.index() as i64 + 1
    })
    .await;

    assert_eq!(results.len(), 2);
    for value in results.values() {
        assert_eq!(*value, 3);
    }
}

/// Boundary: non-power-of-two rank counts `{3, 5, 6, 7}`, covering odd/even adjustment roles.
#[tokio::test]
async fn non_power_of_two_rank_counts() {
    for p in [3_usize, 5, 6, 7] {
        let all = ranks(p);
        let results =
            run_allreduce::<i64, i64, _>(collection_key(100 + p as u64), &all, &all, SumOp, |rank| {
                rank.index() as i64
            })
            .await;

        let expected: i64 = (0..p as i64).sum();
        assert_eq!(results.len(), p, "p={p}");
        for value in results.values() {
            assert_eq!(*value, expected, "p={p}");
        }
    }
}

/// Boundary: payload size on each side of the algorithm-selection threshold (§4.1's default
/// 2048) still produces a correct sum, whichever engine gets picked.
#[tokio::test]
async fn payload_size_on_each_side_of_the_threshold() {
    let all = ranks(4);

    let below = run_allreduce::<i64, Vec<i64>, _>(collection_key(200), &all, &all, SumOp, |rank| {
        vec![rank.index() as i64; 4]
    })
    .await;
    for value in below.values() {
        assert!(value.iter().all(|&element| element == 6));
    }

    let above = run_allreduce::<i64, Vec<i64>, _>(collection_key(201), &all, &all, SumOp, |rank| {
        vec![rank.index() as i64; 4096]
    })
    .await;
    for value in above.values() {
        assert_eq!(value.len(), 4096);
        assert!(value.iter().all(|&element| element == 6));
    }
}

/// Testable property 3: message count per rank is exactly `log2(P2)` for recursive doubling in
/// the power-of-two case, with no adjustment or excluded-broadcast traffic.
#[tokio::test]
async fn message_count_matches_recursive_doubling_bound() {
    use allreduce_core::{Dispatcher, DispatcherConfig};
    use allreduce_transport::{run_rank, Shutdown};
    use allreduce_types::{ParticipantSet, Rank};
    use tokio::sync::oneshot;

    let all = ranks(4);
    let key = collection_key(300);
    let (network, mut inboxes) = LocalNetwork::<i64>::new(all.iter().copied());
    let shutdown = Shutdown::new();
    let mut counters = Vec::new();
    let mut handles = Vec::new();
    let (done_tx, mut done_rx) = tokio::sync::mpsc::channel::<(Rank, i64)>(4);

    for &rank in &all {
        let (counting, sent) = CountingTransport::new(Arc::new(network.transport()));
        counters.push((rank, sent));
        let mut inbox = inboxes.remove(&rank).unwrap();
        let watcher = shutdown.watcher();
        let done_tx = done_tx.clone();
        let members = all.clone();

        handles.push(tokio::spawn(async move {
            let set = ParticipantSet::new(key, members, rank).unwrap();
            let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), Arc::new(counting));
            let (result_tx, result_rx) = oneshot::channel();
            dispatcher
                .allreduce(&set, SumOp, move |v: i64| { let _ = result_tx.send(v); }, rank.index() as i64)
                .unwrap();

            tokio::select! {
                Ok(value) = result_rx => { let _ = done_tx.send((rank, value)).await; }
                () = run_rank(&mut inbox, &watcher, |envelope| {
                    dispatcher.handle_envelope(&set, envelope).unwrap();
                }) => {}
            }
        }));
    }
    drop(done_tx);
    while done_rx.recv().await.is_some() {}
    shutdown.signal();
    for handle in handles {
        handle.await.unwrap();
    }

    // P=4 is already a power of two: 2 steps, no adjustment, no excluded-broadcast.
    for (rank, sent) in counters {
        assert_eq!(sent.load(std::sync::atomic::Ordering::SeqCst), 2, "rank {rank}");
    }
}
