use std::{collections::BTreeMap, time::Duration};

use collective::{CollectiveErr, ProcessGroup, ReduceTarget, in_memory};
use comms::{LossMap, SampleId, SampleRecord};
use futures::future;
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(5);

fn losses(a: f32, b: f32) -> LossMap {
    LossMap::from([("a".to_string(), a), ("b".to_string(), b)])
}

fn record(id: &SampleId, rank: usize) -> SampleRecord {
    let metrics = BTreeMap::from([("score".to_string(), rank as f32)]);
    SampleRecord::new(id.clone(), metrics, 0.01)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn average_reduce_to_all_is_the_mean() {
    let group = in_memory(4).await.unwrap();

    let handles: Vec<_> = group
        .into_iter()
        .map(|mut member| {
            tokio::spawn(async move {
                let r = member.rank() as f32;
                member
                    .average_reduce(&losses(r, 2.0 * r), ReduceTarget::All)
                    .await
            })
        })
        .collect();

    let results = timeout(DEADLINE, future::try_join_all(handles))
        .await
        .unwrap()
        .unwrap();

    for reduced in results {
        assert_eq!(reduced.unwrap(), Some(losses(1.5, 3.0)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn average_reduce_to_coordinator_only() {
    let group = in_memory(3).await.unwrap();

    let handles: Vec<_> = group
        .into_iter()
        .map(|mut member| {
            tokio::spawn(async move {
                let r = member.rank() as f32;
                member
                    .average_reduce(&losses(r, 1.0), ReduceTarget::Coordinator)
                    .await
            })
        })
        .collect();

    let results: Vec<_> = timeout(DEADLINE, future::try_join_all(handles))
        .await
        .unwrap()
        .unwrap()
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(results[0], Some(losses(1.0, 1.0)));
    assert_eq!(results[1], None);
    assert_eq!(results[2], None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gather_follows_canonical_order_for_any_split() {
    let canonical: Vec<SampleId> = (0..11).map(|i| SampleId::new(format!("s{i:03}"))).collect();

    for world_size in 1..=4 {
        for trial in 0..5 {
            let mut rng = StdRng::seed_from_u64((world_size * 100 + trial) as u64);

            let mut shards = vec![Vec::new(); world_size];
            for id in &canonical {
                let owner = rng.random_range(0..world_size);
                shards[owner].push(record(id, owner));
            }
            for shard in &mut shards {
                shard.shuffle(&mut rng);
            }

            let group = in_memory(world_size).await.unwrap();
            let handles: Vec<_> = group
                .into_iter()
                .zip(shards)
                .map(|(mut member, shard)| {
                    let canonical = canonical.clone();
                    tokio::spawn(async move { member.gather_by_identity(shard, &canonical).await })
                })
                .collect();

            let mut results = timeout(DEADLINE, future::try_join_all(handles))
                .await
                .unwrap()
                .unwrap()
                .into_iter()
                .map(Result::unwrap);

            let gathered = results.next().unwrap().unwrap();
            let ids: Vec<_> = gathered.iter().map(|r| r.id.clone()).collect();
            assert_eq!(ids, canonical);
            assert!(results.all(|r| r.is_none()));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broadcast_replicates_the_coordinator_flag() {
    let group = in_memory(3).await.unwrap();

    let handles: Vec<_> = group
        .into_iter()
        .map(|mut member| {
            tokio::spawn(async move {
                let local = member.rank() == 0;
                member.broadcast_flag(local).await
            })
        })
        .collect();

    let flags = timeout(DEADLINE, future::try_join_all(handles))
        .await
        .unwrap()
        .unwrap();

    assert!(flags.into_iter().all(|flag| flag.unwrap()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn barrier_then_disconnect() {
    let group = in_memory(4).await.unwrap();

    let handles: Vec<_> = group
        .into_iter()
        .map(|mut member| {
            tokio::spawn(async move {
                member.barrier().await?;
                member.barrier().await?;
                member.disconnect().await
            })
        })
        .collect();

    let results = timeout(DEADLINE, future::try_join_all(handles))
        .await
        .unwrap()
        .unwrap();

    assert!(results.iter().all(Result::is_ok));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn peer_failure_reaches_every_process() {
    let mut group = in_memory(3).await.unwrap();
    let canonical = vec![SampleId::new("x"), SampleId::new("y")];

    let mut failing = group.pop().unwrap();
    let mut healthy = group.pop().unwrap();
    let mut coordinator = group.pop().unwrap();

    let failing = tokio::spawn(async move { failing.abort("out of memory").await });

    let ids = canonical.clone();
    let healthy = tokio::spawn(async move {
        let gathered = healthy
            .gather_by_identity(vec![record(&ids[0], 1)], &ids)
            .await?;
        assert!(gathered.is_none());
        healthy.broadcast_flag(false).await
    });

    let coordinator = tokio::spawn(async move {
        let res = coordinator.gather_by_identity(Vec::new(), &canonical).await;
        if let Err(e) = &res {
            coordinator.abort(&e.to_string()).await;
        }
        res
    });

    let (failing, healthy, coordinator) = timeout(DEADLINE, async {
        tokio::join!(failing, healthy, coordinator)
    })
    .await
    .unwrap();

    failing.unwrap();

    let err = coordinator.unwrap().unwrap_err();
    assert!(
        matches!(&err, CollectiveErr::PeerFailed { rank: 2, detail } if detail == "out of memory")
    );

    let err = healthy.unwrap().unwrap_err();
    assert!(matches!(err, CollectiveErr::PeerFailed { rank: 0, .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mismatched_loss_count_is_fatal() {
    let mut group = in_memory(2).await.unwrap();

    let mut peer = group.pop().unwrap();
    let mut coordinator = group.pop().unwrap();

    let peer = tokio::spawn(async move {
        peer.average_reduce(&losses(1.0, 2.0), ReduceTarget::All)
            .await
    });

    let coordinator = tokio::spawn(async move {
        let single = LossMap::from([("a".to_string(), 1.0)]);
        let res = coordinator.average_reduce(&single, ReduceTarget::All).await;
        if let Err(e) = &res {
            coordinator.abort(&e.to_string()).await;
        }
        res
    });

    let (peer, coordinator) = timeout(DEADLINE, async { tokio::join!(peer, coordinator) })
        .await
        .unwrap();

    assert!(matches!(
        coordinator.unwrap().unwrap_err(),
        CollectiveErr::LossCountMismatch {
            rank: 1,
            got: 2,
            expected: 1
        }
    ));
    assert!(matches!(
        peer.unwrap().unwrap_err(),
        CollectiveErr::PeerFailed { rank: 0, .. }
    ));
}
