//! Concurrency tests for reconciliation passes
//!
//! Passes for one server must serialize with each other and with admin
//! mutations, while passes for different servers run side by side.

mod fixtures;

use cuebot::admin::AdminCommand;
use cuebot::scheduler::{reconcile_all, ReconcileScheduler};
use cuebot::storage::Repository;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fixtures::{at, presence, TestSystem, SUPERUSER, VOICE};

const SERVER: u64 = 10;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_passes_create_one_entry_per_member() {
    let system = Arc::new(TestSystem::new().await);
    system.add_server(SERVER).await;
    let members: Vec<_> = (1..=20).map(presence).collect();
    system.platform.set_presence(SERVER, VOICE, members);

    let now = at(2, 0, 0);
    let handles: Vec<_> = (0..25)
        .map(|_| {
            let system = system.clone();
            tokio::spawn(async move { system.reconciler.reconcile_at(SERVER, now).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let entries = system.repository.list_queue_entries(SERVER).await.unwrap();
    assert_eq!(entries.len(), 20);
    let related = system.repository.list_related(SERVER).await.unwrap();
    assert_eq!(related.len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admin_reset_interleaved_with_passes() {
    let system = Arc::new(TestSystem::new().await);
    system.add_server(SERVER).await;
    system.platform.set_presence(SERVER, VOICE, vec![presence(1)]);
    system.reconciler.reconcile_at(SERVER, at(2, 0, 0)).await.unwrap();

    let passes: Vec<_> = (0..10)
        .map(|i| {
            let system = system.clone();
            tokio::spawn(async move {
                system
                    .reconciler
                    .reconcile_at(SERVER, at(2, 1, i))
                    .await
                    .map(|_| ())
            })
        })
        .collect();
    let resets: Vec<_> = (0..5)
        .map(|_| {
            let system = system.clone();
            tokio::spawn(async move {
                system
                    .admin
                    .execute(SERVER, AdminCommand::ResetStats { actor: SUPERUSER })
                    .await
                    .map(|_| ())
            })
        })
        .collect();

    for handle in passes.into_iter().chain(resets) {
        handle.await.unwrap().unwrap();
    }

    // The member never left, so no stay was credited and the entry survives
    let entry = system
        .repository
        .get_queue_entry(1, SERVER)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.join_time, at(2, 0, 0));
    let row = system.repository.get_related(1, SERVER).await.unwrap().unwrap();
    assert_eq!(row.queue_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_servers_in_one_tick() {
    let system = TestSystem::new().await;
    let server_count = 50;
    for server_id in 1..=server_count {
        system.add_server(server_id).await;
        system
            .platform
            .set_presence(server_id, VOICE, vec![presence(server_id * 100)]);
    }

    let start = Instant::now();
    let summary = reconcile_all(&system.reconciler).await;
    let elapsed = start.elapsed();

    assert_eq!(summary.servers, server_count as usize);
    assert_eq!(summary.succeeded, server_count as usize);
    assert_eq!(summary.failed, 0);
    assert!(
        elapsed < Duration::from_secs(5),
        "tick took too long: {:?}",
        elapsed
    );

    for server_id in 1..=server_count {
        assert!(system.reconciler.last_report(server_id).is_some());
    }
}

#[tokio::test]
async fn test_scheduler_serves_triggers_and_stops() {
    let system = TestSystem::new().await;
    system.add_server(SERVER).await;

    let (scheduler, trigger) =
        ReconcileScheduler::new(system.reconciler.clone(), Duration::from_secs(3600), 8);
    let handle = scheduler.spawn();

    assert!(trigger.request(SERVER));

    let deadline = Instant::now() + Duration::from_secs(5);
    while system.reconciler.last_report(SERVER).is_none() {
        assert!(Instant::now() < deadline, "no pass ran for the trigger");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    handle.shutdown(Duration::from_secs(5)).await.unwrap();
    assert!(system.platform.membership_calls() >= 1);
    assert!(!trigger.request(SERVER));
}
