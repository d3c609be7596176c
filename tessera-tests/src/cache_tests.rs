//! Shard cache lifecycle tests.
//!
//! Every test runs on paused time inside a `LocalSet`; the idle timer is
//! driven with `tokio::time::advance`.

#![allow(clippy::significant_drop_tightening)]

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tessera_core::{MachineId, TableId};
use tessera_repo::{RepoError, RoutedConstructor};
use tessera_routing::{build_snapshot, RoutingError, TableConfig, Topology};
use tokio::task::LocalSet;
use tokio::time::advance;
use tokio_util::sync::CancellationToken;

use crate::fakes::FakeConstructor;
use crate::scenarios::{
    full_directory, settle, uniform_topology, whole_range_on, Harness, EPSILON, IDLE,
};

const T: TableId = TableId::new(1);

#[tokio::test(start_paused = true)]
async fn test_cache_concurrent_requests_share_one_construction() {
    LocalSet::new()
        .run_until(async {
            let constructor = Arc::new(FakeConstructor::gated());
            let harness = Harness::start(Arc::clone(&constructor), IDLE);
            let cache = &harness.cache;
            let cancel = CancellationToken::new();

            let (first, second, ()) = tokio::join!(
                cache.get_interface(T, &cancel),
                cache.get_interface(T, &cancel),
                async {
                    settle().await;
                    assert_eq!(cache.len(), 1);
                    assert_eq!(cache.borrowers(T), Some(2));
                    assert!(!cache.is_ready(T));
                    constructor.open_gate();
                }
            );

            let first = first.unwrap();
            let second = second.unwrap();
            assert!(first.ptr_eq(&second));
            assert_eq!(first.table_id(), T);
            assert_eq!(first.serial, 0);
            assert_eq!(constructor.constructions(), 1);
            assert_eq!(cache.borrowers(T), Some(2));
            assert!(cache.is_ready(T));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_cache_many_waiters_one_lifecycle() {
    LocalSet::new()
        .run_until(async {
            let constructor = Arc::new(FakeConstructor::gated());
            let harness = Harness::start(Arc::clone(&constructor), IDLE);
            let cache = &harness.cache;
            let cancel = CancellationToken::new();

            let waiters = futures::future::join_all((0..16).map(|_| cache.get_interface(T, &cancel)));
            let (handles, ()) = tokio::join!(waiters, async {
                settle().await;
                constructor.open_gate();
            });

            let handles: Vec<_> = handles.into_iter().map(Result::unwrap).collect();
            assert!(handles.iter().all(|handle| handle.ptr_eq(&handles[0])));
            assert_eq!(constructor.constructions(), 1);
            assert_eq!(cache.borrowers(T), Some(16));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_cache_idle_entry_destroyed_after_timeout() {
    LocalSet::new()
        .run_until(async {
            let constructor = Arc::new(FakeConstructor::ready());
            let harness = Harness::start(Arc::clone(&constructor), IDLE);
            let cache = &harness.cache;

            let handle = cache.get_interface(T, &CancellationToken::new()).await.unwrap();
            drop(handle);
            settle().await;

            advance(IDLE - EPSILON).await;
            settle().await;
            assert!(cache.contains(T));
            assert_eq!(constructor.teardowns(), 0);

            advance(EPSILON * 2).await;
            settle().await;
            assert!(!cache.contains(T));
            assert!(cache.is_empty());
            assert_eq!(constructor.teardowns(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_cache_borrow_before_deadline_keeps_entry() {
    LocalSet::new()
        .run_until(async {
            let constructor = Arc::new(FakeConstructor::ready());
            let harness = Harness::start(Arc::clone(&constructor), IDLE);
            let cache = &harness.cache;
            let cancel = CancellationToken::new();

            drop(cache.get_interface(T, &cancel).await.unwrap());
            settle().await;
            advance(IDLE - EPSILON).await;
            settle().await;

            let handle = cache.get_interface(T, &cancel).await.unwrap();
            settle().await;
            advance(EPSILON * 2).await;
            settle().await;
            assert!(cache.contains(T));
            assert_eq!(handle.serial, 0);

            // The idle window restarts from the second release.
            drop(handle);
            settle().await;
            advance(IDLE - EPSILON).await;
            settle().await;
            assert!(cache.contains(T));

            advance(EPSILON * 2).await;
            settle().await;
            assert!(!cache.contains(T));
            assert_eq!(constructor.constructions(), 1);
            assert_eq!(constructor.teardowns(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_cache_brief_borrow_restarts_idle_window() {
    LocalSet::new()
        .run_until(async {
            let constructor = Arc::new(FakeConstructor::ready());
            let harness = Harness::start(Arc::clone(&constructor), IDLE);
            let cache = &harness.cache;
            let cancel = CancellationToken::new();

            drop(cache.get_interface(T, &cancel).await.unwrap());
            settle().await;
            advance(IDLE - EPSILON).await;

            // Acquired and released before the lifecycle task runs again.
            drop(cache.get_interface(T, &cancel).await.unwrap());
            advance(EPSILON * 2).await;
            settle().await;
            assert!(cache.contains(T));

            advance(IDLE + EPSILON).await;
            settle().await;
            assert!(!cache.contains(T));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_cache_entry_with_handle_never_removed() {
    LocalSet::new()
        .run_until(async {
            let constructor = Arc::new(FakeConstructor::ready());
            let harness = Harness::start(Arc::clone(&constructor), IDLE);
            let cache = &harness.cache;

            let handle = cache.get_interface(T, &CancellationToken::new()).await.unwrap();
            for _ in 0..5 {
                advance(IDLE * 2).await;
                settle().await;
                assert!(cache.contains(T));
                assert_eq!(cache.borrowers(T), Some(1));
            }
            assert_eq!(constructor.teardowns(), 0);
            drop(handle);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_cache_shutdown_while_constructing() {
    LocalSet::new()
        .run_until(async {
            let constructor = Arc::new(FakeConstructor::gated());
            let harness = Harness::start(Arc::clone(&constructor), IDLE);
            let cache = &harness.cache;
            let cancel = CancellationToken::new();

            let (result, ()) = tokio::join!(cache.get_interface(T, &cancel), async {
                settle().await;
                assert_eq!(cache.borrowers(T), Some(1));
                cache.shutdown().await;
            });

            assert_eq!(result.unwrap_err(), RepoError::ShuttingDown { table_id: T });
            assert!(cache.is_empty());
            assert!(cache.is_draining());
            assert_eq!(constructor.live(), 0);

            // Nothing is created once the cache has drained.
            let late = cache.get_interface(TableId::new(2), &cancel).await;
            assert!(matches!(late, Err(RepoError::ShuttingDown { .. })));
            assert!(cache.is_empty());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_cache_shutdown_destroys_every_entry() {
    LocalSet::new()
        .run_until(async {
            let constructor = Arc::new(FakeConstructor::ready());
            let harness = Harness::start(Arc::clone(&constructor), IDLE);
            let cache = &harness.cache;
            let cancel = CancellationToken::new();

            drop(cache.get_interface(TableId::new(1), &cancel).await.unwrap());
            let held = cache.get_interface(TableId::new(2), &cancel).await.unwrap();
            settle().await;
            drop(held);

            cache.shutdown().await;
            assert!(cache.is_empty());
            assert_eq!(constructor.constructions(), 2);
            assert_eq!(constructor.teardowns(), 2);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_cache_shutdown_with_live_handle_panics() {
    LocalSet::new()
        .run_until(async {
            let constructor = Arc::new(FakeConstructor::ready());
            let harness = Harness::start(Arc::clone(&constructor), IDLE);
            let cache = &harness.cache;
            let cancel = CancellationToken::new();

            let held = cache.get_interface(T, &cancel).await.unwrap();
            let drained = AssertUnwindSafe(cache.shutdown()).catch_unwind().await;

            let payload = drained.unwrap_err();
            let message = payload.downcast_ref::<String>().unwrap();
            assert!(message.contains("shutdown with live access handles"));
            // Already raised, so this resolves at once.
            cache.failed().await;
            assert!(cache.contains(T));
            assert_eq!(constructor.teardowns(), 0);
            drop(held);
        })
        .await;
}

#[tokio::test(start_paused = true)]
#[should_panic(expected = "shutdown with live access handles")]
async fn test_cache_shutdown_does_not_swallow_invariant_panic() {
    LocalSet::new()
        .run_until(async {
            let harness = Harness::start(Arc::new(FakeConstructor::ready()), IDLE);
            let cancel = CancellationToken::new();
            let _held = harness.cache.get_interface(T, &cancel).await.unwrap();
            harness.cache.shutdown().await;
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_cache_caller_cancellation_releases_borrow() {
    LocalSet::new()
        .run_until(async {
            let constructor = Arc::new(FakeConstructor::gated());
            let harness = Harness::start(Arc::clone(&constructor), IDLE);
            let cache = &harness.cache;
            let cancel = CancellationToken::new();

            let (result, ()) = tokio::join!(cache.get_interface(T, &cancel), async {
                settle().await;
                cancel.cancel();
            });
            assert_eq!(result.unwrap_err(), RepoError::Cancelled { table_id: T });
            assert_eq!(cache.borrowers(T), Some(0));

            // The entry's lifecycle carries on without the caller.
            constructor.open_gate();
            settle().await;
            assert!(cache.is_ready(T));

            advance(IDLE + EPSILON).await;
            settle().await;
            assert!(!cache.contains(T));
            assert_eq!(constructor.teardowns(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_cache_never_ready_without_coordinator() {
    LocalSet::new()
        .run_until(async {
            let constructor = Arc::new(FakeConstructor::ready());
            let harness = Harness::start(Arc::clone(&constructor), IDLE);
            harness.stop_coordinator();
            settle().await;

            let cache = &harness.cache;
            let cancel = CancellationToken::new();
            let (result, ()) = tokio::join!(cache.get_interface(T, &cancel), async {
                settle().await;
                advance(IDLE * 3).await;
                settle().await;
                cancel.cancel();
            });

            assert!(matches!(result, Err(RepoError::Cancelled { .. })));
            assert_eq!(constructor.constructions(), 0);
            assert!(cache.contains(T));

            cache.shutdown().await;
            assert!(cache.is_empty());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_cache_deleted_table_lives_until_idle_timeout() {
    LocalSet::new()
        .run_until(async {
            let directory = full_directory([1], &[1]);
            let harness =
                Harness::with_directory(Arc::new(RoutedConstructor), IDLE, directory);
            let cache = &harness.cache;

            let resolved = uniform_topology([1], 1);
            let first = build_snapshot(&resolved, &harness.routing.load());
            harness.routing.store(Arc::new(first));

            let table = cache.get_interface(T, &CancellationToken::new()).await.unwrap();
            let location = table.locate(b"key").unwrap();
            assert_eq!(location.route.machine_id, MachineId::new(1));
            assert!(location.contact.is_some());

            let deleted = Topology::new().with_table(T, TableConfig::Deleted);
            let second = build_snapshot(&deleted, &harness.routing.load());
            harness.routing.store(Arc::new(second));

            // Routing forgets the table, the cache does not.
            assert_eq!(
                table.locate(b"key").unwrap_err(),
                RoutingError::TableUnknown { table_id: T }
            );
            advance(IDLE * 2).await;
            settle().await;
            assert!(cache.contains(T));

            drop(table);
            settle().await;
            advance(IDLE - EPSILON).await;
            settle().await;
            assert!(cache.contains(T));
            advance(EPSILON * 2).await;
            settle().await;
            assert!(!cache.contains(T));

            // Recreating the table routes again through a fresh entry.
            let recreated = Topology::new().with_table(T, whole_range_on(1));
            let third = build_snapshot(&recreated, &harness.routing.load());
            harness.routing.store(Arc::new(third));
            let table = cache.get_interface(T, &CancellationToken::new()).await.unwrap();
            assert_eq!(table.locate(b"key").unwrap().route.snapshot_version, 3);
        })
        .await;
}
