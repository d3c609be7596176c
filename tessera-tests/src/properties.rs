//! Randomized borrow/release/time sequences against a model.
//!
//! Checks, after every step:
//! - the borrower count equals the number of live handles
//! - an entry with live handles is never removed
//! - an entry disappears exactly when it has been idle for the full timeout
//! - a table is constructed again only after its entry was removed

#![allow(clippy::needless_pass_by_value)]

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tessera_core::TableId;
use tessera_repo::AccessHandle;
use tokio::task::LocalSet;
use tokio_util::sync::CancellationToken;

use crate::fakes::{FakeConstructor, FakeInterface};
use crate::scenarios::{settle, Harness, IDLE};

const T: TableId = TableId::new(1);

#[derive(Debug, Clone)]
enum Op {
    Acquire,
    Release(usize),
    Wait(Duration),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Acquire),
        3 => (0..8_usize).prop_map(Op::Release),
        2 => (1..90_000_u64).prop_map(|ms| Op::Wait(Duration::from_millis(ms))),
    ]
}

async fn run_model(ops: Vec<Op>) {
    let constructor = Arc::new(FakeConstructor::ready());
    let harness = Harness::start(Arc::clone(&constructor), IDLE);
    let cache = &harness.cache;
    let cancel = CancellationToken::new();

    let mut held: Vec<AccessHandle<FakeInterface>> = Vec::new();
    let mut present = false;
    let mut constructions = 0;
    let mut idle_for = Duration::ZERO;

    for op in ops {
        match op {
            Op::Acquire => {
                if !present {
                    constructions += 1;
                    present = true;
                }
                held.push(cache.get_interface(T, &cancel).await.unwrap());
                idle_for = Duration::ZERO;
            }
            Op::Release(index) => {
                if !held.is_empty() {
                    let index = index % held.len();
                    drop(held.swap_remove(index));
                }
            }
            Op::Wait(duration) => {
                tokio::time::advance(duration).await;
                if present && held.is_empty() {
                    idle_for += duration;
                }
            }
        }
        settle().await;

        if present && held.is_empty() {
            if idle_for > IDLE {
                present = false;
                idle_for = Duration::ZERO;
            } else if idle_for == IDLE {
                // Exactly on the deadline either outcome is fine.
                present = cache.contains(T);
                if !present {
                    idle_for = Duration::ZERO;
                }
            }
        }

        assert_eq!(cache.contains(T), present);
        if !held.is_empty() {
            assert!(cache.contains(T), "entry removed while borrowed");
        }
        let expected = u32::try_from(held.len()).unwrap();
        assert_eq!(cache.borrowers(T), present.then_some(expected));
        assert_eq!(constructor.constructions(), constructions);
        assert!(constructor.live() <= 1);
        if let Some(first) = held.first() {
            assert!(held.iter().all(|handle| handle.ptr_eq(first)));
        }
    }

    held.clear();
    cache.shutdown().await;
    assert!(cache.is_empty());
    assert_eq!(constructor.live(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_property_borrow_and_idle_lifecycle(ops in prop::collection::vec(op(), 1..60)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        LocalSet::new().block_on(&runtime, run_model(ops));
    }
}
