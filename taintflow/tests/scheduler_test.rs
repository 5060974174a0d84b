//! Scheduler Tests
//!
//! Map-reduce behavior, chunking policies, crash isolation, cancellation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use taintflow::errors::SchedulerError;
use taintflow::scheduler::{Scheduler, SchedulingPolicy};

fn scheduler() -> Scheduler {
    Scheduler::new(Some(2)).expect("pool")
}

#[test]
fn map_reduce_folds_all_inputs() {
    let inputs: Vec<u64> = (1..=100).collect();
    let total = scheduler()
        .map_reduce(
            &SchedulingPolicy::FixedChunkSize { size: 7 },
            0_u64,
            &inputs,
            |acc, chunk| acc + chunk.iter().sum::<u64>(),
            |a, b| a + b,
        )
        .expect("map reduce");
    assert_eq!(total, 5050);
}

#[test]
fn empty_inputs_return_initial() {
    let inputs: Vec<u64> = Vec::new();
    let total = scheduler()
        .map_reduce(
            &SchedulingPolicy::FixedChunkSize { size: 4 },
            41_u64,
            &inputs,
            |acc, chunk| acc + chunk.iter().sum::<u64>(),
            |a, b| a + b,
        )
        .expect("map reduce");
    assert_eq!(total, 41);
}

#[test]
fn reduce_order_does_not_matter() {
    // The reduce is commutative: any completion order gives one answer.
    let inputs: Vec<u64> = (0..1000).collect();
    let pool = scheduler();
    let policy = SchedulingPolicy::FixedChunkCount {
        count: 16,
        min_chunk_size: 1,
        preferred_chunks_per_worker: 4,
    };
    let first = pool
        .map_reduce(&policy, 0_u64, &inputs, |acc, chunk| acc + chunk.len() as u64, |a, b| a + b)
        .expect("map reduce");
    let second = pool
        .map_reduce(&policy, 0_u64, &inputs, |acc, chunk| acc + chunk.len() as u64, |a, b| a + b)
        .expect("map reduce");
    assert_eq!(first, 1000);
    assert_eq!(first, second);
}

#[test]
fn chunk_size_policies() {
    let fixed = SchedulingPolicy::FixedChunkSize { size: 10 };
    assert_eq!(fixed.chunk_size(1000, 4), 10);

    let counted = SchedulingPolicy::FixedChunkCount {
        count: 10,
        min_chunk_size: 5,
        preferred_chunks_per_worker: 2,
    };
    // 1000 inputs over max(10, 4*2) = 10 chunks -> 100 per chunk.
    assert_eq!(counted.chunk_size(1000, 4), 100);
    // The minimum chunk size bounds small inputs.
    assert_eq!(counted.chunk_size(20, 4), 5);
    // Degenerate sizes stay at least 1.
    assert_eq!(SchedulingPolicy::FixedChunkSize { size: 0 }.chunk_size(5, 1), 1);
}

#[test]
fn crashed_chunk_is_retried_once() {
    static FIRST: AtomicBool = AtomicBool::new(true);
    let inputs: Vec<u64> = (0..10).collect();
    let total = scheduler()
        .map_reduce(
            &SchedulingPolicy::FixedChunkSize { size: 100 },
            0_u64,
            &inputs,
            |acc, chunk| {
                if FIRST.swap(false, Ordering::SeqCst) {
                    panic!("transient worker failure");
                }
                acc + chunk.iter().sum::<u64>()
            },
            |a, b| a + b,
        )
        .expect("retry succeeds");
    assert_eq!(total, 45);
}

#[test]
fn double_crash_is_a_typed_failure() {
    let inputs: Vec<u64> = (0..10).collect();
    let attempts = AtomicUsize::new(0);
    let result = scheduler().map_reduce(
        &SchedulingPolicy::FixedChunkSize { size: 100 },
        0_u64,
        &inputs,
        |_, _| -> u64 {
            attempts.fetch_add(1, Ordering::SeqCst);
            panic!("persistent worker failure");
        },
        |a, b| a + b,
    );
    match result {
        Err(SchedulerError::WorkerCrash { payload }) => {
            assert!(payload.contains("persistent worker failure"));
        }
        other => panic!("expected worker crash, got {other:?}"),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 2, "exactly one retry");
}

#[test]
fn cancellation_skips_pending_chunks() {
    let pool = scheduler();
    let token = pool.cancellation_token();
    token.cancel();

    let inputs: Vec<u64> = (0..100).collect();
    let result = pool.map_reduce(
        &SchedulingPolicy::FixedChunkSize { size: 1 },
        0_u64,
        &inputs,
        |acc, chunk| acc + chunk.iter().sum::<u64>(),
        |a, b| a + b,
    );
    assert!(matches!(result, Err(SchedulerError::Cancelled)));
}
