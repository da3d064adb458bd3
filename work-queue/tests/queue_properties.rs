//! Property tests for ordering and the concurrency bound.

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use work_queue::{Completion, QueueConfig, WorkItem, WorkQueue};

#[derive(Debug, Clone)]
enum Op {
    Enqueue(Option<u8>),
    FinishOldest,
    FinishNewest,
    Pause,
    Resume,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => proptest::option::of(0u8..4).prop_map(Op::Enqueue),
        2 => Just(Op::FinishOldest),
        1 => Just(Op::FinishNewest),
        1 => Just(Op::Pause),
        1 => Just(Op::Resume),
    ]
}

struct Harness {
    queue: WorkQueue,
    held: Arc<Mutex<Vec<Completion>>>,
    ran: Arc<Mutex<Vec<u32>>>,
    max_seen: Arc<Mutex<usize>>,
}

impl Harness {
    fn new(concurrency: usize) -> Self {
        Self {
            queue: WorkQueue::new("prop", QueueConfig::new().with_concurrency(concurrency))
                .expect("valid config"),
            held: Arc::default(),
            ran: Arc::default(),
            max_seen: Arc::default(),
        }
    }

    fn item(&self, label: u32, id: Option<u8>) -> WorkItem {
        let held = self.held.clone();
        let ran = self.ran.clone();
        let max_seen = self.max_seen.clone();
        let run = move |queue: &WorkQueue, done: Completion| {
            let current = queue.current_len();
            let mut max = max_seen.lock();
            *max = (*max).max(current);
            drop(max);
            ran.lock().push(label);
            held.lock().push(done);
        };
        match id {
            Some(id) => WorkItem::with_id(format!("id-{id}"), run),
            None => WorkItem::new(run),
        }
    }

    fn finish_at(&self, newest: bool) {
        let done = {
            let mut held = self.held.lock();
            if held.is_empty() {
                return;
            }
            if newest {
                held.pop()
            } else {
                Some(held.remove(0))
            }
        };
        if let Some(done) = done {
            done.finish();
        }
    }
}

proptest! {
    #[test]
    fn prop_anonymous_items_run_in_enqueue_order(count in 1u32..40) {
        let harness = Harness::new(1);
        for label in 0..count {
            harness.queue.enqueue(harness.item(label, None));
        }
        for _ in 0..count {
            harness.finish_at(false);
        }
        let expected: Vec<u32> = (0..count).collect();
        prop_assert_eq!(harness.ran.lock().clone(), expected);
    }

    #[test]
    fn prop_current_never_exceeds_concurrency(
        concurrency in 1usize..5,
        ops in proptest::collection::vec(op_strategy(), 1..80),
    ) {
        let harness = Harness::new(concurrency);
        let mut label = 0u32;

        for op in ops {
            match op {
                Op::Enqueue(id) => {
                    harness.queue.enqueue(harness.item(label, id));
                    label += 1;
                }
                Op::FinishOldest => harness.finish_at(false),
                Op::FinishNewest => harness.finish_at(true),
                Op::Pause => harness.queue.pause(),
                Op::Resume => harness.queue.resume(),
            }
            prop_assert!(harness.queue.current_len() <= concurrency);
            prop_assert_eq!(harness.queue.current_len(), harness.held.lock().len());
        }

        prop_assert!(*harness.max_seen.lock() <= concurrency);

        // No item ever runs twice.
        let mut ran = harness.ran.lock().clone();
        let total = ran.len();
        ran.sort_unstable();
        ran.dedup();
        prop_assert_eq!(ran.len(), total);
    }

    #[test]
    fn prop_paused_queue_promotes_nothing(count in 1u32..20) {
        let harness = Harness::new(2);
        harness.queue.pause();
        for label in 0..count {
            harness.queue.enqueue(harness.item(label, None));
        }
        prop_assert!(harness.ran.lock().is_empty());

        harness.queue.resume();
        let expected = count.min(2) as usize;
        prop_assert_eq!(harness.ran.lock().len(), expected);
    }
}

#[test]
fn test_stuck_item_starves_serial_queue() {
    let harness = Harness::new(1);
    harness.queue.enqueue(harness.item(0, None));
    harness.queue.enqueue(harness.item(1, None));

    // Item 0 never finishes.
    assert_eq!(*harness.ran.lock(), vec![0]);
    assert_eq!(harness.queue.current_len(), 1);
    assert_eq!(harness.queue.pending_len(), 1);

    // Keep the completion alive so the drop warning does not fire mid-test.
    std::mem::forget(harness.held.lock().pop());
}
