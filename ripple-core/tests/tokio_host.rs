//! Tokio Microtask Host Tests
//!
//! The runtime flushes from a local tokio task after the current synchronous
//! work, so these tests run inside a `LocalSet` and yield to let it happen.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ripple_core::reactive::{Effect, Runtime, Signal, TokioMicrotasks};
use tokio::task::LocalSet;

/// Let every local task queued so far run.
async fn settle() {
    tokio::task::spawn_local(async {})
        .await
        .expect("local task panicked");
}

/// Test that writes made in one synchronous stretch cause a single flush.
#[tokio::test]
async fn writes_flush_once_after_yield() {
    LocalSet::new()
        .run_until(async {
            let rt = Runtime::builder().microtasks(TokioMicrotasks).build();
            let _guard = rt.enter();
            let count = Signal::new(0);
            let seen = Rc::new(RefCell::new(Vec::new()));

            let seen_clone = seen.clone();
            Effect::new(move || seen_clone.borrow_mut().push(count.get()));
            settle().await;
            assert_eq!(*seen.borrow(), vec![0]);

            count.set(1);
            count.set(2);
            count.set(3);
            assert_eq!(*seen.borrow(), vec![0]);

            settle().await;
            assert_eq!(*seen.borrow(), vec![0, 3]);
            assert_eq!(rt.stats().flushes, 2);
        })
        .await;
}

/// Test that a forced flush leaves nothing for the scheduled task to do.
#[tokio::test]
async fn flush_sync_preempts_the_scheduled_task() {
    LocalSet::new()
        .run_until(async {
            let rt = Runtime::builder().microtasks(TokioMicrotasks).build();
            let _guard = rt.enter();
            let count = Signal::new(0);
            let runs = Rc::new(Cell::new(0));

            let runs_clone = runs.clone();
            Effect::render(move || {
                count.get();
                runs_clone.set(runs_clone.get() + 1);
            });

            rt.flush_sync(|| count.set(1));
            assert_eq!(runs.get(), 2);

            settle().await;
            assert_eq!(runs.get(), 2);
        })
        .await;
}

/// Test that a runtime dropped before its task runs is not resurrected.
#[tokio::test]
async fn dropped_runtime_task_is_a_noop() {
    LocalSet::new()
        .run_until(async {
            let runs = Rc::new(Cell::new(0));
            {
                let rt = Runtime::builder().microtasks(TokioMicrotasks).build();
                let _guard = rt.enter();
                let runs_clone = runs.clone();
                Effect::new(move || runs_clone.set(runs_clone.get() + 1));
            }

            settle().await;
            assert_eq!(runs.get(), 0);
        })
        .await;
}
