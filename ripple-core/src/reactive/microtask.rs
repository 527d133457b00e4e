//! Microtask hosts.
//!
//! The scheduler never flushes synchronously on write. It asks its host to
//! run a task "soon", after the current synchronous work completes, so that
//! every write made in one callback coalesces into one flush.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// A deferred unit of work.
pub type Microtask = Box<dyn FnOnce()>;

/// Something that can run a task after the current synchronous work.
pub trait MicrotaskQueue {
    /// Queue `task` to run later, in FIFO order with other tasks.
    fn queue_microtask(&self, task: Microtask);

    /// Run pending tasks now, if the host supports that. Returns how many ran.
    fn drain(&self) -> usize {
        0
    }
}

/// An in-process FIFO drained explicitly by the host.
#[derive(Clone, Default)]
pub struct ManualMicrotasks {
    tasks: Rc<RefCell<VecDeque<Microtask>>>,
}

impl ManualMicrotasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Run tasks until the queue is empty, including tasks queued meanwhile.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.tasks.borrow_mut().pop_front();
            let Some(task) = next else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }
}

impl MicrotaskQueue for ManualMicrotasks {
    fn queue_microtask(&self, task: Microtask) {
        self.tasks.borrow_mut().push_back(task);
    }

    fn drain(&self) -> usize {
        self.run_all()
    }
}

impl fmt::Debug for ManualMicrotasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualMicrotasks")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Runs each task as a local tokio task.
///
/// Must be used from inside a `tokio::task::LocalSet`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioMicrotasks;

impl MicrotaskQueue for TokioMicrotasks {
    fn queue_microtask(&self, task: Microtask) {
        tokio::task::spawn_local(async move { task() });
    }
}
