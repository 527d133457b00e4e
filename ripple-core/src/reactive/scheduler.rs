//! Update Scheduler
//!
//! The scheduler decides when queued effects run. Writes never run effects
//! synchronously: the first effect queued after a quiet period asks the
//! microtask host for one flush, and every later write in the same
//! synchronous stretch just adds to the queue.
//!
//! # Algorithm
//!
//! A flush repeats until nothing is left:
//!
//! 1. Drain the effect queue in FIFO order. A `MaybeDirty` effect first
//!    checks whether any dependency version actually moved; a `Dirty` one
//!    just runs. Runs may queue more effects, which are drained in the same pass
//! 2. Run binding callbacks, most recently added first
//! 3. Run render callbacks, most recently added first
//! 4. If callbacks queued new effects, go back to 1
//!
//! A callback runs at most once per flush, however often it is registered.
//! A flush in which one effect re-runs more than `max_flush_iterations` times
//! stops with `MaxUpdateDepthExceeded` and drops the rest of the queue. How
//! many distinct effects a flush runs is not limited.
//!
//! If a flush unwinds with work still queued, a new flush is requested so the
//! leftover effects are not stranded.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug_span, trace, warn};

use super::callback::{Callback, CallbackId};
use super::runtime::Runtime;
use crate::error::{ReactiveError, Result};
use crate::graph::{NodeId, Status};

/// Per-runtime scheduling state.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    queue: VecDeque<NodeId>,
    queued: HashSet<NodeId>,
    binding_callbacks: Vec<Callback>,
    render_callbacks: Vec<Callback>,
    flush_scheduled: bool,
    flush_depth: usize,
    pub(crate) flushes: u64,
    pub(crate) effect_runs: u64,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue `effect` unless it is already waiting. Returns whether it was added.
    fn enqueue(&mut self, effect: NodeId) -> bool {
        if !self.queued.insert(effect) {
            return false;
        }
        self.queue.push_back(effect);
        true
    }

    fn pop(&mut self) -> Option<NodeId> {
        let effect = self.queue.pop_front()?;
        self.queued.remove(&effect);
        Some(effect)
    }

    fn clear_queue(&mut self) {
        self.queue.clear();
        self.queued.clear();
    }

    /// Claim the pending flush request. Returns true if a microtask is needed.
    fn request_flush(&mut self) -> bool {
        if self.flush_scheduled || self.flush_depth > 0 {
            return false;
        }
        self.flush_scheduled = true;
        true
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.queue.len()
    }

    fn has_pending_work(&self) -> bool {
        !self.queue.is_empty()
            || !self.binding_callbacks.is_empty()
            || !self.render_callbacks.is_empty()
    }
}

/// Resets the flushing state on every exit path, including unwinding.
struct FlushGuard<'a> {
    runtime: &'a Runtime,
}

impl<'a> FlushGuard<'a> {
    fn new(runtime: &'a Runtime) -> Self {
        runtime.scheduler_mut().flush_depth += 1;
        Self { runtime }
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        let stranded = match self.runtime.inner.scheduler.try_borrow_mut() {
            Ok(mut scheduler) => {
                scheduler.flush_depth -= 1;
                if scheduler.flush_depth > 0 {
                    return;
                }
                scheduler.flush_scheduled = false;
                // Non-empty only when the flush unwound or failed
                scheduler.has_pending_work() && scheduler.request_flush()
            }
            Err(_) => false,
        };

        if stranded {
            trace!("flush left work behind, requesting another");
            self.runtime.queue_flush_microtask();
        }
    }
}

impl Runtime {
    /// Queue an effect for the next flush.
    pub(crate) fn schedule_effect(&self, effect: NodeId) {
        let needs_microtask = {
            let mut scheduler = self.scheduler_mut();
            if scheduler.enqueue(effect) {
                trace!(effect = %effect, queued = scheduler.queued_len(), "effect queued");
            }
            scheduler.request_flush()
        };

        if needs_microtask {
            self.queue_flush_microtask();
        }
    }

    fn queue_flush_microtask(&self) {
        let runtime = Rc::downgrade(&self.inner);
        self.inner.microtasks.queue_microtask(Box::new(move || {
            let Some(inner) = runtime.upgrade() else {
                return;
            };
            let runtime = Runtime { inner };
            // A flush_sync may already have done the work
            let scheduled = runtime.inner.scheduler.borrow().flush_scheduled;
            if scheduled {
                runtime.flush();
            }
        }));
    }

    /// Run `callback` after the effect queue drains in the next flush.
    pub fn add_binding_callback(&self, callback: Callback) {
        self.scheduler_mut().binding_callbacks.push(callback);
        self.request_flush();
    }

    /// Run `callback` after binding callbacks in the next flush.
    pub fn add_render_callback(&self, callback: Callback) {
        self.scheduler_mut().render_callbacks.push(callback);
        self.request_flush();
    }

    fn request_flush(&self) {
        let needs_microtask = self.scheduler_mut().request_flush();
        if needs_microtask {
            self.queue_flush_microtask();
        }
    }

    /// Run every queued effect and callback until the runtime is stable.
    ///
    /// # Panics
    ///
    /// Panics if an effect body panics, or with a
    /// [`ReactiveError`] payload if the flush fails.
    #[track_caller]
    pub fn flush(&self) {
        if let Err(err) = self.flush_pending() {
            err.raise()
        }
    }

    /// Like [`flush`](Self::flush), but failures come back as `Err`.
    ///
    /// A panicking effect body becomes `ReactiveError::EffectBody`.
    pub fn try_flush(&self) -> Result<()> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.flush_pending())) {
            Ok(result) => result,
            Err(payload) => Err(ReactiveError::from_panic(payload)),
        }
    }

    /// Run `f`, then flush immediately.
    #[track_caller]
    pub fn flush_sync<R>(&self, f: impl FnOnce() -> R) -> R {
        let result = f();
        self.flush();
        result
    }

    fn flush_pending(&self) -> Result<()> {
        let _span = debug_span!("flush", runtime = %self.id()).entered();
        let _guard = FlushGuard::new(self);
        let limit = self.inner.config.max_flush_iterations;
        let mut seen: HashSet<CallbackId> = HashSet::new();
        let mut reruns: HashMap<NodeId, usize> = HashMap::new();
        let mut runs = 0usize;

        loop {
            loop {
                let next = self.scheduler_mut().pop();
                let Some(effect) = next else {
                    break;
                };
                if !self.update_effect(effect)? {
                    continue;
                }
                runs += 1;

                let count = reruns.entry(effect).or_insert(0);
                *count += 1;
                if *count > limit {
                    self.scheduler_mut().clear_queue();
                    warn!(
                        effect = %effect,
                        limit,
                        "maximum update depth exceeded, dropping queued effects"
                    );
                    return Err(ReactiveError::MaxUpdateDepthExceeded { limit });
                }
            }

            loop {
                let next = self.scheduler_mut().binding_callbacks.pop();
                let Some(callback) = next else {
                    break;
                };
                if seen.insert(callback.id()) {
                    callback.call();
                }
            }

            loop {
                let next = self.scheduler_mut().render_callbacks.pop();
                let Some(callback) = next else {
                    break;
                };
                if seen.insert(callback.id()) {
                    callback.call();
                }
            }

            if self.scheduler_mut().queue.is_empty() {
                break;
            }
        }

        self.scheduler_mut().flushes += 1;
        trace!(runs, "flush finished");
        Ok(())
    }

    /// Run a queued effect if it is still live and actually stale.
    ///
    /// Returns whether the effect ran.
    fn update_effect(&self, effect: NodeId) -> Result<bool> {
        let state = self
            .graph()
            .get(effect)
            .map(|node| (node.status(), node.flags().is_live()));
        let Some((status, live)) = state else {
            return Ok(false);
        };
        if !live {
            return Ok(false);
        }

        let stale = match status {
            Status::Clean => false,
            Status::Dirty => true,
            Status::MaybeDirty => self.dependencies_changed(effect)?,
        };
        if stale {
            self.run_effect(effect);
        } else {
            self.set_status(effect, Status::Clean);
        }
        Ok(stale)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::reactive::{Derived, Effect, ManualMicrotasks, Signal};

    fn counter() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let c = Rc::new(Cell::new(0));
        (c.clone(), c)
    }

    #[test]
    fn writes_coalesce_into_one_microtask() {
        let host = ManualMicrotasks::new();
        let rt = Runtime::builder().microtasks(host.clone()).build();
        let _guard = rt.enter();
        let (runs, runs_clone) = counter();

        let a = Signal::new(0);
        let b = Signal::new(0);
        Effect::new(move || {
            a.get();
            b.get();
            runs_clone.set(runs_clone.get() + 1);
        });
        assert_eq!(host.pending(), 1);
        rt.run_microtasks();
        assert_eq!(runs.get(), 1);

        a.set(1);
        b.set(1);
        a.set(2);
        assert_eq!(host.pending(), 1);
        assert_eq!(rt.run_microtasks(), 1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn effects_run_in_queue_order() {
        let rt = Runtime::new();
        let _guard = rt.enter();
        let order = Rc::new(RefCell::new(Vec::new()));
        let source = Signal::new(0);

        for name in ["e1", "e2", "e3"] {
            let order = order.clone();
            Effect::new(move || {
                source.get();
                order.borrow_mut().push(name);
            });
        }
        rt.flush();
        order.borrow_mut().clear();

        source.set(1);
        rt.flush();
        assert_eq!(*order.borrow(), vec!["e1", "e2", "e3"]);
    }

    #[test]
    fn maybe_dirty_effect_skips_when_derived_is_unchanged() {
        let rt = Runtime::new();
        let _guard = rt.enter();
        let (runs, runs_clone) = counter();

        let count = Signal::new(1);
        let positive = Derived::new(move || count.get() > 0);
        let effect = Effect::new(move || {
            positive.get();
            runs_clone.set(runs_clone.get() + 1);
        });
        rt.flush();

        count.set(2);
        rt.flush();
        assert_eq!(runs.get(), 1);
        assert_eq!(effect.run_count(), 1);

        count.set(-1);
        rt.flush();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn callbacks_run_lifo_after_effects_and_once_per_flush() {
        let rt = Runtime::new();
        let _guard = rt.enter();
        let order = Rc::new(RefCell::new(Vec::new()));

        let source = Signal::new(0);
        let effect_order = order.clone();
        Effect::new(move || {
            source.get();
            effect_order.borrow_mut().push("effect");
        });

        let push = |name: &'static str| {
            let order = order.clone();
            Callback::new(move || order.borrow_mut().push(name))
        };
        let render_a = push("render a");
        rt.add_render_callback(render_a.clone());
        rt.add_render_callback(push("render b"));
        rt.add_render_callback(render_a);
        rt.add_binding_callback(push("binding"));

        rt.flush();
        assert_eq!(
            *order.borrow(),
            vec!["effect", "binding", "render a", "render b"]
        );
    }

    #[test]
    fn self_registering_callback_does_not_loop() {
        let rt = Runtime::new();
        let (calls, calls_clone) = counter();

        let slot: Rc<RefCell<Option<Callback>>> = Rc::new(RefCell::new(None));
        let (slot_clone, rt_clone) = (slot.clone(), rt.clone());
        let callback = Callback::new(move || {
            calls_clone.set(calls_clone.get() + 1);
            if let Some(me) = slot_clone.borrow().clone() {
                rt_clone.add_render_callback(me);
            }
        });
        *slot.borrow_mut() = Some(callback.clone());

        rt.add_render_callback(callback);
        rt.flush();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn callbacks_that_queue_effects_are_drained() {
        let rt = Runtime::new();
        let _guard = rt.enter();
        let source = Signal::new(0);
        let seen = Rc::new(Cell::new(0));

        let seen_clone = seen.clone();
        Effect::new(move || seen_clone.set(source.get()));
        rt.flush();

        rt.add_binding_callback(Callback::new(move || source.set(9)));
        rt.flush();
        assert_eq!(seen.get(), 9);
    }

    #[test]
    fn flush_sync_runs_before_microtask_and_microtask_is_a_noop() {
        let host = ManualMicrotasks::new();
        let rt = Runtime::builder().microtasks(host.clone()).build();
        let _guard = rt.enter();
        let (runs, runs_clone) = counter();
        let source = Signal::new(0);

        Effect::new(move || {
            source.get();
            runs_clone.set(runs_clone.get() + 1);
        });
        host.run_all();
        assert_eq!(runs.get(), 1);

        rt.flush_sync(|| source.set(1));
        assert_eq!(runs.get(), 2);
        assert_eq!(host.pending(), 1);

        host.run_all();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn self_invalidating_effect_settles() {
        let rt = Runtime::new();
        let _guard = rt.enter();
        let count = Signal::new(0);

        let effect = Effect::new(move || {
            let value = count.get();
            if value < 5 {
                count.set(value + 1);
            }
        });
        rt.flush();

        assert_eq!(count.get(), 5);
        assert_eq!(effect.run_count(), 6);
    }

    #[test]
    fn runaway_effect_hits_the_limit() {
        let rt = Runtime::builder().max_flush_iterations(50).build();
        let _guard = rt.enter();
        let count = Signal::new(0);

        Effect::new(move || {
            count.set(count.get() + 1);
        });

        assert_eq!(
            rt.try_flush(),
            Err(ReactiveError::MaxUpdateDepthExceeded { limit: 50 })
        );
        assert_eq!(rt.stats().queued_effects, 0);
    }

    #[test]
    fn wide_fanout_beyond_the_limit_drains() {
        let rt = Runtime::builder().max_flush_iterations(10).build();
        let _guard = rt.enter();
        let (runs, runs_clone) = counter();
        let source = Signal::new(0);

        for _ in 0..25 {
            let runs = runs_clone.clone();
            Effect::new(move || {
                source.get();
                runs.set(runs.get() + 1);
            });
        }
        assert_eq!(rt.try_flush(), Ok(()));
        assert_eq!(runs.get(), 25);

        source.set(1);
        assert_eq!(rt.try_flush(), Ok(()));
        assert_eq!(runs.get(), 50);
        assert_eq!(rt.stats().queued_effects, 0);
    }

    #[test]
    fn effects_behind_a_panic_run_on_the_next_microtask() {
        let host = ManualMicrotasks::new();
        let rt = Runtime::builder().microtasks(host.clone()).build();
        let _guard = rt.enter();
        let bomb = Signal::new(0);
        let mirrored = Signal::new(0);
        let seen = Rc::new(Cell::new(0));

        Effect::new(move || {
            if bomb.get() == 1 {
                panic!("boom");
            }
        });
        let seen_clone = seen.clone();
        Effect::new(move || seen_clone.set(mirrored.get()));
        rt.run_microtasks();

        bomb.set(1);
        mirrored.set(1);
        assert_eq!(
            rt.try_flush(),
            Err(ReactiveError::EffectBody {
                message: "boom".into()
            })
        );
        assert_eq!(rt.stats().queued_effects, 1);

        mirrored.set(2);
        rt.run_microtasks();
        assert_eq!(seen.get(), 2);
        assert_eq!(rt.stats().queued_effects, 0);
    }

    #[test]
    fn panicking_effect_is_reported_by_try_flush() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        Effect::new(|| panic!("effect exploded"));

        let err = rt.try_flush().unwrap_err();
        assert_eq!(
            err,
            ReactiveError::EffectBody {
                message: "effect exploded".into()
            }
        );
        // The flushing state was reset by the guard
        let (runs, runs_clone) = counter();
        Effect::new(move || runs_clone.set(runs_clone.get() + 1));
        rt.flush();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn destroyed_effect_in_queue_is_skipped() {
        let rt = Runtime::new();
        let _guard = rt.enter();
        let (runs, runs_clone) = counter();

        let effect = Effect::new(move || runs_clone.set(runs_clone.get() + 1));
        effect.destroy();
        rt.flush();

        assert_eq!(runs.get(), 0);
    }
}
