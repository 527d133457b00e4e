//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, deriveds and
//! effects. It owns the dependency graph, the tracking stack and the
//! scheduler of one independent reactive world.
//!
//! # How It Works
//!
//! 1. When a signal, derived or effect is created, its node is inserted into
//!    the runtime's arena. If an effect is running, it becomes the owner.
//!
//! 2. When a derived or effect reads a node, the runtime records the
//!    dependency (and the version it saw) in the current frame.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Marks direct subscribers dirty and everything behind a derived maybe-dirty
//!    b. Queues every affected effect
//!    c. Asks the microtask host for a flush, once
//!    d. Deriveds are lazy - they recompute on next read
//!
//! # Threading
//!
//! A runtime is `!Send`. Every thread owns its own runtimes, and a
//! thread-local registry lets the `Copy` handles (`Signal`, `Derived`,
//! `Effect`) find the runtime their node lives in. Handles created without an
//! explicit runtime use [`Runtime::current`]: the innermost runtime entered
//! with [`Runtime::enter`], or a lazily created per-thread default.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use super::config::{RuntimeBuilder, RuntimeConfig};
use super::context::ReactiveContext;
use super::microtask::MicrotaskQueue;
use super::scheduler::Scheduler;
use crate::error::{ReactiveError, Result};
use crate::graph::{ErasedValue, Graph, Node, NodeId, NodeKind, RuntimeId, Status};

thread_local! {
    static REGISTRY: RefCell<HashMap<RuntimeId, Weak<RuntimeInner>>> = RefCell::new(HashMap::new());
    static CURRENT: RefCell<Vec<Runtime>> = const { RefCell::new(Vec::new()) };
    static DEFAULT: Runtime = Runtime::new();
}

pub(crate) struct RuntimeInner {
    pub(crate) id: RuntimeId,
    pub(crate) graph: RefCell<Graph>,
    pub(crate) context: ReactiveContext,
    pub(crate) scheduler: RefCell<Scheduler>,
    pub(crate) microtasks: Rc<dyn MicrotaskQueue>,
    pub(crate) config: RuntimeConfig,
    pub(crate) ownership_warnings: Cell<u64>,
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        let id = self.id;
        // The registry may already be gone during thread teardown.
        let _ = REGISTRY.try_with(|registry| {
            if let Ok(mut registry) = registry.try_borrow_mut() {
                registry.remove(&id);
            }
        });
    }
}

/// Handle to one reactive runtime. Clones share the same instance.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

/// Counters describing a runtime's current state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RuntimeStats {
    pub signals: usize,
    pub deriveds: usize,
    pub effects: usize,
    pub queued_effects: usize,
    pub flushes: u64,
    pub effect_runs: u64,
    pub ownership_warnings: u64,
}

/// Keeps a runtime current for the calling thread until dropped.
pub struct RuntimeGuard {
    id: RuntimeId,
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        let popped = CURRENT.with(|stack| stack.borrow_mut().pop());
        if !std::thread::panicking() {
            debug_assert_eq!(
                popped.map(|rt| rt.id()),
                Some(self.id),
                "runtime guards dropped out of order"
            );
        }
    }
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub(crate) fn from_parts(config: RuntimeConfig, microtasks: Rc<dyn MicrotaskQueue>) -> Self {
        let id = RuntimeId::next();
        let inner = Rc::new(RuntimeInner {
            id,
            graph: RefCell::new(Graph::new(id)),
            context: ReactiveContext::new(),
            scheduler: RefCell::new(Scheduler::new()),
            microtasks,
            config,
            ownership_warnings: Cell::new(0),
        });
        REGISTRY.with(|registry| {
            registry.borrow_mut().insert(id, Rc::downgrade(&inner));
        });
        debug!(runtime = %id, "runtime created");
        Self { inner }
    }

    /// The runtime new handles are created in on this thread.
    pub fn current() -> Runtime {
        CURRENT
            .with(|stack| stack.borrow().last().cloned())
            .unwrap_or_else(|| DEFAULT.with(Runtime::clone))
    }

    /// The runtime that owns `node`.
    pub fn of(node: NodeId) -> Result<Runtime> {
        REGISTRY
            .with(|registry| {
                registry
                    .borrow()
                    .get(&node.runtime())
                    .and_then(Weak::upgrade)
            })
            .map(|inner| Runtime { inner })
            .ok_or(ReactiveError::Disposed { node })
    }

    /// Make this runtime current until the guard drops.
    pub fn enter(&self) -> RuntimeGuard {
        CURRENT.with(|stack| stack.borrow_mut().push(self.clone()));
        RuntimeGuard { id: self.id() }
    }

    pub fn id(&self) -> RuntimeId {
        self.inner.id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn context(&self) -> &ReactiveContext {
        &self.inner.context
    }

    /// Inspect the graph. `f` must not call back into the runtime.
    pub fn with_graph<R>(&self, f: impl FnOnce(&Graph) -> R) -> R {
        f(&self.inner.graph.borrow())
    }

    pub(crate) fn graph(&self) -> Ref<'_, Graph> {
        self.inner.graph.borrow()
    }

    pub(crate) fn graph_mut(&self) -> RefMut<'_, Graph> {
        self.inner.graph.borrow_mut()
    }

    pub(crate) fn scheduler_mut(&self) -> RefMut<'_, Scheduler> {
        self.inner.scheduler.borrow_mut()
    }

    /// Run `f` without recording any reads.
    ///
    /// Writes inside `f` are allowed even while a derived is computing.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let _frame = self.inner.context.enter(None);
        f()
    }

    /// Run pending microtasks of a manually driven host. Returns how many ran.
    pub fn run_microtasks(&self) -> usize {
        self.inner.microtasks.drain()
    }

    pub fn stats(&self) -> RuntimeStats {
        let mut stats = RuntimeStats::default();
        for (_, node) in self.graph().iter() {
            match node.kind() {
                NodeKind::Source => stats.signals += 1,
                NodeKind::Derived => stats.deriveds += 1,
                NodeKind::Effect => stats.effects += 1,
            }
        }
        let scheduler = self.inner.scheduler.borrow();
        stats.queued_effects = scheduler.queued_len();
        stats.flushes = scheduler.flushes;
        stats.effect_runs = scheduler.effect_runs;
        stats.ownership_warnings = self.inner.ownership_warnings.get();
        stats
    }

    /// Insert `node`, attaching it to the running effect when `owned`.
    pub(crate) fn insert_node(&self, mut node: Node, owned: bool) -> NodeId {
        let parent = if owned {
            self.inner.context.current_owner()
        } else {
            None
        };
        node.parent = parent;

        let mut graph = self.graph_mut();
        let id = graph.insert(node);
        if let Some(parent) = parent.and_then(|p| graph.get_mut(p)) {
            parent.children.push(id);
        }
        id
    }

    pub(crate) fn kind_of(&self, id: NodeId) -> Result<NodeKind> {
        self.graph()
            .get(id)
            .map(Node::kind)
            .ok_or(ReactiveError::Disposed { node: id })
    }

    pub(crate) fn set_status(&self, id: NodeId, status: Status) {
        if let Some(node) = self.graph_mut().get_mut(id) {
            node.status = status;
        }
    }

    pub(crate) fn is_live_node(&self, id: NodeId) -> bool {
        self.graph().contains(id)
    }

    /// Read a signal or derived, recording the dependency.
    pub(crate) fn read<T: Clone + 'static>(&self, id: NodeId) -> Result<T> {
        if self.kind_of(id)? == NodeKind::Derived {
            self.update_derived(id)?;
        }

        let (value, version) = {
            let graph = self.graph();
            let node = graph.get(id).ok_or(ReactiveError::Disposed { node: id })?;
            let value = node
                .value
                .as_ref()
                .and_then(|value| value.downcast_ref::<T>())
                .cloned()
                .ok_or(ReactiveError::Disposed { node: id })?;
            (value, node.version)
        };

        self.inner.context.track_dependency(id, version);
        Ok(value)
    }

    /// Store a new signal value. Returns whether the write was accepted.
    ///
    /// `force` skips the equality check.
    pub(crate) fn write(&self, id: NodeId, value: ErasedValue, force: bool) -> Result<bool> {
        self.check_mutation(id)?;

        let accepted = {
            let mut graph = self.graph_mut();
            match graph.get_mut(id) {
                None => None,
                Some(node) => {
                    let unchanged = !force
                        && match (&node.equals, &node.value) {
                            (Some(equals), Some(current)) => equals(current.as_ref(), value.as_ref()),
                            _ => false,
                        };
                    if !unchanged {
                        node.value = Some(value);
                        node.version += 1;
                        trace!(signal = %id, version = node.version, "signal written");
                    }
                    Some(!unchanged)
                }
            }
        };
        match accepted {
            None => return self.disposed_write(id),
            Some(false) => return Ok(false),
            Some(true) => {}
        }

        self.check_ownership(id);
        self.inner.context.record_write(id);

        let effects = self.graph_mut().mark_changed(id);
        for effect in effects {
            self.schedule_effect(effect);
        }
        Ok(true)
    }

    /// Writes are rejected while the innermost frame belongs to a derived.
    fn check_mutation(&self, signal: NodeId) -> Result<()> {
        let Some(reaction) = self.inner.context.current_reaction() else {
            return Ok(());
        };
        let in_derived = self
            .graph()
            .get(reaction)
            .is_some_and(|node| node.kind() == NodeKind::Derived);
        if in_derived {
            Err(ReactiveError::UnsafeMutation { signal })
        } else {
            Ok(())
        }
    }

    fn disposed_write(&self, id: NodeId) -> Result<bool> {
        if self.inner.config.strict_disposed_writes {
            Err(ReactiveError::Disposed { node: id })
        } else {
            trace!(signal = %id, "write to disposed signal ignored");
            Ok(false)
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Runtime {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Runtime {}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.inner.id)
            .field("nodes", &self.graph().len())
            .finish()
    }
}
