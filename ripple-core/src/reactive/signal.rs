//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (derived/effect), the
//!    read is recorded in the current frame together with the signal's version.
//!
//! 2. When the frame closes, the graph subscribes the reaction to the signal.
//!
//! 3. When the signal's value changes, subscribers are marked dirty and any
//!    affected effects are queued for the next flush.
//!
//! Writing a value equal to the current one (per the signal's equality) is a
//! no-op: no version bump, no notification.
//!
//! # Handles
//!
//! `Signal<T>` is a `Copy` handle into the runtime's arena. The value itself
//! lives in the graph; reads return clones.

use std::fmt;
use std::marker::PhantomData;

use super::equality::{self, default_equals, never_equals};
use super::runtime::Runtime;
use crate::error::Result;
use crate::graph::{Node, NodeId};

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{Runtime, Signal};
///
/// let rt = Runtime::new();
/// let _guard = rt.enter();
///
/// let count = Signal::new(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T: 'static> {
    id: NodeId,
    marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Signal<T> {
    /// Create a new signal in the current runtime, compared with `PartialEq`.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Runtime::current().create_signal(value)
    }

    /// Create a new signal with a custom equality function.
    pub fn with_equals(value: T, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Runtime::current().create_signal_with(value, equals)
    }

    /// Create a signal for which every write counts as a change.
    pub fn mutable(value: T) -> Self {
        Runtime::current().create_signal_with(value, never_equals::<T>)
    }

    pub(crate) fn from_id(id: NodeId) -> Self {
        Self {
            id,
            marker: PhantomData,
        }
    }

    /// Get the signal's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The runtime this signal lives in.
    pub fn runtime(&self) -> Result<Runtime> {
        Runtime::of(self.id)
    }

    /// Get the current value, tracking the dependency.
    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.runtime()?.read(self.id)
    }

    /// Get the current value, tracking the dependency.
    ///
    /// # Panics
    ///
    /// Panics with a [`ReactiveError`](crate::error::ReactiveError) payload if the signal was disposed.
    #[track_caller]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.try_get().unwrap_or_else(|err| err.raise())
    }

    /// Get the current value without tracking.
    pub fn try_get_untracked(&self) -> Result<T>
    where
        T: Clone,
    {
        let rt = self.runtime()?;
        rt.untrack(|| rt.read(self.id))
    }

    #[track_caller]
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.try_get_untracked().unwrap_or_else(|err| err.raise())
    }

    /// Set a new value.
    ///
    /// Fails with `UnsafeMutation` while a derived is computing.
    pub fn try_set(&self, value: T) -> Result<()> {
        self.runtime_for_write()?
            .map_or(Ok(false), |rt| rt.write(self.id, Box::new(value), false))
            .map(|_| ())
    }

    #[track_caller]
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            err.raise()
        }
    }

    /// Compute a new value from the current one and return it.
    ///
    /// The read is untracked.
    pub fn try_update(&self, f: impl FnOnce(&T) -> T) -> Result<T>
    where
        T: Clone,
    {
        let next = f(&self.try_get_untracked()?);
        self.try_set(next.clone())?;
        Ok(next)
    }

    #[track_caller]
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> T
    where
        T: Clone,
    {
        self.try_update(f).unwrap_or_else(|err| err.raise())
    }

    /// Set a new value and return the previous one.
    #[track_caller]
    pub fn replace(&self, value: T) -> T
    where
        T: Clone,
    {
        let previous = self.get_untracked();
        self.set(value);
        previous
    }

    /// Modify the value in place. Always notifies subscribers.
    pub fn try_mutate(&self, f: impl FnOnce(&mut T)) -> Result<()>
    where
        T: Clone,
    {
        let mut value = self.try_get_untracked()?;
        f(&mut value);
        self.runtime()?.write(self.id, Box::new(value), true).map(|_| ())
    }

    #[track_caller]
    pub fn mutate(&self, f: impl FnOnce(&mut T))
    where
        T: Clone,
    {
        if let Err(err) = self.try_mutate(f) {
            err.raise()
        }
    }

    /// Remove the signal from its runtime. Idempotent.
    pub fn dispose(&self) {
        if let Ok(rt) = self.runtime() {
            rt.destroy_node(self.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.runtime().map_or(true, |rt| !rt.is_live_node(self.id))
    }

    /// Number of accepted writes so far, `None` once disposed.
    pub fn version(&self) -> Option<u64> {
        let rt = self.runtime().ok()?;
        let version = rt.graph().get(self.id).map(Node::version);
        version
    }

    /// Number of reactions currently subscribed.
    pub fn subscriber_count(&self) -> usize {
        let Ok(rt) = self.runtime() else {
            return 0;
        };
        let count = rt.graph().get(self.id).map_or(0, |node| node.subscribers().len());
        count
    }

    /// A write into a dropped runtime is treated like a write to a disposed node.
    fn runtime_for_write(&self) -> Result<Option<Runtime>> {
        match self.runtime() {
            Ok(rt) => Ok(Some(rt)),
            Err(_) if !Runtime::current().config().strict_disposed_writes => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> Copy for Signal<T> {}

impl<T: 'static> PartialEq for Signal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: 'static> Eq for Signal<T> {}

impl<T: 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal").field("id", &self.id).finish()
    }
}

impl Runtime {
    /// Create a signal in this runtime, compared with `PartialEq`.
    pub fn create_signal<T: PartialEq + 'static>(&self, value: T) -> Signal<T> {
        self.create_signal_with(value, default_equals::<T>)
    }

    /// Create a signal in this runtime with a custom equality function.
    ///
    /// A signal created while an effect runs is owned by that effect and is
    /// disposed with it.
    pub fn create_signal_with<T: 'static>(
        &self,
        value: T,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Signal<T> {
        let node = Node::source(Box::new(value), equality::erase(equals));
        Signal::from_id(self.insert_node(node, true))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
