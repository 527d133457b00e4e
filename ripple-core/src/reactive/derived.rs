//! Derived Implementation
//!
//! A Derived is a cached computed value that re-evaluates only when its
//! dependencies change.
//!
//! # How Deriveds Work
//!
//! 1. On first read, the derived runs its computation and caches the result.
//!
//! 2. When read again, if nothing upstream changed, the cached value is returned.
//!
//! 3. When a signal it reads changes, the derived is marked `Dirty`. When a
//!    derived it reads might have changed, it is marked `MaybeDirty`.
//!
//! 4. On next read, a `MaybeDirty` derived brings its derived dependencies up
//!    to date and compares their versions with the versions it saw last time.
//!
//! 5. If some version moved, recompute. Otherwise, mark clean and return the cache.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A signal changes
//! - 10 deriveds depend on it
//! - Only the deriveds actually read will recompute
//! - A derived whose input recomputed to an equal value never runs at all
//!
//! A recompute only bumps the derived's version when the new value differs
//! under its equality, so an unchanged result is absorbed right there.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use smallvec::SmallVec;

use super::equality::{self, default_equals};
use super::runtime::Runtime;
use crate::error::{catch_reactive, ReactiveError, Result};
use crate::graph::{EffectFlags, ErasedValue, Node, NodeId, NodeKind, Status};

/// A lazily computed, memoized value.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{Derived, Runtime, Signal};
///
/// let rt = Runtime::new();
/// let _guard = rt.enter();
///
/// let count = Signal::new(2);
/// let doubled = Derived::new(move || count.get() * 2);
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Derived<T: 'static> {
    id: NodeId,
    marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Derived<T> {
    /// Create a derived in the current runtime, compared with `PartialEq`.
    ///
    /// Nothing is computed until the first read.
    pub fn new(compute: impl Fn() -> T + 'static) -> Self
    where
        T: PartialEq,
    {
        Runtime::current().create_derived(compute)
    }

    /// Create a derived with a custom equality function.
    pub fn with_equals(
        compute: impl Fn() -> T + 'static,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        Runtime::current().create_derived_with(compute, equals, EffectFlags::empty())
    }

    /// Create a derived that is not owned by the running effect.
    pub fn unowned(compute: impl Fn() -> T + 'static) -> Self
    where
        T: PartialEq,
    {
        Runtime::current().create_derived_with(compute, default_equals::<T>, EffectFlags::UNOWNED)
    }

    pub(crate) fn from_id(id: NodeId) -> Self {
        Self {
            id,
            marker: PhantomData,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn runtime(&self) -> Result<Runtime> {
        Runtime::of(self.id)
    }

    /// Get the current value, recomputing if needed and tracking the dependency.
    ///
    /// Errors raised anywhere inside the computation (a cycle, a write to a
    /// signal, a disposed handle) are returned here.
    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        let rt = self.runtime()?;
        catch_reactive(|| rt.read(self.id))
    }

    #[track_caller]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.try_get().unwrap_or_else(|err| err.raise())
    }

    pub fn try_get_untracked(&self) -> Result<T>
    where
        T: Clone,
    {
        let rt = self.runtime()?;
        catch_reactive(|| rt.untrack(|| rt.read(self.id)))
    }

    #[track_caller]
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.try_get_untracked().unwrap_or_else(|err| err.raise())
    }

    /// Remove the derived from its runtime. Idempotent.
    pub fn dispose(&self) {
        if let Ok(rt) = self.runtime() {
            rt.destroy_node(self.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.runtime().map_or(true, |rt| !rt.is_live_node(self.id))
    }

    /// Number of value-changing recomputes so far, `None` once disposed.
    pub fn version(&self) -> Option<u64> {
        let rt = self.runtime().ok()?;
        let version = rt.graph().get(self.id).map(Node::version);
        version
    }

    /// Current dirtiness, `None` once disposed.
    pub fn status(&self) -> Option<Status> {
        let rt = self.runtime().ok()?;
        let status = rt.graph().get(self.id).map(Node::status);
        status
    }
}

impl<T: 'static> Clone for Derived<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> Copy for Derived<T> {}

impl<T: 'static> PartialEq for Derived<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: 'static> Eq for Derived<T> {}

impl<T: 'static> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived").field("id", &self.id).finish()
    }
}

/// Clears `EVALUATING` on every exit path, including unwinding.
struct EvaluatingGuard<'a> {
    runtime: &'a Runtime,
    id: NodeId,
}

impl Drop for EvaluatingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut graph) = self.runtime.inner.graph.try_borrow_mut() {
            if let Some(node) = graph.get_mut(self.id) {
                node.flags.remove(EffectFlags::EVALUATING);
            }
        }
    }
}

impl Runtime {
    /// Create a derived in this runtime, compared with `PartialEq`.
    pub fn create_derived<T: PartialEq + 'static>(
        &self,
        compute: impl Fn() -> T + 'static,
    ) -> Derived<T> {
        self.create_derived_with(compute, default_equals::<T>, EffectFlags::empty())
    }

    /// Create a derived with a custom equality function and flags.
    ///
    /// Only `UNOWNED` is meaningful in `flags`.
    pub fn create_derived_with<T: 'static>(
        &self,
        compute: impl Fn() -> T + 'static,
        equals: impl Fn(&T, &T) -> bool + 'static,
        flags: EffectFlags,
    ) -> Derived<T> {
        let compute = Rc::new(move || Box::new(compute()) as ErasedValue);
        let node = Node::derived(compute, equality::erase(equals), flags & EffectFlags::UNOWNED);
        let owned = !flags.contains(EffectFlags::UNOWNED);
        Derived::from_id(self.insert_node(node, owned))
    }

    /// Bring a derived up to date.
    pub(crate) fn update_derived(&self, id: NodeId) -> Result<()> {
        let (status, evaluating) = {
            let graph = self.graph();
            let node = graph.get(id).ok_or(ReactiveError::Disposed { node: id })?;
            (node.status, node.flags.contains(EffectFlags::EVALUATING))
        };

        if evaluating {
            return Err(ReactiveError::CyclicDerivation { derived: id });
        }

        match status {
            Status::Clean => Ok(()),
            Status::Dirty => self.recompute_derived(id),
            Status::MaybeDirty => {
                if self.dependencies_changed(id)? {
                    self.recompute_derived(id)
                } else {
                    self.set_status(id, Status::Clean);
                    Ok(())
                }
            }
        }
    }

    /// Whether any dependency of `reaction` moved past the version it last saw.
    ///
    /// Derived dependencies are brought up to date first, in read order.
    pub(crate) fn dependencies_changed(&self, reaction: NodeId) -> Result<bool> {
        let dependencies: SmallVec<[(NodeId, u64); 8]> = {
            let graph = self.graph();
            match graph.get(reaction) {
                Some(node) => node.dependencies.iter().map(|(id, v)| (*id, *v)).collect(),
                None => return Ok(false),
            }
        };

        for (dependency, seen) in dependencies {
            let kind = match self.kind_of(dependency) {
                Ok(kind) => kind,
                // A dependency that vanished counts as a change
                Err(_) => return Ok(true),
            };
            if kind == NodeKind::Derived {
                self.update_derived(dependency)?;
            }
            let current = self.graph().get(dependency).map(Node::version);
            if current != Some(seen) {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn recompute_derived(&self, id: NodeId) -> Result<()> {
        let compute = {
            let mut graph = self.graph_mut();
            let node = graph.get_mut(id).ok_or(ReactiveError::Disposed { node: id })?;
            node.flags.insert(EffectFlags::EVALUATING);
            node.compute.clone()
        };
        let _evaluating = EvaluatingGuard { runtime: self, id };
        let compute = compute.ok_or(ReactiveError::Disposed { node: id })?;

        let frame = self.inner.context.enter(Some(id));
        let value = compute();
        let frame = frame.finish();

        let mut graph = self.graph_mut();
        graph.replace_dependencies(id, frame.dependencies);
        if let Some(node) = graph.get_mut(id) {
            let changed = match (&node.value, &node.equals) {
                (Some(previous), Some(equals)) => !equals(previous.as_ref(), value.as_ref()),
                _ => true,
            };
            if changed {
                node.value = Some(value);
                node.version += 1;
            }
            node.status = Status::Clean;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
