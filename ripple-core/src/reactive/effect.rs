//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, a plain effect is queued and runs on the next flush.
//!    Render, pre, block, branch and root effects run immediately instead.
//!
//! 2. When any dependency changes, the effect is queued to re-run.
//!
//! 3. Before re-running, the effect calls its previous teardown and destroys
//!    the nodes it created last time, then tracks new dependencies during
//!    execution.
//!
//! # Ownership
//!
//! Signals, deriveds and effects created while an effect runs are owned by
//! it. Destroying an effect destroys everything it owns first, innermost
//! first. Root and `UNOWNED` effects have no owner. A block effect keeps its
//! branch children across re-runs; it decides itself when to destroy or
//! pause them.
//!
//! # Cleanup
//!
//! Effects can optionally return a teardown. It is called before the effect
//! re-runs and when the effect is destroyed, never both for the same run.
//!
//! # Outros
//!
//! Pausing an effect makes its subtree inert: writes still mark it dirty but
//! nothing runs. The outro handlers registered on the paused effect (and on
//! descendants reached through branch or transparent effects) are started,
//! and the subtree is destroyed once all of them report completion. Resuming
//! before that cancels the destruction.

use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::{debug, trace};

use super::runtime::Runtime;
use crate::graph::{EffectFlags, Node, NodeId, NodeKind, Status, Teardown};

pub(crate) type OutroHandler = Rc<dyn Fn(OutroDone)>;

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use ripple_core::reactive::{Effect, Runtime, Signal};
///
/// let rt = Runtime::new();
/// let _guard = rt.enter();
///
/// let count = Signal::new(0);
/// let seen = Rc::new(Cell::new(-1));
/// let seen_clone = seen.clone();
///
/// let _effect = Effect::new(move || seen_clone.set(count.get()));
/// rt.flush();
/// assert_eq!(seen.get(), 0);
///
/// count.set(5);
/// rt.flush();
/// assert_eq!(seen.get(), 5);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Effect {
    id: NodeId,
}

impl Effect {
    /// Create a plain effect. It runs on the next flush.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::with_flags(EffectFlags::EFFECT, move || {
            f();
            None
        })
    }

    /// Create a plain effect whose body returns a teardown.
    pub fn with_cleanup<F>(f: F) -> Self
    where
        F: Fn() -> Teardown + 'static,
    {
        Self::with_flags(EffectFlags::EFFECT, move || Some(f()))
    }

    /// Create an effect of any kind in the current runtime.
    pub fn with_flags<F>(flags: EffectFlags, f: F) -> Self
    where
        F: Fn() -> Option<Teardown> + 'static,
    {
        Runtime::current().create_effect(flags, f)
    }

    /// An effect that runs immediately, on creation and then on each change.
    pub fn render<F>(f: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::eager(EffectFlags::RENDER_EFFECT, f)
    }

    pub fn pre<F>(f: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::eager(EffectFlags::PRE_EFFECT, f)
    }

    /// A control-flow effect. Branch effects it creates survive its re-runs.
    pub fn block<F>(f: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::eager(EffectFlags::BLOCK_EFFECT, f)
    }

    pub fn branch<F>(f: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::eager(EffectFlags::BRANCH_EFFECT, f)
    }

    /// A top-level effect with no owner.
    pub fn root<F>(f: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::eager(EffectFlags::ROOT_EFFECT, f)
    }

    fn eager<F>(flags: EffectFlags, f: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::with_flags(flags, move || {
            f();
            None
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    fn with_runtime<R>(&self, f: impl FnOnce(&Runtime) -> R) -> Option<R> {
        Runtime::of(self.id).ok().map(|rt| f(&rt))
    }

    fn inspect<R>(&self, f: impl FnOnce(&Node) -> R) -> Option<R> {
        self.with_runtime(|rt| rt.graph().get(self.id).map(f)).flatten()
    }

    /// Destroy the effect and everything it owns. Idempotent.
    pub fn destroy(&self) {
        self.with_runtime(|rt| rt.destroy_node(self.id));
    }

    /// Make the subtree inert and start its outros.
    pub fn pause(&self) {
        self.with_runtime(|rt| rt.pause_effect(self.id));
    }

    /// Undo a pause whose outros have not all finished.
    pub fn resume(&self) {
        self.with_runtime(|rt| rt.resume_effect(self.id));
    }

    /// Register an exit transition, started when this effect is paused.
    pub fn on_outro<F>(&self, handler: F)
    where
        F: Fn(OutroDone) + 'static,
    {
        self.with_runtime(|rt| {
            if let Some(node) = rt.graph_mut().get_mut(self.id) {
                node.outros.push(Rc::new(handler));
            }
        });
    }

    pub fn is_destroyed(&self) -> bool {
        self.inspect(|_| ()).is_none()
    }

    pub fn is_inert(&self) -> bool {
        self.inspect(|node| node.flags.contains(EffectFlags::INERT))
            .unwrap_or(false)
    }

    /// Get the number of times this effect has run.
    pub fn run_count(&self) -> u64 {
        self.inspect(Node::run_count).unwrap_or(0)
    }

    /// Get the number of dependencies recorded by the last run.
    pub fn dependency_count(&self) -> usize {
        self.inspect(|node| node.dependencies.len()).unwrap_or(0)
    }

    pub fn flags(&self) -> Option<EffectFlags> {
        self.inspect(Node::flags)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .finish()
    }
}

/// Completion token handed to an outro handler.
///
/// The outro counts as finished when the token is dropped or [`done`](Self::done)
/// is called. Tokens from a pause that was resumed are ignored.
pub struct OutroDone {
    runtime: Runtime,
    effect: NodeId,
    epoch: u64,
}

impl OutroDone {
    /// Report the outro as finished.
    pub fn done(self) {}

    /// The effect that was paused.
    pub fn effect(&self) -> NodeId {
        self.effect
    }
}

impl Drop for OutroDone {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.runtime.complete_outro(self.effect, self.epoch);
        }
    }
}

impl fmt::Debug for OutroDone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutroDone")
            .field("effect", &self.effect)
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl Runtime {
    /// Create an effect in this runtime.
    ///
    /// Without a kind bit in `flags` the effect is a plain, queued `EFFECT`.
    pub fn create_effect<F>(&self, flags: EffectFlags, f: F) -> Effect
    where
        F: Fn() -> Option<Teardown> + 'static,
    {
        let mut flags = flags
            & !(EffectFlags::DERIVED
                | EffectFlags::INERT
                | EffectFlags::DESTROYED
                | EffectFlags::EFFECT_RAN
                | EffectFlags::EVALUATING);
        if !flags.intersects(EffectFlags::EFFECT | EffectFlags::EAGER) {
            flags |= EffectFlags::EFFECT;
        }
        let owned = !flags.intersects(EffectFlags::ROOT_EFFECT | EffectFlags::UNOWNED);

        let id = self.insert_node(Node::effect(Rc::new(f), flags), owned);
        trace!(effect = %id, ?flags, "effect created");

        if flags.is_eager() {
            self.run_effect(id);
        } else {
            self.schedule_effect(id);
        }
        Effect { id }
    }

    /// Run an effect body, re-recording its dependencies.
    pub(crate) fn run_effect(&self, id: NodeId) {
        let (f, teardown, flags) = {
            let mut graph = self.graph_mut();
            let Some(node) = graph.get_mut(id) else {
                return;
            };
            if !node.flags.is_live() {
                return;
            }
            let Some(f) = node.effect.clone() else {
                return;
            };
            node.status = Status::Clean;
            node.run_count += 1;
            (f, node.teardown.take(), node.flags)
        };

        if let Some(teardown) = teardown {
            self.untrack(teardown);
        }
        self.destroy_children(id, flags.contains(EffectFlags::BLOCK_EFFECT));
        trace!(effect = %id, "running effect");

        let (teardown, frame) = {
            let _owner = self.inner.context.enter_owner(id);
            let frame = self.inner.context.enter(Some(id));
            let teardown = f();
            (teardown, frame.finish())
        };
        self.scheduler_mut().effect_runs += 1;

        // A write to something this run also read means the run saw stale state
        let self_invalidated = frame
            .writes
            .iter()
            .any(|write| frame.dependencies.contains_key(write));

        let orphaned = {
            let mut graph = self.graph_mut();
            graph.replace_dependencies(id, frame.dependencies);
            match graph.get_mut(id) {
                Some(node) if !node.flags.contains(EffectFlags::DESTROYED) => {
                    node.flags.insert(EffectFlags::EFFECT_RAN);
                    node.teardown = teardown;
                    if self_invalidated {
                        node.status = Status::Dirty;
                    }
                    None
                }
                _ => teardown,
            }
        };

        // Destroyed during its own run
        if let Some(teardown) = orphaned {
            self.untrack(teardown);
            return;
        }
        if self_invalidated {
            trace!(effect = %id, "effect invalidated itself");
            self.schedule_effect(id);
        }
    }

    fn destroy_children(&self, id: NodeId, keep_branches: bool) {
        let children: SmallVec<[NodeId; 8]> = {
            let graph = self.graph();
            let Some(node) = graph.get(id) else {
                return;
            };
            node.children
                .iter()
                .copied()
                .filter(|child| {
                    !keep_branches
                        || !graph
                            .get(*child)
                            .is_some_and(|c| c.flags.contains(EffectFlags::BRANCH_EFFECT))
                })
                .collect()
        };

        for child in children {
            self.destroy_node(child);
        }
    }

    /// Destroy a node and everything it owns, innermost first. Idempotent.
    pub(crate) fn destroy_node(&self, id: NodeId) {
        let order = {
            let graph = self.graph();
            if !graph.contains(id) {
                return;
            }
            graph.subtree_post_order(id)
        };

        for node_id in order {
            let teardown = {
                let mut graph = self.graph_mut();
                let Some(node) = graph.get_mut(node_id) else {
                    continue;
                };
                if node.flags.contains(EffectFlags::DESTROYED) {
                    continue;
                }
                node.flags.insert(EffectFlags::DESTROYED);
                node.teardown.take()
            };

            if let Some(teardown) = teardown {
                self.untrack(teardown);
            }

            let removed = self.graph_mut().remove(node_id);
            if let Some(node) = removed {
                debug!(node = %node_id, kind = ?node.kind(), "node destroyed");
            }
        }
    }

    pub(crate) fn pause_effect(&self, id: NodeId) {
        let (outros, epoch) = {
            let mut graph = self.graph_mut();
            let pausable = graph.get(id).is_some_and(|node| {
                node.kind() == NodeKind::Effect && !node.flags.contains(EffectFlags::INERT)
            });
            if !pausable {
                return;
            }

            let mut outros: Vec<OutroHandler> = Vec::new();
            let mut stack = vec![(id, true)];
            while let Some((node_id, local)) = stack.pop() {
                let Some(node) = graph.get_mut(node_id) else {
                    continue;
                };
                if node.kind() == NodeKind::Effect {
                    node.flags.insert(EffectFlags::INERT);
                }
                if local {
                    outros.extend(node.outros.iter().cloned());
                }
                let children = node.children.clone();
                for child in children.into_iter().rev() {
                    let transparent = graph.get(child).is_some_and(|c| {
                        c.flags
                            .intersects(EffectFlags::TRANSPARENT | EffectFlags::BRANCH_EFFECT)
                    });
                    stack.push((child, local && transparent));
                }
            }

            let Some(node) = graph.get_mut(id) else {
                return;
            };
            node.outro_epoch += 1;
            node.pending_outros = outros.len();
            (outros, node.outro_epoch)
        };

        debug!(effect = %id, outros = outros.len(), "effect paused");
        if outros.is_empty() {
            self.destroy_node(id);
            return;
        }
        for handler in outros {
            handler(OutroDone {
                runtime: self.clone(),
                effect: id,
                epoch,
            });
        }
    }

    pub(crate) fn resume_effect(&self, id: NodeId) {
        let dirty = {
            let mut graph = self.graph_mut();
            match graph.get_mut(id) {
                Some(node) if node.flags.contains(EffectFlags::INERT) => {
                    // Late tokens from the cancelled pause become no-ops
                    node.outro_epoch += 1;
                    node.pending_outros = 0;
                }
                _ => return,
            }

            let mut dirty = Vec::new();
            for node_id in graph.subtree_post_order(id).into_iter().rev() {
                if let Some(node) = graph.get_mut(node_id) {
                    if node.kind() == NodeKind::Effect {
                        node.flags.remove(EffectFlags::INERT);
                        if !node.is_clean() {
                            dirty.push(node_id);
                        }
                    }
                }
            }
            dirty
        };

        debug!(effect = %id, dirty = dirty.len(), "effect resumed");
        for effect in dirty {
            self.schedule_effect(effect);
        }
    }

    fn complete_outro(&self, id: NodeId, epoch: u64) {
        let finished = {
            let Ok(mut graph) = self.inner.graph.try_borrow_mut() else {
                return;
            };
            match graph.get_mut(id) {
                Some(node)
                    if node.outro_epoch == epoch
                        && node.flags.contains(EffectFlags::INERT)
                        && node.pending_outros > 0 =>
                {
                    node.pending_outros -= 1;
                    node.pending_outros == 0
                }
                _ => false,
            }
        };

        if finished {
            self.destroy_node(id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
