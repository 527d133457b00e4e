//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! we can register it as a dependency of the current computation.
//!
//! # Implementation
//!
//! Each runtime owns a stack of frames. When entering a reactive context
//! (running a derived or an effect), we push a frame naming that reaction.
//! When the computation completes, the frame is popped and its collected
//! dependencies are handed to the graph.
//!
//! `untrack` pushes a frame with no reaction: reads inside it record nothing,
//! and writes inside it are not attributed to an enclosing derived.
//!
//! A second stack records the effect that owns newly created nodes.

use std::cell::RefCell;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::graph::NodeId;

/// An entry in the reactive context stack.
#[derive(Debug, Default)]
pub(crate) struct Frame {
    /// The reaction being evaluated, `None` for untracked scopes.
    pub(crate) reaction: Option<NodeId>,
    /// Nodes read during this evaluation, with the version observed.
    pub(crate) dependencies: IndexMap<NodeId, u64>,
    /// Signals written during this evaluation.
    pub(crate) writes: SmallVec<[NodeId; 4]>,
}

/// Per-runtime tracking state.
#[derive(Debug, Default)]
pub struct ReactiveContext {
    frames: RefCell<Vec<Frame>>,
    owners: RefCell<Vec<NodeId>>,
}

impl ReactiveContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enter a new frame for `reaction`.
    ///
    /// The frame is popped when the returned guard is dropped, including
    /// while unwinding.
    pub(crate) fn enter(&self, reaction: Option<NodeId>) -> ContextGuard<'_> {
        let mut frames = self.frames.borrow_mut();
        frames.push(Frame {
            reaction,
            ..Frame::default()
        });
        ContextGuard {
            context: self,
            reaction,
            depth: frames.len(),
            popped: false,
        }
    }

    /// Check if reads are currently being recorded.
    pub fn is_tracking(&self) -> bool {
        self.current_reaction().is_some()
    }

    /// The reaction of the innermost frame, if that frame tracks.
    pub fn current_reaction(&self) -> Option<NodeId> {
        self.frames.borrow().last().and_then(|frame| frame.reaction)
    }

    /// Number of frames on the stack.
    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Record a read of `node` at `version`.
    ///
    /// Repeated reads inside one evaluation keep the first position.
    pub(crate) fn track_dependency(&self, node: NodeId, version: u64) {
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            if frame.reaction.is_some() && frame.reaction != Some(node) {
                frame.dependencies.insert(node, version);
            }
        }
    }

    /// Record a write in the innermost tracking frame.
    pub(crate) fn record_write(&self, node: NodeId) {
        let mut frames = self.frames.borrow_mut();
        if let Some(frame) = frames.iter_mut().rev().find(|f| f.reaction.is_some()) {
            if !frame.writes.contains(&node) {
                frame.writes.push(node);
            }
        }
    }

    /// Make `effect` the owner of nodes created until the guard drops.
    pub(crate) fn enter_owner(&self, effect: NodeId) -> OwnerGuard<'_> {
        self.owners.borrow_mut().push(effect);
        OwnerGuard {
            context: self,
            effect,
        }
    }

    /// The effect currently running, which owns newly created nodes.
    pub fn current_owner(&self) -> Option<NodeId> {
        self.owners.borrow().last().copied()
    }
}

/// Guard that pops a frame when dropped.
///
/// This ensures the context stack is properly maintained even if
/// the computation panics.
pub(crate) struct ContextGuard<'a> {
    context: &'a ReactiveContext,
    reaction: Option<NodeId>,
    depth: usize,
    popped: bool,
}

impl ContextGuard<'_> {
    /// Pop the frame and return what it collected.
    pub(crate) fn finish(mut self) -> Frame {
        self.pop()
    }

    fn pop(&mut self) -> Frame {
        self.popped = true;
        let mut frames = self.context.frames.borrow_mut();
        let frame = frames.pop().unwrap_or_default();

        // Verify we're popping the right frame.
        if !std::thread::panicking() {
            debug_assert_eq!(
                frames.len() + 1,
                self.depth,
                "ReactiveContext mismatch: frame depth"
            );
            debug_assert_eq!(
                frame.reaction, self.reaction,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.reaction, frame.reaction
            );
        }
        frame
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if !self.popped {
            self.pop();
        }
    }
}

pub(crate) struct OwnerGuard<'a> {
    context: &'a ReactiveContext,
    effect: NodeId,
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        let popped = self.context.owners.borrow_mut().pop();
        if !std::thread::panicking() {
            debug_assert_eq!(popped, Some(self.effect), "owner stack mismatch");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
