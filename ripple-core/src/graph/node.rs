//! Graph Nodes
//!
//! This module defines the records that live in the dependency graph arena.
//! Signals, deriveds and effects all share one `Node` layout; the `kind`
//! decides which of the erased payload slots are populated.

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use indexmap::{IndexMap, IndexSet};

use crate::reactive::effect::OutroHandler;

/// Identifier of one runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuntimeId(u32);

impl RuntimeId {
    /// Generate a new unique runtime ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rt{}", self.0)
    }
}

/// Generation-checked handle to a node in a runtime's arena.
///
/// Removing a node bumps its slot generation, so an old `NodeId` never
/// resolves to whatever node reuses the slot later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    runtime: RuntimeId,
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(runtime: RuntimeId, index: u32, generation: u32) -> Self {
        Self {
            runtime,
            index,
            generation,
        }
    }

    /// The runtime this node belongs to.
    pub fn runtime(&self) -> RuntimeId {
        self.runtime
    }

    /// Slot index inside the arena.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation at the time the node was inserted.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}v{}", self.runtime, self.index, self.generation)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A source node (signal). These are the roots of the graph.
    /// They have no dependencies, only subscribers.
    Source,

    /// A derived node. These have dependencies and may have subscribers.
    /// They cache their computed value.
    Derived,

    /// An effect node. These are leaves of the graph.
    /// They have dependencies but no subscribers (they produce side effects, not values).
    Effect,
}

/// Dirtiness of a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// The node's value is up-to-date.
    #[default]
    Clean,

    /// The node might need to recompute. One of its dependencies is a derived
    /// whose inputs changed, but we have not yet verified the derived's value.
    MaybeDirty,

    /// The node definitely needs to recompute. A direct dependency changed.
    Dirty,
}

impl Status {
    /// Combine an incoming notification with the current status.
    ///
    /// `Dirty` always wins; `MaybeDirty` only upgrades a clean node.
    pub fn raise(self, incoming: Status) -> Status {
        match (self, incoming) {
            (_, Status::Dirty) => Status::Dirty,
            (Status::Clean, Status::MaybeDirty) => Status::MaybeDirty,
            (current, _) => current,
        }
    }
}

bitflags! {
    /// Orthogonal bits describing a node's kind, modifiers and lifecycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EffectFlags: u32 {
        const DERIVED = 1 << 1;
        const EFFECT = 1 << 2;
        const PRE_EFFECT = 1 << 3;
        const RENDER_EFFECT = 1 << 4;
        const BLOCK_EFFECT = 1 << 5;
        const BRANCH_EFFECT = 1 << 6;
        const ROOT_EFFECT = 1 << 7;
        /// Not attached to the creating effect's ownership tree.
        const UNOWNED = 1 << 8;
        /// Outros below this effect are local and do not run when an ancestor pauses.
        const TRANSPARENT = 1 << 9;
        const INERT = 1 << 12;
        const DESTROYED = 1 << 13;
        const EFFECT_RAN = 1 << 15;
        /// Set while a derived's compute function is on the stack.
        const EVALUATING = 1 << 16;
    }
}

impl EffectFlags {
    /// Effect kinds that run synchronously while being created.
    pub const EAGER: Self = Self::RENDER_EFFECT
        .union(Self::PRE_EFFECT)
        .union(Self::BLOCK_EFFECT)
        .union(Self::BRANCH_EFFECT)
        .union(Self::ROOT_EFFECT);

    /// Whether an effect with these flags runs on creation instead of being queued.
    pub fn is_eager(&self) -> bool {
        self.intersects(Self::EAGER)
    }

    /// Whether the node takes part in scheduling right now.
    pub fn is_live(&self) -> bool {
        !self.intersects(Self::INERT | Self::DESTROYED)
    }
}

pub type Teardown = Box<dyn FnOnce()>;
pub(crate) type ErasedValue = Box<dyn Any>;
pub(crate) type ErasedEquals = Rc<dyn Fn(&dyn Any, &dyn Any) -> bool>;
pub(crate) type ErasedCompute = Rc<dyn Fn() -> ErasedValue>;
pub(crate) type EffectFn = Rc<dyn Fn() -> Option<Teardown>>;

/// A node in the dependency graph.
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) status: Status,
    pub(crate) flags: EffectFlags,
    pub(crate) version: u64,

    /// Current value for sources, memoized value for deriveds.
    pub(crate) value: Option<ErasedValue>,
    pub(crate) equals: Option<ErasedEquals>,
    pub(crate) compute: Option<ErasedCompute>,
    pub(crate) effect: Option<EffectFn>,
    pub(crate) teardown: Option<Teardown>,

    /// Nodes read during the last evaluation, with the version seen at read time.
    pub(crate) dependencies: IndexMap<NodeId, u64>,

    /// Reactions that read this node during their last run, in subscription order.
    pub(crate) subscribers: IndexSet<NodeId>,

    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,

    pub(crate) outros: Vec<OutroHandler>,
    pub(crate) outro_epoch: u64,
    pub(crate) pending_outros: usize,
    pub(crate) run_count: u64,
}

impl Node {
    fn new(kind: NodeKind, flags: EffectFlags) -> Self {
        Self {
            kind,
            status: match kind {
                NodeKind::Source => Status::Clean,
                NodeKind::Derived => Status::Dirty, // Start dirty to ensure first computation
                NodeKind::Effect => Status::Dirty,
            },
            flags,
            version: 0,
            value: None,
            equals: None,
            compute: None,
            effect: None,
            teardown: None,
            dependencies: IndexMap::new(),
            subscribers: IndexSet::new(),
            parent: None,
            children: Vec::new(),
            outros: Vec::new(),
            outro_epoch: 0,
            pending_outros: 0,
            run_count: 0,
        }
    }

    /// Create a source (signal) node holding `value`.
    pub(crate) fn source(value: ErasedValue, equals: ErasedEquals) -> Self {
        let mut node = Self::new(NodeKind::Source, EffectFlags::empty());
        node.value = Some(value);
        node.equals = Some(equals);
        node
    }

    /// Create a derived node. Nothing is computed until the first read.
    pub(crate) fn derived(compute: ErasedCompute, equals: ErasedEquals, flags: EffectFlags) -> Self {
        let mut node = Self::new(NodeKind::Derived, flags | EffectFlags::DERIVED);
        node.compute = Some(compute);
        node.equals = Some(equals);
        node
    }

    /// Create an effect node.
    pub(crate) fn effect(f: EffectFn, flags: EffectFlags) -> Self {
        let mut node = Self::new(NodeKind::Effect, flags);
        node.effect = Some(f);
        node
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Get the current dirtiness.
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn flags(&self) -> EffectFlags {
        self.flags
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Check if the node needs any processing.
    pub fn is_clean(&self) -> bool {
        self.status == Status::Clean
    }

    /// Mark the node as clean.
    pub fn mark_clean(&mut self) {
        self.status = Status::Clean;
    }

    /// Mark the node as maybe dirty (a dependency might have changed).
    pub fn mark_maybe_dirty(&mut self) {
        self.status = self.status.raise(Status::MaybeDirty);
    }

    /// Mark the node as definitely dirty (needs recomputation).
    pub fn mark_dirty(&mut self) {
        self.status = Status::Dirty;
    }

    /// Nodes this node read during its last evaluation.
    pub fn dependencies(&self) -> &IndexMap<NodeId, u64> {
        &self.dependencies
    }

    /// Reactions currently subscribed to this node.
    pub fn subscribers(&self) -> &IndexSet<NodeId> {
        &self.subscribers
    }

    /// The owning effect, if any.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Owned nodes, in creation order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// How many times the effect body has run.
    pub fn run_count(&self) -> u64 {
        self.run_count
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("flags", &self.flags)
            .field("version", &self.version)
            .field("dependencies", &self.dependencies.len())
            .field("subscribers", &self.subscribers.len())
            .field("parent", &self.parent)
            .field("children", &self.children.len())
            .finish()
    }
}
