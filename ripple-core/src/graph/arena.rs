//! Node Arena
//!
//! The arena owns every node of one runtime and keeps the edges between them
//! reciprocal: `a` appears in `b.subscribers` exactly when `b` appears in
//! `a.dependencies`.
//!
//! # Algorithm
//!
//! Change propagation is push-then-pull:
//!
//! 1. When a source node changes, its direct subscribers become `Dirty`
//! 2. Subscribers of a dirty derived become `MaybeDirty`, recursively
//! 3. Every live effect reached this way is returned to the caller for scheduling
//!
//! No derived is recomputed here. Deriveds are pulled lazily on read, and a
//! `MaybeDirty` reaction re-checks its dependency versions before deciding to run.

use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::node::{EffectFlags, Node, NodeId, NodeKind, RuntimeId, Status};

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Generation-checked arena holding the dependency graph of one runtime.
pub struct Graph {
    runtime: RuntimeId,
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new(runtime: RuntimeId) -> Self {
        Self {
            runtime,
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Add a node to the graph, reusing a free slot when possible.
    pub fn insert(&mut self, node: Node) -> NodeId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId::new(self.runtime, index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId::new(self.runtime, index, 0)
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node and detaches it from its
    /// parent. The slot generation is bumped so `id` goes stale.
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.slot_mut(id)?;
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());
        self.len -= 1;

        // Remove this node from its dependencies' subscriber lists
        for dep_id in node.dependencies.keys() {
            if let Some(dep) = self.get_mut(*dep_id) {
                dep.subscribers.shift_remove(&id);
            }
        }

        // Remove this node from its subscribers' dependency lists
        for sub_id in &node.subscribers {
            if let Some(sub) = self.get_mut(*sub_id) {
                sub.dependencies.shift_remove(&id);
            }
        }

        if let Some(parent) = node.parent.and_then(|p| self.get_mut(p)) {
            parent.children.retain(|child| *child != id);
        }

        Some(node)
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut Slot> {
        if id.runtime() != self.runtime {
            return None;
        }
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
    }

    /// Get a reference to a node.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        if id.runtime() != self.runtime {
            return None;
        }
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_ref())
    }

    /// Get a mutable reference to a node.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slot_mut(id).and_then(|slot| slot.node.as_mut())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Iterate over live nodes in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.slots.iter().enumerate().filter_map(move |(index, slot)| {
            slot.node
                .as_ref()
                .map(|node| (NodeId::new(self.runtime, index as u32, slot.generation), node))
        })
    }

    /// Get the total number of live nodes in the graph.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Add a dependency edge: `dependent` read `dependency` at `version`.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId, version: u64) {
        if !self.contains(dependency) || !self.contains(dependent) {
            return;
        }
        if let Some(dep_node) = self.get_mut(dependency) {
            dep_node.subscribers.insert(dependent);
        }
        if let Some(dependent_node) = self.get_mut(dependent) {
            dependent_node.dependencies.insert(dependency, version);
        }
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.get_mut(dependency) {
            dep_node.subscribers.shift_remove(&dependent);
        }
        if let Some(dependent_node) = self.get_mut(dependent) {
            dependent_node.dependencies.shift_remove(&dependency);
        }
    }

    /// Install the dependency set recorded by the latest run of `reaction`.
    ///
    /// Edges that disappeared are unsubscribed, new ones are subscribed and
    /// surviving ones keep their place in the dependency's subscriber order.
    pub fn replace_dependencies(&mut self, reaction: NodeId, fresh: IndexMap<NodeId, u64>) {
        let stale: SmallVec<[NodeId; 8]> = match self.get(reaction) {
            Some(node) => node
                .dependencies
                .keys()
                .filter(|dep| !fresh.contains_key(*dep))
                .copied()
                .collect(),
            None => return,
        };
        for dep in stale {
            if let Some(dep_node) = self.get_mut(dep) {
                dep_node.subscribers.shift_remove(&reaction);
            }
        }

        let mut installed = IndexMap::with_capacity(fresh.len());
        for (dep, version) in fresh {
            if let Some(dep_node) = self.get_mut(dep) {
                dep_node.subscribers.insert(reaction);
                installed.insert(dep, version);
            }
        }
        if let Some(node) = self.get_mut(reaction) {
            node.dependencies = installed;
        }
    }

    /// Mark a source node as changed and propagate dirtiness.
    ///
    /// Returns the live effects that must be scheduled, in notification order.
    pub fn mark_changed(&mut self, source_id: NodeId) -> SmallVec<[NodeId; 8]> {
        let mut effects = SmallVec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back((source_id, Status::Dirty));

        // BFS: direct subscribers go Dirty, everything behind a derived goes MaybeDirty
        while let Some((node_id, incoming)) = queue.pop_front() {
            let subscribers: SmallVec<[NodeId; 8]> = match self.get(node_id) {
                Some(node) => node.subscribers.iter().copied().collect(),
                None => continue,
            };

            for sub_id in subscribers {
                let Some(sub) = self.get_mut(sub_id) else {
                    continue;
                };
                if sub.flags.contains(EffectFlags::DESTROYED) {
                    continue;
                }
                sub.status = sub.status.raise(incoming);
                if !visited.insert(sub_id) {
                    continue;
                }

                match sub.kind {
                    NodeKind::Derived => queue.push_back((sub_id, Status::MaybeDirty)),
                    NodeKind::Effect if sub.flags.is_live() => effects.push(sub_id),
                    _ => {}
                }
            }
        }

        effects
    }

    /// `root` and everything it owns, children before parents.
    pub fn subtree_post_order(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![(root, false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            let Some(node) = self.get(id) else {
                continue;
            };
            stack.push((id, true));
            for child in node.children.iter().rev() {
                stack.push((*child, false));
            }
        }

        order
    }

    /// Whether `node` is `ancestor` or sits somewhere below it.
    pub fn is_within(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.get(id).and_then(|n| n.parent);
        }
        false
    }
}
