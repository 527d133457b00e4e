//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between signals, deriveds and effects.
//!
//! # Overview
//!
//! The graph lives in a generation-checked arena, one per runtime:
//!
//! - Nodes represent reactive values (signals) or computations (deriveds, effects)
//! - Edges represent dependencies: if A reads B, B lists A as a subscriber
//!   and A lists B, together with the version of B it observed
//! - Effects additionally form an ownership tree through `parent`/`children`
//!
//! When a signal changes, we traverse the subscriber edges to find all
//! affected nodes and mark them as dirty. Deriveds are then pulled lazily.
//!
//! # Design Decisions
//!
//! 1. We use a centralized arena rather than reference-counted nodes because:
//!    - Parent/child and dependency cycles need no `Weak` bookkeeping
//!    - Stale handles are detected by generation instead of dangling
//!    - Removal can clear both edge directions in one place
//!
//! 2. Dependency and subscriber sets are insertion-ordered (`indexmap`), so
//!    notification order follows subscription order.
//!
//! 3. We maintain both forward (dependencies) and reverse (subscribers) edges
//!    to enable efficient traversal in both directions.

mod arena;
mod node;

pub use arena::Graph;
pub use node::{EffectFlags, Node, NodeId, NodeKind, RuntimeId, Status, Teardown};
pub(crate) use node::{EffectFn, ErasedCompute, ErasedEquals, ErasedValue};
