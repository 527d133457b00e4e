//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, deriveds, and effects.
//! These primitives form the foundation of Ripple's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a derived or effect), the read is
//! recorded as a dependency. When the signal's value changes, all
//! subscribers are marked dirty.
//!
//! ## Deriveds
//!
//! A Derived is a computed value that caches its result. It re-evaluates only
//! when one of its dependencies changed, and only when someone reads it.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its dependencies
//! change. Effects form an ownership tree: whatever an effect creates is
//! destroyed when it re-runs or is destroyed.
//!
//! ## Scheduling
//!
//! Writes queue effects; they never run them. The runtime's microtask host
//! triggers one flush after the current synchronous work, so several writes
//! in a row cause a single re-run. `flush_sync` forces the flush right away.
//!
//! # Implementation Notes
//!
//! Every runtime keeps its own stack of tracking frames. When a node is read,
//! we check whether the innermost frame belongs to a reaction and, if so,
//! record the dependency together with the version that was seen.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by Svelte 5, SolidJS, Vue 3, and Leptos.

mod callback;
mod config;
mod context;
mod derived;
pub(crate) mod effect;
pub mod equality;
mod microtask;
mod ownership;
mod runtime;
mod scheduler;
mod signal;

pub use callback::{Callback, CallbackId};
pub use config::{RuntimeBuilder, RuntimeConfig};
pub use context::ReactiveContext;
pub use derived::Derived;
pub use effect::{Effect, OutroDone};
pub use microtask::{ManualMicrotasks, Microtask, MicrotaskQueue, TokioMicrotasks};
pub use runtime::{Runtime, RuntimeGuard, RuntimeStats};
pub use signal::Signal;

pub use crate::graph::{EffectFlags, Teardown};

/// Run `f` in the current runtime without recording any reads.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().untrack(f)
}

/// Flush the current runtime.
#[track_caller]
pub fn flush() {
    Runtime::current().flush()
}

/// Flush the current runtime, returning failures as `Err`.
pub fn try_flush() -> crate::Result<()> {
    Runtime::current().try_flush()
}

/// Run `f`, then flush the current runtime immediately.
#[track_caller]
pub fn flush_sync<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().flush_sync(f)
}

/// Register a binding callback on the current runtime.
pub fn add_binding_callback(callback: Callback) {
    Runtime::current().add_binding_callback(callback)
}

/// Register a render callback on the current runtime.
pub fn add_render_callback(callback: Callback) {
    Runtime::current().add_render_callback(callback)
}
