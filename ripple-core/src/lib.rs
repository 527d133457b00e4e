//! Ripple Core
//!
//! This crate provides the core runtime for the Ripple fine-grained
//! reactivity engine. It implements:
//!
//! - Reactive primitives (signals, deriveds, effects)
//! - Dependency tracking with push-pull change propagation
//! - An ownership tree of effects with teardowns, pause/resume and outros
//! - A microtask-batched scheduler with binding and render callbacks
//!
//! Compilers, DOM adapters and other hosts sit on top of this crate: they
//! create nodes, read and write them, and call `flush` when they need the
//! world to be consistent.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives, the runtime and the scheduler
//! - `graph`: Generation-checked node arena and dependency edges
//! - `error`: The `ReactiveError` type shared by every fallible operation
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use ripple_core::reactive::{Derived, Effect, Runtime, Signal};
//!
//! let rt = Runtime::new();
//! let _guard = rt.enter();
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let doubled = Derived::new(move || count.get() * 2);
//!
//! // Create an effect
//! let lines = Rc::new(RefCell::new(Vec::new()));
//! let sink = lines.clone();
//! Effect::new(move || {
//!     sink.borrow_mut().push(format!("Count: {}, Doubled: {}", count.get(), doubled.get()));
//! });
//!
//! // Update the signal, then let the scheduler run
//! rt.flush_sync(|| count.set(5));
//! assert_eq!(lines.borrow().last().unwrap(), "Count: 5, Doubled: 10");
//! ```

pub mod error;
pub mod graph;
pub mod reactive;

pub use error::{ReactiveError, Result};
pub use reactive::{
    add_binding_callback, add_render_callback, flush, flush_sync, try_flush, untrack, Callback,
    Derived, Effect, EffectFlags, Runtime, RuntimeConfig, Signal,
};
