//! Error Types
//!
//! Every fallible operation has a `try_*` form returning [`Result`]. The
//! plain forms (`get`, `set`, `flush`, ...) raise the same error as a panic
//! payload, which lets it travel through user closures and come back out as
//! an `Err` at the nearest `try_*` boundary.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

use crate::graph::NodeId;

/// Errors produced by the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A signal was written while a derived was being computed.
    #[error("unsafe write to signal {signal} while a derived is being computed")]
    UnsafeMutation { signal: NodeId },

    /// A derived read itself, directly or through other deriveds.
    #[error("derived {derived} depends on its own value")]
    CyclicDerivation { derived: NodeId },

    /// The node, or the runtime owning it, no longer exists.
    #[error("reactive node {node} has been disposed")]
    Disposed { node: NodeId },

    /// One effect re-ran more often than the configured limit in a single flush.
    #[error("maximum update depth exceeded: an effect ran more than {limit} times in a single flush")]
    MaxUpdateDepthExceeded { limit: usize },

    /// An effect body panicked during `try_flush`.
    #[error("effect panicked: {message}")]
    EffectBody { message: String },
}

/// Result alias used across the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

impl ReactiveError {
    /// Unwind with this error as the panic payload.
    #[track_caller]
    pub(crate) fn raise(self) -> ! {
        panic::panic_any(self)
    }

    /// Describe an arbitrary panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<ReactiveError>() {
            Ok(err) => *err,
            Err(payload) => {
                let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
                    (*s).to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "non-string panic payload".to_string()
                };
                ReactiveError::EffectBody { message }
            }
        }
    }
}

/// Run `f`, turning a `ReactiveError` unwinding out of it back into `Err`.
///
/// Panics carrying any other payload keep unwinding.
pub(crate) fn catch_reactive<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => match payload.downcast::<ReactiveError>() {
            Ok(err) => Err(*err),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}
