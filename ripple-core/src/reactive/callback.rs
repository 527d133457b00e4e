//! Flush callbacks.
//!
//! Bindings and render hooks run after the effect queue drains. A
//! `Callback` carries an identity so one flush runs it at most once, even if
//! it is registered several times or re-registers itself.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

impl CallbackId {
    /// Generate a new unique callback ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CallbackId {
    fn default() -> Self {
        Self::new()
    }
}

/// A binding or render callback.
///
/// Clones share the same identity.
#[derive(Clone)]
pub struct Callback {
    id: CallbackId,
    f: Rc<dyn Fn()>,
}

impl Callback {
    /// Create a new callback with a fresh identity.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self {
            id: CallbackId::new(),
            f: Rc::new(f),
        }
    }

    /// Get the callback's unique ID.
    pub fn id(&self) -> CallbackId {
        self.id
    }

    /// Invoke the callback.
    pub fn call(&self) {
        (self.f)();
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn callback_ids_are_unique() {
        let id1 = CallbackId::new();
        let id2 = CallbackId::new();
        let id3 = CallbackId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn clones_share_identity() {
        let cb = Callback::new(|| {});
        assert_eq!(cb.clone().id(), cb.id());
        assert_ne!(Callback::new(|| {}).id(), cb.id());
    }

    #[test]
    fn call_invokes_closure() {
        let called = Rc::new(Cell::new(0));
        let called_clone = called.clone();

        let cb = Callback::new(move || called_clone.set(called_clone.get() + 1));

        assert_eq!(called.get(), 0);
        cb.call();
        cb.call();
        assert_eq!(called.get(), 2);
    }
}
