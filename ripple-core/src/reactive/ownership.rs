//! Ownership diagnostics.
//!
//! A signal created inside an effect belongs to that effect. Writing it from
//! an effect outside the owner's subtree usually means state is leaking
//! between unrelated parts of the tree. It still works, but when
//! `ownership_warnings` is enabled the write is logged and counted.

use tracing::warn;

use super::runtime::Runtime;
use crate::graph::NodeId;

impl Runtime {
    pub(crate) fn check_ownership(&self, signal: NodeId) {
        if !self.inner.config.ownership_warnings {
            return;
        }
        let Some(writer) = self.inner.context.current_owner() else {
            return;
        };

        let owner = {
            let graph = self.graph();
            match graph.get(signal).and_then(|node| node.parent()) {
                Some(owner) if !graph.is_within(writer, owner) => owner,
                _ => return,
            }
        };

        let count = self.inner.ownership_warnings.get() + 1;
        self.inner.ownership_warnings.set(count);
        warn!(
            signal = %signal,
            owner = %owner,
            writer = %writer,
            "signal written by an effect outside its owner's subtree"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::reactive::{Effect, Runtime, Signal};

    fn owned_signal(rt: &Runtime) -> Signal<i32> {
        let slot: Rc<Cell<Option<Signal<i32>>>> = Rc::new(Cell::new(None));
        let slot_clone = slot.clone();
        let _guard = rt.enter();
        Effect::root(move || slot_clone.set(Some(Signal::new(0))));
        slot.get().unwrap()
    }

    #[test]
    fn write_from_unrelated_effect_is_counted() {
        let rt = Runtime::builder().ownership_warnings(true).build();
        let signal = owned_signal(&rt);

        let _guard = rt.enter();
        Effect::root(move || signal.set(1));

        assert_eq!(rt.stats().ownership_warnings, 1);
        assert_eq!(signal.get(), 1);
    }

    #[test]
    fn writes_outside_effects_and_from_owner_are_fine() {
        let rt = Runtime::builder().ownership_warnings(true).build();
        let _guard = rt.enter();

        let slot: Rc<Cell<Option<Signal<i32>>>> = Rc::new(Cell::new(None));
        let slot_clone = slot.clone();
        Effect::root(move || {
            let signal = Signal::new(0);
            slot_clone.set(Some(signal));
            Effect::render(move || signal.set(2));
        });
        slot.get().unwrap().set(3);

        assert_eq!(rt.stats().ownership_warnings, 0);
    }

    #[test]
    fn disabled_warnings_count_nothing() {
        let rt = Runtime::builder().ownership_warnings(false).build();
        let signal = owned_signal(&rt);

        let _guard = rt.enter();
        Effect::root(move || signal.set(1));

        assert_eq!(rt.stats().ownership_warnings, 0);
    }
}
