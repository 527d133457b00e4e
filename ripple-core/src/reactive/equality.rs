//! Equality modes for signals and deriveds.

use std::any::Any;
use std::rc::Rc;

use crate::graph::ErasedEquals;

/// Default comparison: `PartialEq`.
pub fn default_equals<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

/// Every write counts as a change. Used by `Signal::mutable`.
pub fn never_equals<T>(_: &T, _: &T) -> bool {
    false
}

/// Erase a typed comparator so the graph can store it.
pub(crate) fn erase<T, F>(equals: F) -> ErasedEquals
where
    T: 'static,
    F: Fn(&T, &T) -> bool + 'static,
{
    Rc::new(move |a: &dyn Any, b: &dyn Any| {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => equals(a, b),
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erased_comparator_downcasts() {
        let eq = erase(default_equals::<i32>);
        let (one, two, byte): (&dyn Any, &dyn Any, &dyn Any) = (&1_i32, &2_i32, &1_u8);
        assert!(eq(one, one));
        assert!(!eq(one, two));
        // Mismatched types never compare equal
        assert!(!eq(one, byte));
    }

    #[test]
    fn never_equals_reports_change() {
        let eq = erase(never_equals::<i32>);
        let one: &dyn Any = &1_i32;
        assert!(!eq(one, one));
    }

    #[test]
    fn float_nan_is_a_change() {
        assert!(!default_equals(&f64::NAN, &f64::NAN));
    }
}
