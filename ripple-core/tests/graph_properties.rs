//! Property-based tests for the dependency graph
//!
//! A small fixed graph of signals, deriveds and effects is driven by random
//! sequences of writes, reads, flushes and destroys. After every step the
//! dependency and subscriber edges must mirror each other, deriveds must
//! agree with a plain model, and flushed effects must have seen the latest
//! values.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use ripple_core::reactive::{Derived, Effect, Runtime, Signal};

const WIDTH: usize = 4;

#[derive(Debug, Clone)]
enum Op {
    Set(usize, i32),
    Read(usize),
    ReadTotal,
    Flush,
    Destroy(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..WIDTH, -3i32..3).prop_map(|(i, v)| Op::Set(i, v)),
        2 => (0..WIDTH).prop_map(Op::Read),
        1 => Just(Op::ReadTotal),
        2 => Just(Op::Flush),
        1 => (0..WIDTH).prop_map(Op::Destroy),
    ]
}

struct Fixture {
    rt: Runtime,
    signals: Vec<Signal<i32>>,
    pairs: Vec<Derived<i32>>,
    total: Derived<i32>,
    effects: Vec<Effect>,
    observed: Rc<RefCell<Vec<Option<i32>>>>,
    model: Vec<i32>,
    destroyed: Vec<bool>,
}

impl Fixture {
    fn new() -> Self {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let signals: Vec<Signal<i32>> = (0..WIDTH).map(|_| Signal::new(0)).collect();
        let pairs: Vec<Derived<i32>> = (0..WIDTH)
            .map(|i| {
                let (left, right) = (signals[i], signals[(i + 1) % WIDTH]);
                Derived::new(move || left.get() + right.get())
            })
            .collect();
        let all = pairs.clone();
        let total = Derived::new(move || all.iter().map(|d| d.get()).sum::<i32>());

        let observed = Rc::new(RefCell::new(vec![None; WIDTH]));
        let effects = (0..WIDTH)
            .map(|i| {
                let (pair, observed) = (pairs[i], observed.clone());
                // Odd effects only look at their pair while signal 0 is even
                let gate = signals[0];
                Effect::new(move || {
                    let value = if i % 2 == 0 || gate.get() % 2 == 0 {
                        Some(pair.get())
                    } else {
                        None
                    };
                    observed.borrow_mut()[i] = value;
                })
            })
            .collect();
        rt.flush();

        Self {
            rt,
            signals,
            pairs,
            total,
            effects,
            observed,
            model: vec![0; WIDTH],
            destroyed: vec![false; WIDTH],
        }
    }

    fn expected_pair(&self, i: usize) -> i32 {
        self.model[i] + self.model[(i + 1) % WIDTH]
    }

    fn expected_observation(&self, i: usize) -> Option<i32> {
        if i % 2 == 0 || self.model[0] % 2 == 0 {
            Some(self.expected_pair(i))
        } else {
            None
        }
    }

    fn apply(&mut self, op: &Op) {
        match *op {
            Op::Set(i, value) => {
                self.signals[i].set(value);
                self.model[i] = value;
            }
            Op::Read(i) => assert_eq!(self.pairs[i].get(), self.expected_pair(i)),
            Op::ReadTotal => {
                let expected: i32 = (0..WIDTH).map(|i| self.expected_pair(i)).sum();
                assert_eq!(self.total.get(), expected);
            }
            Op::Flush => {
                self.rt.flush();
                for i in 0..WIDTH {
                    if !self.destroyed[i] {
                        assert_eq!(self.observed.borrow()[i], self.expected_observation(i));
                    }
                }
            }
            Op::Destroy(i) => {
                self.effects[i].destroy();
                self.destroyed[i] = true;
                assert!(self.effects[i].is_destroyed());
            }
        }
    }

    fn assert_edges_are_reciprocal(&self) {
        self.rt.with_graph(|graph| {
            for (id, node) in graph.iter() {
                for dependency in node.dependencies().keys() {
                    let upstream = graph.get(*dependency).expect("dangling dependency");
                    assert!(upstream.subscribers().contains(&id));
                }
                for subscriber in node.subscribers() {
                    let downstream = graph.get(*subscriber).expect("dangling subscriber");
                    assert!(downstream.dependencies().contains_key(&id));
                }
            }
        });
    }
}

// =============================================================================
// Tests without parameters (outside proptest! macro)
// =============================================================================

#[test]
fn prop_fresh_fixture_is_consistent() {
    let fixture = Fixture::new();
    fixture.assert_edges_are_reciprocal();
    assert_eq!(*fixture.observed.borrow(), vec![Some(0); WIDTH]);
}

#[test]
fn prop_destroyed_effect_leaves_no_edges() {
    let mut fixture = Fixture::new();
    fixture.apply(&Op::Destroy(0));
    fixture.assert_edges_are_reciprocal();
    let effect = fixture.effects[0].id();
    fixture.rt.with_graph(|graph| {
        assert!(graph.get(effect).is_none());
        assert!(graph
            .iter()
            .all(|(_, node)| !node.subscribers().contains(&effect)));
    });
}

// =============================================================================
// Random Operation Sequences
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_random_operations_keep_graph_consistent(
        ops in prop::collection::vec(op_strategy(), 1..40)
    ) {
        let mut fixture = Fixture::new();
        for op in &ops {
            fixture.apply(op);
            fixture.assert_edges_are_reciprocal();
        }

        fixture.apply(&Op::Flush);
        fixture.apply(&Op::ReadTotal);
        prop_assert_eq!(fixture.rt.stats().queued_effects, 0);
    }

    #[test]
    fn prop_last_write_wins_before_flush(values in prop::collection::vec(-10i32..10, 1..20)) {
        let mut fixture = Fixture::new();
        for value in &values {
            fixture.apply(&Op::Set(2, *value));
        }
        fixture.apply(&Op::Flush);
        prop_assert_eq!(fixture.signals[2].get(), *values.last().unwrap());
    }
}
