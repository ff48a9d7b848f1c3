//! Toy sketches shared by unit tests.
//!
//! Both sketches have states `s0` (initial), `s1`, `s2`, `bad` and `done`, in
//! this order. `s0` depends on hole 0, `s1` on holes 0 and 1, `s2` on hole 2.

use crate::checker::Direction;
use crate::property::{Comparison, Formula, OptimalityProperty, Property};
use crate::sketch::{Sketch, SketchBuilder};

pub const S0: usize = 0;
pub const S1: usize = 1;
pub const S2: usize = 2;
pub const BAD: usize = 3;
pub const DONE: usize = 4;

pub fn bad_at_most(threshold: f64) -> Property {
    Property::reachability("bad", Comparison::LessEqual, threshold)
}

fn common(s2_risky: &[(usize, f64)]) -> SketchBuilder {
    let mut b = SketchBuilder::new();
    let h0 = b.hole("h0", &["0", "1"]);
    let h1 = b.hole("h1", &["0", "1"]);
    let h2 = b.hole("h2", &["0", "1"]);

    b.state(&[]);
    let c = b.choice(&[(h0, 0)], &[(S1, 0.5), (S2, 0.5)]);
    b.reward("steps", c, 1.0);
    let c = b.choice(&[(h0, 1)], &[(S1, 0.2), (S2, 0.8)]);
    b.reward("steps", c, 1.0);

    b.state(&[]);
    for (color, p) in [((0, 0), 0.4), ((0, 1), 0.1), ((1, 0), 0.3), ((1, 1), 0.05)] {
        let c = b.choice(&[(h0, color.0), (h1, color.1)], &[(BAD, p), (DONE, 1.0 - p)]);
        b.reward("steps", c, 1.0);
    }

    b.state(&[]);
    let c = b.choice(&[(h2, 0)], &[(DONE, 1.0)]);
    b.reward("steps", c, 1.0);
    let c = b.choice(&[(h2, 1)], s2_risky);
    b.reward("steps", c, 2.0);

    b.state(&["bad"]);
    b.choice(&[], &[(BAD, 1.0)]);
    b.state(&["done"]);
    b.choice(&[], &[(DONE, 1.0)]);
    b
}

/// `s2` either finishes or retries with probability one half; it never fails.
pub fn three_hole_sketch() -> Sketch {
    let mut b = common(&[(S2, 0.5), (DONE, 0.5)]);
    b.constraint(bad_at_most(0.1));
    b.build()
}

/// Like [`three_hole_sketch`], but the second option of hole 2 fails with
/// probability 0.3.
pub fn risky_loop_sketch() -> Sketch {
    let mut b = common(&[(BAD, 0.3), (DONE, 0.7)]);
    b.constraint(bad_at_most(0.1));
    b.build()
}

/// [`risky_loop_sketch`] with a custom constraint in place of the default one.
pub fn risky_loop_with(property: Property) -> Sketch {
    let mut b = common(&[(BAD, 0.3), (DONE, 0.7)]);
    b.constraint(property);
    b.build()
}

/// [`risky_loop_sketch`] that also minimizes the probability of failure.
pub fn risky_loop_minimizing() -> Sketch {
    let mut b = common(&[(BAD, 0.3), (DONE, 0.7)]);
    b.constraint(bad_at_most(0.5));
    b.optimality(OptimalityProperty::new(
        Formula::Reachability {
            target: "bad".to_string(),
        },
        Direction::Min,
        0.0,
    ));
    b.build()
}

/// One hole deciding whether `s0` idles in place at no cost or moves on to
/// `goal` at cost 1.
pub fn idle_or_go_sketch(property: Property) -> Sketch {
    let mut b = SketchBuilder::new();
    let h = b.hole("h", &["stay", "go"]);
    b.state(&[]);
    let c = b.choice(&[(h, 0)], &[(0, 1.0)]);
    b.reward("steps", c, 0.0);
    let c = b.choice(&[(h, 1)], &[(1, 1.0)]);
    b.reward("steps", c, 1.0);
    b.state(&["goal"]);
    b.choice(&[], &[(1, 1.0)]);
    b.constraint(property);
    b.build()
}
