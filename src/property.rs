//! Properties checked against candidate programs.

use std::cell::Cell;
use std::fmt::{Display, Formatter};

use log::info;

use crate::checker::Direction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Formula {
    /// Probability of eventually reaching a labeled state.
    Reachability { target: String },
    /// Expected reward accumulated until reaching a labeled state.
    Reward { reward: String, target: String },
}

impl Formula {
    pub fn target(&self) -> &str {
        match self {
            Formula::Reachability { target } | Formula::Reward { target, .. } => target,
        }
    }

    pub fn is_reward(&self) -> bool {
        matches!(self, Formula::Reward { .. })
    }
}

impl Display for Formula {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Formula::Reachability { target } => write!(f, "P [F \"{}\"]", target),
            Formula::Reward { reward, target } => write!(f, "R{{\"{}\"}} [F \"{}\"]", reward, target),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Comparison {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Less => value < threshold,
            Comparison::LessEqual => value <= threshold,
            Comparison::Greater => value > threshold,
            Comparison::GreaterEqual => value >= threshold,
        }
    }

    /// Upper-bounded comparisons are violated by values that are too high.
    pub fn is_upper_bound(self) -> bool {
        matches!(self, Comparison::Less | Comparison::LessEqual)
    }
}

impl Display for Comparison {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Comparison::Less => "<",
            Comparison::LessEqual => "<=",
            Comparison::Greater => ">",
            Comparison::GreaterEqual => ">=",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub formula: Formula,
    pub op: Comparison,
    pub threshold: f64,
    /// Snapshot of an optimality objective rather than a hard constraint.
    pub optimality: bool,
}

impl Property {
    pub fn new(formula: Formula, op: Comparison, threshold: f64) -> Self {
        Self {
            formula,
            op,
            threshold,
            optimality: false,
        }
    }

    pub fn reachability(target: &str, op: Comparison, threshold: f64) -> Self {
        Self::new(
            Formula::Reachability {
                target: target.to_string(),
            },
            op,
            threshold,
        )
    }

    pub fn reward(reward: &str, target: &str, op: Comparison, threshold: f64) -> Self {
        Self::new(
            Formula::Reward {
                reward: reward.to_string(),
                target: target.to_string(),
            },
            op,
            threshold,
        )
    }

    pub fn is_reward(&self) -> bool {
        self.formula.is_reward()
    }

    /// Returns true if lower values are better.
    pub fn minimizing(&self) -> bool {
        self.op.is_upper_bound()
    }

    pub fn meets(&self, value: f64) -> bool {
        self.op.holds(value, self.threshold)
    }

    /// Scheduler direction that is optimistic for this property: if the
    /// property fails in this direction, it fails for every scheduler.
    pub fn primary_direction(&self) -> Direction {
        if self.minimizing() {
            Direction::Min
        } else {
            Direction::Max
        }
    }

    pub fn secondary_direction(&self) -> Direction {
        self.primary_direction().opposite()
    }
}

impl Display for Property {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.formula, self.op, self.threshold)
    }
}

/// Optimization objective with a running optimum.
#[derive(Debug, Clone)]
pub struct OptimalityProperty {
    pub formula: Formula,
    pub direction: Direction,
    /// Relative improvement required to accept a new optimum.
    pub epsilon: f64,
    optimum: Cell<Option<f64>>,
}

impl OptimalityProperty {
    pub fn new(formula: Formula, direction: Direction, epsilon: f64) -> Self {
        assert!(epsilon >= 0.0, "Optimality epsilon must be non-negative");
        Self {
            formula,
            direction,
            epsilon,
            optimum: Cell::new(None),
        }
    }

    pub fn optimum(&self) -> Option<f64> {
        self.optimum.get()
    }

    /// Value a candidate must beat to improve the optimum.
    pub fn threshold(&self) -> f64 {
        match (self.optimum.get(), self.direction) {
            (None, Direction::Min) => f64::INFINITY,
            (None, Direction::Max) => f64::NEG_INFINITY,
            (Some(opt), Direction::Min) => opt - self.epsilon * opt.abs(),
            (Some(opt), Direction::Max) => opt + self.epsilon * opt.abs(),
        }
    }

    pub fn improves(&self, value: f64) -> bool {
        self.as_property().meets(value)
    }

    /// Records `value` as the new optimum if it improves the current one.
    pub fn update_optimum(&self, value: f64) -> bool {
        if !self.improves(value) {
            return false;
        }
        info!("New optimum for {}: {}", self.formula, value);
        self.optimum.set(Some(value));
        true
    }

    /// The objective as a strict constraint against the current optimum.
    pub fn as_property(&self) -> Property {
        let op = match self.direction {
            Direction::Min => Comparison::Less,
            Direction::Max => Comparison::Greater,
        };
        Property {
            formula: self.formula.clone(),
            op,
            threshold: self.threshold(),
            optimality: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Specification {
    pub constraints: Vec<Property>,
    pub optimality: Option<OptimalityProperty>,
}

impl Specification {
    pub fn new(constraints: Vec<Property>, optimality: Option<OptimalityProperty>) -> Self {
        Self {
            constraints,
            optimality,
        }
    }

    /// Formulae in request order: constraints first, then the objective.
    pub fn formulae(&self) -> Vec<Formula> {
        let mut formulae = self.constraints.iter().map(|p| p.formula.clone()).collect::<Vec<_>>();
        if let Some(opt) = &self.optimality {
            formulae.push(opt.formula.clone());
        }
        formulae
    }

    /// All properties in request order, the objective as a snapshot.
    pub fn all_properties(&self) -> Vec<Property> {
        let mut props = self.constraints.clone();
        if let Some(opt) = &self.optimality {
            props.push(opt.as_property());
        }
        props
    }

    pub fn has_optimality(&self) -> bool {
        self.optimality.is_some()
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_comparison() {
        assert!(Comparison::LessEqual.holds(0.1, 0.1));
        assert!(!Comparison::Less.holds(0.1, 0.1));
        assert!(Comparison::Greater.holds(0.2, 0.1));
        assert!(!Comparison::GreaterEqual.holds(0.05, 0.1));
    }

    #[test]
    fn test_directions() {
        let p = Property::reachability("bad", Comparison::LessEqual, 0.1);
        assert_eq!(p.primary_direction(), Direction::Min);
        assert_eq!(p.secondary_direction(), Direction::Max);
        assert!(p.meets(0.1));
        assert_eq!(p.to_string(), "P [F \"bad\"] <= 0.1");

        let q = Property::reward("steps", "done", Comparison::Greater, 3.0);
        assert_eq!(q.primary_direction(), Direction::Max);
        assert!(q.is_reward());
    }

    #[test]
    fn test_optimum() {
        let opt = OptimalityProperty::new(
            Formula::Reachability {
                target: "bad".to_string(),
            },
            Direction::Min,
            0.0,
        );
        assert!(opt.improves(0.9));
        assert!(opt.update_optimum(0.5));
        assert!(!opt.update_optimum(0.6));
        assert!(!opt.update_optimum(0.5));
        assert!(opt.update_optimum(0.2));
        assert_eq!(opt.optimum(), Some(0.2));
        assert!(opt.as_property().optimality);
    }

    #[test]
    fn test_threshold_with_negative_optimum() {
        let formula = Formula::Reachability {
            target: "bad".to_string(),
        };
        let min = OptimalityProperty::new(formula.clone(), Direction::Min, 0.1);
        assert!(min.update_optimum(-2.0));
        assert!((min.threshold() - -2.2).abs() < 1e-12);
        assert!(!min.improves(-2.1));
        assert!(min.improves(-2.3));

        let max = OptimalityProperty::new(formula, Direction::Max, 0.1);
        assert!(max.update_optimum(-2.0));
        assert!((max.threshold() - -1.8).abs() < 1e-12);
        assert!(max.improves(-1.7));
        assert!(!max.improves(-1.9));

        assert!(max.update_optimum(4.0));
        assert!((max.threshold() - 4.4).abs() < 1e-12);
    }

    #[test]
    fn test_formulae_order() {
        let spec = Specification::new(
            vec![Property::reachability("bad", Comparison::Less, 0.5)],
            Some(OptimalityProperty::new(
                Formula::Reward {
                    reward: "steps".to_string(),
                    target: "done".to_string(),
                },
                Direction::Max,
                0.01,
            )),
        );
        let formulae = spec.formulae();
        assert_eq!(formulae.len(), 2);
        assert!(formulae[1].is_reward());
        assert_eq!(spec.all_properties()[1].threshold, f64::NEG_INFINITY);
    }
}
