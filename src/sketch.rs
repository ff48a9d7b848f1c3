//! Programmatic construction of sketches.
//!
//! A sketch is a quotient MDP whose choices are colored by hole options,
//! together with the properties every synthesized member must satisfy.

use std::rc::Rc;

use log::info;

use crate::checker::Checker;
use crate::coloring::{Color, Coloring};
use crate::family::{Family, Hole, HoleIndex, OptionIndex};
use crate::model::{ModelBuilder, ModelKind, INIT_LABEL};
use crate::property::{OptimalityProperty, Property, Specification};
use crate::quotient::Quotient;

#[derive(Debug)]
pub struct Sketch {
    pub quotient: Rc<Quotient>,
}

impl Sketch {
    pub fn design_space(&self) -> &Family {
        &self.quotient.design_space
    }
}

/// Builder of a [`Sketch`].
///
/// States are numbered in declaration order and the first one is initial.
/// Choices belong to the most recently declared state.
#[derive(Debug)]
pub struct SketchBuilder {
    holes: Vec<Hole>,
    model: ModelBuilder,
    colors: Vec<Color>,
    constraints: Vec<Property>,
    optimality: Option<OptimalityProperty>,
    checker: Checker,
}

impl Default for SketchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SketchBuilder {
    pub fn new() -> Self {
        Self {
            holes: Vec::new(),
            model: ModelBuilder::new(ModelKind::Mdp),
            colors: Vec::new(),
            constraints: Vec::new(),
            optimality: None,
            checker: Checker::default(),
        }
    }

    pub fn hole(&mut self, name: &str, option_labels: &[&str]) -> HoleIndex {
        let labels = option_labels.iter().map(|s| s.to_string()).collect();
        self.holes.push(Hole::new(name, labels));
        self.holes.len() - 1
    }

    pub fn state(&mut self, labels: &[&str]) -> usize {
        let s = self.model.new_row_group();
        if s == 0 {
            self.model.add_label(s, INIT_LABEL);
        }
        for label in labels {
            self.model.add_label(s, label);
        }
        s
    }

    /// Adds a choice of the current state enabled by the given hole options.
    pub fn choice(&mut self, color: &[(HoleIndex, OptionIndex)], transitions: &[(usize, f64)]) -> usize {
        for &(h, o) in color {
            assert!(h < self.holes.len(), "Unknown hole {}", h);
            assert!(
                o < self.holes[h].option_labels.len(),
                "Hole {} has no option {}",
                self.holes[h].name,
                o
            );
        }
        self.colors.push(color.to_vec());
        self.model.add_choice(transitions.to_vec())
    }

    pub fn reward(&mut self, name: &str, choice: usize, value: f64) {
        self.model.set_reward(name, choice, value);
    }

    /// Declares a label that may label no state at all.
    pub fn label(&mut self, name: &str) {
        self.model.declare_label(name);
    }

    pub fn constraint(&mut self, property: Property) {
        self.constraints.push(property);
    }

    pub fn optimality(&mut self, property: OptimalityProperty) {
        self.optimality = Some(property);
    }

    pub fn checker(&mut self, checker: Checker) {
        self.checker = checker;
    }

    pub fn build(self) -> Sketch {
        let quotient_mdp = self.model.build();
        let num_holes = self.holes.len();
        let coloring = Coloring::new(&quotient_mdp, num_holes, self.colors);
        let design_space = Family::new(self.holes);
        let specification = Specification::new(self.constraints, self.optimality);

        info!(
            "Sketch has {} holes, {} members, quotient {}",
            num_holes,
            design_space.size(),
            quotient_mdp
        );
        for (i, p) in specification.all_properties().iter().enumerate() {
            info!("Property {}: {}", i, p);
        }

        let quotient = Quotient::new(quotient_mdp, Rc::new(coloring), specification, design_space)
            .with_checker(self.checker);
        Sketch {
            quotient: Rc::new(quotient),
        }
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::BigUint;
    use test_log::test;

    use super::*;
    use crate::property::Comparison;

    #[test]
    fn test_build() {
        let mut b = SketchBuilder::new();
        let h = b.hole("x", &["a", "b"]);
        let s0 = b.state(&[]);
        b.choice(&[(h, 0)], &[(1, 1.0)]);
        b.choice(&[(h, 1)], &[(0, 1.0)]);
        let s1 = b.state(&["goal"]);
        b.choice(&[], &[(s1, 1.0)]);
        b.constraint(Property::reachability("goal", Comparison::Greater, 0.5));
        let sketch = b.build();

        let quotient = &sketch.quotient;
        assert_eq!(quotient.quotient_mdp.initial_state(), s0);
        assert_eq!(sketch.design_space().size(), BigUint::from(2u32));
        assert_eq!(quotient.coloring.state_to_holes()[s0], vec![h]);
        assert!(quotient.check_member(&sketch.design_space().assignment(&[0]), &quotient.specification.constraints[0]).sat);
        assert!(!quotient.check_member(&sketch.design_space().assignment(&[1]), &quotient.specification.constraints[0]).sat);
    }

    #[test]
    #[should_panic(expected = "has no option 2")]
    fn test_unknown_option() {
        let mut b = SketchBuilder::new();
        let h = b.hole("x", &["a", "b"]);
        b.state(&[]);
        b.choice(&[(h, 2)], &[(0, 1.0)]);
    }
}
