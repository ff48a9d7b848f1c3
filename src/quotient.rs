//! The quotient MDP and the submodels it induces for families and members.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use log::debug;

use crate::bitvector::BitVector;
use crate::checker::{Checker, MdpPropertyResult, PropertyResult};
use crate::coloring::Coloring;
use crate::family::{Family, HoleIndex, OptionIndex};
use crate::model::{ModelBuilder, ModelKind, SparseModel, INIT_LABEL};
use crate::property::{Property, Specification};

/// A model built from the quotient for a family (MDP) or a member (DTMC).
#[derive(Debug, Clone)]
pub struct SubModel {
    pub model: Rc<SparseModel>,
    /// Quotient state of each submodel state.
    pub quotient_state_map: Vec<usize>,
    /// Quotient choice of each submodel choice.
    pub quotient_choice_map: Vec<usize>,
    /// Whether leaving the hole free keeps every scheduler consistent.
    pub hole_simple: Vec<bool>,
    pub family: Family,
    checker: Checker,
}

impl SubModel {
    pub fn num_states(&self) -> usize {
        self.model.num_states()
    }

    /// Checks the property in the primary direction, and in the secondary one
    /// when the primary holds on an MDP.
    pub fn model_check_property(&self, property: &Property) -> MdpPropertyResult {
        let primary = self.checker.check(&self.model, property, property.primary_direction());
        let secondary = if primary.sat && !self.model.is_dtmc() {
            Some(self.checker.check(&self.model, property, property.secondary_direction()))
        } else {
            None
        };
        debug!(
            "Checked {} on {}: primary = {}, secondary = {:?}",
            property,
            self.model,
            primary.value,
            secondary.as_ref().map(|r| r.value)
        );
        MdpPropertyResult { primary, secondary }
    }

    /// Mask of the simple holes.
    pub fn simple_holes(&self) -> BitVector {
        BitVector::from_indices(
            self.hole_simple.len(),
            self.hole_simple.iter().enumerate().filter(|(_, &s)| s).map(|(h, _)| h),
        )
    }

    /// Breadth-first distance of every state from the initial state.
    pub fn state_depths(&self) -> Vec<Option<usize>> {
        let mut depth = vec![None; self.num_states()];
        let init = self.model.initial_state();
        depth[init] = Some(0);
        let mut queue = VecDeque::from([init]);
        while let Some(s) = queue.pop_front() {
            let d = depth[s].unwrap_or_default();
            for t in self.model.successors(s) {
                if depth[t].is_none() {
                    depth[t] = Some(d + 1);
                    queue.push_back(t);
                }
            }
        }
        depth
    }

    /// Distance of the closest state in which each hole is relevant.
    pub fn hole_depths(&self, coloring: &Coloring) -> Vec<Option<usize>> {
        let mut res = vec![None; coloring.num_holes()];
        for (s, depth) in self.state_depths().into_iter().enumerate() {
            let Some(depth) = depth else { continue };
            for &h in &coloring.state_to_holes()[self.quotient_state_map[s]] {
                if res[h].map_or(true, |d| depth < d) {
                    res[h] = Some(depth);
                }
            }
        }
        res
    }
}

/// Per-hole options used by a scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerSelection {
    pub selection: Vec<Vec<OptionIndex>>,
    /// Every hole received at most one option.
    pub consistent: bool,
}

#[derive(Debug)]
pub struct Quotient {
    pub quotient_mdp: SparseModel,
    pub coloring: Rc<Coloring>,
    pub specification: Specification,
    pub design_space: Family,
    pub checker: Checker,
}

impl Quotient {
    pub fn new(
        quotient_mdp: SparseModel,
        coloring: Rc<Coloring>,
        specification: Specification,
        design_space: Family,
    ) -> Self {
        assert_eq!(
            coloring.num_holes(),
            design_space.num_holes(),
            "Coloring and design space disagree on the number of holes"
        );
        Self {
            quotient_mdp,
            coloring,
            specification,
            design_space,
            checker: Checker::default(),
        }
    }

    pub fn with_checker(mut self, checker: Checker) -> Self {
        self.checker = checker;
        self
    }

    fn build_submodel(&self, family: &Family, kind: ModelKind) -> SubModel {
        let quotient = &self.quotient_mdp;
        let init = quotient.initial_state();

        let mut quotient_state_map = vec![init];
        let mut state_index = HashMap::from([(init, 0)]);
        let mut selected_choices = Vec::new();

        let mut i = 0;
        while i < quotient_state_map.len() {
            let q = quotient_state_map[i];
            let choices = quotient
                .choices(q)
                .filter(|&c| self.coloring.choice_consistent(c, family))
                .collect::<Vec<_>>();
            assert!(!choices.is_empty(), "Deadlock in quotient state {} for family {}", q, family);
            if kind == ModelKind::Dtmc {
                assert_eq!(choices.len(), 1, "Overlapping guards in quotient state {} for {}", q, family);
            }
            for &c in &choices {
                for &(t, _) in quotient.transitions(c) {
                    state_index.entry(t).or_insert_with(|| {
                        quotient_state_map.push(t);
                        quotient_state_map.len() - 1
                    });
                }
            }
            selected_choices.push(choices);
            i += 1;
        }

        let mut builder = ModelBuilder::new(kind);
        for name in quotient.label_names() {
            builder.declare_label(name);
        }
        for name in quotient.reward_names() {
            builder.declare_reward(name);
        }
        let mut quotient_choice_map = Vec::new();
        for (s, &q) in quotient_state_map.iter().enumerate() {
            builder.new_row_group();
            for name in quotient.label_names() {
                if name != INIT_LABEL && quotient.states_with_label(name).get(q) {
                    builder.add_label(s, name);
                }
            }
            for &c in &selected_choices[s] {
                let transitions = quotient.transitions(c).iter().map(|&(t, p)| (state_index[&t], p)).collect();
                let choice = builder.add_choice(transitions);
                for name in quotient.reward_names() {
                    let r = quotient.choice_rewards(name)[c];
                    if r != 0.0 {
                        builder.set_reward(name, choice, r);
                    }
                }
                quotient_choice_map.push(c);
            }
        }
        builder.add_label(0, INIT_LABEL);
        let model = builder.build();

        let hole_simple = self.compute_hole_simple(&quotient_state_map, &quotient_choice_map, &model);

        SubModel {
            model: Rc::new(model),
            quotient_state_map,
            quotient_choice_map,
            hole_simple,
            family: family.copy(),
            checker: self.checker,
        }
    }

    fn compute_hole_simple(
        &self,
        quotient_state_map: &[usize],
        quotient_choice_map: &[usize],
        model: &SparseModel,
    ) -> Vec<bool> {
        let num_holes = self.coloring.num_holes();
        let mut relevant_states = vec![Vec::new(); num_holes];
        let mut state_holes = Vec::with_capacity(quotient_state_map.len());
        for s in 0..quotient_state_map.len() {
            let mut holes = model
                .choices(s)
                .flat_map(|c| self.coloring.choice_to_holes()[quotient_choice_map[c]].iter().copied())
                .collect::<Vec<_>>();
            holes.sort_unstable();
            holes.dedup();
            for &h in &holes {
                relevant_states[h].push(s);
            }
            state_holes.push(holes);
        }
        relevant_states
            .iter()
            .map(|states| match states.as_slice() {
                [] => true,
                [s] => state_holes[*s].len() == 1,
                _ => false,
            })
            .collect()
    }

    /// Builds the MDP of all members of the family and attaches it.
    pub fn build(&self, family: &mut Family) {
        let submodel = self.build_submodel(family, ModelKind::Mdp);
        debug!("Built {} for family {}", submodel.model, family);
        family.mdp = Some(Rc::new(submodel));
    }

    /// Builds the DTMC of a single member.
    ///
    /// # Panics
    ///
    /// Panics if `assignment` is not a single member, or if some reachable
    /// state has no enabled choice or more than one.
    pub fn build_dtmc(&self, assignment: &Family) -> SubModel {
        assert!(assignment.is_assignment(), "DTMC requested for a family: {}", assignment);
        self.build_submodel(assignment, ModelKind::Dtmc)
    }

    /// Options each hole takes under the scheduler in the states it reaches.
    ///
    /// Holes the scheduler never touches keep the submodel's options.
    pub fn scheduler_consistent(
        &self,
        submodel: &SubModel,
        property: &Property,
        result: &PropertyResult,
    ) -> SchedulerSelection {
        let model = &submodel.model;
        let target = model.states_with_label(property.formula.target());
        let mut selection = vec![Vec::new(); self.coloring.num_holes()];

        let mut visited = BitVector::new(model.num_states());
        let init = model.initial_state();
        visited.set(init, true);
        let mut queue = VecDeque::from([init]);
        while let Some(s) = queue.pop_front() {
            if target.get(s) {
                continue;
            }
            let choice = result.scheduler[s];
            for &(h, o) in self.coloring.color(submodel.quotient_choice_map[choice]) {
                selection[h].push(o);
            }
            for &(t, _) in model.transitions(choice) {
                if visited.insert(t) {
                    queue.push_back(t);
                }
            }
        }

        let mut consistent = true;
        for (h, options) in selection.iter_mut().enumerate() {
            options.sort_unstable();
            options.dedup();
            if options.len() > 1 {
                consistent = false;
            }
            if options.is_empty() {
                *options = submodel.family.hole_options(h).to_vec();
            }
        }
        SchedulerSelection { selection, consistent }
    }

    pub fn check_member(&self, assignment: &Family, property: &Property) -> PropertyResult {
        let dtmc = self.build_dtmc(assignment);
        self.checker.check(&dtmc.model, property, property.primary_direction())
    }

    /// Returns true if fixing the conflict holes to the assignment already
    /// violates the property for every remaining member of the family.
    pub fn family_excludes(
        &self,
        family: &Family,
        assignment: &Family,
        conflict: &[HoleIndex],
        property: &Property,
    ) -> bool {
        let mut subfamily = family.copy();
        for &h in conflict {
            subfamily.assume_hole_options(h, vec![assignment.option(h)]);
        }
        let submodel = self.build_submodel(&subfamily, ModelKind::Mdp);
        let primary = self.checker.check(&submodel.model, property, property.primary_direction());
        !primary.sat
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::fixtures;

    #[test]
    fn test_build_family() {
        let sketch = fixtures::three_hole_sketch();
        let quotient = &sketch.quotient;
        let mut family = quotient.design_space.copy();
        quotient.build(&mut family);
        let mdp = family.mdp().cloned().unwrap();
        assert_eq!(mdp.num_states(), 5);
        assert_eq!(mdp.model.num_choices(), quotient.quotient_mdp.num_choices());
        assert_eq!(mdp.hole_simple, vec![false, false, true]);
        assert_eq!(mdp.simple_holes().iter().collect::<Vec<_>>(), vec![2]);
        assert_eq!(mdp.hole_depths(&quotient.coloring), vec![Some(0), Some(1), Some(1)]);
    }

    #[test]
    fn test_narrowing_drops_submodel() {
        let sketch = fixtures::three_hole_sketch();
        let mut family = sketch.quotient.design_space.copy();
        sketch.quotient.build(&mut family);
        family.assume_hole_options(0, vec![1]);
        assert!(family.mdp().is_none());
    }

    #[test]
    fn test_build_dtmc() {
        let sketch = fixtures::three_hole_sketch();
        let quotient = &sketch.quotient;
        let assignment = quotient.design_space.assignment(&[0, 0, 0]);
        let dtmc = quotient.build_dtmc(&assignment);
        assert!(dtmc.model.is_dtmc());
        assert_eq!(dtmc.quotient_state_map, vec![0, 1, 2, 3, 4]);

        let result = quotient.check_member(&assignment, &fixtures::bad_at_most(0.1));
        assert!((result.value - 0.2).abs() < 1e-9);
        assert!(!result.sat);
    }

    #[test]
    #[should_panic(expected = "DTMC requested for a family")]
    fn test_build_dtmc_of_family() {
        let sketch = fixtures::three_hole_sketch();
        sketch.quotient.build_dtmc(&sketch.quotient.design_space);
    }

    #[test]
    fn test_scheduler_selection() {
        let sketch = fixtures::risky_loop_sketch();
        let quotient = &sketch.quotient;
        let mut family = quotient.design_space.copy();
        family.assume_hole_options(0, vec![0]);
        family.assume_hole_options(1, vec![1]);
        quotient.build(&mut family);
        let mdp = family.mdp().cloned().unwrap();

        let property = fixtures::bad_at_most(0.1);
        let result = mdp.model_check_property(&property);
        assert!(result.primary.sat);
        assert!(!result.all_sat());

        let selection = quotient.scheduler_consistent(&mdp, &property, &result.primary);
        assert!(selection.consistent);
        assert_eq!(selection.selection, vec![vec![0], vec![1], vec![0]]);
    }

    #[test]
    fn test_family_excludes() {
        let sketch = fixtures::risky_loop_sketch();
        let quotient = &sketch.quotient;
        let mut family = quotient.design_space.copy();
        quotient.build(&mut family);
        let assignment = quotient.design_space.assignment(&[0, 1, 1]);
        let property = fixtures::bad_at_most(0.1);
        assert!(quotient.family_excludes(&family, &assignment, &[0, 2], &property));
        assert!(!quotient.family_excludes(&family, &assignment, &[0], &property));
    }
}
