//! Conflicts generalized over simple holes.
//!
//! Instead of the chain of the member alone, the search runs on the submodel in
//! which every simple hole is left free. A conflict found there holds for all
//! options of the free simple holes, and a satisfied submodel yields a whole
//! accepting subfamily at once.

use std::rc::Rc;

use log::{debug, info};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::bitvector::BitVector;
use crate::conflict::{
    Conflict, ConflictGenerator, ConflictRequest, ConflictResult, HoleStatistics, SimpleHolePolicy,
};
use crate::conflict::storm::new_counterexample_generator;
use crate::counterexample::{CounterexampleGenerator, CounterexampleStats};
use crate::family::{Family, HoleIndex};
use crate::quotient::{Quotient, SubModel};

/// Submodel of a family with the non-simple holes fixed to a member.
pub(crate) struct Generalization {
    pub submdp: Rc<SubModel>,
    /// Simple holes left free in the submodel.
    pub simple_free: BitVector,
    pub accepting_assignment: Option<Family>,
}

/// Builds the generalized submodel and checks the request on it.
///
/// If the optimistic direction holds, the scheduler's hole options form an
/// accepting subfamily; if the pessimistic one holds as well, the whole
/// submodel is accepting.
pub(crate) fn generalize(
    quotient: &Quotient,
    family: &Family,
    assignment: &Family,
    fixed_simple: &[HoleIndex],
    request: &ConflictRequest,
    accepting_assignment: Option<Family>,
) -> Generalization {
    let Some(family_mdp) = family.mdp() else {
        panic!("Family {} has no built submodel", family);
    };

    let mut simple_free = family_mdp.simple_holes();
    let mut subfamily = family.copy();
    for h in family.hole_indices() {
        if !family_mdp.hole_simple[h] || fixed_simple.contains(&h) {
            subfamily.assume_hole_options(h, assignment.hole_options(h).to_vec());
            simple_free.set(h, false);
        }
    }
    quotient.build(&mut subfamily);
    let Some(submdp) = subfamily.mdp().cloned() else {
        panic!("Submodel of {} was not built", subfamily);
    };

    let property = &request.property;
    let result = submdp.model_check_property(property);
    let mut accepting_assignment = accepting_assignment;
    if result.primary.sat {
        let selection = quotient.scheduler_consistent(&submdp, property, &result.primary);
        assert!(selection.consistent, "Inconsistent scheduler on generalized submodel of {}", subfamily);
        if property.optimality {
            if let Some(optimality) = &quotient.specification.optimality {
                optimality.update_optimum(result.primary.value);
            }
        }
        let accepting = if result.all_sat() && !property.optimality {
            subfamily.copy()
        } else {
            let mut accepting = family.copy();
            for (h, options) in selection.selection.into_iter().enumerate() {
                accepting.assume_hole_options(h, options);
            }
            accepting
        };
        debug!("Accepting subfamily {}", accepting);
        accepting_assignment = Some(accepting);
    }

    Generalization {
        submdp,
        simple_free,
        accepting_assignment,
    }
}

/// Conflicts computed on submodels generalized over simple holes.
#[derive(Debug)]
pub struct MdpGenerator {
    quotient: Rc<Quotient>,
    policy: SimpleHolePolicy,
    counterexample_generator: Option<CounterexampleGenerator>,
    rng: ChaCha8Rng,
    simple_holes_stats: HoleStatistics,
}

impl MdpGenerator {
    pub fn new(quotient: Rc<Quotient>, policy: SimpleHolePolicy) -> Self {
        let seed = match policy {
            SimpleHolePolicy::Random { seed } => seed,
            _ => 0,
        };
        Self {
            quotient,
            policy,
            counterexample_generator: None,
            rng: ChaCha8Rng::seed_from_u64(seed),
            simple_holes_stats: HoleStatistics::default(),
        }
    }

    pub fn policy(&self) -> SimpleHolePolicy {
        self.policy
    }

    pub fn simple_holes_stats(&self) -> &HoleStatistics {
        &self.simple_holes_stats
    }

    pub fn counterexample_stats(&self) -> Option<&CounterexampleStats> {
        self.counterexample_generator.as_ref().map(|g| g.stats())
    }

    /// Simple holes the policy fixes to the assignment.
    fn fixed_simple_holes(&mut self, family_mdp: &SubModel) -> Vec<HoleIndex> {
        let simple = family_mdp.simple_holes().iter().collect::<Vec<_>>();
        match self.policy {
            SimpleHolePolicy::None => Vec::new(),
            SimpleHolePolicy::Random { .. } => simple.into_iter().filter(|_| self.rng.random_bool(0.5)).collect(),
            SimpleHolePolicy::FrequencyWeighted => {
                let average = self.simple_holes_stats.average(simple.len());
                simple
                    .into_iter()
                    .filter(|&h| self.simple_holes_stats.count(h) as f64 >= average && average > 0.0)
                    .collect()
            }
            SimpleHolePolicy::PositionAware => {
                let depths = family_mdp.hole_depths(&self.quotient.coloring);
                let known = simple.iter().filter_map(|&h| depths[h]).collect::<Vec<_>>();
                if known.is_empty() {
                    return Vec::new();
                }
                let mean = known.iter().sum::<usize>() as f64 / known.len() as f64;
                simple
                    .into_iter()
                    .filter(|&h| depths[h].is_some_and(|d| (d as f64) < mean))
                    .collect()
            }
        }
    }
}

impl ConflictGenerator for MdpGenerator {
    fn name(&self) -> &str {
        "(MDP generalization)"
    }

    fn initialize(&mut self) {
        self.counterexample_generator = Some(new_counterexample_generator(&self.quotient));
        self.simple_holes_stats.clear();
        if let SimpleHolePolicy::Random { seed } = self.policy {
            self.rng = ChaCha8Rng::seed_from_u64(seed);
        }
    }

    fn construct_conflicts(
        &mut self,
        family: &Family,
        assignment: &Family,
        _dtmc: &SubModel,
        requests: &[ConflictRequest],
        accepting_assignment: Option<Family>,
    ) -> ConflictResult {
        assert_eq!(
            requests.len(),
            1,
            "MDP generalization handles exactly one conflict request"
        );
        let Some(family_mdp) = family.mdp().cloned() else {
            panic!("Family {} has no built submodel", family);
        };

        let fixed_simple = self.fixed_simple_holes(&family_mdp);
        if !fixed_simple.is_empty() {
            info!("Policy {:?} fixes simple holes {:?}", self.policy, fixed_simple);
        }
        let request = &requests[0];
        let generalization = generalize(
            &self.quotient,
            family,
            assignment,
            &fixed_simple,
            request,
            accepting_assignment,
        );

        let Some(generator) = self.counterexample_generator.as_mut() else {
            panic!("(MDP generalization) used before initialization");
        };
        generator.prepare_mdp(&generalization.submdp, &generalization.simple_free, assignment);
        let conflict: Conflict = generator.construct_conflict(
            request.index,
            request.property.threshold,
            None,
            &family_mdp.quotient_state_map,
        );
        self.simple_holes_stats.record(&conflict, &family_mdp.simple_holes());
        debug!("MDP conflict: {:?}", conflict);

        ConflictResult {
            conflicts: vec![conflict],
            accepting_assignment: generalization.accepting_assignment,
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::fixtures;

    fn run(
        sketch: &crate::sketch::Sketch,
        policy: SimpleHolePolicy,
        member: &[usize],
    ) -> (ConflictResult, MdpGenerator) {
        let quotient = Rc::clone(&sketch.quotient);
        let mut family = quotient.design_space.copy();
        quotient.build(&mut family);
        let assignment = family.assignment(member);
        let dtmc = quotient.build_dtmc(&assignment);
        let request = ConflictRequest {
            index: 0,
            property: quotient.specification.constraints[0].clone(),
            member_result: None,
            family_result: None,
        };

        let mut generator = MdpGenerator::new(quotient, policy);
        generator.initialize();
        let result = generator.construct_conflicts(&family, &assignment, &dtmc, &[request], None);
        (result, generator)
    }

    #[test]
    fn test_violating_member() {
        let sketch = fixtures::risky_loop_sketch();
        let (result, generator) = run(&sketch, SimpleHolePolicy::None, &[0, 1, 1]);
        assert_eq!(result.conflicts, vec![vec![0, 2]]);
        assert_eq!(generator.simple_holes_stats().count(2), 1);

        // The optimistic scheduler picks the safe option of hole 2.
        let accepting = result.accepting_assignment.unwrap();
        assert_eq!(accepting.hole_options(0), &[0]);
        assert_eq!(accepting.hole_options(1), &[1]);
        assert_eq!(accepting.hole_options(2), &[0]);
    }

    #[test]
    fn test_generalizes_over_simple_hole() {
        let sketch = fixtures::three_hole_sketch();
        let (result, _) = run(&sketch, SimpleHolePolicy::None, &[0, 1, 0]);
        let accepting = result.accepting_assignment.unwrap();
        assert_eq!(accepting.hole_options(0), &[0]);
        assert_eq!(accepting.hole_options(1), &[1]);
        assert_eq!(accepting.hole_options(2), &[0, 1]);
    }

    #[test]
    fn test_violating_everywhere() {
        let sketch = fixtures::three_hole_sketch();
        let (result, _) = run(&sketch, SimpleHolePolicy::None, &[0, 0, 1]);
        assert!(result.accepting_assignment.is_none());
        assert_eq!(result.conflicts, vec![vec![0, 1]]);
    }

    #[test]
    fn test_random_policy_is_reproducible() {
        let sketch = fixtures::risky_loop_sketch();
        let (a, _) = run(&sketch, SimpleHolePolicy::Random { seed: 7 }, &[0, 1, 1]);
        let (b, _) = run(&sketch, SimpleHolePolicy::Random { seed: 7 }, &[0, 1, 1]);
        assert_eq!(a.conflicts, b.conflicts);
        assert_eq!(a.conflicts, vec![vec![0, 2]]);
    }

    #[test]
    fn test_position_policy() {
        let sketch = fixtures::risky_loop_sketch();
        let (result, generator) = run(&sketch, SimpleHolePolicy::PositionAware, &[0, 1, 1]);
        assert_eq!(generator.policy(), SimpleHolePolicy::PositionAware);
        assert_eq!(result.conflicts, vec![vec![0, 2]]);
    }

    #[test]
    fn test_accepting_scheduler_leaves_idle_loop() {
        use crate::property::{Comparison, Property};

        for property in [
            Property::reachability("goal", Comparison::GreaterEqual, 0.5),
            Property::reward("steps", "goal", Comparison::LessEqual, 5.0),
        ] {
            let sketch = fixtures::idle_or_go_sketch(property.clone());
            let (result, _) = run(&sketch, SimpleHolePolicy::None, &[0]);
            assert_eq!(result.conflicts, vec![vec![0]], "{}", property);

            // Idling forever never reaches the goal, so only `go` is accepting.
            let accepting = result.accepting_assignment.unwrap();
            assert_eq!(accepting.hole_options(0), &[1], "{}", property);
            assert!(sketch.quotient.check_member(&accepting, &property).sat, "{}", property);
        }
    }

    #[test]
    fn test_optimality_request_updates_optimum() {
        let sketch = fixtures::risky_loop_minimizing();
        let quotient = Rc::clone(&sketch.quotient);
        let mut family = quotient.design_space.copy();
        quotient.build(&mut family);
        let assignment = family.assignment(&[0, 1, 0]);
        let dtmc = quotient.build_dtmc(&assignment);
        let Some(optimality) = quotient.specification.optimality.as_ref() else {
            panic!("Sketch has no optimality property");
        };
        assert_eq!(optimality.optimum(), None);
        let request = ConflictRequest {
            index: 1,
            property: optimality.as_property(),
            member_result: None,
            family_result: None,
        };

        let mut generator = MdpGenerator::new(Rc::clone(&quotient), SimpleHolePolicy::None);
        generator.initialize();
        let result = generator.construct_conflicts(&family, &assignment, &dtmc, &[request], None);

        // 0.5 * 0.1 through s1, nothing through s2 under its safe option.
        let optimum = optimality.optimum().unwrap();
        assert!((optimum - 0.05).abs() < 1e-6, "optimum = {}", optimum);

        // Both options of hole 2 beat the old optimum, yet only the scheduler's
        // choice is accepted once an objective is involved.
        let accepting = result.accepting_assignment.unwrap();
        assert_eq!(accepting.hole_options(0), &[0]);
        assert_eq!(accepting.hole_options(1), &[1]);
        assert_eq!(accepting.hole_options(2), &[0]);
    }

    #[test]
    fn test_frequency_policy_fixes_frequent_holes() {
        let sketch = fixtures::risky_loop_sketch();
        let quotient = Rc::clone(&sketch.quotient);
        let mut family = quotient.design_space.copy();
        quotient.build(&mut family);
        let family_mdp = family.mdp().cloned().unwrap();
        let assignment = family.assignment(&[0, 1, 1]);
        let dtmc = quotient.build_dtmc(&assignment);
        let request = ConflictRequest {
            index: 0,
            property: quotient.specification.constraints[0].clone(),
            member_result: None,
            family_result: None,
        };

        let mut generator = MdpGenerator::new(Rc::clone(&quotient), SimpleHolePolicy::FrequencyWeighted);
        generator.initialize();
        assert!(generator.fixed_simple_holes(&family_mdp).is_empty());

        let result = generator.construct_conflicts(&family, &assignment, &dtmc, std::slice::from_ref(&request), None);
        assert_eq!(result.conflicts, vec![vec![0, 2]]);
        assert_eq!(generator.simple_holes_stats().count(2), 1);

        // Hole 2 now appears in conflicts as often as the average simple hole.
        assert_eq!(generator.fixed_simple_holes(&family_mdp), vec![2]);
        let result = generator.construct_conflicts(&family, &assignment, &dtmc, &[request], None);
        assert_eq!(result.conflicts, vec![vec![0, 2]]);
        assert_eq!(generator.simple_holes_stats().count(2), 2);

        // Reinitializing forgets the statistics.
        generator.initialize();
        assert!(generator.fixed_simple_holes(&family_mdp).is_empty());
    }

    #[test]
    #[should_panic(expected = "exactly one conflict request")]
    fn test_multiple_requests() {
        let sketch = fixtures::three_hole_sketch();
        let quotient = Rc::clone(&sketch.quotient);
        let mut family = quotient.design_space.copy();
        quotient.build(&mut family);
        let assignment = family.assignment(&[0, 0, 0]);
        let dtmc = quotient.build_dtmc(&assignment);
        let request = ConflictRequest {
            index: 0,
            property: quotient.specification.constraints[0].clone(),
            member_result: None,
            family_result: None,
        };
        let mut generator = MdpGenerator::new(quotient, SimpleHolePolicy::None);
        generator.initialize();
        generator.construct_conflicts(&family, &assignment, &dtmc, &[request.clone(), request], None);
    }
}
