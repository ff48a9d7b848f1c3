use std::rc::Rc;

use log::debug;

use crate::conflict::{Conflict, ConflictGenerator, ConflictRequest, ConflictResult, HoleStatistics};
use crate::counterexample::{CounterexampleGenerator, CounterexampleStats};
use crate::family::Family;
use crate::quotient::{Quotient, SubModel};

/// Computes one conflict per request on the chain of the member.
#[derive(Debug)]
pub struct StormGenerator {
    quotient: Rc<Quotient>,
    counterexample_generator: Option<CounterexampleGenerator>,
    simple_holes_stats: HoleStatistics,
}

impl StormGenerator {
    pub fn new(quotient: Rc<Quotient>) -> Self {
        Self {
            quotient,
            counterexample_generator: None,
            simple_holes_stats: HoleStatistics::default(),
        }
    }

    /// Occurrences of simple holes in the computed conflicts.
    pub fn simple_holes_stats(&self) -> &HoleStatistics {
        &self.simple_holes_stats
    }

    pub fn counterexample_stats(&self) -> Option<&CounterexampleStats> {
        self.counterexample_generator.as_ref().map(|g| g.stats())
    }
}

/// Builds the low-level search engine for a quotient.
pub(crate) fn new_counterexample_generator(quotient: &Quotient) -> CounterexampleGenerator {
    CounterexampleGenerator::new(Rc::clone(&quotient.coloring), &quotient.specification, quotient.checker)
}

/// Runs the chain search for every request, bounding the horizon by the family
/// results when they are known.
pub(crate) fn dtmc_conflicts(
    generator: &mut CounterexampleGenerator,
    family: &Family,
    dtmc: &SubModel,
    requests: &[ConflictRequest],
) -> Vec<Conflict> {
    assert!(!requests.is_empty(), "No conflict requests");
    let Some(family_mdp) = family.mdp() else {
        panic!("Family {} has no built submodel", family);
    };
    generator.prepare_dtmc(dtmc);
    requests
        .iter()
        .map(|request| {
            let bounds = request.family_result.as_ref().map(|r| r.primary.result.as_slice());
            generator.construct_conflict(
                request.index,
                request.property.threshold,
                bounds,
                &family_mdp.quotient_state_map,
            )
        })
        .collect()
}

impl ConflictGenerator for StormGenerator {
    fn name(&self) -> &str {
        "(Storm)"
    }

    fn initialize(&mut self) {
        self.counterexample_generator = Some(new_counterexample_generator(&self.quotient));
        self.simple_holes_stats.clear();
    }

    fn construct_conflicts(
        &mut self,
        family: &Family,
        _assignment: &Family,
        dtmc: &SubModel,
        requests: &[ConflictRequest],
        accepting_assignment: Option<Family>,
    ) -> ConflictResult {
        let Some(generator) = self.counterexample_generator.as_mut() else {
            panic!("(Storm) used before initialization");
        };
        let conflicts = dtmc_conflicts(generator, family, dtmc, requests);

        if let Some(family_mdp) = family.mdp() {
            let simple = family_mdp.simple_holes();
            for conflict in &conflicts {
                self.simple_holes_stats.record(conflict, &simple);
            }
        }
        debug!("Storm conflicts: {:?}", conflicts);

        ConflictResult {
            conflicts,
            accepting_assignment,
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::fixtures;

    fn request(quotient: &Quotient, family: Option<&Family>) -> ConflictRequest {
        let property = quotient.specification.constraints[0].clone();
        let family_result = family.and_then(|f| f.mdp()).map(|m| m.model_check_property(&property));
        ConflictRequest {
            index: 0,
            property,
            member_result: None,
            family_result,
        }
    }

    #[test]
    fn test_storm_conflict() {
        let sketch = fixtures::risky_loop_sketch();
        let quotient = Rc::clone(&sketch.quotient);
        let mut family = quotient.design_space.copy();
        quotient.build(&mut family);
        let assignment = family.assignment(&[0, 1, 1]);
        let dtmc = quotient.build_dtmc(&assignment);

        let mut generator = StormGenerator::new(Rc::clone(&quotient));
        generator.initialize();
        let result = generator.construct_conflicts(&family, &assignment, &dtmc, &[request(&quotient, None)], None);
        assert_eq!(result.conflicts, vec![vec![0, 2]]);
        assert!(result.accepting_assignment.is_none());
        assert_eq!(generator.simple_holes_stats().count(2), 1);
        assert_eq!(generator.counterexample_stats().map(|s| s.conflicts), Some(1));
    }

    #[test]
    fn test_accepting_assignment_passes_through() {
        let sketch = fixtures::three_hole_sketch();
        let quotient = Rc::clone(&sketch.quotient);
        let mut family = quotient.design_space.copy();
        quotient.build(&mut family);
        let assignment = family.assignment(&[0, 0, 0]);
        let dtmc = quotient.build_dtmc(&assignment);
        let accepting = family.assignment(&[1, 1, 1]);

        let mut generator = StormGenerator::new(Rc::clone(&quotient));
        generator.initialize();
        let req = request(&quotient, Some(&family));
        let result = generator.construct_conflicts(&family, &assignment, &dtmc, &[req], Some(accepting));
        assert_eq!(result.conflicts.len(), 1);
        assert!(result.conflicts[0].iter().all(|&h| h < 2));
        assert_eq!(result.accepting_assignment.map(|a| a.to_string()), Some("{h0=1, h1=1, h2=1}".to_string()));
    }

    #[test]
    #[should_panic(expected = "before initialization")]
    fn test_uninitialized() {
        let sketch = fixtures::three_hole_sketch();
        let quotient = Rc::clone(&sketch.quotient);
        let mut family = quotient.design_space.copy();
        quotient.build(&mut family);
        let assignment = family.assignment(&[0, 0, 0]);
        let dtmc = quotient.build_dtmc(&assignment);
        StormGenerator::new(Rc::clone(&quotient)).construct_conflicts(&family, &assignment, &dtmc, &[], None);
    }

    #[test]
    #[should_panic(expected = "No conflict requests")]
    fn test_no_requests() {
        let sketch = fixtures::three_hole_sketch();
        let quotient = Rc::clone(&sketch.quotient);
        let mut family = quotient.design_space.copy();
        quotient.build(&mut family);
        let assignment = family.assignment(&[0, 0, 0]);
        let dtmc = quotient.build_dtmc(&assignment);
        let mut generator = StormGenerator::new(Rc::clone(&quotient));
        generator.initialize();
        generator.construct_conflicts(&family, &assignment, &dtmc, &[], None);
    }
}
