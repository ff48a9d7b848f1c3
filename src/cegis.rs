//! Candidate solver for the CEGIS loop.
//!
//! Each hole's option index is encoded in binary over its own block of BDD
//! variables. The solver keeps one constraint: the domain of every hole, minus
//! every excluded conflict. Candidates are satisfying assignments of the
//! constraint restricted to the family at hand.

use log::{debug, info};
use num_bigint::BigUint;

use crate::bdd::Bdd;
use crate::family::{Family, HoleIndex, OptionIndex};
use crate::reference::Ref;

fn bits_for(size: usize) -> usize {
    (usize::BITS - (size.max(1) - 1).leading_zeros()) as usize
}

#[derive(Debug)]
pub struct CegisSolver {
    bdd: Bdd,
    /// Variables of each hole, least significant bit first.
    hole_vars: Vec<Vec<u32>>,
    num_vars: usize,
    constraint: Ref,
    clauses: usize,
}

impl CegisSolver {
    pub fn new(design_space: &Family) -> Self {
        let bdd = Bdd::default();
        let mut hole_vars = Vec::with_capacity(design_space.num_holes());
        let mut next = 1;
        for hole in design_space.holes() {
            let bits = bits_for(hole.option_labels.len()) as u32;
            hole_vars.push((next..next + bits).collect::<Vec<_>>());
            next += bits;
        }
        let num_vars = (next - 1) as usize;

        let mut solver = Self {
            constraint: bdd.one,
            bdd,
            hole_vars,
            num_vars,
            clauses: 0,
        };
        let domain = design_space
            .hole_indices()
            .map(|h| solver.encode_options(h, design_space.hole_options(h)))
            .collect::<Vec<_>>();
        solver.constraint = solver.bdd.apply_and_many(domain);
        info!(
            "CEGIS solver over {} holes uses {} variables",
            design_space.num_holes(),
            num_vars
        );
        solver
    }

    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    /// Number of conflicts excluded so far.
    pub fn num_clauses(&self) -> usize {
        self.clauses
    }

    pub fn bdd(&self) -> &Bdd {
        &self.bdd
    }

    /// `hole == option`
    pub fn encode_option(&self, hole: HoleIndex, option: OptionIndex) -> Ref {
        let vars = &self.hole_vars[hole];
        assert!(
            vars.len() >= usize::BITS as usize || option >> vars.len() == 0,
            "Option {} does not fit the encoding of hole {}",
            option,
            hole
        );
        self.bdd.cube(vars.iter().enumerate().map(|(i, &v)| {
            if (option >> i) & 1 == 1 {
                v as i32
            } else {
                -(v as i32)
            }
        }))
    }

    /// `hole in options`
    pub fn encode_options(&self, hole: HoleIndex, options: &[OptionIndex]) -> Ref {
        self.bdd.apply_or_many(options.iter().map(|&o| self.encode_option(hole, o)))
    }

    fn encode_family(&self, family: &Family) -> Ref {
        self.bdd
            .apply_and_many(family.hole_indices().map(|h| self.encode_options(h, family.hole_options(h))))
    }

    /// Excludes every member of `family` that agrees with `assignment` on the
    /// conflict holes.
    pub fn exclude(&mut self, family: &Family, assignment: &Family, conflict: &[HoleIndex]) {
        let clause = self.bdd.apply_and_many(family.hole_indices().map(|h| {
            if conflict.contains(&h) {
                self.encode_option(h, assignment.option(h))
            } else {
                self.encode_options(h, family.hole_options(h))
            }
        }));
        self.constraint = self.bdd.apply_and(self.constraint, -clause);
        self.clauses += 1;
        debug!(
            "Excluded conflict {:?}, constraint has {} nodes",
            conflict,
            self.bdd.size(self.constraint)
        );
    }

    pub fn exclude_conflicts(&mut self, family: &Family, assignment: &Family, conflicts: &[Vec<HoleIndex>]) {
        for conflict in conflicts {
            self.exclude(family, assignment, conflict);
        }
    }

    /// A member of `family` that is not yet excluded, or `None` once the
    /// family is exhausted.
    pub fn pick_assignment(&self, family: &Family) -> Option<Family> {
        let f = self.bdd.apply_and(self.constraint, self.encode_family(family));
        let path = self.bdd.one_sat(f)?;
        let mut options = vec![0; family.num_holes()];
        for lit in path.into_iter().filter(|&lit| lit > 0) {
            let var = lit as u32;
            let Some((hole, vars)) = self.hole_vars.iter().enumerate().find(|(_, vars)| vars.contains(&var)) else {
                panic!("Variable {} belongs to no hole", var);
            };
            let bit = var - vars[0];
            options[hole] |= 1 << bit;
        }
        Some(family.assignment(&options))
    }

    /// Number of members of `family` not yet excluded.
    pub fn count_candidates(&self, family: &Family) -> BigUint {
        let f = self.bdd.apply_and(self.constraint, self.encode_family(family));
        self.bdd.sat_count(f, self.num_vars)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::family::Hole;

    fn holes(sizes: &[usize]) -> Family {
        Family::new(
            sizes
                .iter()
                .enumerate()
                .map(|(i, &k)| Hole::new(format!("h{}", i), (0..k).map(|o| o.to_string()).collect()))
                .collect(),
        )
    }

    #[test]
    fn test_bits_for() {
        assert_eq!(bits_for(1), 0);
        assert_eq!(bits_for(2), 1);
        assert_eq!(bits_for(3), 2);
        assert_eq!(bits_for(4), 2);
        assert_eq!(bits_for(5), 3);
    }

    #[test]
    fn test_exclusion() {
        let family = holes(&[2, 2, 2]);
        let mut solver = CegisSolver::new(&family);
        assert_eq!(solver.num_vars(), 3);
        assert_eq!(solver.count_candidates(&family), BigUint::from(8u32));

        let assignment = family.assignment(&[0, 0, 0]);
        solver.exclude(&family, &assignment, &[0, 1]);
        assert_eq!(solver.num_clauses(), 1);
        assert_eq!(solver.count_candidates(&family), BigUint::from(6u32));

        let next = solver.pick_assignment(&family).unwrap();
        assert_eq!(next.to_string(), "{h0=0, h1=1, h2=0}");
    }

    #[test]
    fn test_domain_constraint() {
        let family = holes(&[3, 1]);
        let mut solver = CegisSolver::new(&family);
        assert_eq!(solver.num_vars(), 2);
        assert_eq!(solver.count_candidates(&family), BigUint::from(3u32));

        for o in 0..3 {
            let assignment = family.assignment(&[o, 0]);
            solver.exclude(&family, &assignment, &[0]);
        }
        assert_eq!(solver.count_candidates(&family), BigUint::ZERO);
        assert!(solver.pick_assignment(&family).is_none());
    }

    #[test]
    fn test_restricted_family() {
        let family = holes(&[2, 3]);
        let mut solver = CegisSolver::new(&family);
        let mut subfamily = family.copy();
        subfamily.assume_hole_options(1, vec![1, 2]);
        assert_eq!(solver.count_candidates(&subfamily), BigUint::from(4u32));

        // Excluding within the subfamily leaves the rest of the design space.
        solver.exclude(&subfamily, &family.assignment(&[1, 1]), &[0]);
        assert_eq!(solver.count_candidates(&subfamily), BigUint::from(2u32));
        assert_eq!(solver.count_candidates(&family), BigUint::from(4u32));
        let member = solver.pick_assignment(&subfamily).unwrap();
        assert_eq!(member.option(0), 0);
        assert!(subfamily.contains(&member));
    }

    #[test]
    fn test_empty_conflict_excludes_family() {
        let family = holes(&[2, 2]);
        let mut solver = CegisSolver::new(&family);
        let mut subfamily = family.copy();
        subfamily.assume_hole_options(0, vec![1]);
        solver.exclude(&subfamily, &family.assignment(&[1, 0]), &[]);
        assert_eq!(solver.count_candidates(&family), BigUint::from(2u32));
        assert_eq!(solver.pick_assignment(&family).map(|m| m.option(0)), Some(0));
    }
}
