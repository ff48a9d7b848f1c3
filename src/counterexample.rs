//! Wave-based search for conflicts.
//!
//! The search explores a chain (or a generalized submodel) breadth-first from
//! its initial state, registering the holes of blocked states wave by wave.
//! States that are not yet explored form the *horizon* and are frozen at a
//! bound that is optimistic for the property; as soon as the partially explored
//! model violates the property despite the optimistic horizon, the registered
//! holes form a conflict. The conflict is then shrunk greedily.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use log::{debug, warn};

use crate::bitvector::BitVector;
use crate::checker::{Checker, Direction, Restriction};
use crate::coloring::Coloring;
use crate::family::{Family, HoleIndex, OptionIndex};
use crate::model::SparseModel;
use crate::property::{Comparison, Formula, Specification};
use crate::quotient::SubModel;

#[derive(Debug, Default, Clone)]
pub struct CounterexampleStats {
    pub conflicts: usize,
    pub total_conflict_size: usize,
    pub rerouted_checks: usize,
}

impl CounterexampleStats {
    pub fn average_conflict_size(&self) -> Option<f64> {
        (self.conflicts > 0).then(|| self.total_conflict_size as f64 / self.conflicts as f64)
    }
}

#[derive(Debug)]
struct MdpMode {
    /// Simple holes in the order their states are discovered.
    simple_order: Vec<HoleIndex>,
    simple: BitVector,
    /// Option of every hole in the assignment.
    assignment: Vec<OptionIndex>,
}

#[derive(Debug)]
struct Prepared {
    model: Rc<SparseModel>,
    quotient_state_map: Vec<usize>,
    quotient_choice_map: Vec<usize>,
    /// Registrable holes of each state.
    state_holes: Vec<Vec<HoleIndex>>,
    waves: Vec<Vec<HoleIndex>>,
    mdp: Option<MdpMode>,
}

struct Exploration {
    expanded: BitVector,
    /// Discovered states, in breadth-first order.
    order: Vec<usize>,
    /// Discovered but unexpanded states, in breadth-first order.
    blocked: Vec<usize>,
}

impl Prepared {
    fn explore(&self, registered: &BitVector) -> Exploration {
        let n = self.model.num_states();
        let mut expanded = BitVector::new(n);
        let mut discovered = BitVector::new(n);
        let mut order = Vec::new();
        let mut blocked = Vec::new();

        let init = self.model.initial_state();
        discovered.set(init, true);
        let mut queue = VecDeque::from([init]);
        while let Some(s) = queue.pop_front() {
            order.push(s);
            if !self.state_holes[s].iter().all(|&h| registered.get(h)) {
                blocked.push(s);
                continue;
            }
            expanded.set(s, true);
            for t in self.model.successors(s) {
                if discovered.insert(t) {
                    queue.push_back(t);
                }
            }
        }
        Exploration {
            expanded,
            order,
            blocked,
        }
    }
}

/// One conflict search against a prepared model.
struct Search<'a> {
    prepared: &'a Prepared,
    coloring: &'a Coloring,
    checker: Checker,
    formula: &'a Formula,
    op: Comparison,
    threshold: f64,
    direction: Direction,
    horizon: Vec<f64>,
    checks: usize,
}

impl Search<'_> {
    fn violated(&mut self, registered: &BitVector, simple_registered: &[HoleIndex]) -> bool {
        let p = self.prepared;
        let model = &p.model;
        let exploration = p.explore(registered);

        let mut restriction = Restriction::new(model.num_states());
        for s in 0..model.num_states() {
            if !exploration.expanded.get(s) {
                restriction.fix(s, self.horizon[s]);
            }
        }
        if let (Some(mdp), false) = (&p.mdp, simple_registered.is_empty()) {
            let mut allowed = BitVector::full(model.num_choices());
            for c in 0..model.num_choices() {
                let color = self.coloring.color(p.quotient_choice_map[c]);
                let off_assignment = color
                    .iter()
                    .any(|&(h, o)| simple_registered.contains(&h) && mdp.assignment[h] != o);
                if off_assignment {
                    allowed.set(c, false);
                }
            }
            restriction.allowed_choices = Some(allowed);
        }

        let solution = self.checker.solve(model, self.formula, self.direction, Some(&restriction));
        let value = solution.values[model.initial_state()];
        self.checks += 1;
        let violated = !self.op.holds(value, self.threshold);
        debug!(
            "Rerouted check with {} explored states, simple holes {:?}: {} = {} ({})",
            exploration.expanded.count(),
            simple_registered,
            self.formula,
            value,
            if violated { "violated" } else { "not violated" }
        );
        violated
    }
}

/// Computes conflicts for chains and generalized submodels of one quotient.
#[derive(Debug)]
pub struct CounterexampleGenerator {
    num_holes: usize,
    coloring: Rc<Coloring>,
    properties: Vec<(Formula, Comparison)>,
    checker: Checker,
    prepared: Option<Prepared>,
    stats: CounterexampleStats,
}

impl CounterexampleGenerator {
    pub fn new(coloring: Rc<Coloring>, specification: &Specification, checker: Checker) -> Self {
        let properties = specification
            .all_properties()
            .into_iter()
            .map(|p| (p.formula, p.op))
            .collect();
        Self {
            num_holes: coloring.num_holes(),
            coloring,
            properties,
            checker,
            prepared: None,
            stats: CounterexampleStats::default(),
        }
    }

    pub fn stats(&self) -> &CounterexampleStats {
        &self.stats
    }

    fn prepare(&mut self, submodel: &SubModel, simple: Option<(&BitVector, &Family)>) {
        let relevant = self.coloring.state_to_holes();
        let state_holes = submodel
            .quotient_state_map
            .iter()
            .map(|&q| {
                relevant[q]
                    .iter()
                    .copied()
                    .filter(|&h| simple.map_or(true, |(mask, _)| !mask.get(h)))
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut prepared = Prepared {
            model: Rc::clone(&submodel.model),
            quotient_state_map: submodel.quotient_state_map.clone(),
            quotient_choice_map: submodel.quotient_choice_map.clone(),
            state_holes,
            waves: Vec::new(),
            mdp: None,
        };

        let mut registered = BitVector::new(self.num_holes);
        let exploration = loop {
            let exploration = prepared.explore(&registered);
            let Some(&earliest) = exploration.blocked.first() else {
                break exploration;
            };
            let wave = prepared.state_holes[earliest]
                .iter()
                .copied()
                .filter(|&h| registered.insert(h))
                .collect::<Vec<_>>();
            prepared.waves.push(wave);
        };

        if let Some((mask, assignment)) = simple {
            assert!(assignment.is_assignment(), "Expected a single member, got {}", assignment);
            let mut seen = BitVector::new(self.num_holes);
            let mut simple_order = Vec::new();
            for &s in &exploration.order {
                for &h in &relevant[prepared.quotient_state_map[s]] {
                    if mask.get(h) && seen.insert(h) {
                        simple_order.push(h);
                    }
                }
            }
            prepared.mdp = Some(MdpMode {
                simple_order,
                simple: mask.clone(),
                assignment: (0..assignment.num_holes()).map(|h| assignment.option(h)).collect(),
            });
        }

        debug!(
            "Prepared {} with waves {:?}",
            prepared.model, prepared.waves
        );
        self.prepared = Some(prepared);
    }

    /// Targets the search at the chain of a single member.
    pub fn prepare_dtmc(&mut self, dtmc: &SubModel) {
        assert!(dtmc.model.is_dtmc(), "Expected a DTMC, got {}", dtmc.model);
        self.prepare(dtmc, None);
    }

    /// Targets the search at a generalized submodel in which the given simple
    /// holes are left free.
    pub fn prepare_mdp(&mut self, mdp: &SubModel, simple_holes: &BitVector, assignment: &Family) {
        assert_eq!(simple_holes.len(), self.num_holes, "Simple hole mask has the wrong length");
        self.prepare(mdp, Some((simple_holes, assignment)));
    }

    /// Computes a conflict for the property with the given index.
    ///
    /// `bounds` are optional per-state values of the property over the whole
    /// family, indexed by the states of the family model whose quotient states
    /// are `family_state_map`. Horizon states are frozen at these bounds, or at
    /// the trivial optimistic bound without them.
    pub fn construct_conflict(
        &mut self,
        formula_index: usize,
        threshold: f64,
        bounds: Option<&[f64]>,
        family_state_map: &[usize],
    ) -> Vec<HoleIndex> {
        let Some(prepared) = self.prepared.as_ref() else {
            panic!("Conflict requested before preparing a model");
        };
        let (formula, op) = &self.properties[formula_index];

        let trivial = if op.is_upper_bound() {
            0.0
        } else if formula.is_reward() {
            f64::INFINITY
        } else {
            1.0
        };
        let family_state: HashMap<usize, usize> = family_state_map.iter().enumerate().map(|(f, &q)| (q, f)).collect();
        let horizon = prepared
            .quotient_state_map
            .iter()
            .map(|q| match (bounds, family_state.get(q)) {
                (Some(bounds), Some(&f)) => bounds[f],
                _ => trivial,
            })
            .collect();

        let mut search = Search {
            prepared,
            coloring: &self.coloring,
            checker: self.checker,
            formula,
            op: *op,
            threshold,
            direction: if op.is_upper_bound() { Direction::Min } else { Direction::Max },
            horizon,
            checks: 0,
        };

        // Non-simple holes in registration order, then registered simple holes
        let mut conflict: Vec<HoleIndex> = Vec::new();
        let mut registered = BitVector::new(self.num_holes);
        let mut proven = search.violated(&registered, &[]);
        for wave in &prepared.waves {
            if proven {
                break;
            }
            for &h in wave {
                registered.set(h, true);
                conflict.push(h);
            }
            proven = search.violated(&registered, &[]);
        }

        if !proven {
            if let Some(mdp) = &prepared.mdp {
                let mut simple_registered = Vec::new();
                for &h in &mdp.simple_order {
                    simple_registered.push(h);
                    conflict.push(h);
                    if search.violated(&registered, &simple_registered) {
                        proven = true;
                        break;
                    }
                }
            }
        }

        if proven {
            let is_simple = |h: HoleIndex| prepared.mdp.as_ref().is_some_and(|m| m.simple.get(h));
            for i in (0..conflict.len()).rev() {
                let mut candidate = BitVector::new(self.num_holes);
                let mut simple_candidate = Vec::new();
                for (j, &h) in conflict.iter().enumerate() {
                    if j == i {
                        continue;
                    }
                    if is_simple(h) {
                        simple_candidate.push(h);
                    } else {
                        candidate.set(h, true);
                    }
                }
                if search.violated(&candidate, &simple_candidate) {
                    conflict.remove(i);
                }
            }
        } else {
            warn!(
                "Could not prove a violation of {} {} {}, returning all {} registered holes",
                formula,
                op,
                threshold,
                conflict.len()
            );
        }

        conflict.sort_unstable();
        conflict.dedup();

        self.stats.conflicts += 1;
        self.stats.total_conflict_size += conflict.len();
        self.stats.rerouted_checks += search.checks;
        debug!("Conflict {:?} after {} rerouted checks", conflict, search.checks);
        conflict
    }
}
