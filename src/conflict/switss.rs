//! Conflicts from witnessing subsystems.
//!
//! A witnessing subsystem is a set of states that, with every other state made
//! a sink, still reaches the target with a probability beyond the threshold.
//! The holes relevant in the subsystem's states form the conflict. Subsystems
//! are found with a quotient-sum style heuristic: rank states, grow the
//! smallest witnessing prefix, then prune.

use std::collections::VecDeque;
use std::rc::Rc;

use log::{debug, warn};

use crate::bitvector::BitVector;
use crate::checker::{Checker, Direction, Restriction};
use crate::conflict::mdp::generalize;
use crate::conflict::{Conflict, ConflictGenerator, ConflictRequest, ConflictResult, HoleStatistics};
use crate::family::Family;
use crate::model::SparseModel;
use crate::property::{Comparison, Property};
use crate::quotient::{Quotient, SubModel};

const FORWARD_STEPS: usize = 1000;
const FORWARD_EPSILON: f64 = 1e-12;

/// Heuristic search for small witnessing subsystems.
#[derive(Debug, Copy, Clone)]
pub struct QsHeuristic {
    /// Number of pruning passes.
    pub iterations: usize,
}

impl Default for QsHeuristic {
    fn default() -> Self {
        Self { iterations: 10 }
    }
}

/// Reachability question a subsystem must witness.
struct WitnessQuery<'a> {
    model: &'a SparseModel,
    target: &'a BitVector,
    /// States that count as sinks regardless of the subsystem.
    sinks: &'a BitVector,
    witnessed: Box<dyn Fn(f64) -> bool + 'a>,
}

impl WitnessQuery<'_> {
    fn value(&self, checker: &Checker, subsystem: &BitVector) -> f64 {
        let mut restriction = Restriction::new(self.model.num_states());
        for s in 0..self.model.num_states() {
            if !subsystem.get(s) || self.sinks.get(s) {
                restriction.fix(s, 0.0);
            }
        }
        let solution = checker.reachability(self.model, self.target, Direction::Min, Some(&restriction));
        solution.values[self.model.initial_state()]
    }

    fn holds(&self, checker: &Checker, subsystem: &BitVector) -> bool {
        (self.witnessed)(self.value(checker, subsystem))
    }
}

impl QsHeuristic {
    /// Expected visits of every state from the initial state under the
    /// scheduler, up to absorption in the target.
    fn forward_mass(model: &SparseModel, target: &BitVector, scheduler: &[usize]) -> Vec<f64> {
        let n = model.num_states();
        let mut mass = vec![0.0; n];
        let mut current = vec![0.0; n];
        current[model.initial_state()] = 1.0;
        for _ in 0..FORWARD_STEPS {
            let mut next = vec![0.0; n];
            let mut moving = 0.0;
            for s in 0..n {
                if current[s] == 0.0 {
                    continue;
                }
                mass[s] += current[s];
                if target.get(s) {
                    continue;
                }
                for &(t, p) in model.transitions(scheduler[s]) {
                    next[t] += current[s] * p;
                    moving += current[s] * p;
                }
            }
            current = next;
            if moving < FORWARD_EPSILON {
                break;
            }
        }
        mass
    }

    fn witness(&self, checker: &Checker, query: &WitnessQuery) -> Option<BitVector> {
        let model = query.model;
        let n = model.num_states();
        let init = model.initial_state();

        if !query.holds(checker, &BitVector::full(n)) {
            return None;
        }

        let backward = checker.reachability(model, query.target, Direction::Min, None);
        let forward = Self::forward_mass(model, query.target, &backward.scheduler);
        let mut ranked = (0..n)
            .filter(|&s| !query.target.get(s) && !query.sinks.get(s))
            .map(|s| (forward[s] * backward.values[s], s))
            .collect::<Vec<_>>();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        let prefix = |k: usize| {
            let mut subsystem = BitVector::from_indices(n, ranked[..k].iter().map(|&(_, s)| s));
            subsystem.set(init, true);
            subsystem
        };

        // Smallest witnessing prefix of the ranking
        let (mut lo, mut hi) = (0, ranked.len());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if query.holds(checker, &prefix(mid)) {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        let mut subsystem = prefix(lo);

        for iteration in 0..self.iterations {
            let mut removed = false;
            for &(_, s) in ranked[..lo].iter().rev() {
                if s == init || !subsystem.get(s) {
                    continue;
                }
                subsystem.set(s, false);
                if query.holds(checker, &subsystem) {
                    removed = true;
                } else {
                    subsystem.set(s, true);
                }
            }
            debug!("Pruning pass {} leaves {} states", iteration, subsystem.count());
            if !removed {
                break;
            }
        }
        Some(subsystem)
    }
}

/// States that cannot reach `goal` under any scheduler.
fn cannot_reach(model: &SparseModel, goal: &BitVector) -> BitVector {
    let n = model.num_states();
    let mut predecessors = vec![Vec::new(); n];
    for s in 0..n {
        for t in model.successors(s) {
            predecessors[t].push(s);
        }
    }
    let mut reach = goal.clone();
    let mut queue = goal.iter().collect::<VecDeque<_>>();
    while let Some(t) = queue.pop_front() {
        for &s in &predecessors[t] {
            if reach.insert(s) {
                queue.push_back(s);
            }
        }
    }
    reach.complement()
}

/// Strongly connected components in reverse topological order, with `goal`
/// states treated as absorbing.
fn tarjan(model: &SparseModel, goal: &BitVector) -> Vec<Vec<usize>> {
    let n = model.num_states();
    let successors = |s: usize| if goal.get(s) { Vec::new() } else { model.successors(s) };

    let mut index = vec![usize::MAX; n];
    let mut lowlink = vec![0; n];
    let mut on_stack = BitVector::new(n);
    let mut stack = Vec::new();
    let mut sccs = Vec::new();
    let mut counter = 0;

    for root in 0..n {
        if index[root] != usize::MAX {
            continue;
        }
        let mut call_stack = vec![(root, successors(root), 0)];
        index[root] = counter;
        lowlink[root] = counter;
        counter += 1;
        stack.push(root);
        on_stack.set(root, true);

        while let Some((v, succ, i)) = call_stack.last_mut() {
            let v = *v;
            if *i < succ.len() {
                let w = succ[*i];
                *i += 1;
                if index[w] == usize::MAX {
                    index[w] = counter;
                    lowlink[w] = counter;
                    counter += 1;
                    stack.push(w);
                    on_stack.set(w, true);
                    call_stack.push((w, successors(w), 0));
                } else if on_stack.get(w) {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
                continue;
            }
            call_stack.pop();
            if let Some((parent, _, _)) = call_stack.last() {
                lowlink[*parent] = lowlink[*parent].min(lowlink[v]);
            }
            if lowlink[v] == index[v] {
                let mut scc = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack.set(w, false);
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                scc.sort_unstable();
                sccs.push(scc);
            }
        }
    }
    sccs
}

/// States of bottom SCCs without a goal state.
fn goal_free_bottom_sccs(model: &SparseModel, goal: &BitVector) -> BitVector {
    let n = model.num_states();
    let mut res = BitVector::new(n);
    for scc in tarjan(model, goal) {
        let members = BitVector::from_indices(n, scc.iter().copied());
        let bottom = scc
            .iter()
            .all(|&s| goal.get(s) || model.successors(s).iter().all(|&t| members.get(t)));
        if bottom && scc.iter().all(|&s| !goal.get(s)) {
            res.union_with(&members);
        }
    }
    res
}

/// Conflicts from witnessing subsystems of the chain or of the generalized
/// submodel.
#[derive(Debug)]
pub struct SwitssGenerator {
    quotient: Rc<Quotient>,
    mdp_mode: bool,
    heuristic: Option<QsHeuristic>,
    simple_holes_stats: HoleStatistics,
}

impl SwitssGenerator {
    pub fn new(quotient: Rc<Quotient>, mdp_mode: bool) -> Self {
        Self {
            quotient,
            mdp_mode,
            heuristic: None,
            simple_holes_stats: HoleStatistics::default(),
        }
    }

    pub fn simple_holes_stats(&self) -> &HoleStatistics {
        &self.simple_holes_stats
    }

    fn conflict(
        &self,
        heuristic: &QsHeuristic,
        submodel: &SubModel,
        property: &Property,
        simple: Option<&BitVector>,
    ) -> Conflict {
        let model = &submodel.model;
        let goal = model.states_with_label(property.formula.target());
        let op = property.op;

        let (target, sinks, threshold) = if op.is_upper_bound() {
            (goal.clone(), BitVector::new(model.num_states()), property.threshold)
        } else {
            let target = if model.is_dtmc() {
                goal_free_bottom_sccs(model, goal)
            } else {
                cannot_reach(model, goal)
            };
            (target, goal.clone(), 1.0 - property.threshold)
        };
        let witnessed: Box<dyn Fn(f64) -> bool> = match op {
            Comparison::Less | Comparison::LessEqual => Box::new(move |v| !op.holds(v, threshold)),
            Comparison::Greater => Box::new(move |v| v >= threshold),
            Comparison::GreaterEqual => Box::new(move |v| v > threshold),
        };
        let query = WitnessQuery {
            model,
            target: &target,
            sinks: &sinks,
            witnessed,
        };

        let states = match heuristic.witness(&self.quotient.checker, &query) {
            Some(subsystem) => subsystem,
            None => {
                warn!("No witnessing subsystem for {}, using every state", property);
                BitVector::full(model.num_states())
            }
        };

        let relevant = self.quotient.coloring.state_to_holes();
        let mut conflict = states
            .iter()
            .filter(|&s| !target.get(s))
            .flat_map(|s| relevant[submodel.quotient_state_map[s]].iter().copied())
            .filter(|&h| simple.map_or(true, |mask| !mask.get(h)))
            .collect::<Vec<_>>();
        conflict.sort_unstable();
        conflict.dedup();
        debug!("Witnessing subsystem of {} states, conflict {:?}", states.count(), conflict);
        conflict
    }
}

impl ConflictGenerator for SwitssGenerator {
    fn name(&self) -> &str {
        if self.mdp_mode {
            "(SWITSS - MDP)"
        } else {
            "(SWITSS - DTMC)"
        }
    }

    fn initialize(&mut self) {
        self.heuristic = Some(QsHeuristic::default());
        self.simple_holes_stats.clear();
    }

    fn construct_conflicts(
        &mut self,
        family: &Family,
        assignment: &Family,
        dtmc: &SubModel,
        requests: &[ConflictRequest],
        accepting_assignment: Option<Family>,
    ) -> ConflictResult {
        if self.mdp_mode {
            assert_eq!(requests.len(), 1, "SWITSS MDP conflicts handle exactly one conflict request");
        }
        for request in requests {
            assert!(
                !request.property.is_reward(),
                "SWITSS conflicts do not support reward properties: {}",
                request.property
            );
        }
        let Some(heuristic) = self.heuristic else {
            panic!("{} used before initialization", self.name());
        };

        let (conflicts, accepting_assignment) = if self.mdp_mode {
            let request = &requests[0];
            let generalization = generalize(&self.quotient, family, assignment, &[], request, accepting_assignment);
            let conflict = self.conflict(
                &heuristic,
                &generalization.submdp,
                &request.property,
                Some(&generalization.simple_free),
            );
            (vec![conflict], generalization.accepting_assignment)
        } else {
            let conflicts = requests
                .iter()
                .map(|r| self.conflict(&heuristic, dtmc, &r.property, None))
                .collect();
            (conflicts, accepting_assignment)
        };

        if let Some(family_mdp) = family.mdp() {
            let simple = family_mdp.simple_holes();
            for conflict in &conflicts {
                self.simple_holes_stats.record(conflict, &simple);
            }
        }

        ConflictResult {
            conflicts,
            accepting_assignment,
        }
    }
}
