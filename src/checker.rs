//! Model checking of reachability and reward properties.
//!
//! Values are computed by Gauss-Seidel value iteration from below, after a
//! graph analysis that pins states with probability zero (reachability) or
//! infinite expected reward to their exact values.

use std::fmt::{Display, Formatter};

use log::{trace, warn};

use crate::bitvector::BitVector;
use crate::model::SparseModel;
use crate::property::{Formula, Property};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Direction {
    Min,
    Max,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Min => Direction::Max,
            Direction::Max => Direction::Min,
        }
    }

    /// Returns true if `a` is strictly better than `b`.
    fn better(self, a: f64, b: f64) -> bool {
        match self {
            Direction::Min => a < b,
            Direction::Max => a > b,
        }
    }

    fn worst(self) -> f64 {
        match self {
            Direction::Min => f64::INFINITY,
            Direction::Max => f64::NEG_INFINITY,
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Min => write!(f, "min"),
            Direction::Max => write!(f, "max"),
        }
    }
}

/// Overlay on a model check: absorbing states with given values, and a mask of
/// the choices the scheduler may use.
#[derive(Debug, Clone)]
pub struct Restriction {
    pub fixed: Vec<Option<f64>>,
    pub allowed_choices: Option<BitVector>,
}

impl Restriction {
    pub fn new(num_states: usize) -> Self {
        Self {
            fixed: vec![None; num_states],
            allowed_choices: None,
        }
    }

    pub fn fix(&mut self, state: usize, value: f64) {
        self.fixed[state] = Some(value);
    }

    pub fn is_allowed(&self, choice: usize) -> bool {
        self.allowed_choices.as_ref().map_or(true, |mask| mask.get(choice))
    }
}

#[derive(Debug, Clone)]
pub struct Solution {
    pub values: Vec<f64>,
    /// Selected choice per state.
    pub scheduler: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct PropertyResult {
    /// Value in the initial state.
    pub value: f64,
    pub sat: bool,
    /// Values of all states.
    pub result: Vec<f64>,
    pub scheduler: Vec<usize>,
}

/// Results of checking a property on an MDP in both scheduler directions.
///
/// The secondary (pessimistic) direction is only computed when the primary one
/// is satisfied.
#[derive(Debug, Clone)]
pub struct MdpPropertyResult {
    pub primary: PropertyResult,
    pub secondary: Option<PropertyResult>,
}

impl MdpPropertyResult {
    /// Every scheduler satisfies the property.
    pub fn all_sat(&self) -> bool {
        self.primary.sat && self.secondary.as_ref().is_some_and(|s| s.sat)
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Checker {
    pub precision: f64,
    pub max_iterations: usize,
}

impl Default for Checker {
    fn default() -> Self {
        Self {
            precision: 1e-12,
            max_iterations: 100_000,
        }
    }
}

/// Model with an optional restriction, as seen by the graph algorithms.
struct View<'a> {
    model: &'a SparseModel,
    restriction: Option<&'a Restriction>,
    absorbing: BitVector,
}

impl<'a> View<'a> {
    fn new(model: &'a SparseModel, target: &BitVector, restriction: Option<&'a Restriction>) -> Self {
        let mut absorbing = target.clone();
        if let Some(r) = restriction {
            assert_eq!(r.fixed.len(), model.num_states(), "Restriction does not match the model");
            for (s, v) in r.fixed.iter().enumerate() {
                if v.is_some() {
                    absorbing.set(s, true);
                }
            }
        }
        Self {
            model,
            restriction,
            absorbing,
        }
    }

    fn fixed(&self, state: usize) -> Option<f64> {
        self.restriction.and_then(|r| r.fixed[state])
    }

    fn enabled(&self, state: usize) -> impl Iterator<Item = usize> + '_ {
        self.model
            .choices(state)
            .filter(move |&c| self.restriction.map_or(true, |r| r.is_allowed(c)))
    }

    fn check_enabled(&self) {
        for s in 0..self.model.num_states() {
            if !self.absorbing.get(s) {
                assert!(self.enabled(s).next().is_some(), "State {} has no allowed choice", s);
            }
        }
    }

    fn successors(&self, choice: usize) -> impl Iterator<Item = usize> + '_ {
        self.model.transitions(choice).iter().map(|&(t, _)| t)
    }

    /// States that reach `goal` with positive probability under some scheduler.
    fn exists_reach(&self, goal: &BitVector) -> BitVector {
        let mut reach = goal.clone();
        let mut changed = true;
        while changed {
            changed = false;
            for s in 0..self.model.num_states() {
                if reach.get(s) || self.absorbing.get(s) {
                    continue;
                }
                if self.enabled(s).any(|c| self.successors(c).any(|t| reach.get(t))) {
                    reach.set(s, true);
                    changed = true;
                }
            }
        }
        reach
    }

    /// States that reach `goal` with positive probability under every scheduler.
    fn forall_reach(&self, goal: &BitVector) -> BitVector {
        let mut reach = goal.clone();
        let mut changed = true;
        while changed {
            changed = false;
            for s in 0..self.model.num_states() {
                if reach.get(s) || self.absorbing.get(s) {
                    continue;
                }
                if self.enabled(s).all(|c| self.successors(c).any(|t| reach.get(t))) {
                    reach.set(s, true);
                    changed = true;
                }
            }
        }
        reach
    }

    /// States that reach `goal` almost surely under some scheduler.
    fn prob1e(&self, goal: &BitVector) -> BitVector {
        let mut stay = BitVector::full(self.model.num_states());
        loop {
            let mut reach = goal.clone();
            let mut changed = true;
            while changed {
                changed = false;
                for s in 0..self.model.num_states() {
                    if reach.get(s) || !stay.get(s) || self.absorbing.get(s) {
                        continue;
                    }
                    let ok = self.enabled(s).any(|c| {
                        self.successors(c).all(|t| stay.get(t)) && self.successors(c).any(|t| reach.get(t))
                    });
                    if ok {
                        reach.set(s, true);
                        changed = true;
                    }
                }
            }
            if reach == stay {
                return stay;
            }
            stay = reach;
        }
    }

    /// States that reach `goal` almost surely under every scheduler.
    fn prob1a(&self, goal: &BitVector) -> BitVector {
        let avoid = self.forall_reach(goal).complement();
        let mut escape = avoid;
        let mut changed = true;
        while changed {
            changed = false;
            for s in 0..self.model.num_states() {
                if escape.get(s) || self.absorbing.get(s) {
                    continue;
                }
                if self.enabled(s).any(|c| self.successors(c).any(|t| escape.get(t))) {
                    escape.set(s, true);
                    changed = true;
                }
            }
        }
        escape.complement()
    }
}

impl Checker {
    pub fn new(precision: f64, max_iterations: usize) -> Self {
        Self {
            precision,
            max_iterations,
        }
    }

    pub fn solve(
        &self,
        model: &SparseModel,
        formula: &Formula,
        direction: Direction,
        restriction: Option<&Restriction>,
    ) -> Solution {
        match formula {
            Formula::Reachability { target } => {
                self.reachability(model, model.states_with_label(target), direction, restriction)
            }
            Formula::Reward { reward, target } => self.expected_reward(
                model,
                model.choice_rewards(reward),
                model.states_with_label(target),
                direction,
                restriction,
            ),
        }
    }

    /// Probability of eventually reaching `target`.
    pub fn reachability(
        &self,
        model: &SparseModel,
        target: &BitVector,
        direction: Direction,
        restriction: Option<&Restriction>,
    ) -> Solution {
        let view = View::new(model, target, restriction);
        view.check_enabled();
        let n = model.num_states();

        let mut values = vec![0.0; n];
        let mut goal = target.clone();
        for s in 0..n {
            if target.get(s) {
                values[s] = 1.0;
            } else if let Some(v) = view.fixed(s) {
                values[s] = v;
                if v > 0.0 {
                    goal.set(s, true);
                }
            }
        }

        let positive = match direction {
            Direction::Max => view.exists_reach(&goal),
            Direction::Min => view.forall_reach(&goal),
        };
        let active = (0..n)
            .filter(|&s| !view.absorbing.get(s) && positive.get(s))
            .collect::<Vec<_>>();

        self.iterate(&view, &mut values, &active, direction, None, None);
        let mut scheduler = self.extract_scheduler(&view, &values, direction, None);
        if direction == Direction::Max {
            // Optimal choices may also loop inside an end component; keep
            // only those that make progress towards the goal.
            let progress = Self::attractor(&view, &goal, &active, |s, c| {
                let best = Self::best_choice(&view, &values, s, direction, None).1;
                self.ties(Self::choice_value(&view, &values, c, None), best)
            });
            for s in active {
                if let Some(c) = progress[s] {
                    scheduler[s] = c;
                }
            }
        }
        Solution { values, scheduler }
    }

    /// Expected reward accumulated until reaching `target`.
    ///
    /// Minimal rewards are computed by policy iteration from a scheduler that
    /// reaches the target almost surely, so zero-reward loops never pass for
    /// progress.
    pub fn expected_reward(
        &self,
        model: &SparseModel,
        rewards: &[f64],
        target: &BitVector,
        direction: Direction,
        restriction: Option<&Restriction>,
    ) -> Solution {
        assert_eq!(rewards.len(), model.num_choices(), "Reward vector does not match the model");
        let view = View::new(model, target, restriction);
        view.check_enabled();
        let n = model.num_states();

        let mut values = vec![0.0; n];
        let mut goal = target.clone();
        for s in 0..n {
            if target.get(s) {
                continue;
            }
            if let Some(v) = view.fixed(s) {
                values[s] = v;
                if v.is_finite() {
                    goal.set(s, true);
                }
            }
        }

        let finite = match direction {
            Direction::Min => view.prob1e(&goal),
            Direction::Max => view.prob1a(&goal),
        };
        let mut active = Vec::new();
        let mut infinite = Vec::new();
        for s in 0..n {
            if view.absorbing.get(s) {
                continue;
            }
            if finite.get(s) {
                active.push(s);
            } else {
                values[s] = f64::INFINITY;
                infinite.push(s);
            }
        }

        let scheduler = match direction {
            Direction::Min => self.min_reward_policy(&view, &mut values, rewards, &goal, &finite, &active),
            Direction::Max => {
                self.iterate(&view, &mut values, &active, direction, Some(rewards), None);
                let mut scheduler = self.extract_scheduler(&view, &values, direction, Some(rewards));

                // In the infinite region, head for states that avoid the goal forever.
                let avoid = view.forall_reach(&goal).complement();
                for &s in &infinite {
                    if avoid.get(s) {
                        if let Some(c) = view.enabled(s).find(|&c| view.successors(c).all(|t| avoid.get(t))) {
                            scheduler[s] = c;
                        }
                    }
                }
                let escape = Self::attractor(&view, &avoid, &infinite, |_, _| true);
                for &s in &infinite {
                    if let Some(c) = escape[s] {
                        scheduler[s] = c;
                    }
                }
                scheduler
            }
        };
        Solution { values, scheduler }
    }

    fn min_reward_policy(
        &self,
        view: &View,
        values: &mut [f64],
        rewards: &[f64],
        goal: &BitVector,
        finite: &BitVector,
        active: &[usize],
    ) -> Vec<usize> {
        let mut policy = self.extract_scheduler(view, values, Direction::Min, Some(rewards));
        let proper = Self::attractor(view, goal, active, |_, c| view.successors(c).all(|t| finite.get(t)));
        for &s in active {
            let Some(c) = proper[s] else {
                panic!("State {} cannot reach the target almost surely", s);
            };
            policy[s] = c;
        }

        let mut rounds = 0;
        loop {
            rounds += 1;
            self.iterate(view, values, active, Direction::Min, Some(rewards), Some(&policy));
            let mut improved = false;
            for &s in active {
                let (c, v) = Self::best_choice(view, values, s, Direction::Min, Some(rewards));
                if v < values[s] && !self.ties(v, values[s]) {
                    policy[s] = c;
                    improved = true;
                }
            }
            if !improved {
                trace!("Policy iteration finished after {} rounds", rounds);
                return policy;
            }
        }
    }

    fn choice_value(view: &View, values: &[f64], choice: usize, rewards: Option<&[f64]>) -> f64 {
        let mut v = rewards.map_or(0.0, |r| r[choice]);
        for &(t, p) in view.model.transitions(choice) {
            v += p * values[t];
        }
        v
    }

    fn best_choice(
        view: &View,
        values: &[f64],
        state: usize,
        direction: Direction,
        rewards: Option<&[f64]>,
    ) -> (usize, f64) {
        let mut best = (usize::MAX, direction.worst());
        for c in view.enabled(state) {
            let v = Self::choice_value(view, values, c, rewards);
            if best.0 == usize::MAX || direction.better(v, best.1) {
                best = (c, v);
            }
        }
        best
    }

    /// Values equal up to the accuracy of value iteration.
    fn ties(&self, a: f64, b: f64) -> bool {
        if a.is_infinite() || b.is_infinite() {
            return a == b;
        }
        (a - b).abs() <= self.precision.sqrt() * a.abs().max(b.abs()).max(1.0)
    }

    /// Assigns to each of `states` an admissible choice with a successor closer
    /// to `goal`, layer by layer. States that never get attracted stay `None`.
    fn attractor(
        view: &View,
        goal: &BitVector,
        states: &[usize],
        admissible: impl Fn(usize, usize) -> bool,
    ) -> Vec<Option<usize>> {
        let mut reached = goal.clone();
        let mut choice = vec![None; view.model.num_states()];
        let mut changed = true;
        while changed {
            changed = false;
            for &s in states {
                if reached.get(s) {
                    continue;
                }
                let found = view
                    .enabled(s)
                    .find(|&c| admissible(s, c) && view.successors(c).any(|t| reached.get(t)));
                if let Some(c) = found {
                    choice[s] = Some(c);
                    reached.set(s, true);
                    changed = true;
                }
            }
        }
        choice
    }

    fn iterate(
        &self,
        view: &View,
        values: &mut [f64],
        active: &[usize],
        direction: Direction,
        rewards: Option<&[f64]>,
        policy: Option<&[usize]>,
    ) {
        if active.is_empty() {
            return;
        }
        for iteration in 0..self.max_iterations {
            let mut diff: f64 = 0.0;
            for &s in active {
                let v = match policy {
                    Some(policy) => Self::choice_value(view, values, policy[s], rewards),
                    None => Self::best_choice(view, values, s, direction, rewards).1,
                };
                let old = values[s];
                values[s] = v;
                if old != v {
                    let delta = if v.is_finite() {
                        (v - old).abs() / v.abs().max(1.0)
                    } else {
                        f64::INFINITY
                    };
                    diff = diff.max(delta);
                }
            }
            if diff <= self.precision {
                trace!("Value iteration converged after {} iterations", iteration + 1);
                return;
            }
        }
        warn!(
            "Value iteration did not converge within {} iterations",
            self.max_iterations
        );
    }

    fn extract_scheduler(
        &self,
        view: &View,
        values: &[f64],
        direction: Direction,
        rewards: Option<&[f64]>,
    ) -> Vec<usize> {
        (0..view.model.num_states())
            .map(|s| {
                if view.absorbing.get(s) {
                    return view.enabled(s).next().unwrap_or(view.model.choices(s).start);
                }
                Self::best_choice(view, values, s, direction, rewards).0
            })
            .collect()
    }

    pub fn check(&self, model: &SparseModel, property: &Property, direction: Direction) -> PropertyResult {
        self.check_restricted(model, property, direction, None)
    }

    pub fn check_restricted(
        &self,
        model: &SparseModel,
        property: &Property,
        direction: Direction,
        restriction: Option<&Restriction>,
    ) -> PropertyResult {
        let solution = self.solve(model, &property.formula, direction, restriction);
        let value = solution.values[model.initial_state()];
        PropertyResult {
            value,
            sat: property.meets(value),
            result: solution.values,
            scheduler: solution.scheduler,
        }
    }
}
