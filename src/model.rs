//! Explicit sparse DTMCs and MDPs.
//!
//! States own contiguous ranges of choices (row groups); every choice is a
//! probability distribution over successor states. A DTMC is an MDP with exactly
//! one choice per state.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::ops::Range;

use log::debug;

use crate::bitvector::BitVector;

/// Label marking the initial states.
pub const INIT_LABEL: &str = "init";

const PROBABILITY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ModelKind {
    Dtmc,
    Mdp,
}

impl Display for ModelKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Dtmc => write!(f, "DTMC"),
            ModelKind::Mdp => write!(f, "MDP"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SparseModel {
    kind: ModelKind,
    /// `row_groups[s]..row_groups[s + 1]` are the choices of state `s`.
    row_groups: Vec<usize>,
    rows: Vec<Vec<(usize, f64)>>,
    labels: BTreeMap<String, BitVector>,
    rewards: BTreeMap<String, Vec<f64>>,
}

impl SparseModel {
    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn is_dtmc(&self) -> bool {
        self.kind == ModelKind::Dtmc
    }

    pub fn num_states(&self) -> usize {
        self.row_groups.len() - 1
    }

    pub fn num_choices(&self) -> usize {
        self.rows.len()
    }

    pub fn choices(&self, state: usize) -> Range<usize> {
        self.row_groups[state]..self.row_groups[state + 1]
    }

    pub fn transitions(&self, choice: usize) -> &[(usize, f64)] {
        &self.rows[choice]
    }

    pub fn state_of_choice(&self, choice: usize) -> usize {
        assert!(choice < self.rows.len(), "Choice {} out of range", choice);
        self.row_groups.partition_point(|&start| start <= choice) - 1
    }

    /// Distinct successors of a state over all its choices.
    pub fn successors(&self, state: usize) -> Vec<usize> {
        let mut succ = self
            .choices(state)
            .flat_map(|c| self.rows[c].iter().map(|&(t, _)| t))
            .collect::<Vec<_>>();
        succ.sort_unstable();
        succ.dedup();
        succ
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.contains_key(name)
    }

    pub fn label_names(&self) -> impl Iterator<Item = &str> {
        self.labels.keys().map(String::as_str)
    }

    /// States carrying the label.
    ///
    /// # Panics
    ///
    /// Panics if the label is unknown.
    pub fn states_with_label(&self, name: &str) -> &BitVector {
        self.labels
            .get(name)
            .unwrap_or_else(|| panic!("Unknown label '{}'", name))
    }

    pub fn has_reward(&self, name: &str) -> bool {
        self.rewards.contains_key(name)
    }

    pub fn reward_names(&self) -> impl Iterator<Item = &str> {
        self.rewards.keys().map(String::as_str)
    }

    /// Per-choice rewards of the named reward model.
    pub fn choice_rewards(&self, name: &str) -> &[f64] {
        self.rewards
            .get(name)
            .unwrap_or_else(|| panic!("Unknown reward model '{}'", name))
    }

    pub fn initial_states(&self) -> &BitVector {
        self.states_with_label(INIT_LABEL)
    }

    /// The unique initial state.
    ///
    /// # Panics
    ///
    /// Panics if there is not exactly one initial state.
    pub fn initial_state(&self) -> usize {
        let init = self.initial_states();
        assert_eq!(init.count(), 1, "Model must have exactly one initial state, found {}", init.count());
        init.iter().next().unwrap_or_default()
    }
}

impl Display for SparseModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} with {} states and {} choices", self.kind, self.num_states(), self.num_choices())
    }
}

/// Incremental builder of a [`SparseModel`].
///
/// States are created in order by [`new_row_group`](ModelBuilder::new_row_group);
/// choices are appended to the most recent state.
#[derive(Debug)]
pub struct ModelBuilder {
    kind: ModelKind,
    row_groups: Vec<usize>,
    rows: Vec<Vec<(usize, f64)>>,
    labels: BTreeMap<String, Vec<usize>>,
    rewards: BTreeMap<String, Vec<(usize, f64)>>,
}

impl ModelBuilder {
    pub fn new(kind: ModelKind) -> Self {
        Self {
            kind,
            row_groups: Vec::new(),
            rows: Vec::new(),
            labels: BTreeMap::new(),
            rewards: BTreeMap::new(),
        }
    }

    /// Starts the next state, returning its index.
    pub fn new_row_group(&mut self) -> usize {
        self.row_groups.push(self.rows.len());
        self.row_groups.len() - 1
    }

    /// Appends a choice to the current state, returning its index.
    pub fn add_choice(&mut self, transitions: Vec<(usize, f64)>) -> usize {
        assert!(!self.row_groups.is_empty(), "Choice added before any state");
        self.rows.push(transitions);
        self.rows.len() - 1
    }

    /// Declares a label, possibly without any state.
    pub fn declare_label(&mut self, name: &str) {
        self.labels.entry(name.to_string()).or_default();
    }

    pub fn add_label(&mut self, state: usize, name: &str) {
        self.labels.entry(name.to_string()).or_default().push(state);
    }

    /// Declares a reward model, possibly without any non-zero entry.
    pub fn declare_reward(&mut self, name: &str) {
        self.rewards.entry(name.to_string()).or_default();
    }

    pub fn set_reward(&mut self, name: &str, choice: usize, value: f64) {
        assert!(value >= 0.0, "Rewards must be non-negative, got {}", value);
        self.rewards.entry(name.to_string()).or_default().push((choice, value));
    }

    /// Validates and assembles the model.
    ///
    /// # Panics
    ///
    /// Panics on a deadlock state, a distribution not summing to one, a
    /// successor out of range, a DTMC state with several choices, or a
    /// missing initial state.
    pub fn build(self) -> SparseModel {
        let num_states = self.row_groups.len();
        let mut row_groups = self.row_groups;
        row_groups.push(self.rows.len());

        for s in 0..num_states {
            let num_choices = row_groups[s + 1] - row_groups[s];
            assert!(num_choices > 0, "Deadlock in state {}", s);
            if self.kind == ModelKind::Dtmc {
                assert_eq!(num_choices, 1, "DTMC state {} has {} choices", s, num_choices);
            }
        }
        for (c, row) in self.rows.iter().enumerate() {
            let sum: f64 = row.iter().map(|&(_, p)| p).sum();
            assert!(
                (sum - 1.0).abs() < PROBABILITY_TOLERANCE,
                "Choice {} sums to {} instead of 1",
                c,
                sum
            );
            for &(t, p) in row {
                assert!(t < num_states, "Successor {} of choice {} out of range", t, c);
                assert!(p > 0.0, "Choice {} has a non-positive probability", c);
            }
        }

        let labels: BTreeMap<String, BitVector> = self
            .labels
            .into_iter()
            .map(|(name, states)| (name, BitVector::from_indices(num_states, states)))
            .collect();
        assert!(
            labels.get(INIT_LABEL).is_some_and(|init| !init.is_empty()),
            "Model has no initial state"
        );

        let num_choices = self.rows.len();
        let rewards = self
            .rewards
            .into_iter()
            .map(|(name, entries)| {
                let mut values = vec![0.0; num_choices];
                for (c, v) in entries {
                    values[c] = v;
                }
                (name, values)
            })
            .collect();

        let model = SparseModel {
            kind: self.kind,
            row_groups,
            rows: self.rows,
            labels,
            rewards,
        };
        debug!("Built {}", model);
        model
    }
}
