//! Holes and families of hole assignments.
//!
//! A [`Family`] is a Cartesian product of admissible option sets, one per hole.
//! A family in which every hole has exactly one option is an *assignment*, i.e.
//! a single member of the design space.

use std::fmt::{Display, Formatter};
use std::ops::Index;
use std::rc::Rc;

use num_bigint::BigUint;

use crate::quotient::SubModel;

pub type HoleIndex = usize;
pub type OptionIndex = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hole {
    pub name: String,
    pub option_labels: Vec<String>,
    /// Admissible option indices, sorted and non-empty.
    pub options: Vec<OptionIndex>,
}

impl Hole {
    pub fn new(name: impl Into<String>, option_labels: Vec<String>) -> Self {
        assert!(!option_labels.is_empty(), "Hole must have at least one option");
        let options = (0..option_labels.len()).collect();
        Self {
            name: name.into(),
            option_labels,
            options,
        }
    }

    pub fn size(&self) -> usize {
        self.options.len()
    }

    pub fn is_unrefined(&self) -> bool {
        self.options.len() == self.option_labels.len()
    }

    pub fn contains(&self, option: OptionIndex) -> bool {
        self.options.binary_search(&option).is_ok()
    }

    fn option_string(&self) -> String {
        let labels = self.options.iter().map(|&o| self.option_labels[o].as_str()).collect::<Vec<_>>();
        labels.join(",")
    }
}

#[derive(Debug, Clone)]
pub struct Family {
    holes: Vec<Hole>,
    pub(crate) mdp: Option<Rc<SubModel>>,
}

impl Family {
    pub fn new(holes: Vec<Hole>) -> Self {
        Self { holes, mdp: None }
    }

    /// Clones the hole options, leaving any built submodel behind.
    pub fn copy(&self) -> Family {
        Family::new(self.holes.clone())
    }

    pub fn num_holes(&self) -> usize {
        self.holes.len()
    }

    pub fn holes(&self) -> &[Hole] {
        &self.holes
    }

    pub fn hole_indices(&self) -> std::ops::Range<HoleIndex> {
        0..self.holes.len()
    }

    /// Number of members.
    pub fn size(&self) -> BigUint {
        self.holes.iter().fold(BigUint::from(1u32), |acc, h| acc * h.size())
    }

    pub fn is_assignment(&self) -> bool {
        self.holes.iter().all(|h| h.size() == 1)
    }

    /// The single option of a fixed hole.
    ///
    /// # Panics
    ///
    /// Panics if the hole still has more than one option.
    pub fn option(&self, hole: HoleIndex) -> OptionIndex {
        let options = &self.holes[hole].options;
        assert_eq!(options.len(), 1, "Hole {} is not fixed: {:?}", self.holes[hole].name, options);
        options[0]
    }

    pub fn hole_options(&self, hole: HoleIndex) -> &[OptionIndex] {
        &self.holes[hole].options
    }

    /// Narrows a hole to the given options.
    ///
    /// Drops the built submodel, which no longer describes this family.
    ///
    /// # Panics
    ///
    /// Panics if `options` is empty or not a subset of the current options.
    pub fn assume_hole_options(&mut self, hole: HoleIndex, options: Vec<OptionIndex>) {
        let mut options = options;
        options.sort_unstable();
        options.dedup();
        assert!(!options.is_empty(), "Hole {} would have no options left", self.holes[hole].name);
        for &option in &options {
            assert!(
                self.holes[hole].contains(option),
                "Option {} is not admissible for hole {}",
                option,
                self.holes[hole].name
            );
        }
        self.holes[hole].options = options;
        self.mdp = None;
    }

    /// Built submodel of this family, if any.
    pub fn mdp(&self) -> Option<&Rc<SubModel>> {
        self.mdp.as_ref()
    }

    /// Returns true if every hole of `member` takes an option admissible here.
    pub fn contains(&self, member: &Family) -> bool {
        assert_eq!(self.num_holes(), member.num_holes());
        self.holes
            .iter()
            .zip(&member.holes)
            .all(|(h, m)| m.options.iter().all(|&o| h.contains(o)))
    }

    /// The member of this family's design space taking the given options.
    pub fn assignment(&self, options: &[OptionIndex]) -> Family {
        assert_eq!(options.len(), self.num_holes(), "Assignment must fix every hole");
        let mut member = self.copy();
        for (hole, &option) in options.iter().enumerate() {
            member.assume_hole_options(hole, vec![option]);
        }
        member
    }

    /// All members, in lexicographic order of the option indices.
    pub fn members(&self) -> Members<'_> {
        Members {
            family: self,
            position: Some(vec![0; self.holes.len()]),
        }
    }
}

impl Index<HoleIndex> for Family {
    type Output = Hole;

    fn index(&self, index: HoleIndex) -> &Self::Output {
        &self.holes[index]
    }
}

impl Display for Family {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let holes = self
            .holes
            .iter()
            .filter(|h| !h.is_unrefined() || h.size() == 1)
            .map(|h| format!("{}={}", h.name, h.option_string()))
            .collect::<Vec<_>>();
        write!(f, "{{{}}}", holes.join(", "))
    }
}

/// Odometer over the members of a [`Family`].
pub struct Members<'a> {
    family: &'a Family,
    position: Option<Vec<usize>>,
}

impl Iterator for Members<'_> {
    type Item = Vec<OptionIndex>;

    fn next(&mut self) -> Option<Self::Item> {
        let position = self.position.as_mut()?;
        let holes = &self.family.holes;
        let member = position.iter().zip(holes).map(|(&p, h)| h.options[p]).collect();

        // Advance, last hole fastest
        let mut i = holes.len();
        loop {
            if i == 0 {
                self.position = None;
                break;
            }
            i -= 1;
            position[i] += 1;
            if position[i] < holes[i].size() {
                break;
            }
            position[i] = 0;
        }
        Some(member)
    }
}
