use crate::family::{Family, HoleIndex, OptionIndex};
use crate::model::SparseModel;

/// Partial hole assignment labeling one quotient choice.
pub type Color = Vec<(HoleIndex, OptionIndex)>;

/// Maps every choice of the quotient MDP to the hole options enabling it.
///
/// Immutable once built; generators share it behind an `Rc`.
#[derive(Debug, Clone)]
pub struct Coloring {
    num_holes: usize,
    choice_colors: Vec<Color>,
    choice_to_holes: Vec<Vec<HoleIndex>>,
    state_to_holes: Vec<Vec<HoleIndex>>,
}

impl Coloring {
    pub fn new(quotient_mdp: &SparseModel, num_holes: usize, choice_colors: Vec<Color>) -> Self {
        assert_eq!(
            choice_colors.len(),
            quotient_mdp.num_choices(),
            "Every quotient choice needs a color"
        );

        let mut choice_to_holes = Vec::with_capacity(choice_colors.len());
        for color in &choice_colors {
            let mut holes = color.iter().map(|&(h, _)| h).collect::<Vec<_>>();
            for &h in &holes {
                assert!(h < num_holes, "Hole {} out of range 0..{}", h, num_holes);
            }
            holes.sort_unstable();
            let len = holes.len();
            holes.dedup();
            assert_eq!(holes.len(), len, "A color must not mention a hole twice");
            choice_to_holes.push(holes);
        }

        let state_to_holes = (0..quotient_mdp.num_states())
            .map(|s| {
                let mut holes = quotient_mdp
                    .choices(s)
                    .flat_map(|c| choice_to_holes[c].iter().copied())
                    .collect::<Vec<_>>();
                holes.sort_unstable();
                holes.dedup();
                holes
            })
            .collect();

        Self {
            num_holes,
            choice_colors,
            choice_to_holes,
            state_to_holes,
        }
    }

    pub fn num_holes(&self) -> usize {
        self.num_holes
    }

    pub fn color(&self, choice: usize) -> &Color {
        &self.choice_colors[choice]
    }

    pub fn choice_to_holes(&self) -> &[Vec<HoleIndex>] {
        &self.choice_to_holes
    }

    /// Holes relevant in each quotient state.
    pub fn state_to_holes(&self) -> &[Vec<HoleIndex>] {
        &self.state_to_holes
    }

    /// Returns true if the choice is enabled by some member of the family.
    pub fn choice_consistent(&self, choice: usize, family: &Family) -> bool {
        self.choice_colors[choice].iter().all(|&(h, o)| family[h].contains(o))
    }

    /// Option the choice requires for the given hole, if any.
    pub fn choice_option(&self, choice: usize, hole: HoleIndex) -> Option<OptionIndex> {
        self.choice_colors[choice].iter().find(|&&(h, _)| h == hole).map(|&(_, o)| o)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::fixtures;

    #[test]
    fn test_state_to_holes() {
        let sketch = fixtures::three_hole_sketch();
        let coloring = &sketch.quotient.coloring;
        assert_eq!(coloring.num_holes(), 3);
        assert_eq!(coloring.state_to_holes()[0], vec![0]);
        assert_eq!(coloring.state_to_holes()[1], vec![0, 1]);
        assert_eq!(coloring.state_to_holes()[2], vec![2]);
        assert!(coloring.state_to_holes()[3].is_empty());
    }

    #[test]
    fn test_choice_consistent() {
        let sketch = fixtures::three_hole_sketch();
        let coloring = &sketch.quotient.coloring;
        let mut family = sketch.quotient.design_space.copy();
        family.assume_hole_options(1, vec![1]);

        // s1 choices are ordered (h0, h1) = (0,0), (0,1), (1,0), (1,1)
        let s1 = sketch.quotient.quotient_mdp.choices(1).collect::<Vec<_>>();
        assert!(!coloring.choice_consistent(s1[0], &family));
        assert!(coloring.choice_consistent(s1[1], &family));
        assert_eq!(coloring.choice_option(s1[2], 0), Some(1));
        assert_eq!(coloring.choice_option(s1[2], 2), None);
    }
}
