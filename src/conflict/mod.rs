//! Conflict generators.
//!
//! A [`ConflictGenerator`] turns a violating member into conflicts: sets of
//! holes whose values in the member already explain the violation. Every
//! member agreeing with the assignment on a conflict violates the same
//! property, so the search may exclude all of them at once.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::str::FromStr;

use crate::bitvector::BitVector;
use crate::checker::{MdpPropertyResult, PropertyResult};
use crate::error::ConfigError;
use crate::family::{Family, HoleIndex};
use crate::property::Property;
use crate::quotient::{Quotient, SubModel};

pub mod hybrid;
pub mod mdp;
pub mod storm;
#[cfg(feature = "switss")]
pub mod switss;

pub use hybrid::{ConflictStats, HybridGenerator, HybridMode};
pub use mdp::MdpGenerator;
pub use storm::StormGenerator;
#[cfg(feature = "switss")]
pub use switss::SwitssGenerator;

/// Sorted set of holes.
pub type Conflict = Vec<HoleIndex>;

/// A property the member violates, with what is known about it.
#[derive(Debug, Clone)]
pub struct ConflictRequest {
    /// Position of the property in [`Specification::formulae`](crate::property::Specification::formulae).
    pub index: usize,
    pub property: Property,
    pub member_result: Option<PropertyResult>,
    /// Result over the whole family; its primary values bound the horizon.
    pub family_result: Option<MdpPropertyResult>,
}

#[derive(Debug, Clone)]
pub struct ConflictResult {
    pub conflicts: Vec<Conflict>,
    /// Subfamily found to satisfy the specification, if any.
    pub accepting_assignment: Option<Family>,
}

pub trait ConflictGenerator {
    fn name(&self) -> &str;

    /// Resets the engine; must precede the first `construct_conflicts`.
    fn initialize(&mut self);

    fn construct_conflicts(
        &mut self,
        family: &Family,
        assignment: &Family,
        dtmc: &SubModel,
        requests: &[ConflictRequest],
        accepting_assignment: Option<Family>,
    ) -> ConflictResult;
}

/// How many times each simple hole occurred in a conflict.
#[derive(Debug, Default, Clone)]
pub struct HoleStatistics {
    counts: BTreeMap<HoleIndex, usize>,
}

impl HoleStatistics {
    pub fn record(&mut self, conflict: &[HoleIndex], simple: &BitVector) {
        for &h in conflict {
            if simple.get(h) {
                *self.counts.entry(h).or_default() += 1;
            }
        }
    }

    pub fn count(&self, hole: HoleIndex) -> usize {
        self.counts.get(&hole).copied().unwrap_or(0)
    }

    /// Mean occurrence count over the given number of simple holes.
    pub fn average(&self, num_simple_holes: usize) -> f64 {
        if num_simple_holes == 0 {
            return 0.0;
        }
        self.counts.values().sum::<usize>() as f64 / num_simple_holes as f64
    }

    pub fn counts(&self) -> &BTreeMap<HoleIndex, usize> {
        &self.counts
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}

/// Which simple holes the MDP generalization fixes anyway.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SimpleHolePolicy {
    /// Leave every simple hole free.
    #[default]
    None,
    /// Fix each simple hole with probability one half.
    Random { seed: u64 },
    /// Fix simple holes that occurred in past conflicts at least as often as average.
    FrequencyWeighted,
    /// Fix simple holes relevant closer to the initial state than average.
    PositionAware,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GeneratorKind {
    Storm,
    Mdp(SimpleHolePolicy),
    Hybrid,
    Benchmark,
    Switss { mdp: bool },
}

impl GeneratorKind {
    pub const NAMES: [&'static str; 9] = [
        "storm",
        "mdp",
        "mdp-random",
        "mdp-frequency",
        "mdp-position",
        "hybrid",
        "benchmark",
        "switss",
        "switss-dtmc",
    ];
}

impl FromStr for GeneratorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "storm" => GeneratorKind::Storm,
            "mdp" => GeneratorKind::Mdp(SimpleHolePolicy::None),
            "mdp-random" => GeneratorKind::Mdp(SimpleHolePolicy::Random { seed: 0 }),
            "mdp-frequency" => GeneratorKind::Mdp(SimpleHolePolicy::FrequencyWeighted),
            "mdp-position" => GeneratorKind::Mdp(SimpleHolePolicy::PositionAware),
            "hybrid" => GeneratorKind::Hybrid,
            "benchmark" => GeneratorKind::Benchmark,
            "switss" => GeneratorKind::Switss { mdp: true },
            "switss-dtmc" => GeneratorKind::Switss { mdp: false },
            _ => {
                return Err(ConfigError::UnknownGenerator(
                    s.to_string(),
                    GeneratorKind::NAMES.join(", "),
                ))
            }
        };
        Ok(kind)
    }
}

impl Display for GeneratorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GeneratorKind::Storm => "storm",
            GeneratorKind::Mdp(SimpleHolePolicy::None) => "mdp",
            GeneratorKind::Mdp(SimpleHolePolicy::Random { .. }) => "mdp-random",
            GeneratorKind::Mdp(SimpleHolePolicy::FrequencyWeighted) => "mdp-frequency",
            GeneratorKind::Mdp(SimpleHolePolicy::PositionAware) => "mdp-position",
            GeneratorKind::Hybrid => "hybrid",
            GeneratorKind::Benchmark => "benchmark",
            GeneratorKind::Switss { mdp: true } => "switss",
            GeneratorKind::Switss { mdp: false } => "switss-dtmc",
        };
        write!(f, "{}", s)
    }
}

pub fn create_generator(
    quotient: Rc<Quotient>,
    kind: GeneratorKind,
) -> Result<Box<dyn ConflictGenerator>, ConfigError> {
    let generator: Box<dyn ConflictGenerator> = match kind {
        GeneratorKind::Storm => Box::new(StormGenerator::new(quotient)),
        GeneratorKind::Mdp(policy) => Box::new(MdpGenerator::new(quotient, policy)),
        GeneratorKind::Hybrid => Box::new(HybridGenerator::new(quotient, HybridMode::Combined)),
        GeneratorKind::Benchmark => Box::new(HybridGenerator::new(quotient, HybridMode::Benchmark)),
        #[cfg(feature = "switss")]
        GeneratorKind::Switss { mdp } => Box::new(SwitssGenerator::new(quotient, mdp)),
        #[cfg(not(feature = "switss"))]
        GeneratorKind::Switss { .. } => return Err(ConfigError::MissingFeature(kind.to_string(), "switss")),
    };
    Ok(generator)
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::fixtures;

    #[test]
    fn test_parse_kinds() {
        for name in GeneratorKind::NAMES {
            let kind: GeneratorKind = name.parse().unwrap();
            assert_eq!(kind.to_string(), name);
        }
        assert_eq!(
            "mdp-frequency".parse::<GeneratorKind>(),
            Ok(GeneratorKind::Mdp(SimpleHolePolicy::FrequencyWeighted))
        );
    }

    #[test]
    fn test_unknown_kind() {
        let err = "z3".parse::<GeneratorKind>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownGenerator(ref name, _) if name == "z3"));
        assert!(err.to_string().contains("storm"));
    }

    #[test]
    fn test_names() {
        let sketch = fixtures::three_hole_sketch();
        let expected = [
            (GeneratorKind::Storm, "(Storm)"),
            (GeneratorKind::Mdp(SimpleHolePolicy::None), "(MDP generalization)"),
            (GeneratorKind::Hybrid, "(Storm - MDP + DTMC)"),
            (GeneratorKind::Benchmark, "(Benchmark)"),
        ];
        for (kind, name) in expected {
            let generator = create_generator(Rc::clone(&sketch.quotient), kind).unwrap();
            assert_eq!(generator.name(), name);
        }
    }

    #[cfg(not(feature = "switss"))]
    #[test]
    fn test_switss_requires_feature() {
        let sketch = fixtures::three_hole_sketch();
        let err = create_generator(Rc::clone(&sketch.quotient), GeneratorKind::Switss { mdp: true }).err();
        assert_eq!(err, Some(ConfigError::MissingFeature("switss".to_string(), "switss")));
    }

    #[test]
    fn test_hole_statistics() {
        let mut stats = HoleStatistics::default();
        let simple = BitVector::from_indices(4, [1, 3]);
        stats.record(&[0, 1], &simple);
        stats.record(&[1, 3], &simple);
        assert_eq!(stats.count(1), 2);
        assert_eq!(stats.count(0), 0);
        assert_eq!(stats.average(2), 1.5);
    }
}
