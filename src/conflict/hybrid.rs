//! Running several conflict engines side by side.
//!
//! In [`HybridMode::Benchmark`] the chain engine provides the conflicts that are
//! actually returned, while the MDP engine (and the witnessing-subsystem engine,
//! when compiled) run on the same request for comparison. In
//! [`HybridMode::Combined`] both the chain and the MDP conflicts are returned.

use std::rc::Rc;

use log::{info, warn};

use crate::conflict::mdp::generalize;
use crate::conflict::storm::{dtmc_conflicts, new_counterexample_generator};
use crate::conflict::{Conflict, ConflictGenerator, ConflictRequest, ConflictResult};
use crate::counterexample::CounterexampleGenerator;
use crate::family::Family;
use crate::quotient::{Quotient, SubModel};
use crate::timer::Timer;

#[cfg(feature = "switss")]
use crate::conflict::switss::SwitssGenerator;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HybridMode {
    Benchmark,
    Combined,
}

/// Conflict sizes and times collected by the benchmark harness.
#[derive(Debug, Default, Clone)]
pub struct ConflictStats {
    pub mdp_conflicts: Vec<usize>,
    pub dtmc_conflicts: Vec<usize>,
    pub switss_conflicts: Vec<usize>,
    /// Conflict search on the generalized submodel. Building and checking
    /// that submodel is not timed.
    pub mdp_timer: Timer,
    pub dtmc_timer: Timer,
    pub switss_timer: Timer,
    /// MDP conflicts that did not exclude their generalized family.
    pub unconfirmed_conflicts: usize,
}

/// Summary of [`ConflictStats`], rounded to three decimals.
///
/// MDP times cover the conflict search alone, so they compare directly with
/// the DTMC times. The generalized submodel is built and checked outside the
/// timer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictSummary {
    pub mdp_avg_conflict_size: Option<f64>,
    pub dtmc_avg_conflict_size: Option<f64>,
    pub switss_avg_conflict_size: Option<f64>,
    pub mdp_total_time: f64,
    pub dtmc_total_time: f64,
    pub switss_total_time: f64,
    pub mdp_avg_time_per_conflict: Option<f64>,
    pub dtmc_avg_time_per_conflict: Option<f64>,
    pub switss_avg_time_per_conflict: Option<f64>,
    pub unconfirmed_conflicts: usize,
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

fn average_size(sizes: &[usize]) -> Option<f64> {
    (!sizes.is_empty()).then(|| round3(sizes.iter().sum::<usize>() as f64 / sizes.len() as f64))
}

fn average_time(timer: &Timer, sizes: &[usize]) -> Option<f64> {
    (!sizes.is_empty()).then(|| round3(timer.time() / sizes.len() as f64))
}

impl ConflictStats {
    pub fn summary(&self) -> ConflictSummary {
        ConflictSummary {
            mdp_avg_conflict_size: average_size(&self.mdp_conflicts),
            dtmc_avg_conflict_size: average_size(&self.dtmc_conflicts),
            switss_avg_conflict_size: average_size(&self.switss_conflicts),
            mdp_total_time: round3(self.mdp_timer.time()),
            dtmc_total_time: round3(self.dtmc_timer.time()),
            switss_total_time: round3(self.switss_timer.time()),
            mdp_avg_time_per_conflict: average_time(&self.mdp_timer, &self.mdp_conflicts),
            dtmc_avg_time_per_conflict: average_time(&self.dtmc_timer, &self.dtmc_conflicts),
            switss_avg_time_per_conflict: average_time(&self.switss_timer, &self.switss_conflicts),
            unconfirmed_conflicts: self.unconfirmed_conflicts,
        }
    }
}

#[derive(Debug)]
pub struct HybridGenerator {
    quotient: Rc<Quotient>,
    mode: HybridMode,
    dtmc_generator: Option<CounterexampleGenerator>,
    mdp_generator: Option<CounterexampleGenerator>,
    #[cfg(feature = "switss")]
    switss_generator: Option<SwitssGenerator>,
    stats: ConflictStats,
}

impl HybridGenerator {
    pub fn new(quotient: Rc<Quotient>, mode: HybridMode) -> Self {
        Self {
            quotient,
            mode,
            dtmc_generator: None,
            mdp_generator: None,
            #[cfg(feature = "switss")]
            switss_generator: None,
            stats: ConflictStats::default(),
        }
    }

    pub fn mode(&self) -> HybridMode {
        self.mode
    }

    pub fn stats(&self) -> &ConflictStats {
        &self.stats
    }

    pub fn conflict_stats(&self) -> ConflictSummary {
        self.stats.summary()
    }

    pub fn print_conflict_stats(&self) {
        let s = &self.stats;
        info!("MDP conflicts {:?}", s.mdp_conflicts);
        info!("MDP time {:.3}", s.mdp_timer.time());
        info!("DTMC conflicts {:?}", s.dtmc_conflicts);
        info!("DTMC time {:.3}", s.dtmc_timer.time());
        if !s.switss_conflicts.is_empty() {
            info!("SWITSS conflicts {:?}", s.switss_conflicts);
            info!("SWITSS time {:.3}", s.switss_timer.time());
        }
        if s.unconfirmed_conflicts > 0 {
            info!("Unconfirmed MDP conflicts: {}", s.unconfirmed_conflicts);
        }
    }

    /// MDP conflict for the first request, with the accepting subfamily.
    fn mdp_conflict(
        &mut self,
        family: &Family,
        assignment: &Family,
        request: &ConflictRequest,
        accepting_assignment: Option<Family>,
    ) -> (Conflict, Option<Family>) {
        let Some(family_mdp) = family.mdp().cloned() else {
            panic!("Family {} has no built submodel", family);
        };
        let generalization = generalize(&self.quotient, family, assignment, &[], request, accepting_assignment);

        let Some(generator) = self.mdp_generator.as_mut() else {
            panic!("{:?} hybrid generator used before initialization", self.mode);
        };
        self.stats.mdp_timer.start();
        generator.prepare_mdp(&generalization.submdp, &generalization.simple_free, assignment);
        let conflict = generator.construct_conflict(
            request.index,
            request.property.threshold,
            None,
            &family_mdp.quotient_state_map,
        );
        self.stats.mdp_timer.stop();
        (conflict, generalization.accepting_assignment)
    }
}

impl ConflictGenerator for HybridGenerator {
    fn name(&self) -> &str {
        match self.mode {
            HybridMode::Benchmark => "(Benchmark)",
            HybridMode::Combined => "(Storm - MDP + DTMC)",
        }
    }

    fn initialize(&mut self) {
        self.dtmc_generator = Some(new_counterexample_generator(&self.quotient));
        self.mdp_generator = Some(new_counterexample_generator(&self.quotient));
        #[cfg(feature = "switss")]
        {
            self.switss_generator = (self.mode == HybridMode::Benchmark).then(|| {
                let mut generator = SwitssGenerator::new(Rc::clone(&self.quotient), true);
                generator.initialize();
                generator
            });
        }
        self.stats = ConflictStats::default();
    }

    fn construct_conflicts(
        &mut self,
        family: &Family,
        assignment: &Family,
        dtmc: &SubModel,
        requests: &[ConflictRequest],
        accepting_assignment: Option<Family>,
    ) -> ConflictResult {
        if self.mode == HybridMode::Combined {
            assert_eq!(requests.len(), 1, "Combined conflicts handle exactly one conflict request");
        }
        let Some(dtmc_generator) = self.dtmc_generator.as_mut() else {
            panic!("{:?} hybrid generator used before initialization", self.mode);
        };

        self.stats.dtmc_timer.start();
        let mut conflicts = dtmc_conflicts(dtmc_generator, family, dtmc, requests);
        self.stats.dtmc_timer.stop();
        self.stats.dtmc_conflicts.push(conflicts[0].len());

        let request = &requests[0];
        let (mdp_conflict, accepting_assignment) =
            self.mdp_conflict(family, assignment, request, accepting_assignment);
        self.stats.mdp_conflicts.push(mdp_conflict.len());

        match self.mode {
            HybridMode::Combined => {
                conflicts.push(mdp_conflict);
            }
            HybridMode::Benchmark => {
                if !self
                    .quotient
                    .family_excludes(family, assignment, &mdp_conflict, &request.property)
                {
                    self.stats.unconfirmed_conflicts += 1;
                    warn!(
                        "MDP conflict {:?} does not exclude its family for {}",
                        mdp_conflict, request.property
                    );
                }

                #[cfg(feature = "switss")]
                if !request.property.is_reward() {
                    if let Some(switss) = self.switss_generator.as_mut() {
                        self.stats.switss_timer.start();
                        let result = switss.construct_conflicts(
                            family,
                            assignment,
                            dtmc,
                            std::slice::from_ref(request),
                            None,
                        );
                        self.stats.switss_timer.stop();
                        if let Some(conflict) = result.conflicts.first() {
                            self.stats.switss_conflicts.push(conflict.len());
                        }
                    }
                }
            }
        }

        ConflictResult {
            conflicts,
            accepting_assignment,
        }
    }
}
