//! # paynt-rs: conflict generation for inductive synthesis
//!
//! A *sketch* is a probabilistic program with *holes*: each hole picks one of a
//! few options, and every combination of options is a *member* of the design
//! space. The reachable states of all members together form the quotient MDP,
//! whose choices are *colored* by the hole options they require.
//!
//! Counterexample-guided inductive synthesis (CEGIS) checks one member at a
//! time. When a member violates a property, a [`ConflictGenerator`] computes a
//! *conflict*: a set of holes whose options in the member already explain the
//! violation. All members agreeing with the violating one on the conflict are
//! then excluded at once by the [`CegisSolver`].
//!
//! ## Engines
//!
//! - [`StormGenerator`]: searches the chain of the member, registering holes
//!   wave by wave in order of discovery and freezing unexplored states at the
//!   bound provided by the family.
//! - [`MdpGenerator`]: runs the same search on a submodel in which the *simple*
//!   holes stay free, so one conflict covers all their options. A satisfied
//!   submodel yields an accepting subfamily for free.
//! - [`HybridGenerator`]: runs both engines side by side, either returning both
//!   conflicts or benchmarking one against the other.
//! - `SwitssGenerator` (feature `switss`): conflicts from small witnessing
//!   subsystems.
//!
//! ## Quick start
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use paynt_rs::cegis::CegisSolver;
//! use paynt_rs::conflict::{create_generator, ConflictRequest, GeneratorKind};
//! use paynt_rs::property::{Comparison, Property};
//! use paynt_rs::sketch::SketchBuilder;
//!
//! // s0 --h--> {bad, done}
//! let mut b = SketchBuilder::new();
//! let h = b.hole("h", &["risky", "safe"]);
//! b.state(&[]);
//! b.choice(&[(h, 0)], &[(1, 0.5), (2, 0.5)]);
//! b.choice(&[(h, 1)], &[(1, 0.01), (2, 0.99)]);
//! b.state(&["bad"]);
//! b.choice(&[], &[(1, 1.0)]);
//! b.state(&["done"]);
//! b.choice(&[], &[(2, 1.0)]);
//! b.constraint(Property::reachability("bad", Comparison::LessEqual, 0.1));
//! let sketch = b.build();
//!
//! let quotient = Rc::clone(&sketch.quotient);
//! let mut family = quotient.design_space.copy();
//! quotient.build(&mut family);
//!
//! let mut solver = CegisSolver::new(&family);
//! let mut generator = create_generator(Rc::clone(&quotient), GeneratorKind::Storm).unwrap();
//! generator.initialize();
//!
//! let assignment = solver.pick_assignment(&family).unwrap();
//! let property = quotient.specification.constraints[0].clone();
//! let member_result = quotient.check_member(&assignment, &property);
//! assert!(!member_result.sat);
//!
//! let dtmc = quotient.build_dtmc(&assignment);
//! let request = ConflictRequest { index: 0, property, member_result: Some(member_result), family_result: None };
//! let result = generator.construct_conflicts(&family, &assignment, &dtmc, &[request], None);
//! assert_eq!(result.conflicts, vec![vec![h]]);
//!
//! solver.exclude_conflicts(&family, &assignment, &result.conflicts);
//! let next = solver.pick_assignment(&family).unwrap();
//! assert_eq!(next.option(h), 1);
//! ```
//!
//! ## Binary decision diagrams
//!
//! The candidate space is kept in a small complement-edge BDD manager
//! ([`Bdd`][crate::bdd::Bdd]). Variables are 1-indexed, so that literals can be
//! written DIMACS-style, and the manager owns all nodes; [`Ref`][crate::reference::Ref]
//! handles are cheap copies.
//!
//! [`ConflictGenerator`]: crate::conflict::ConflictGenerator
//! [`CegisSolver`]: crate::cegis::CegisSolver
//! [`StormGenerator`]: crate::conflict::StormGenerator
//! [`MdpGenerator`]: crate::conflict::MdpGenerator
//! [`HybridGenerator`]: crate::conflict::HybridGenerator

pub mod bdd;
pub mod bitvector;
pub mod cegis;
pub mod checker;
pub mod coloring;
pub mod conflict;
pub mod counterexample;
pub mod error;
pub mod family;
pub mod model;
pub mod property;
pub mod quotient;
pub mod reference;
pub mod sat;
pub mod sketch;
pub mod timer;

#[cfg(test)]
pub(crate) mod fixtures;
