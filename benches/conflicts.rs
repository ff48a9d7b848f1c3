//! Conflict construction benchmarks.
//!
//! Run with:
//! ```bash
//! cargo bench --bench conflicts
//! ```

use std::rc::Rc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use paynt_rs::conflict::{create_generator, ConflictRequest, GeneratorKind, SimpleHolePolicy};
use paynt_rs::family::Family;
use paynt_rs::property::{Comparison, Property};
use paynt_rs::sketch::{Sketch, SketchBuilder};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// A chain of `n` states, each choosing by its own hole between two random
/// failure probabilities. State `n` fails, state `n + 1` succeeds.
fn random_chain(n: usize, seed: u64) -> Sketch {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let bad = n;
    let done = n + 1;

    let mut b = SketchBuilder::new();
    let holes = (0..n)
        .map(|i| b.hole(&format!("h{}", i), &["a", "b"]))
        .collect::<Vec<_>>();
    for (i, &h) in holes.iter().enumerate() {
        b.state(&[]);
        let next = if i + 1 < n { i + 1 } else { done };
        for option in 0..2 {
            let p = rng.random_range(0.0..0.05);
            b.choice(&[(h, option)], &[(bad, p), (next, 1.0 - p)]);
        }
    }
    b.state(&["bad"]);
    b.choice(&[], &[(bad, 1.0)]);
    b.state(&["done"]);
    b.choice(&[], &[(done, 1.0)]);
    b.constraint(Property::reachability("bad", Comparison::LessEqual, 0.01));
    b.build()
}

fn bench_conflicts(c: &mut Criterion) {
    let mut group = c.benchmark_group("construct_conflicts");
    group.sample_size(20);

    for n in [8, 16, 32] {
        let sketch = random_chain(n, 42);
        let quotient = Rc::clone(&sketch.quotient);
        let mut family = quotient.design_space.copy();
        quotient.build(&mut family);
        let assignment: Family = family.assignment(&vec![0; n]);
        let dtmc = quotient.build_dtmc(&assignment);
        let property = quotient.specification.constraints[0].clone();
        let family_result = family.mdp().map(|mdp| mdp.model_check_property(&property));

        for kind in [GeneratorKind::Storm, GeneratorKind::Mdp(SimpleHolePolicy::None)] {
            let request = ConflictRequest {
                index: 0,
                property: property.clone(),
                member_result: None,
                family_result: family_result.clone(),
            };
            group.bench_with_input(BenchmarkId::new(kind.to_string(), n), &n, |b, _| {
                let mut generator = create_generator(Rc::clone(&quotient), kind).unwrap();
                generator.initialize();
                b.iter(|| {
                    generator.construct_conflicts(
                        &family,
                        &assignment,
                        &dtmc,
                        std::slice::from_ref(&request),
                        None,
                    )
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_conflicts);
criterion_main!(benches);
