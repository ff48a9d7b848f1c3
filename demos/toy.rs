//! CEGIS on a toy sketch with a chosen conflict generator.
//!
//! Run with:
//! ```bash
//! cargo run --example toy -- --generator mdp --threshold 0.1
//! ```

use std::rc::Rc;

use clap::Parser;
use log::info;

use paynt_rs::cegis::CegisSolver;
use paynt_rs::conflict::{create_generator, ConflictRequest, GeneratorKind};
use paynt_rs::property::{Comparison, Property};
use paynt_rs::sketch::{Sketch, SketchBuilder};

#[derive(Debug, Parser)]
#[command(author, version, about = "Synthesize a toy sketch by CEGIS")]
struct Cli {
    /// Conflict generator.
    #[arg(long, value_name = "NAME", default_value = "storm")]
    generator: GeneratorKind,

    /// Upper bound on the probability of failure.
    #[arg(long, value_name = "FLOAT", default_value = "0.1")]
    threshold: f64,

    /// Bound unexplored states by the family result.
    #[arg(long)]
    bounds: bool,

    /// Log level.
    #[arg(long, value_name = "LEVEL", default_value = "Info")]
    log: simplelog::LevelFilter,
}

/// Three states with a hole each, one of them retrying in a loop.
fn toy_sketch(threshold: f64) -> Sketch {
    const S1: usize = 1;
    const S2: usize = 2;
    const BAD: usize = 3;
    const DONE: usize = 4;

    let mut b = SketchBuilder::new();
    let split = b.hole("split", &["even", "skewed"]);
    let guard = b.hole("guard", &["off", "on"]);
    let retry = b.hole("retry", &["stop", "again"]);

    b.state(&[]);
    b.choice(&[(split, 0)], &[(S1, 0.5), (S2, 0.5)]);
    b.choice(&[(split, 1)], &[(S1, 0.2), (S2, 0.8)]);

    b.state(&[]);
    for (s, g, p) in [(0, 0, 0.4), (0, 1, 0.1), (1, 0, 0.3), (1, 1, 0.05)] {
        b.choice(&[(split, s), (guard, g)], &[(BAD, p), (DONE, 1.0 - p)]);
    }

    b.state(&[]);
    b.choice(&[(retry, 0)], &[(DONE, 1.0)]);
    b.choice(&[(retry, 1)], &[(S2, 0.5), (BAD, 0.1), (DONE, 0.4)]);

    b.state(&["bad"]);
    b.choice(&[], &[(BAD, 1.0)]);
    b.state(&["done"]);
    b.choice(&[], &[(DONE, 1.0)]);

    b.constraint(Property::reachability("bad", Comparison::LessEqual, threshold));
    b.build()
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Cli::parse();

    simplelog::TermLogger::init(
        args.log,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let time_total = std::time::Instant::now();
    println!("args = {:?}", args);

    let sketch = toy_sketch(args.threshold);
    let quotient = Rc::clone(&sketch.quotient);
    let mut family = quotient.design_space.copy();
    quotient.build(&mut family);
    println!("design space: {} members", family.size());

    let mut solver = CegisSolver::new(&family);
    let mut generator = create_generator(Rc::clone(&quotient), args.generator)?;
    generator.initialize();
    println!("generator = {}", generator.name());

    let property = quotient.specification.constraints[0].clone();
    let family_result = args.bounds.then(|| {
        family
            .mdp()
            .map(|mdp| mdp.model_check_property(&property))
    });

    let mut iterations = 0;
    let mut solution = None;
    while let Some(assignment) = solver.pick_assignment(&family) {
        iterations += 1;
        let member_result = quotient.check_member(&assignment, &property);
        info!("Member {}: value = {:.4}", assignment, member_result.value);
        if member_result.sat {
            solution = Some(assignment);
            break;
        }

        let dtmc = quotient.build_dtmc(&assignment);
        let request = ConflictRequest {
            index: 0,
            property: property.clone(),
            member_result: Some(member_result),
            family_result: family_result.clone().flatten(),
        };
        let result = generator.construct_conflicts(&family, &assignment, &dtmc, &[request], None);
        println!("conflicts for {}: {:?}", assignment, result.conflicts);
        if let Some(accepting) = result.accepting_assignment {
            solution = Some(accepting);
            break;
        }
        solver.exclude_conflicts(&family, &assignment, &result.conflicts);
        println!("candidates left: {}", solver.count_candidates(&family));
    }

    match solution {
        Some(solution) => println!("solution after {} iterations: {}", iterations, solution),
        None => println!("no solution after {} iterations", iterations),
    }
    println!("total time: {:.3} s", time_total.elapsed().as_secs_f64());

    Ok(())
}
