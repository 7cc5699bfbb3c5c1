//! kalc - Kaleidoscope file runner.
//!
//! Reads a `.kal` source file, evaluates every top-level construct in
//! order, and prints the value of each top-level expression to stdout.

use anyhow::{bail, Context as _, Result};
use inkwell::context::Context;

use kalc_drv::{EvalOptions, EvalValue, Evaluator};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut options = EvalOptions::default();
    let mut file: Option<String> = None;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--parseonly" => options.parseonly = true,
            "--noexec" => options.noexec = true,
            "--no-optimize" => options.optimize = false,
            "--llvmdump" => options.llvmdump = true,
            "--verbose" => options.verbose = true,
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other if other.starts_with('-') => bail!("unknown option '{}'", other),
            path => {
                if file.replace(path.to_string()).is_some() {
                    bail!("expected exactly one input file");
                }
            }
        }
    }

    let Some(path) = file else {
        print_usage();
        bail!("missing input file");
    };
    let source =
        std::fs::read_to_string(&path).with_context(|| format!("failed to read '{}'", path))?;

    let context = Context::create();
    let mut evaluator = Evaluator::new(&context)?;

    for result in evaluator.eval(&source, &options) {
        let result = result?;

        if options.verbose {
            if let Some(ir) = &result.unoptimized_ir {
                eprintln!("{}\n", ir);
            }
            if let Some(ir) = &result.optimized_ir {
                eprintln!("{}\n", ir);
            }
        }

        match result.value {
            Some(EvalValue::Double(value)) => println!("{}", value),
            Some(EvalValue::Text(text)) => println!("{}", text),
            None => {}
        }
    }

    Ok(())
}

fn print_usage() {
    eprintln!(
        "usage: kalc [--parseonly] [--noexec] [--no-optimize] [--llvmdump] [--verbose] <file.kal>"
    );
}
