//! Chained Plus-One Example
//!
//! Two compute tiles each add one to every value of a 4096-element tensor,
//! the second one after branching on the parity of each element's first
//! value. The graph description is written as JSON when `--json` is given.
//!
//! ## Running with Tracing
//!
//! ```bash
//! # Basic execution
//! cargo run --example plus_one_chain --release
//!
//! # Tracing configured from the environment
//! TILEFABRIC_TRACING_FORMAT=json TILEFABRIC_TRACING_DIRECTIVES=tilefabric_runtime=debug cargo run --example plus_one_chain
//!
//! # Description of the declared graph
//! cargo run --example plus_one_chain -- --json
//! ```

use std::error::Error;

use tilefabric_core::{DeviceFamily, GraphDescription};
use tilefabric_runtime::designs::{chained_plus_one, reference_kernels, PLUS_ONE_TILE, PLUS_ONE_TILES};
use tilefabric_runtime::{HostTensor, RunConfig, Simulator};
use tilefabric_tracing::{init_global_tracing, TracingConfig};

fn main() -> Result<(), Box<dyn Error>> {
    init_global_tracing(&TracingConfig::from_env())?;

    let design = chained_plus_one(DeviceFamily::Npu1)?;
    if std::env::args().any(|arg| arg == "--json") {
        println!("{}", GraphDescription::from_graph(&design.graph).to_json()?);
        return Ok(());
    }

    let len = PLUS_ONE_TILE * PLUS_ONE_TILES;
    let inputs = vec![HostTensor::from_fn(len, |i| i as i32), HostTensor::zeros(len)];
    let result = Simulator::new(&design.graph)
        .with_config(RunConfig::from_env())
        .run(&reference_kernels(), inputs)?;

    let output = result.host(design.output).ok_or("output tensor missing")?;
    let mismatches = output
        .as_slice()
        .iter()
        .enumerate()
        .filter(|(i, &v)| v != *i as i32 + 2)
        .count();

    println!("first values: {:?}", &output.as_slice()[..8]);
    println!("mismatches:   {mismatches}");
    println!("elapsed:      {:?}", result.stats().elapsed);
    if mismatches > 0 {
        return Err(format!("{mismatches} value(s) differ from input + 2").into());
    }
    Ok(())
}
