//! Odd/Even Split Example
//!
//! Declares the odd/even split design, prints its description, runs it on a
//! ramp of integers and shows how the values were routed.
//!
//! ## Running with Tracing
//!
//! ```bash
//! # Basic execution
//! cargo run --example odd_even
//!
//! # Per-tile and per-transfer events
//! TILEFABRIC_TRACING_DIRECTIVES=tilefabric_runtime=debug cargo run --example odd_even
//!
//! # Every FIFO acquire and release
//! TILEFABRIC_TRACE_ELEMENTS=1 TILEFABRIC_TRACING_DIRECTIVES=tilefabric_runtime=trace cargo run --example odd_even
//! ```

use std::error::Error;

use tilefabric_core::GraphDescription;
use tilefabric_runtime::designs::odd_even_split;
use tilefabric_runtime::{HostTensor, KernelRegistry, RunConfig, Simulator};
use tilefabric_tracing::{init_global_tracing, TracingConfig};

const ELEMENTS: usize = 16;

fn main() -> Result<(), Box<dyn Error>> {
    init_global_tracing(&TracingConfig::from_env())?;

    let separator = "=".repeat(80);
    println!("{}", separator);
    println!("Odd/Even Split");
    println!("{}", separator);

    let design = odd_even_split(ELEMENTS, true)?;
    println!("{}", GraphDescription::from_graph(&design.graph));

    let inputs = vec![
        HostTensor::from_fn(ELEMENTS, |i| i as i32),
        HostTensor::zeros(ELEMENTS),
        HostTensor::zeros(ELEMENTS),
    ];
    let result = Simulator::new(&design.graph)
        .with_config(RunConfig::from_env())
        .run(&KernelRegistry::new(), inputs)?;

    let out = result.host(design.out).map(HostTensor::as_slice).unwrap_or_default();
    let odd = result.host(design.odd).map(HostTensor::as_slice).unwrap_or_default();
    println!("input: {:?}", (0..ELEMENTS).collect::<Vec<_>>());
    println!("out:   {:?}", out);
    println!("odd:   {:?}", odd);

    let stats = result.stats();
    println!();
    println!("Run Statistics:");
    println!("  Elapsed:              {:?}", stats.elapsed);
    println!("  Verification:         {} us", stats.verify_us);
    println!("  Transfers:            {}", stats.transfers);
    println!("  Elements transferred: {}", stats.elements_transferred);
    println!("  Elements forwarded:   {}", stats.elements_forwarded);
    println!("  Program steps:        {}", stats.program_steps);
    Ok(())
}
