//! # tilefabric-runtime - Threaded Reference Executor
//!
//! Runs a verified [`tilefabric_core::Graph`] on the host: every core
//! program, link forwarder and started DMA transfer gets its own scoped
//! thread, and the runtime sequence runs on the calling thread.
//!
//! ## Architecture
//!
//! - **Channels**: a `parking_lot` mutex and condition variable around the
//!   core crate's `FifoCursor`. An acquire that is not ready parks the tile.
//! - **Tile workers**: interpret `CoreProgram` steps on real data, calling
//!   host kernels from a [`KernelRegistry`].
//! - **DMA engine**: moves host tensor data through shim endpoints along each
//!   task's size descriptor and signals completion tokens.
//! - **Deadlock detection**: a wait that sees no progress anywhere in the
//!   run for [`RunConfig::deadlock_timeout`] fails the run with
//!   [`RuntimeError::Deadlock`]. Slow but moving runs never time out.
//!
//! ## Example
//!
//! ```
//! use tilefabric_core::*;
//! use tilefabric_runtime::{HostTensor, KernelRegistry, Simulator};
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let mut graph = Graph::new(DeviceFamily::Npu1);
//! let shim = graph.tile(0, 0)?;
//! let core = graph.tile(0, 2)?;
//! let elem = TensorType::vector(DType::I32, 1)?;
//! let input = graph.object_fifo("in", shim, core, 2, elem.clone())?;
//! let output = graph.object_fifo("out", core, shim, 2, elem)?;
//!
//! let mut program = ProgramBuilder::new();
//! program.for_range(8, |body| {
//!     body.acquire(input, Port::Consume, 1)
//!         .acquire(output, Port::Produce, 1)
//!         .copy(
//!             Operand::element(output, Port::Produce, 0, 0),
//!             Operand::element(input, Port::Consume, 0, 0),
//!         )
//!         .release(input, Port::Consume, 1)
//!         .release(output, Port::Produce, 1);
//! });
//! graph.core(core, program.build())?;
//!
//! let data = TensorType::vector(DType::I32, 8)?;
//! let src = graph.host_arg(data.clone());
//! let dst = graph.host_arg(data);
//! graph.memcpy_nd(input, src, SizeDescriptor::new(vec![8])?, Some(1), false)?;
//! graph.memcpy_nd(output, dst, SizeDescriptor::new(vec![8])?, Some(0), false)?;
//! graph.dma_wait(&[output])?;
//!
//! let inputs = vec![HostTensor::from_fn(8, |i| i as i32 * 3), HostTensor::zeros(8)];
//! let result = Simulator::new(&graph).run(&KernelRegistry::new(), inputs)?;
//! assert_eq!(result.host(dst).unwrap().as_slice(), &[0, 3, 6, 9, 12, 15, 18, 21]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod designs;
pub mod element;
pub mod error;
pub mod host;
pub mod kernel;
pub mod simulator;

mod completion;
mod dma_engine;
mod fabric;
mod fifo;
mod forwarder;
mod tile_worker;

pub use config::RunConfig;
pub use element::Element;
pub use error::{Result, RuntimeError};
pub use host::HostTensor;
pub use kernel::{Kernel, KernelArgs, KernelError, KernelRegistry, KernelValue};
pub use simulator::{RunOutput, RunStats, Simulator};

use tilefabric_core::Graph;

/// Run `graph` with the configuration taken from the environment.
pub fn run<T: Element>(graph: &Graph, kernels: &KernelRegistry<T>, inputs: Vec<HostTensor<T>>) -> Result<RunOutput<T>> {
    Simulator::new(graph).with_config(RunConfig::from_env()).run(kernels, inputs)
}
