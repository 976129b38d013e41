//! # tilefabric-core - Spatial Tile Fabric Model
//!
//! Declaration, protocol and verification layer for a tile-based compute
//! fabric in which shim (I/O), memory and compute tiles exchange data only
//! through bounded object FIFOs and explicit DMA transfers.
//!
//! ## Architecture
//!
//! - **Graph**: an explicitly owned arena. Every tile, buffer, channel, link,
//!   kernel declaration, core program and DMA task is declared on a
//!   [`Graph`] and referred to by a `Copy` handle.
//! - **Channel protocol**: [`FifoCursor`] is the pure acquire/release state
//!   machine of one depth-N channel. It never blocks; `NotReady` is what an
//!   executor turns into a suspension.
//! - **DMA lifecycle**: [`TaskTable`] enforces `Created -> Started ->
//!   (Awaited) -> Freed` and buffer descriptor ownership per shim tile.
//! - **Verification**: [`GraphVerifier`] reports every structural violation
//!   of a declared graph in one pass.
//!
//! ## Example
//!
//! ```
//! use tilefabric_core::*;
//!
//! # fn main() -> tilefabric_core::Result<()> {
//! let mut graph = Graph::new(DeviceFamily::Npu1);
//! let shim = graph.tile(0, 0)?;
//! let core = graph.tile(0, 2)?;
//! let elem = TensorType::vector(DType::I32, 1)?;
//! let input = graph.object_fifo("in", shim, core, 2, elem.clone())?;
//! let output = graph.object_fifo("out", core, shim, 2, elem)?;
//!
//! let mut program = ProgramBuilder::new();
//! program.for_range(4, |body| {
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
//! let data = TensorType::vector(DType::I32, 4)?;
//! let src = graph.host_arg(data.clone());
//! let dst = graph.host_arg(data);
//! graph.memcpy_nd(input, src, SizeDescriptor::new(vec![1, 1, 1, 4])?, Some(1), false)?;
//! graph.memcpy_nd(output, dst, SizeDescriptor::new(vec![1, 1, 1, 4])?, Some(0), false)?;
//! graph.dma_wait(&[output])?;
//!
//! assert!(graph.verify().is_valid());
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod channel;
pub mod describe;
pub mod device;
pub mod dma;
pub mod error;
pub mod graph;
pub mod kernel;
pub mod link;
pub mod program;
pub mod sequence;
pub mod tile;
pub mod types;
pub mod verify;

pub use buffer::{Buffer, BufferId, InitialValue};
pub use channel::{Access, ChannelId, ElementHandle, FifoCursor, ObjectFifo, Port};
pub use describe::{CollectingSink, DiagnosticsSink, GraphDescription, TracingSink};
pub use device::{DeviceFamily, COMPUTE_TILE_MEMORY, MEM_TILE_MEMORY, SHIM_BD_COUNT};
pub use dma::{Direction, DmaTask, SizeDescriptor, TaskId, TaskState, TaskTable, TransferMode};
pub use error::{ErrorKind, FabricError, Result};
pub use graph::Graph;
pub use kernel::{ArgType, ExternalFunction, KernelId};
pub use link::{Link, LinkId};
pub use program::{CmpOp, CoreProgram, IndexExpr, KernelArg, Operand, Predicate, ProgramBuilder, Source, Step};
pub use sequence::{HostArgId, RuntimeSequence, SeqOp};
pub use tile::{Coord, Tile, TileId, TileRole};
pub use types::{DType, Scalar, TensorType};
pub use verify::{transfer_elements, verify_and_report, FlowSummary, GraphVerifier, VerificationReport, Violation};
