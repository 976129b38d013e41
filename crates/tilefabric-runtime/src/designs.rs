//! Reference designs with their host kernels.
//!
//! Three small `i32` designs that together cover links through memory
//! tiles, data-dependent branches, local buffers, external kernel calls and
//! both DMA issue styles. The examples, integration tests and benchmarks
//! build on them.

use tilefabric_core::{
    ArgType, BufferId, ChannelId, DType, DeviceFamily, Graph, HostArgId, IndexExpr, InitialValue, KernelArg,
    Operand, Port, Predicate, ProgramBuilder, Result, Scalar, SizeDescriptor, TensorType,
};

use crate::kernel::{KernelArgs, KernelError, KernelRegistry};

/// Scalars per element of [`chained_plus_one`]
pub const PLUS_ONE_TILE: usize = 256;
/// Elements [`chained_plus_one`] pushes through the chain
pub const PLUS_ONE_TILES: usize = 16;

fn i32s(len: usize) -> Result<TensorType> {
    TensorType::vector(DType::I32, len)
}

fn flat(len: usize) -> Result<SizeDescriptor> {
    SizeDescriptor::new(vec![1, 1, 1, len])
}

/// `c[i] = a[i] + 1` over the first `n` scalars; arguments `(a, c, n)`.
pub fn vector_plus_one(args: &mut KernelArgs<i32>) -> std::result::Result<(), KernelError> {
    let n = usize::try_from(args.scalar(2)?.as_i64()).map_err(|_| KernelError::Failed("negative length".into()))?;
    let input: Vec<i32> = args.tensor(0)?.iter().take(n).copied().collect();
    let output = args.tensor_mut(1)?;
    if output.len() < input.len() {
        return Err(KernelError::Failed(format!(
            "output holds {} scalars, {n} requested",
            output.len()
        )));
    }
    for (out, value) in output.iter_mut().zip(input) {
        *out = value.wrapping_add(1);
    }
    Ok(())
}

/// Partition the first `n` scalars of `input` into `evens` and `odds`,
/// packed from index 0; arguments `(input, evens, odds, n)`.
pub fn odd_even(args: &mut KernelArgs<i32>) -> std::result::Result<(), KernelError> {
    let n = usize::try_from(args.scalar(3)?.as_i64()).map_err(|_| KernelError::Failed("negative length".into()))?;
    let input: Vec<i32> = args.tensor(0)?.iter().take(n).copied().collect();
    let (evens, odds): (Vec<i32>, Vec<i32>) = input.into_iter().partition(|value| value.rem_euclid(2) == 0);
    args.tensor_mut(1)?.iter_mut().zip(evens).for_each(|(slot, value)| *slot = value);
    args.tensor_mut(2)?.iter_mut().zip(odds).for_each(|(slot, value)| *slot = value);
    Ok(())
}

/// Registry holding every kernel the reference designs call
pub fn reference_kernels() -> KernelRegistry<i32> {
    let mut kernels = KernelRegistry::new();
    kernels.register("vector_plus_one", vector_plus_one).register("odd_even", odd_even);
    kernels
}

/// Handles of [`odd_even_split`]
#[derive(Debug, Clone)]
pub struct OddEvenSplit {
    pub graph: Graph,
    pub input: HostArgId,
    pub odd: HostArgId,
    pub out: HostArgId,
    pub out_channel: ChannelId,
    pub odd_channel: ChannelId,
    /// Even values at their input position, `-1` elsewhere
    pub evens: BufferId,
    /// Odd values at their input position, `-2` elsewhere
    pub odds: BufferId,
}

/// Odd/even split through local buffers.
///
/// `in` enters through memory tile (0,1), compute tile (0,2) sorts every value
/// into one of two buffers by parity, then streams both buffers back through
/// memory tile (1,1) as `out` (evens) and `odd`. The sequence uses collapsed
/// transfers and waits on `out`; with `wait_on_odd` it also waits on `odd`.
pub fn odd_even_split(elements: usize, wait_on_odd: bool) -> Result<OddEvenSplit> {
    let mut graph = Graph::new(DeviceFamily::Npu1);
    let shim0 = graph.tile(0, 0)?;
    let shim1 = graph.tile(1, 0)?;
    let mem0 = graph.tile(0, 1)?;
    let mem1 = graph.tile(1, 1)?;
    let core = graph.tile(0, 2)?;

    let input = graph.object_fifo("in", shim0, mem0, 2, i32s(1)?)?;
    let in1 = graph.object_fifo("in1", mem0, core, 2, i32s(1)?)?;
    graph.link(input, in1)?;
    let out1 = graph.object_fifo("out1", core, mem1, 2, i32s(1)?)?;
    let out_channel = graph.object_fifo("out", mem1, shim1, 2, i32s(1)?)?;
    graph.link(out1, out_channel)?;
    let out_odd = graph.object_fifo("outodd", core, mem1, 2, i32s(1)?)?;
    let odd_channel = graph.object_fifo("odd", mem1, shim1, 2, i32s(1)?)?;
    graph.link(out_odd, odd_channel)?;

    let evens = graph.buffer(core, "evenbuffer", i32s(elements)?, InitialValue::Splat(Scalar::Int(-1)))?;
    let odds = graph.buffer(core, "oddbuffer", i32s(elements)?, InitialValue::Splat(Scalar::Int(-2)))?;

    let value = Operand::element(in1, Port::Consume, 0, 0);
    let mut program = ProgramBuilder::new();
    program.for_range(elements, |body| {
        body.acquire(in1, Port::Consume, 1)
            .branch(
                Predicate::is_even(value),
                |then| {
                    then.copy(Operand::buffer(evens, IndexExpr::iv(0)), value);
                },
                |otherwise| {
                    otherwise.copy(Operand::buffer(odds, IndexExpr::iv(0)), value);
                },
            )
            .release(in1, Port::Consume, 1);
    });
    program.for_range(elements, |body| {
        body.acquire(out1, Port::Produce, 1)
            .copy(
                Operand::element(out1, Port::Produce, 0, 0),
                Operand::buffer(evens, IndexExpr::iv(0)),
            )
            .release(out1, Port::Produce, 1)
            .acquire(out_odd, Port::Produce, 1)
            .copy(
                Operand::element(out_odd, Port::Produce, 0, 0),
                Operand::buffer(odds, IndexExpr::iv(0)),
            )
            .release(out_odd, Port::Produce, 1);
    });
    graph.core(core, program.build())?;

    let input_arg = graph.host_arg(i32s(elements)?);
    let odd = graph.host_arg(i32s(elements)?);
    let out = graph.host_arg(i32s(elements)?);
    graph.memcpy_nd(input, input_arg, flat(elements)?, Some(1), false)?;
    graph.memcpy_nd(odd_channel, odd, flat(elements)?, Some(0), false)?;
    graph.memcpy_nd(out_channel, out, flat(elements)?, Some(2), false)?;
    graph.dma_wait(&[out_channel])?;
    if wait_on_odd {
        graph.dma_wait(&[odd_channel])?;
    }

    Ok(OddEvenSplit {
        graph,
        input: input_arg,
        odd,
        out,
        out_channel,
        odd_channel,
        evens,
        odds,
    })
}

/// Handles of [`chained_plus_one`]
#[derive(Debug, Clone)]
pub struct ChainedPlusOne {
    pub graph: Graph,
    pub input: HostArgId,
    pub output: HostArgId,
}

/// Two compute tiles each adding one to 256-scalar elements.
///
/// Input reaches (0,2) through memory tile (0,1); (0,2) hands its result to
/// (1,2) over `_02to12`; (1,2) copies the first scalar on both sides of an
/// even/odd branch, adds one again and drains through memory tile (1,1).
/// Only the output transfer is awaited, which covers the input through the
/// chain.
pub fn chained_plus_one(family: DeviceFamily) -> Result<ChainedPlusOne> {
    let tile_ty = i32s(PLUS_ONE_TILE)?;
    let len = PLUS_ONE_TILE * PLUS_ONE_TILES;

    let mut graph = Graph::new(family);
    let shim0 = graph.tile(0, 0)?;
    let shim1 = graph.tile(1, 0)?;
    let mem0 = graph.tile(0, 1)?;
    let mem1 = graph.tile(1, 1)?;
    let core02 = graph.tile(0, 2)?;
    let core12 = graph.tile(1, 2)?;

    let plus_one = graph.external_func(
        "vector_plus_one",
        vec![
            ArgType::Tensor(tile_ty.clone()),
            ArgType::Tensor(tile_ty.clone()),
            ArgType::Scalar(DType::I32),
        ],
    )?;

    let input = graph.object_fifo("in", shim0, mem0, 2, tile_ty.clone())?;
    let in1 = graph.object_fifo("in1", mem0, core02, 2, tile_ty.clone())?;
    graph.link(input, in1)?;
    let hop = graph.object_fifo("_02to12", core02, core12, 2, tile_ty.clone())?;
    let out1 = graph.object_fifo("out1", core12, mem1, 2, tile_ty.clone())?;
    let out = graph.object_fifo("out", mem1, shim1, 2, tile_ty)?;
    graph.link(out1, out)?;

    let kernel_args = |from: ChannelId, to: ChannelId| {
        vec![
            KernelArg::Element {
                channel: from,
                port: Port::Consume,
                element: 0,
            },
            KernelArg::Element {
                channel: to,
                port: Port::Produce,
                element: 0,
            },
            KernelArg::Scalar(Scalar::Int(PLUS_ONE_TILE as i64)),
        ]
    };

    let mut first = ProgramBuilder::new();
    first.for_range(PLUS_ONE_TILES, |body| {
        body.acquire(in1, Port::Consume, 1)
            .acquire(hop, Port::Produce, 1)
            .call(plus_one, kernel_args(in1, hop))
            .release(in1, Port::Consume, 1)
            .release(hop, Port::Produce, 1);
    });
    graph.core(core02, first.build())?;

    let head_in = Operand::element(hop, Port::Consume, 0, 0);
    let head_out = Operand::element(out1, Port::Produce, 0, 0);
    let mut second = ProgramBuilder::new();
    second.for_range(PLUS_ONE_TILES, |body| {
        body.acquire(hop, Port::Consume, 1)
            .acquire(out1, Port::Produce, 1)
            .branch(
                Predicate::is_even(head_in),
                |then| {
                    then.copy(head_out, head_in);
                },
                |otherwise| {
                    otherwise.copy(head_out, head_in);
                },
            )
            .call(plus_one, kernel_args(hop, out1))
            .release(hop, Port::Consume, 1)
            .release(out1, Port::Produce, 1);
    });
    graph.core(core12, second.build())?;

    let input_arg = graph.host_arg(i32s(len)?);
    let output = graph.host_arg(i32s(len)?);
    graph.memcpy_nd(input, input_arg, flat(len)?, Some(1), false)?;
    graph.memcpy_nd(out, output, flat(len)?, Some(0), false)?;
    graph.dma_wait(&[out])?;

    Ok(ChainedPlusOne {
        graph,
        input: input_arg,
        output,
    })
}

/// Handles of [`odd_even_with_kernel`]
#[derive(Debug, Clone)]
pub struct OddEvenKernel {
    pub graph: Graph,
    pub input: HostArgId,
    pub odd: HostArgId,
    pub out: HostArgId,
}

/// Odd/even split done by an external kernel.
///
/// Compute tile (0,2) gathers every input value into a local buffer, calls
/// `odd_even` once, then streams the packed evens on `out` and the packed
/// odds on `odd`. Transfers are explicit tasks: the input task has no token
/// and is freed after both output tokens are awaited.
pub fn odd_even_with_kernel(elements: usize) -> Result<OddEvenKernel> {
    let buffer_ty = i32s(elements)?;

    let mut graph = Graph::new(DeviceFamily::Npu1);
    let shim = graph.tile(0, 0)?;
    let core = graph.tile(0, 2)?;

    let kernel = graph.external_func(
        "odd_even",
        vec![
            ArgType::Tensor(buffer_ty.clone()),
            ArgType::Tensor(buffer_ty.clone()),
            ArgType::Tensor(buffer_ty.clone()),
            ArgType::Scalar(DType::I32),
        ],
    )?;

    let in1 = graph.object_fifo("in1", shim, core, 2, i32s(1)?)?;
    let out_channel = graph.object_fifo("out", core, shim, 2, i32s(1)?)?;
    let odd_channel = graph.object_fifo("odd", core, shim, 2, i32s(1)?)?;

    let gathered = graph.buffer(core, "inputbuffer", buffer_ty.clone(), InitialValue::default())?;
    let evens = graph.buffer(core, "evenbuffer", buffer_ty.clone(), InitialValue::default())?;
    let odds = graph.buffer(core, "oddbuffer", buffer_ty, InitialValue::default())?;

    let mut program = ProgramBuilder::new();
    program
        .for_range(elements, |body| {
            body.acquire(in1, Port::Consume, 1)
                .copy(
                    Operand::buffer(gathered, IndexExpr::iv(0)),
                    Operand::element(in1, Port::Consume, 0, 0),
                )
                .release(in1, Port::Consume, 1);
        })
        .call(
            kernel,
            vec![
                KernelArg::Buffer(gathered),
                KernelArg::Buffer(evens),
                KernelArg::Buffer(odds),
                KernelArg::Scalar(Scalar::Int(elements as i64)),
            ],
        )
        .for_range(elements, |body| {
            body.acquire(out_channel, Port::Produce, 1)
                .acquire(odd_channel, Port::Produce, 1)
                .copy(
                    Operand::element(out_channel, Port::Produce, 0, 0),
                    Operand::buffer(evens, IndexExpr::iv(0)),
                )
                .copy(
                    Operand::element(odd_channel, Port::Produce, 0, 0),
                    Operand::buffer(odds, IndexExpr::iv(0)),
                )
                .release(odd_channel, Port::Produce, 1)
                .release(out_channel, Port::Produce, 1);
        });
    graph.core(core, program.build())?;

    let input = graph.host_arg(i32s(elements)?);
    let odd = graph.host_arg(i32s(elements)?);
    let out = graph.host_arg(i32s(elements)?);
    let in_task = graph.dma_task(in1, input, flat(elements)?, None, false)?;
    let odd_task = graph.dma_task(odd_channel, odd, flat(elements)?, None, true)?;
    let out_task = graph.dma_task(out_channel, out, flat(elements)?, None, true)?;
    graph.dma_start(&[in_task, odd_task, out_task])?;
    graph.dma_await(&[odd_task, out_task])?;
    graph.dma_free(&[in_task])?;

    Ok(OddEvenKernel { graph, input, odd, out })
}
