//! Whole-graph verification scenarios

use tilefabric_core::{
    ChannelId, CollectingSink, DType, DeviceFamily, ErrorKind, Graph, IndexExpr, InitialValue, Operand, Port,
    Predicate, ProgramBuilder, Result, Scalar, SizeDescriptor, TensorType, Violation,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::new("tilefabric_core=debug"))
        .try_init();
}

fn i32s(len: usize) -> TensorType {
    TensorType::vector(DType::I32, len).unwrap()
}

fn flat(n: usize) -> SizeDescriptor {
    SizeDescriptor::new(vec![1, 1, 1, n]).unwrap()
}

/// Consume `input` and produce `output` one element at a time, `n` times.
fn forward_program(input: ChannelId, output: ChannelId, n: usize) -> ProgramBuilder {
    let mut program = ProgramBuilder::new();
    program.for_range(n, |body| {
        body.acquire(input, Port::Consume, 1)
            .acquire(output, Port::Produce, 1)
            .copy(
                Operand::element(output, Port::Produce, 0, 0),
                Operand::element(input, Port::Consume, 0, 0),
            )
            .release(input, Port::Consume, 1)
            .release(output, Port::Produce, 1);
    });
    program
}

/// The odd/even split design: in -> mem(0,1) -> core(0,2) -> mem(1,1) -> {out, odd}
struct SplitDesign {
    graph: Graph,
    input: ChannelId,
    out: ChannelId,
    odd: ChannelId,
}

fn odd_even_split(elements: usize) -> Result<SplitDesign> {
    let mut graph = Graph::new(DeviceFamily::Npu1);
    let shim0 = graph.tile(0, 0)?;
    let shim1 = graph.tile(1, 0)?;
    let mem0 = graph.tile(0, 1)?;
    let mem1 = graph.tile(1, 1)?;
    let core = graph.tile(0, 2)?;
    let elem = i32s(1);

    let input = graph.object_fifo("in", shim0, mem0, 2, elem.clone())?;
    let in1 = graph.object_fifo("in1", mem0, core, 2, elem.clone())?;
    graph.link(input, in1)?;
    let out1 = graph.object_fifo("out1", core, mem1, 2, elem.clone())?;
    let out = graph.object_fifo("out", mem1, shim1, 2, elem.clone())?;
    graph.link(out1, out)?;
    let out1_odd = graph.object_fifo("outodd", core, mem1, 2, elem.clone())?;
    let odd = graph.object_fifo("odd", mem1, shim1, 2, elem)?;
    graph.link(out1_odd, odd)?;

    let even_buf = graph.buffer(core, "inputbuffer", i32s(elements), InitialValue::Splat(Scalar::Int(-1)))?;
    let odd_buf = graph.buffer(core, "outputbuffer", i32s(elements), InitialValue::Splat(Scalar::Int(-2)))?;

    let mut program = ProgramBuilder::new();
    program.for_range(elements, |body| {
        body.acquire(in1, Port::Consume, 1);
        body.branch(
            Predicate::is_even(Operand::element(in1, Port::Consume, 0, 0)),
            |then| {
                then.copy(
                    Operand::buffer(even_buf, IndexExpr::iv(0)),
                    Operand::element(in1, Port::Consume, 0, 0),
                );
            },
            |otherwise| {
                otherwise.copy(
                    Operand::buffer(odd_buf, IndexExpr::iv(0)),
                    Operand::element(in1, Port::Consume, 0, 0),
                );
            },
        );
        body.release(in1, Port::Consume, 1);
    });
    program.for_range(elements, |body| {
        body.acquire(out1, Port::Produce, 1)
            .copy(
                Operand::element(out1, Port::Produce, 0, 0),
                Operand::buffer(even_buf, IndexExpr::iv(0)),
            )
            .release(out1, Port::Produce, 1)
            .acquire(out1_odd, Port::Produce, 1)
            .copy(
                Operand::element(out1_odd, Port::Produce, 0, 0),
                Operand::buffer(odd_buf, IndexExpr::iv(0)),
            )
            .release(out1_odd, Port::Produce, 1);
    });
    graph.core(core, program.build())?;

    let in_tensor = graph.host_arg(i32s(elements));
    let odd_tensor = graph.host_arg(i32s(elements));
    let out_tensor = graph.host_arg(i32s(elements));
    graph.memcpy_nd(input, in_tensor, flat(elements), Some(1), false)?;
    graph.memcpy_nd(odd, odd_tensor, flat(elements), Some(0), false)?;
    graph.memcpy_nd(out, out_tensor, flat(elements), Some(2), false)?;

    Ok(SplitDesign { graph, input, out, odd })
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_same_descriptor_twice_without_free_collides() -> Result<()> {
    let mut graph = Graph::new(DeviceFamily::Npu1);
    let shim = graph.tile(0, 0)?;
    let core = graph.tile(0, 2)?;
    let input = graph.object_fifo("in", shim, core, 2, i32s(1))?;
    graph.core(core, forward_program_sink(input, 8).build())?;
    let host = graph.host_arg(i32s(8));

    let first = graph.dma_task(input, host, SizeDescriptor::new(vec![4])?, Some(3), true)?;
    let second = graph.dma_task(input, host, SizeDescriptor::new(vec![4])?.with_offset(4), Some(3), true)?;
    graph.dma_start(&[first, second])?;
    graph.dma_await(&[first, second])?;
    graph.dma_free(&[first, second])?;

    let report = graph.verify();
    assert_eq!(report.kinds(), vec![ErrorKind::DescriptorCollision]);
    assert!(matches!(
        report.violations()[0],
        Violation::DescriptorCollision { bd_id: 3, first: 0, second: 1, .. }
    ));
    Ok(())
}

/// Drain `input` into nothing, `n` elements
fn forward_program_sink(input: ChannelId, n: usize) -> ProgramBuilder {
    let mut program = ProgramBuilder::new();
    program.for_range(n, |body| {
        body.acquire(input, Port::Consume, 1).release(input, Port::Consume, 1);
    });
    program
}

#[test]
fn test_missing_final_release_is_a_pending_leak() -> Result<()> {
    let mut graph = Graph::new(DeviceFamily::Npu1);
    let shim = graph.tile(0, 0)?;
    let core = graph.tile(0, 2)?;
    let input = graph.object_fifo("in", shim, core, 2, i32s(1))?;

    // 16 acquires, 15 releases
    let mut program = ProgramBuilder::new();
    program.for_range(15, |body| {
        body.acquire(input, Port::Consume, 1).release(input, Port::Consume, 1);
    });
    program.acquire(input, Port::Consume, 1);
    graph.core(core, program.build())?;

    let report = graph.verify();
    assert!(report.contains(ErrorKind::PendingReleaseLeak));
    Ok(())
}

#[test]
fn test_awaiting_end_of_strict_chain_covers_fill() -> Result<()> {
    // A -> core(0,2) -> B -> core(0,3) -> C, awaiting only C
    let mut graph = Graph::new(DeviceFamily::Npu1);
    let shim = graph.tile(0, 0)?;
    let first = graph.tile(0, 2)?;
    let second = graph.tile(0, 3)?;
    let a = graph.object_fifo("a", shim, first, 2, i32s(1))?;
    let b = graph.object_fifo("b", first, second, 2, i32s(1))?;
    let c = graph.object_fifo("c", second, shim, 2, i32s(1))?;
    graph.core(first, forward_program(a, b, 16).build())?;
    graph.core(second, forward_program(b, c, 16).build())?;

    let src = graph.host_arg(i32s(16));
    let dst = graph.host_arg(i32s(16));
    let fill = graph.dma_task(a, src, flat(16), None, false)?;
    let drain = graph.dma_task(c, dst, flat(16), None, true)?;
    graph.dma_start(&[fill, drain])?;
    graph.dma_await(&[drain])?;
    graph.dma_free(&[fill, drain])?;

    let report = graph.verify();
    assert!(report.is_valid(), "{:?}", report.violations());
    Ok(())
}

#[test]
fn test_await_on_independent_channel_is_not_sufficient() -> Result<()> {
    // Two independent pipelines; only one drain is awaited.
    let mut graph = Graph::new(DeviceFamily::Npu1);
    let shim = graph.tile(0, 0)?;
    let left = graph.tile(0, 2)?;
    let right = graph.tile(1, 2)?;
    let a = graph.object_fifo("a", shim, left, 2, i32s(1))?;
    let b = graph.object_fifo("b", left, shim, 2, i32s(1))?;
    let c = graph.object_fifo("c", shim, right, 2, i32s(1))?;
    let d = graph.object_fifo("d", right, shim, 2, i32s(1))?;
    graph.core(left, forward_program(a, b, 4).build())?;
    graph.core(right, forward_program(c, d, 4).build())?;

    let args: Vec<_> = (0..4).map(|_| graph.host_arg(i32s(4))).collect();
    let tasks = [
        graph.dma_task(a, args[0], flat(4), None, false)?,
        graph.dma_task(b, args[1], flat(4), None, true)?,
        graph.dma_task(c, args[2], flat(4), None, false)?,
        graph.dma_task(d, args[3], flat(4), None, true)?,
    ];
    graph.dma_start(&tasks)?;
    graph.dma_await(&[tasks[1]])?;
    graph.dma_free(&[tasks[0], tasks[1], tasks[2]])?;

    let report = graph.verify();
    let missing: Vec<_> = report
        .violations()
        .iter()
        .filter_map(|v| match v {
            Violation::MissingAwait { channel, .. } => Some(channel.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(missing, vec!["c", "d"]);
    Ok(())
}

#[test]
fn test_output_released_before_input_breaks_the_chain() -> Result<()> {
    // The core emits its result before it has drained its input, so the
    // awaited drain says nothing about the fill.
    let mut graph = Graph::new(DeviceFamily::Npu1);
    let shim = graph.tile(0, 0)?;
    let core = graph.tile(0, 2)?;
    let input = graph.object_fifo("in", shim, core, 2, i32s(1))?;
    let output = graph.object_fifo("out", core, shim, 2, i32s(1))?;
    let mut program = ProgramBuilder::new();
    program
        .acquire(output, Port::Produce, 1)
        .copy(Operand::element(output, Port::Produce, 0, 0), Scalar::Int(7))
        .release(output, Port::Produce, 1)
        .acquire(input, Port::Consume, 1)
        .release(input, Port::Consume, 1);
    graph.core(core, program.build())?;

    let src = graph.host_arg(i32s(1));
    let dst = graph.host_arg(i32s(1));
    graph.memcpy_nd(input, src, flat(1), None, false)?;
    graph.memcpy_nd(output, dst, flat(1), None, false)?;
    graph.dma_wait(&[output])?;

    assert_eq!(graph.verify().kinds(), vec![ErrorKind::MissingAwait]);
    Ok(())
}

// ============================================================================
// Reference designs
// ============================================================================

#[test]
fn test_split_design_waiting_only_on_out_misses_odd_drain() -> Result<()> {
    let mut design = odd_even_split(64)?;
    design.graph.dma_wait(&[design.out])?;

    let report = design.graph.verify();
    assert_eq!(report.kinds(), vec![ErrorKind::MissingAwait]);
    assert!(matches!(
        &report.violations()[0],
        Violation::MissingAwait { channel, .. } if channel == "odd"
    ));
    Ok(())
}

#[test]
fn test_split_design_waiting_on_both_drains_is_valid() -> Result<()> {
    let mut design = odd_even_split(64)?;
    design.graph.dma_wait(&[design.out, design.odd])?;
    let report = design.graph.verify();
    assert!(report.is_valid(), "{:?}", report.violations());

    let flow = tilefabric_core::FlowSummary::compute(&design.graph);
    assert_eq!(flow.produced(design.input), 64);
    assert_eq!(flow.consumed(design.odd), 64);
    Ok(())
}

#[test]
fn test_verification_is_idempotent() -> Result<()> {
    let mut design = odd_even_split(8)?;
    design.graph.dma_wait(&[design.out])?;
    let first = design.graph.verify();
    let second = design.graph.verify();
    assert!(!first.is_valid());
    assert_eq!(first, second);
    Ok(())
}

// ============================================================================
// Structural checks
// ============================================================================

#[test]
fn test_all_violations_are_reported_together() -> Result<()> {
    let mut graph = Graph::new(DeviceFamily::Npu1);
    let shim = graph.tile(0, 0)?;
    let mem = graph.tile(0, 1)?;
    let core = graph.tile(0, 2)?;
    let other = graph.tile(1, 2)?;

    // 1: same producer and consumer
    graph.object_fifo("loop", core, core, 2, i32s(1))?;
    // 2: element types differ across the link
    let up = graph.object_fifo("up", shim, mem, 2, i32s(4))?;
    let down = graph.object_fifo("down", mem, other, 2, i32s(8))?;
    graph.link(up, down)?;
    // 5: foreign buffer
    let foreign = graph.buffer(other, "theirs", i32s(4), InitialValue::default())?;
    let mut program = ProgramBuilder::new();
    program.copy(Operand::buffer(foreign, 0), Scalar::Int(1));
    graph.core(core, program.build())?;

    let kinds = graph.verify().kinds();
    assert!(kinds.contains(&ErrorKind::InvalidTopology));
    assert!(kinds.contains(&ErrorKind::OwnershipViolation));
    assert!(kinds.iter().filter(|k| **k == ErrorKind::InvalidTopology).count() >= 2);
    Ok(())
}

#[test]
fn test_link_across_unrelated_tiles_is_invalid_topology() -> Result<()> {
    let mut graph = Graph::new(DeviceFamily::Npu1);
    let shim = graph.tile(0, 0)?;
    let mem0 = graph.tile(0, 1)?;
    let mem1 = graph.tile(1, 1)?;
    let core = graph.tile(0, 2)?;
    let up = graph.object_fifo("up", shim, mem0, 2, i32s(1))?;
    let down = graph.object_fifo("down", mem1, core, 2, i32s(1))?;
    graph.link(up, down)?;

    let report = graph.verify();
    assert!(report
        .violations()
        .iter()
        .any(|v| matches!(v, Violation::LinkMismatch { .. })));
    Ok(())
}

#[test]
fn test_channel_feeding_two_links_is_a_fanout() -> Result<()> {
    init_tracing();
    let mut graph = Graph::new(DeviceFamily::Npu1);
    let shim = graph.tile(0, 0)?;
    let mem = graph.tile(0, 1)?;
    let core0 = graph.tile(0, 2)?;
    let core1 = graph.tile(0, 3)?;
    let a = graph.object_fifo("a", shim, mem, 2, i32s(1))?;
    let b = graph.object_fifo("b", mem, core0, 2, i32s(1))?;
    let c = graph.object_fifo("c", mem, core1, 2, i32s(1))?;
    graph.link(a, b)?;
    graph.link(a, c)?;

    let report = graph.verify();
    let fanouts: Vec<&Violation> = report
        .violations()
        .iter()
        .filter(|v| matches!(v, Violation::LinkFanout { .. }))
        .collect();
    assert_eq!(
        fanouts,
        vec![&Violation::LinkFanout {
            channel: "a".to_string(),
            role: "upstream".to_string(),
            count: 2,
        }]
    );
    assert!(report.contains(ErrorKind::InvalidTopology));
    Ok(())
}

#[test]
fn test_links_forming_a_loop_are_a_cycle() -> Result<()> {
    init_tracing();
    let mut graph = Graph::new(DeviceFamily::Npu1);
    let mem0 = graph.tile(0, 1)?;
    let mem1 = graph.tile(1, 1)?;
    let p = graph.object_fifo("p", mem0, mem1, 2, i32s(1))?;
    let q = graph.object_fifo("q", mem1, mem0, 2, i32s(1))?;
    graph.link(p, q)?;
    graph.link(q, p)?;

    let report = graph.verify();
    let cycles: Vec<&Violation> = report
        .violations()
        .iter()
        .filter(|v| matches!(v, Violation::LinkCycle { .. }))
        .collect();
    assert_eq!(cycles, vec![&Violation::LinkCycle { channel: "p".to_string() }]);
    assert!(!report
        .violations()
        .iter()
        .any(|v| matches!(v, Violation::LinkMismatch { .. })));
    Ok(())
}

#[test]
fn test_program_driving_a_linked_end_is_rejected() -> Result<()> {
    let mut graph = Graph::new(DeviceFamily::Npu1);
    let shim = graph.tile(0, 0)?;
    let relay = graph.tile(0, 2)?;
    let core = graph.tile(0, 3)?;
    let up = graph.object_fifo("up", shim, relay, 2, i32s(1))?;
    let down = graph.object_fifo("down", relay, core, 2, i32s(1))?;
    graph.link(up, down)?;
    graph.core(relay, forward_program_sink(up, 1).build())?;

    let report = graph.verify();
    assert!(report
        .violations()
        .iter()
        .any(|v| matches!(v, Violation::LinkedEndDriven { port: Port::Consume, .. })));
    Ok(())
}

#[test]
fn test_acquire_larger_than_depth_in_program() -> Result<()> {
    let mut graph = Graph::new(DeviceFamily::Npu1);
    let shim = graph.tile(0, 0)?;
    let core = graph.tile(0, 2)?;
    let input = graph.object_fifo("in", shim, core, 2, i32s(1))?;
    let mut program = ProgramBuilder::new();
    program.acquire(input, Port::Consume, 3).release(input, Port::Consume, 3);
    graph.core(core, program.build())?;

    let kinds = graph.verify().kinds();
    assert!(kinds.contains(&ErrorKind::CapacityExceeded));
    Ok(())
}

#[test]
fn test_violations_reach_the_sink() -> Result<()> {
    init_tracing();
    let mut design = odd_even_split(4)?;
    design.graph.dma_wait(&[design.out])?;
    let mut sink = CollectingSink::default();
    let report = tilefabric_core::verify_and_report(&design.graph, &mut sink);
    assert_eq!(sink.violations, report.violations());
    assert!(sink.description.is_none());
    Ok(())
}
