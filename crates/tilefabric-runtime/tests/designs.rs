//! End-to-end runs of the reference designs

use std::thread;
use std::time::{Duration, Instant};

use tilefabric_core::{
    CmpOp, DType, DeviceFamily, ErrorKind, Graph, HostArgId, Operand, Port, Predicate, ProgramBuilder, Scalar,
    SizeDescriptor, TensorType,
};
use tilefabric_runtime::designs::{
    chained_plus_one, odd_even_split, odd_even_with_kernel, reference_kernels, vector_plus_one, PLUS_ONE_TILE,
    PLUS_ONE_TILES,
};
use tilefabric_runtime::{HostTensor, KernelArgs, KernelError, KernelRegistry, Result, RunConfig, RuntimeError, Simulator};

fn ramp(len: usize) -> HostTensor<i32> {
    HostTensor::from_fn(len, |i| i as i32)
}

fn quick() -> RunConfig {
    RunConfig::default().with_timeout(Duration::from_secs(5))
}

/// Forwards `trip_count` elements although `elements` are sent and drained.
fn undersized_pass_through(elements: usize, trip_count: usize) -> tilefabric_core::Result<(Graph, HostArgId, HostArgId)> {
    let mut graph = Graph::new(DeviceFamily::Npu1);
    let shim = graph.tile(0, 0)?;
    let core = graph.tile(0, 2)?;
    let elem = TensorType::vector(DType::I32, 1)?;
    let input = graph.object_fifo("in", shim, core, 2, elem.clone())?;
    let output = graph.object_fifo("out", core, shim, 2, elem)?;

    let mut program = ProgramBuilder::new();
    program.for_range(trip_count, |body| {
        body.acquire(input, Port::Consume, 1)
            .acquire(output, Port::Produce, 1)
            .copy(
                Operand::element(output, Port::Produce, 0, 0),
                Operand::element(input, Port::Consume, 0, 0),
            )
            .release(input, Port::Consume, 1)
            .release(output, Port::Produce, 1);
    });
    graph.core(core, program.build())?;

    let data = TensorType::vector(DType::I32, elements)?;
    let src = graph.host_arg(data.clone());
    let dst = graph.host_arg(data);
    graph.memcpy_nd(input, src, SizeDescriptor::new(vec![1, 1, 1, elements])?, Some(1), false)?;
    graph.memcpy_nd(output, dst, SizeDescriptor::new(vec![1, 1, 1, elements])?, Some(0), false)?;
    graph.dma_wait(&[output])?;
    Ok((graph, src, dst))
}

// ============================================================================
// Odd/even split through local buffers
// ============================================================================

#[test]
fn test_odd_even_split_routes_by_parity() -> Result<()> {
    tilefabric_tracing::init_test_tracing();
    let design = odd_even_split(64, true)?;
    let inputs = vec![ramp(64), HostTensor::zeros(64), HostTensor::zeros(64)];

    let result = Simulator::new(&design.graph)
        .with_config(quick())
        .run(&KernelRegistry::new(), inputs)?;

    let out = result.host(design.out).unwrap().as_slice();
    let odd = result.host(design.odd).unwrap().as_slice();
    for i in 0..64 {
        let value = i as i32;
        if value % 2 == 0 {
            assert_eq!((out[i], odd[i]), (value, -2), "index {i}");
        } else {
            assert_eq!((out[i], odd[i]), (-1, value), "index {i}");
        }
    }
    assert_eq!(result.buffer(design.evens).unwrap(), out);
    assert_eq!(result.buffer(design.odds).unwrap(), odd);
    assert_eq!(result.stats().elements_forwarded, 3 * 64);
    assert_eq!(result.stats().transfers, 3);
    Ok(())
}

#[test]
fn test_waiting_on_one_drain_is_refused_before_running() -> Result<()> {
    let design = odd_even_split(64, false)?;
    let inputs = vec![ramp(64), HostTensor::zeros(64), HostTensor::zeros(64)];

    let err = Simulator::new(&design.graph)
        .with_config(quick())
        .run(&KernelRegistry::new(), inputs)
        .unwrap_err();
    match &err {
        RuntimeError::Verification(report) => assert!(report.contains(ErrorKind::MissingAwait)),
        other => panic!("expected a verification failure, got {other}"),
    }
    Ok(())
}

#[test]
fn test_unverified_run_still_drains_unawaited_transfers() -> Result<()> {
    let design = odd_even_split(16, false)?;
    let inputs = vec![ramp(16), HostTensor::zeros(16), HostTensor::zeros(16)];

    let result = Simulator::new(&design.graph)
        .with_config(quick().skip_verification())
        .run(&KernelRegistry::new(), inputs)?;

    let odd = result.host(design.odd).unwrap().as_slice();
    assert_eq!(odd[1], 1);
    assert_eq!(odd[2], -2);
    assert_eq!(result.stats().verify_us, 0);
    Ok(())
}

// ============================================================================
// Chained kernels with a branch
// ============================================================================

#[test]
fn test_chained_plus_one_adds_two() -> Result<()> {
    let design = chained_plus_one(DeviceFamily::Npu1)?;
    let len = PLUS_ONE_TILE * PLUS_ONE_TILES;
    let inputs = vec![ramp(len), HostTensor::zeros(len)];

    let result = Simulator::new(&design.graph)
        .with_config(quick())
        .run(&reference_kernels(), inputs)?;

    let output = result.host(design.output).unwrap().as_slice();
    assert!(output.iter().enumerate().all(|(i, &v)| v == i as i32 + 2));
    assert_eq!(result.stats().elements_transferred, 2 * PLUS_ONE_TILES as u64);
    assert_eq!(result.stats().elements_forwarded, 2 * PLUS_ONE_TILES as u64);
    assert!(u128::from(result.stats().verify_us) <= result.stats().elapsed.as_micros());
    Ok(())
}

#[test]
fn test_runs_are_repeatable() -> Result<()> {
    let design = chained_plus_one(DeviceFamily::Npu2)?;
    let len = PLUS_ONE_TILE * PLUS_ONE_TILES;
    let simulator = Simulator::new(&design.graph).with_config(quick());
    let kernels = reference_kernels();

    let first = simulator.run(&kernels, vec![ramp(len), HostTensor::zeros(len)])?;
    let second = simulator.run(&kernels, vec![ramp(len), HostTensor::zeros(len)])?;
    assert_eq!(first.host(design.output), second.host(design.output));
    Ok(())
}

#[test]
fn test_slow_kernels_outlast_the_deadlock_timeout() -> Result<()> {
    let design = chained_plus_one(DeviceFamily::Npu1)?;
    let len = PLUS_ONE_TILE * PLUS_ONE_TILES;
    let mut kernels = KernelRegistry::new();
    kernels.register(
        "vector_plus_one",
        |args: &mut KernelArgs<i32>| -> std::result::Result<(), KernelError> {
            thread::sleep(Duration::from_millis(15));
            vector_plus_one(args)
        },
    );

    let timeout = Duration::from_millis(100);
    let result = Simulator::new(&design.graph)
        .with_config(RunConfig::default().with_timeout(timeout))
        .run(&kernels, vec![ramp(len), HostTensor::zeros(len)])?;

    assert!(result.stats().elapsed > timeout);
    let output = result.host(design.output).unwrap().as_slice();
    assert!(output.iter().enumerate().all(|(i, &v)| v == i as i32 + 2));
    Ok(())
}

#[test]
fn test_unregistered_kernel_is_reported_up_front() -> Result<()> {
    let design = chained_plus_one(DeviceFamily::Npu1)?;
    let len = PLUS_ONE_TILE * PLUS_ONE_TILES;

    let err = Simulator::new(&design.graph)
        .run(&KernelRegistry::new(), vec![ramp(len), HostTensor::zeros(len)])
        .unwrap_err();
    assert!(matches!(&err, RuntimeError::MissingKernel(name) if name == "vector_plus_one"));
    assert_eq!(err.kind(), ErrorKind::KernelFailure);
    Ok(())
}

#[test]
fn test_failing_kernel_aborts_the_run() -> Result<()> {
    let design = chained_plus_one(DeviceFamily::Npu1)?;
    let len = PLUS_ONE_TILE * PLUS_ONE_TILES;
    let mut kernels = KernelRegistry::new();
    kernels.register(
        "vector_plus_one",
        |args: &mut KernelArgs<i32>| -> std::result::Result<(), KernelError> {
            if args.tensor(0)?[0] >= 1024 {
                return Err(KernelError::Failed("saturated".into()));
            }
            vector_plus_one(args)
        },
    );

    let started = Instant::now();
    let err = Simulator::new(&design.graph)
        .with_config(quick())
        .run(&kernels, vec![ramp(len), HostTensor::zeros(len)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::KernelFailure, "{err}");
    assert!(err.to_string().contains("saturated"));
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[test]
fn test_panicking_kernel_is_reported() -> Result<()> {
    let design = chained_plus_one(DeviceFamily::Npu1)?;
    let len = PLUS_ONE_TILE * PLUS_ONE_TILES;
    let mut kernels = KernelRegistry::new();
    kernels.register(
        "vector_plus_one",
        |_: &mut KernelArgs<i32>| -> std::result::Result<(), KernelError> { panic!("kernel bug") },
    );

    let err = Simulator::new(&design.graph)
        .with_config(quick())
        .run(&kernels, vec![ramp(len), HostTensor::zeros(len)])
        .unwrap_err();
    assert!(matches!(err, RuntimeError::WorkerPanic(_)), "{err}");
    Ok(())
}

// ============================================================================
// Odd/even with an external kernel
// ============================================================================

#[test]
fn test_odd_even_kernel_packs_partitions() -> Result<()> {
    let design = odd_even_with_kernel(64)?;
    let inputs = vec![ramp(64), HostTensor::zeros(64), HostTensor::zeros(64)];

    let result = Simulator::new(&design.graph)
        .with_config(quick())
        .run(&reference_kernels(), inputs)?;

    let out = result.host(design.out).unwrap().as_slice();
    let odd = result.host(design.odd).unwrap().as_slice();
    let evens: Vec<i32> = (0..64).step_by(2).collect();
    let odds: Vec<i32> = (1..64).step_by(2).collect();
    assert_eq!(&out[..32], evens.as_slice());
    assert_eq!(&odd[..32], odds.as_slice());
    assert!(out[32..].iter().chain(&odd[32..]).all(|&v| v == 0));
    Ok(())
}

// ============================================================================
// Data-dependent branches
// ============================================================================

#[test]
fn test_comparison_branch_clamps_values() -> Result<()> {
    let mut graph = Graph::new(DeviceFamily::Npu1);
    let shim = graph.tile(0, 0)?;
    let core = graph.tile(0, 2)?;
    let elem = TensorType::vector(DType::I32, 1)?;
    let input = graph.object_fifo("in", shim, core, 2, elem.clone())?;
    let output = graph.object_fifo("out", core, shim, 2, elem)?;

    let value = Operand::element(input, Port::Consume, 0, 0);
    let target = Operand::element(output, Port::Produce, 0, 0);
    let mut program = ProgramBuilder::new();
    program.for_range(16, |body| {
        body.acquire(input, Port::Consume, 1)
            .acquire(output, Port::Produce, 1)
            .branch(
                Predicate::Cmp {
                    lhs: value,
                    op: CmpOp::Ge,
                    rhs: Scalar::Int(10),
                },
                |then| {
                    then.copy(target, Scalar::Int(10));
                },
                |otherwise| {
                    otherwise.copy(target, value);
                },
            )
            .release(input, Port::Consume, 1)
            .release(output, Port::Produce, 1);
    });
    graph.core(core, program.build())?;

    let data = TensorType::vector(DType::I32, 16)?;
    let src = graph.host_arg(data.clone());
    let dst = graph.host_arg(data);
    graph.memcpy_nd(input, src, SizeDescriptor::new(vec![16])?, None, false)?;
    graph.memcpy_nd(output, dst, SizeDescriptor::new(vec![16])?, None, false)?;
    graph.dma_wait(&[output])?;

    let result = Simulator::new(&graph)
        .with_config(quick())
        .run(&KernelRegistry::new(), vec![ramp(16), HostTensor::zeros(16)])?;
    let expected: Vec<i32> = (0..16).map(|v| v.min(10)).collect();
    assert_eq!(result.host(dst).unwrap().as_slice(), expected.as_slice());
    Ok(())
}

// ============================================================================
// Failure modes
// ============================================================================

#[test]
fn test_undersized_consumer_is_rejected_by_verification() -> Result<()> {
    let (graph, _, _) = undersized_pass_through(64, 32)?;
    let report = graph.verify();
    assert!(report.contains(ErrorKind::NotReady), "{report}");
    Ok(())
}

#[test]
fn test_undersized_consumer_deadlocks_when_unverified() -> Result<()> {
    let (graph, _, _) = undersized_pass_through(64, 32)?;
    let config = RunConfig::default()
        .with_timeout(Duration::from_millis(200))
        .skip_verification();

    let started = Instant::now();
    let err = Simulator::new(&graph)
        .with_config(config)
        .run(&KernelRegistry::new(), vec![ramp(64), HostTensor::zeros(64)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Deadlock, "{err}");
    assert!(matches!(err, RuntimeError::Deadlock { timeout_ms: 200, .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[test]
fn test_host_tensor_count_and_length_are_checked() -> Result<()> {
    let (graph, _, _) = undersized_pass_through(8, 8)?;
    let simulator = Simulator::new(&graph);

    let err = simulator.run(&KernelRegistry::new(), vec![ramp(8)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HostData);

    let err = simulator
        .run(&KernelRegistry::new(), vec![ramp(8), HostTensor::zeros(4)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HostData);
    Ok(())
}

#[test]
fn test_element_type_must_match_the_run() -> Result<()> {
    let (graph, _, _) = undersized_pass_through(8, 8)?;
    let err = Simulator::new(&graph)
        .run(&KernelRegistry::<f32>::new(), vec![HostTensor::zeros(8), HostTensor::zeros(8)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HostData);
    Ok(())
}

#[test]
fn test_pass_through_copies_input() -> Result<()> {
    let (graph, _, dst) = undersized_pass_through(8, 8)?;
    let result = Simulator::new(&graph)
        .with_config(quick())
        .run(&KernelRegistry::new(), vec![ramp(8), HostTensor::zeros(8)])?;
    assert_eq!(result.host(dst).unwrap().as_slice(), ramp(8).as_slice());
    assert_eq!(result.stats().program_steps, 1 + 8 * 5);
    Ok(())
}
