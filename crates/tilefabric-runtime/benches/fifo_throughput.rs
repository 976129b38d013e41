//! Channel Throughput Benchmarks
//!
//! Measures how fast the threaded executor moves data through object FIFOs
//! as channel depth and element size vary, plus the full chained plus-one
//! design with its two kernel calls per element.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tilefabric_core::{DType, DeviceFamily, Graph, IndexExpr, Operand, Port, ProgramBuilder, SizeDescriptor, TensorType};
use tilefabric_runtime::designs::{chained_plus_one, reference_kernels, PLUS_ONE_TILE, PLUS_ONE_TILES};
use tilefabric_runtime::{HostTensor, KernelRegistry, RunConfig, Simulator};

const TOTAL: usize = 4096;

/// shim -> core -> shim, copying `element_len` scalars per element
fn pass_through(depth: usize, element_len: usize) -> Graph {
    let mut graph = Graph::new(DeviceFamily::Npu1);
    let shim = graph.tile(0, 0).unwrap();
    let core = graph.tile(0, 2).unwrap();
    let elem = TensorType::vector(DType::I32, element_len).unwrap();
    let input = graph.object_fifo("in", shim, core, depth, elem.clone()).unwrap();
    let output = graph.object_fifo("out", core, shim, depth, elem).unwrap();

    let mut program = ProgramBuilder::new();
    program.for_range(TOTAL / element_len, |outer| {
        outer
            .acquire(input, Port::Consume, 1)
            .acquire(output, Port::Produce, 1)
            .for_range(element_len, |inner| {
                inner.copy(
                    Operand::element(output, Port::Produce, 0, IndexExpr::iv(1)),
                    Operand::element(input, Port::Consume, 0, IndexExpr::iv(1)),
                );
            })
            .release(input, Port::Consume, 1)
            .release(output, Port::Produce, 1);
    });
    graph.core(core, program.build()).unwrap();

    let data = TensorType::vector(DType::I32, TOTAL).unwrap();
    let src = graph.host_arg(data.clone());
    let dst = graph.host_arg(data);
    let sizes = SizeDescriptor::new(vec![TOTAL]).unwrap();
    graph.memcpy_nd(input, src, sizes.clone(), Some(1), false).unwrap();
    graph.memcpy_nd(output, dst, sizes, Some(0), false).unwrap();
    graph.dma_wait(&[output]).unwrap();
    graph
}

fn config() -> RunConfig {
    RunConfig::default().with_timeout(Duration::from_secs(30))
}

fn benchmark_fifo_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("fifo_depth");
    group.throughput(Throughput::Elements(TOTAL as u64));

    for depth in [1, 2, 4, 8] {
        let graph = pass_through(depth, 16);
        let simulator = Simulator::new(&graph).with_config(config());
        let kernels = KernelRegistry::<i32>::new();

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |bencher, _| {
            bencher.iter(|| {
                let inputs = vec![HostTensor::from_fn(TOTAL, |i| i as i32), HostTensor::zeros(TOTAL)];
                black_box(simulator.run(&kernels, inputs).unwrap());
            });
        });
    }

    group.finish();
}

fn benchmark_element_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("element_size");
    group.throughput(Throughput::Elements(TOTAL as u64));

    for element_len in [1, 16, 256] {
        let graph = pass_through(2, element_len);
        let simulator = Simulator::new(&graph).with_config(config());
        let kernels = KernelRegistry::<i32>::new();

        group.bench_with_input(BenchmarkId::from_parameter(element_len), &element_len, |bencher, _| {
            bencher.iter(|| {
                let inputs = vec![HostTensor::from_fn(TOTAL, |i| i as i32), HostTensor::zeros(TOTAL)];
                black_box(simulator.run(&kernels, inputs).unwrap());
            });
        });
    }

    group.finish();
}

fn benchmark_chained_plus_one(c: &mut Criterion) {
    let len = PLUS_ONE_TILE * PLUS_ONE_TILES;
    let design = chained_plus_one(DeviceFamily::Npu1).unwrap();
    let simulator = Simulator::new(&design.graph).with_config(config());
    let kernels = reference_kernels();

    let mut group = c.benchmark_group("chained_plus_one");
    group.throughput(Throughput::Elements(len as u64));
    group.bench_function("run", |bencher| {
        bencher.iter(|| {
            let inputs = vec![HostTensor::from_fn(len, |i| i as i32), HostTensor::zeros(len)];
            black_box(simulator.run(&kernels, inputs).unwrap());
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_fifo_depth,
    benchmark_element_size,
    benchmark_chained_plus_one
);
criterion_main!(benches);
