//! Threaded execution of a declared graph.
//!
//! ```text
//!   calling thread            scoped workers
//!   ──────────────            ──────────────
//!   runtime sequence ──start──▶ DMA transfer (chained per channel)
//!        │                    tile worker (one per core program)
//!        └──await/wait────────▶ link forwarder (one per link)
//! ```
//!
//! Every worker blocks on the FIFOs it touches. The first failure aborts the
//! run and wakes all parked workers. A wait turns into
//! [`RuntimeError::Deadlock`] once no FIFO release or transfer completion has
//! happened anywhere for the configured timeout.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::{Duration, Instant};

use tilefabric_core::{BufferId, ChannelId, FlowSummary, Graph, HostArgId, KernelId, SeqOp, Step, TaskId};

use crate::config::RunConfig;
use crate::dma_engine::run_transfer;
use crate::element::Element;
use crate::error::{Result, RuntimeError};
use crate::fabric::{Fabric, RunControl};
use crate::forwarder::run_link;
use crate::host::HostTensor;
use crate::kernel::{Kernel, KernelRegistry};
use crate::tile_worker::{all_initial_buffers, TileWorker};

/// Totals gathered over one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub elapsed: Duration,
    /// Time spent in static verification, zero when it was skipped
    pub verify_us: u64,
    pub transfers: u64,
    pub elements_transferred: u64,
    pub elements_forwarded: u64,
    pub program_steps: u64,
}

/// Host tensors and tile buffers after a successful run
#[derive(Debug, Clone)]
pub struct RunOutput<T> {
    host: Vec<HostTensor<T>>,
    buffers: BTreeMap<BufferId, Vec<T>>,
    stats: RunStats,
}

impl<T: Element> RunOutput<T> {
    pub fn host(&self, arg: HostArgId) -> Option<&HostTensor<T>> {
        self.host.get(arg.index())
    }

    pub fn buffer(&self, buffer: BufferId) -> Option<&[T]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn into_host(self) -> Vec<HostTensor<T>> {
        self.host
    }
}

/// Executes a [`Graph`] against host tensors
#[derive(Debug, Clone)]
pub struct Simulator<'g> {
    graph: &'g Graph,
    config: RunConfig,
}

impl<'g> Simulator<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            config: RunConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the graph once. `inputs` binds one tensor to every host argument,
    /// outputs included.
    pub fn run<T: Element>(&self, kernels: &KernelRegistry<T>, inputs: Vec<HostTensor<T>>) -> Result<RunOutput<T>> {
        let graph = self.graph;
        let _span = tracing::info_span!("run", device = ?graph.family(), dtype = %T::DTYPE).entered();
        let started = Instant::now();

        let verify_us = if self.config.verify {
            let (report, verify_us) = tilefabric_tracing::timed_block!("verify", { graph.verify() });
            report.into_result()?;
            verify_us
        } else {
            tracing::warn!("verification skipped");
            0
        };
        self.check_element_types::<T>()?;
        self.check_bindings(&inputs)?;
        let resolved = self.resolve_kernels(kernels)?;

        let control = RunControl::new(self.config.deadlock_timeout, self.config.trace_elements);
        let fabric = Fabric::new(graph, control, inputs, resolved)?;
        let flow = FlowSummary::compute(graph);
        let mut buffers = all_initial_buffers::<T>(graph)?;

        let finals = thread::scope(|scope| {
            let mut tiles = Vec::new();
            for (tile, program) in graph.programs() {
                let fabric = &fabric;
                tiles.push(spawn_guarded(scope, fabric, graph.tile_label(tile), move || {
                    TileWorker::new(fabric, tile)?.run(program)
                }));
            }

            let mut others = Vec::new();
            for (id, link) in graph.links() {
                let fabric = &fabric;
                let forwards = flow.link_forwards(id);
                let name = format!("link {}", id.index());
                others.push(spawn_guarded(scope, fabric, name, move || run_link(fabric, link, forwards)));
            }

            if let Err(err) = run_sequence(scope, &fabric, &mut others) {
                fabric.fail(err);
            }

            for handle in others {
                let _ = handle.join();
            }
            tiles
                .into_iter()
                .filter_map(|handle| handle.join().ok().flatten())
                .collect::<Vec<_>>()
        });

        if let Some(err) = fabric.take_error() {
            return Err(err);
        }
        for tile_buffers in finals {
            buffers.extend(tile_buffers);
        }

        let counters = &fabric.counters;
        let stats = RunStats {
            elapsed: started.elapsed(),
            verify_us,
            transfers: counters.transfers.load(Ordering::Relaxed),
            elements_transferred: counters.elements_transferred.load(Ordering::Relaxed),
            elements_forwarded: counters.elements_forwarded.load(Ordering::Relaxed),
            program_steps: counters.program_steps.load(Ordering::Relaxed),
        };
        tracing::info!(
            elapsed_us = stats.elapsed.as_micros() as u64,
            verify_us = stats.verify_us,
            transfers = stats.transfers,
            elements = stats.elements_transferred,
            "run_complete"
        );

        Ok(RunOutput {
            host: fabric.into_host(),
            buffers,
            stats,
        })
    }

    fn check_element_types<T: Element>(&self) -> Result<()> {
        let graph = self.graph;
        let channels = graph
            .channels()
            .map(|(_, fifo)| (format!("channel '{}'", fifo.name), fifo.element.dtype));
        let buffers = graph
            .buffers()
            .map(|(_, buffer)| (format!("buffer '{}'", buffer.name), buffer.ty.dtype));
        for (what, dtype) in channels.chain(buffers) {
            if dtype != T::DTYPE {
                return Err(RuntimeError::HostData(format!(
                    "{what} holds {dtype} but the run uses {}",
                    T::DTYPE
                )));
            }
        }
        Ok(())
    }

    fn check_bindings<T: Element>(&self, inputs: &[HostTensor<T>]) -> Result<()> {
        let declared = self.graph.sequence().host_args();
        if inputs.len() != declared.len() {
            return Err(RuntimeError::HostData(format!(
                "{} host argument(s) declared, {} tensor(s) supplied",
                declared.len(),
                inputs.len()
            )));
        }
        for (arg, (tensor, ty)) in inputs.iter().zip(declared).enumerate() {
            tensor.check_binding(arg, ty)?;
        }
        Ok(())
    }

    /// Look up every kernel some program calls.
    fn resolve_kernels<T: Element>(&self, registry: &KernelRegistry<T>) -> Result<HashMap<KernelId, Arc<dyn Kernel<T>>>> {
        let mut called = Vec::new();
        for (_, program) in self.graph.programs() {
            program.walk(&mut |step, _| {
                if let Step::Call { kernel, .. } = step {
                    called.push(*kernel);
                }
            });
        }

        let mut resolved = HashMap::new();
        for id in called {
            if resolved.contains_key(&id) {
                continue;
            }
            let name = &self.graph.kernel(id)?.name;
            let kernel = registry
                .get(name)
                .ok_or_else(|| RuntimeError::MissingKernel(name.clone()))?;
            resolved.insert(id, kernel);
        }
        Ok(resolved)
    }
}

/// Run the runtime sequence on the calling thread, spawning one worker per
/// started transfer.
fn run_sequence<'scope, 'env, T: Element>(
    scope: &'scope Scope<'scope, 'env>,
    fabric: &'env Fabric<'env, T>,
    handles: &mut Vec<ScopedJoinHandle<'scope, Option<()>>>,
) -> Result<()> {
    let sequence = fabric.graph.sequence();
    let mut last_on_channel: HashMap<ChannelId, TaskId> = HashMap::new();

    let mut start = |id: TaskId, handles: &mut Vec<ScopedJoinHandle<'scope, Option<()>>>| -> Result<()> {
        let task = sequence.tasks().get(id)?;
        let previous = last_on_channel.insert(task.channel, id);
        tracing::debug!(task = %id, bd = task.bd_id, direction = %task.direction, "dma_start");
        handles.push(spawn_guarded(scope, fabric, format!("dma {id}"), move || {
            run_transfer(fabric, task, previous)
        }));
        Ok(())
    };

    for op in sequence.ops() {
        if fabric.control.is_aborted() {
            return Ok(());
        }
        match op {
            SeqOp::Memcpy(id) => start(*id, &mut *handles)?,
            SeqOp::Start(ids) => {
                for id in ids {
                    start(*id, &mut *handles)?;
                }
            }
            SeqOp::Await(tasks) | SeqOp::Wait { tasks, .. } => {
                fabric.completions.wait_all(tasks, "runtime sequence", &fabric.control)?;
            }
            SeqOp::Create(_) | SeqOp::Free(_) => {}
        }
    }
    tracing::debug!("runtime_sequence_complete");
    Ok(())
}

/// Spawn a worker whose failure, or panic, aborts the whole run.
fn spawn_guarded<'scope, 'env, T, R, F>(
    scope: &'scope Scope<'scope, 'env>,
    fabric: &'env Fabric<'env, T>,
    name: String,
    body: F,
) -> ScopedJoinHandle<'scope, Option<R>>
where
    T: Element,
    R: Send + 'scope,
    F: FnOnce() -> Result<R> + Send + 'scope,
{
    scope.spawn(move || {
        let guard = PanicGuard { fabric, name };
        match body() {
            Ok(value) => Some(value),
            Err(err) => {
                guard.fabric.fail(err);
                None
            }
        }
    })
}

struct PanicGuard<'a, 'g, T: Element> {
    fabric: &'a Fabric<'g, T>,
    name: String,
}

impl<T: Element> Drop for PanicGuard<'_, '_, T> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.fabric.fail(RuntimeError::WorkerPanic(std::mem::take(&mut self.name)));
        }
    }
}
