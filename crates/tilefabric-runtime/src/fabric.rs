//! State shared by every worker of one run

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tilefabric_core::{ChannelId, FabricError, Graph, KernelId};

use crate::completion::CompletionBoard;
use crate::element::Element;
use crate::error::{Result, RuntimeError};
use crate::fifo::SharedFifo;
use crate::host::HostTensor;
use crate::kernel::Kernel;

/// Timeout, tracing switch, abort flag and progress counter every wait consults
pub(crate) struct RunControl {
    timeout: Duration,
    trace_elements: bool,
    aborted: AtomicBool,
    progress: AtomicU64,
}

impl RunControl {
    pub fn new(timeout: Duration, trace_elements: bool) -> Self {
        Self {
            timeout,
            trace_elements,
            aborted: AtomicBool::new(false),
            progress: AtomicU64::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn trace_elements(&self) -> bool {
        self.trace_elements
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Record that some waiter's state moved: a FIFO release or a completed task.
    pub fn note_progress(&self) {
        self.progress.fetch_add(1, Ordering::SeqCst);
    }

    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::SeqCst)
    }

    pub(crate) fn watchdog(&self) -> Watchdog<'_> {
        Watchdog {
            control: self,
            seen: self.progress(),
            deadline: Instant::now() + self.timeout,
        }
    }

    pub fn deadlock(&self, waiter: String) -> RuntimeError {
        RuntimeError::Deadlock {
            waiter,
            timeout_ms: self.timeout.as_millis(),
        }
    }
}

/// Deadline of one blocked wait.
///
/// The deadline restarts whenever the run makes progress anywhere, so only a
/// wait during which the whole fabric stood still for the full timeout
/// counts as a deadlock.
pub(crate) struct Watchdog<'c> {
    control: &'c RunControl,
    seen: u64,
    deadline: Instant,
}

impl Watchdog<'_> {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// `true` once the timeout has passed with no progress since it started.
    pub fn expired(&mut self) -> bool {
        let now = Instant::now();
        if now < self.deadline {
            return false;
        }
        let progress = self.control.progress();
        if progress != self.seen {
            self.seen = progress;
            self.deadline = now + self.control.timeout;
            return false;
        }
        true
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub transfers: AtomicU64,
    pub elements_transferred: AtomicU64,
    pub elements_forwarded: AtomicU64,
    pub program_steps: AtomicU64,
}

pub(crate) struct Fabric<'g, T: Element> {
    pub graph: &'g Graph,
    pub control: RunControl,
    pub completions: CompletionBoard,
    pub counters: Counters,
    fifos: Vec<SharedFifo<T>>,
    host: Vec<Mutex<Vec<T>>>,
    kernels: HashMap<KernelId, Arc<dyn Kernel<T>>>,
    errors: Mutex<Vec<RuntimeError>>,
}

impl<'g, T: Element> Fabric<'g, T> {
    pub fn new(
        graph: &'g Graph,
        control: RunControl,
        inputs: Vec<HostTensor<T>>,
        kernels: HashMap<KernelId, Arc<dyn Kernel<T>>>,
    ) -> Result<Self> {
        let fifos = graph
            .channels()
            .map(|(_, fifo)| SharedFifo::new(fifo))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            graph,
            control,
            completions: CompletionBoard::new(graph.sequence().tasks().len()),
            counters: Counters::default(),
            fifos,
            host: inputs.into_iter().map(|tensor| Mutex::new(tensor.into_vec())).collect(),
            kernels,
            errors: Mutex::new(Vec::new()),
        })
    }

    pub fn fifo(&self, channel: ChannelId) -> Result<&SharedFifo<T>> {
        self.fifos.get(channel.index()).ok_or_else(|| {
            FabricError::UnknownHandle {
                entity: "channel",
                index: channel.index(),
            }
            .into()
        })
    }

    pub fn host(&self, index: usize) -> Result<&Mutex<Vec<T>>> {
        self.host
            .get(index)
            .ok_or_else(|| RuntimeError::HostData(format!("no host tensor bound to argument {index}")))
    }

    pub fn kernel(&self, id: KernelId) -> Option<&Arc<dyn Kernel<T>>> {
        self.kernels.get(&id)
    }

    /// Record a worker failure and wake everything that is parked.
    pub fn fail(&self, err: RuntimeError) {
        if !err.is_secondary() {
            tracing::error!(kind = %err.kind(), "{err}");
        }
        self.errors.lock().push(err);
        self.control.abort();
        for fifo in &self.fifos {
            fifo.wake_all();
        }
        self.completions.wake_all();
    }

    /// The first failure that was not merely a consequence of another one.
    pub fn take_error(&self) -> Option<RuntimeError> {
        let mut errors = std::mem::take(&mut *self.errors.lock());
        let primary = errors.iter().position(|err| !err.is_secondary()).unwrap_or(0);
        (!errors.is_empty()).then(|| errors.swap_remove(primary))
    }

    pub fn into_host(self) -> Vec<HostTensor<T>> {
        self.host
            .into_iter()
            .map(|data| HostTensor::new(data.into_inner()))
            .collect()
    }
}
