//! DMA transfer tasks and their descriptor lifecycle.
//!
//! ```text
//!   create ──► Created ──start──► Started ──await──► Awaited ──free──► Freed
//!                                    │                                  ▲
//!                                    └──────free (no completion token)──┘
//! ```
//!
//! Every task occupies one buffer descriptor (`bd_id`) of its shim tile from
//! creation until it is freed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;
use crate::device::SHIM_BD_COUNT;
use crate::error::{FabricError, Result};
use crate::sequence::HostArgId;
use crate::tile::TileId;

/// Handle to a DMA task recorded in a graph's runtime sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub(crate) usize);

impl TaskId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Created,
    Started,
    Awaited,
    Freed,
}

impl TaskState {
    /// Whether the task still occupies its buffer descriptor
    pub const fn holds_descriptor(self) -> bool {
        !matches!(self, TaskState::Freed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskState::Created => "created",
            TaskState::Started => "started",
            TaskState::Awaited => "awaited",
            TaskState::Freed => "freed",
        })
    }
}

/// How the task was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferMode {
    /// `memcpy_nd` + `dma_wait`: created and started in one operation
    Collapsed,
    /// `create_task` / `start` / `await` / `free`
    Explicit,
}

/// Direction relative to the fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Host memory into the channel (shim is the producer)
    Fill,
    /// Channel into host memory (shim is the consumer)
    Drain,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Fill => "fill",
            Direction::Drain => "drain",
        })
    }
}

/// N-dimensional host access pattern, outer dimension first, in host elements
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SizeDescriptor {
    pub sizes: Vec<usize>,
    /// Defaults to the contiguous row-major strides of `sizes`
    pub strides: Option<Vec<usize>>,
    pub offset: usize,
}

impl SizeDescriptor {
    pub fn new(sizes: impl Into<Vec<usize>>) -> Result<Self> {
        let sizes = sizes.into();
        if sizes.is_empty() {
            return Err(FabricError::declaration("size descriptor needs at least one dimension"));
        }
        if sizes.iter().any(|&dim| dim == 0) {
            return Err(FabricError::declaration(format!("size descriptor {sizes:?} has a zero extent")));
        }
        Ok(Self {
            sizes,
            strides: None,
            offset: 0,
        })
    }

    pub fn with_strides(mut self, strides: impl Into<Vec<usize>>) -> Result<Self> {
        let strides = strides.into();
        if strides.len() != self.sizes.len() {
            return Err(FabricError::declaration(format!(
                "size descriptor has {} sizes but {} strides",
                self.sizes.len(),
                strides.len()
            )));
        }
        self.strides = Some(strides);
        Ok(self)
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Elements moved: the product of the extents
    pub fn total_elements(&self) -> usize {
        self.sizes.iter().product()
    }

    fn effective_strides(&self) -> Vec<usize> {
        match &self.strides {
            Some(strides) => strides.clone(),
            None => {
                let mut strides = vec![1; self.sizes.len()];
                for dim in (0..self.sizes.len().saturating_sub(1)).rev() {
                    strides[dim] = strides[dim + 1] * self.sizes[dim + 1];
                }
                strides
            }
        }
    }

    /// Largest host index the pattern touches
    pub fn max_index(&self) -> usize {
        self.offset
            + self
                .sizes
                .iter()
                .zip(self.effective_strides())
                .map(|(&size, stride)| (size - 1) * stride)
                .sum::<usize>()
    }

    /// Host indices in transfer order (innermost dimension fastest)
    pub fn host_indices(&self) -> Vec<usize> {
        let strides = self.effective_strides();
        let mut indices = Vec::with_capacity(self.total_elements());
        let mut counter = vec![0usize; self.sizes.len()];
        loop {
            indices.push(self.offset + counter.iter().zip(&strides).map(|(c, s)| c * s).sum::<usize>());

            let mut dim = self.sizes.len();
            loop {
                if dim == 0 {
                    return indices;
                }
                dim -= 1;
                counter[dim] += 1;
                if counter[dim] < self.sizes[dim] {
                    break;
                }
                counter[dim] = 0;
            }
        }
    }
}

impl fmt::Display for SizeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sizes={:?}", self.sizes)?;
        if let Some(strides) = &self.strides {
            write!(f, " strides={strides:?}")?;
        }
        if self.offset != 0 {
            write!(f, " offset={}", self.offset)?;
        }
        Ok(())
    }
}

/// One transfer between a channel endpoint and a host region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaTask {
    pub id: TaskId,
    pub shim: TileId,
    pub bd_id: u8,
    pub channel: ChannelId,
    pub host: HostArgId,
    pub sizes: SizeDescriptor,
    pub issue_token: bool,
    pub mode: TransferMode,
    pub direction: Direction,
    pub state: TaskState,
}

/// Everything needed to create a task besides its descriptor id
#[derive(Debug, Clone)]
pub(crate) struct TaskSpec {
    pub shim: TileId,
    pub shim_label: String,
    pub channel: ChannelId,
    pub host: HostArgId,
    pub sizes: SizeDescriptor,
    pub issue_token: bool,
    pub mode: TransferMode,
    pub direction: Direction,
}

/// Lifecycle bookkeeping for all tasks of a runtime sequence
#[derive(Debug, Clone, Default)]
pub struct TaskTable {
    tasks: Vec<DmaTask>,
}

impl TaskTable {
    pub fn get(&self, id: TaskId) -> Result<&DmaTask> {
        self.tasks.get(id.0).ok_or(FabricError::UnknownHandle {
            entity: "task",
            index: id.0,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &DmaTask> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn live_holder(&self, shim: TileId, bd_id: u8, live: impl Fn(TaskState) -> bool) -> Option<TaskId> {
        self.tasks
            .iter()
            .find(|task| task.shim == shim && task.bd_id == bd_id && live(task.state))
            .map(|task| task.id)
    }

    /// Lowest descriptor id on `shim` not held by a non-freed task
    fn free_descriptor(&self, shim: TileId) -> Option<u8> {
        (0..SHIM_BD_COUNT).find(|&bd| self.live_holder(shim, bd, TaskState::holds_descriptor).is_none())
    }

    pub(crate) fn create(&mut self, spec: TaskSpec, bd_id: Option<u8>) -> Result<TaskId> {
        let bd_id = match bd_id {
            Some(bd) if bd >= SHIM_BD_COUNT => {
                return Err(FabricError::declaration(format!(
                    "bd {bd} out of range (shim tiles have {SHIM_BD_COUNT})"
                )))
            }
            Some(bd) => bd,
            None => self
                .free_descriptor(spec.shim)
                .ok_or_else(|| FabricError::DescriptorsExhausted {
                    tile: spec.shim_label.clone(),
                })?,
        };

        // Created-but-unstarted overlaps are left to the verifier's replay.
        if let Some(holder) = self.live_holder(spec.shim, bd_id, |state| {
            matches!(state, TaskState::Started | TaskState::Awaited)
        }) {
            return Err(FabricError::DescriptorCollision {
                tile: spec.shim_label,
                bd_id,
                holder: holder.0,
            });
        }

        let id = TaskId(self.tasks.len());
        self.tasks.push(DmaTask {
            id,
            shim: spec.shim,
            bd_id,
            channel: spec.channel,
            host: spec.host,
            sizes: spec.sizes,
            issue_token: spec.issue_token,
            mode: spec.mode,
            direction: spec.direction,
            state: TaskState::Created,
        });
        tracing::debug!(task = id.0, bd_id, direction = %self.tasks[id.0].direction, "dma_task_created");
        Ok(id)
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut DmaTask> {
        self.tasks.get_mut(id.0).ok_or(FabricError::UnknownHandle {
            entity: "task",
            index: id.0,
        })
    }

    fn transition(task: &DmaTask, operation: &'static str) -> FabricError {
        FabricError::InvalidTransition {
            task: task.id.0,
            bd_id: task.bd_id,
            state: task.state,
            operation,
        }
    }

    /// Validate every id of a batch before mutating any of them.
    fn check_batch(&self, ids: &[TaskId], check: impl Fn(&DmaTask) -> Result<()>) -> Result<()> {
        for (pos, id) in ids.iter().enumerate() {
            if ids[..pos].contains(id) {
                return Err(FabricError::declaration(format!("task {id} listed twice in one batch")));
            }
            check(self.get(*id)?)?;
        }
        Ok(())
    }

    pub(crate) fn start(&mut self, ids: &[TaskId]) -> Result<()> {
        self.check_batch(ids, |task| match task.state {
            TaskState::Created => Ok(()),
            _ => Err(Self::transition(task, "start")),
        })?;
        for id in ids {
            self.task_mut(*id)?.state = TaskState::Started;
        }
        Ok(())
    }

    pub(crate) fn await_tasks(&mut self, ids: &[TaskId]) -> Result<()> {
        self.check_batch(ids, |task| {
            if task.state != TaskState::Started {
                return Err(Self::transition(task, "await"));
            }
            if !task.issue_token && task.mode == TransferMode::Explicit {
                return Err(FabricError::AwaitWithoutToken {
                    task: task.id.0,
                    bd_id: task.bd_id,
                });
            }
            Ok(())
        })?;
        for id in ids {
            self.task_mut(*id)?.state = TaskState::Awaited;
        }
        Ok(())
    }

    pub(crate) fn free(&mut self, ids: &[TaskId]) -> Result<()> {
        self.check_batch(ids, |task| match task.state {
            TaskState::Awaited => Ok(()),
            TaskState::Started if !task.issue_token => Ok(()),
            _ => Err(Self::transition(task, "free")),
        })?;
        for id in ids {
            self.task_mut(*id)?.state = TaskState::Freed;
        }
        Ok(())
    }
}
