//! The host-controlled runtime sequence: host arguments and the ordered DMA
//! operations issued against them.

use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;
use crate::dma::{TaskId, TaskTable};
use crate::types::TensorType;

/// Handle to a host argument (external memory region) of the runtime sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostArgId(pub(crate) usize);

impl HostArgId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One recorded sequence operation, in issue order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeqOp {
    /// Explicit-mode task declaration
    Create(TaskId),
    /// Collapsed-mode transfer: created and started at once
    Memcpy(TaskId),
    /// Batch start of explicit tasks
    Start(Vec<TaskId>),
    /// Block on completion tokens
    Await(Vec<TaskId>),
    /// Release descriptors
    Free(Vec<TaskId>),
    /// Collapsed-mode wait on channels; `tasks` are the transfers it covered
    Wait { channels: Vec<ChannelId>, tasks: Vec<TaskId> },
}

/// Host arguments, DMA tasks and the operation log
#[derive(Debug, Clone, Default)]
pub struct RuntimeSequence {
    pub(crate) host_args: Vec<TensorType>,
    pub(crate) tasks: TaskTable,
    pub(crate) ops: Vec<SeqOp>,
}

impl RuntimeSequence {
    pub fn host_args(&self) -> &[TensorType] {
        &self.host_args
    }

    pub fn host_arg(&self, id: HostArgId) -> Option<&TensorType> {
        self.host_args.get(id.0)
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    pub fn ops(&self) -> &[SeqOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
