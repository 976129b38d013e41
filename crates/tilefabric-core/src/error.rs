//! Error types for graph declaration, channel protocol and DMA lifecycle operations

use std::fmt;

use crate::channel::Port;
use crate::dma::TaskState;

/// Result type for tilefabric-core operations
pub type Result<T> = std::result::Result<T, FabricError>;

/// Classification shared by immediate errors, verifier violations and
/// run-time failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    CapacityExceeded,
    NotReady,
    ReleaseMismatch,
    InvalidTransition,
    DescriptorCollision,
    AwaitWithoutToken,
    SizeMismatch,
    PendingReleaseLeak,
    InvalidTopology,
    Deadlock,
    InvalidDeclaration,
    UnknownHandle,
    OwnershipViolation,
    IndexOutOfBounds,
    MemoryOverflow,
    SignatureMismatch,
    MissingAwait,
    KernelFailure,
    HostData,
    /// Torn down after another part of the run failed first
    Aborted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors raised immediately by a single declaration or a sequential
/// protocol/lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FabricError {
    /// More slots requested in one acquire than the channel can ever hold
    #[error("channel '{channel}': acquire of {requested} exceeds depth {depth}")]
    CapacityExceeded {
        channel: String,
        requested: usize,
        depth: usize,
    },

    /// The requested slots are not yet available on this port
    #[error("channel '{channel}' {port}: {requested} slot(s) requested, {available} available")]
    NotReady {
        channel: String,
        port: Port,
        requested: usize,
        available: usize,
    },

    /// Acquire/release pairing was broken on a port
    #[error("channel '{channel}' {port}: {message}")]
    ReleaseMismatch {
        channel: String,
        port: Port,
        message: String,
    },

    /// A DMA task operation was issued out of lifecycle order
    #[error("task {task} (bd {bd_id}): cannot {operation} while {state}")]
    InvalidTransition {
        task: usize,
        bd_id: u8,
        state: TaskState,
        operation: &'static str,
    },

    /// A buffer descriptor id is still held by a live task on the same shim tile
    #[error("bd {bd_id} on tile {tile} is still held by task {holder}")]
    DescriptorCollision { tile: String, bd_id: u8, holder: usize },

    /// No free buffer descriptor remains on a shim tile
    #[error("no free buffer descriptor on tile {tile}")]
    DescriptorsExhausted { tile: String },

    /// Await issued for a task declared without a completion token
    #[error("task {task} (bd {bd_id}) has no completion token and cannot be awaited")]
    AwaitWithoutToken { task: usize, bd_id: u8 },

    /// Element counts disagree between a transfer and its endpoints
    #[error("size mismatch: {0}")]
    SizeMismatch(String),

    /// A tile coordinate, role or endpoint arrangement is not legal
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// A single declaration is malformed (zero depth, empty shape, ...)
    #[error("invalid declaration: {0}")]
    InvalidDeclaration(String),

    /// A handle does not belong to this graph
    #[error("unknown {entity} handle {index}")]
    UnknownHandle { entity: &'static str, index: usize },
}

impl FabricError {
    /// The shared classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FabricError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            FabricError::NotReady { .. } => ErrorKind::NotReady,
            FabricError::ReleaseMismatch { .. } => ErrorKind::ReleaseMismatch,
            FabricError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            FabricError::DescriptorCollision { .. } | FabricError::DescriptorsExhausted { .. } => {
                ErrorKind::DescriptorCollision
            }
            FabricError::AwaitWithoutToken { .. } => ErrorKind::AwaitWithoutToken,
            FabricError::SizeMismatch(_) => ErrorKind::SizeMismatch,
            FabricError::InvalidTopology(_) => ErrorKind::InvalidTopology,
            FabricError::InvalidDeclaration(_) => ErrorKind::InvalidDeclaration,
            FabricError::UnknownHandle { .. } => ErrorKind::UnknownHandle,
        }
    }

    /// Create an invalid declaration error
    pub fn declaration(msg: impl Into<String>) -> Self {
        Self::InvalidDeclaration(msg.into())
    }

    /// Create an invalid topology error
    pub fn topology(msg: impl Into<String>) -> Self {
        Self::InvalidTopology(msg.into())
    }
}
