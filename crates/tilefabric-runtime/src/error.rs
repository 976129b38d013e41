//! Error types for tilefabric-runtime operations

use tilefabric_core::{ErrorKind, FabricError, VerificationReport};

/// Result type for tilefabric-runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while executing a graph
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A protocol or lifecycle error raised while a worker was running
    #[error(transparent)]
    Fabric(#[from] FabricError),

    /// The graph failed verification and was not run
    #[error(transparent)]
    Verification(#[from] VerificationReport),

    /// A wait stayed unresolved for the whole configured timeout
    #[error("deadlock: {waiter} still blocked after {timeout_ms} ms")]
    Deadlock { waiter: String, timeout_ms: u128 },

    /// A registered kernel reported an error
    #[error("kernel '{kernel}' on {tile} failed: {message}")]
    KernelFailure {
        kernel: String,
        tile: String,
        message: String,
    },

    /// A declared kernel has no registered implementation
    #[error("no implementation registered for kernel '{0}'")]
    MissingKernel(String),

    /// Host tensors do not match the declared host arguments
    #[error("host data: {0}")]
    HostData(String),

    /// A program step could not be executed on real data
    #[error("{tile}: {message}")]
    Program {
        tile: String,
        kind: ErrorKind,
        message: String,
    },

    /// A worker thread panicked
    #[error("worker '{0}' panicked")]
    WorkerPanic(String),

    /// The run was torn down because another worker failed first
    #[error("run aborted")]
    Aborted,
}

impl RuntimeError {
    /// The shared classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::Fabric(err) => err.kind(),
            RuntimeError::Verification(report) => report.kinds().first().copied().unwrap_or(ErrorKind::InvalidTopology),
            RuntimeError::Deadlock { .. } => ErrorKind::Deadlock,
            RuntimeError::Aborted => ErrorKind::Aborted,
            RuntimeError::KernelFailure { .. } | RuntimeError::MissingKernel(_) | RuntimeError::WorkerPanic(_) => {
                ErrorKind::KernelFailure
            }
            RuntimeError::HostData(_) => ErrorKind::HostData,
            RuntimeError::Program { kind, .. } => *kind,
        }
    }

    pub(crate) fn program(tile: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Program {
            tile: tile.into(),
            kind,
            message: message.into(),
        }
    }

    /// Whether this error only reports that some other worker failed.
    pub(crate) fn is_secondary(&self) -> bool {
        matches!(self, RuntimeError::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_shared_classification() {
        let deadlock = RuntimeError::Deadlock {
            waiter: "compute(0,2)".into(),
            timeout_ms: 10,
        };
        assert_eq!(deadlock.kind(), ErrorKind::Deadlock);
        assert_eq!(RuntimeError::Aborted.kind(), ErrorKind::Aborted);
        assert!(RuntimeError::Aborted.is_secondary());
        assert!(!deadlock.is_secondary());
        assert_eq!(RuntimeError::MissingKernel("f".into()).kind(), ErrorKind::KernelFailure);
        assert_eq!(
            RuntimeError::from(FabricError::declaration("bad")).kind(),
            ErrorKind::InvalidDeclaration
        );
        assert_eq!(
            RuntimeError::program("compute(0,2)", ErrorKind::IndexOutOfBounds, "index 64").kind(),
            ErrorKind::IndexOutOfBounds
        );
    }
}
