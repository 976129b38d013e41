//! Whole-graph verification.
//!
//! [`GraphVerifier::verify`] runs every check over a fully declared graph and
//! returns all violations together, in a fixed order:
//!
//! | # | Check | Kind |
//! |---|-------|------|
//! | 1 | channel endpoints are distinct | `InvalidTopology` |
//! | 2 | links join compatible channels through one tile | `InvalidTopology` |
//! | 3 | no descriptor is held twice on a shim tile | `DescriptorCollision` |
//! | 4 | program acquire/release balance | `CapacityExceeded`, `ReleaseMismatch`, `PendingReleaseLeak`, `IndexOutOfBounds` |
//! | 5 | programs touch only their own buffers and ports | `OwnershipViolation` |
//! | 6 | transfer sizes fit channel elements and host regions | `SizeMismatch` |
//! | 7 | every channel drains what it is fed | `NotReady` |
//! | 8 | tile memory budget | `MemoryOverflow` |
//! | 9 | kernel call signatures | `SignatureMismatch` |
//! | 10 | every transfer is proven complete | `MissingAwait` |
//!
//! Verification never mutates the graph, so running it twice yields the
//! same report.

mod flow;
mod program;
mod sequence;
mod topology;

use serde::{Deserialize, Serialize};

use crate::channel::Port;
use crate::describe::{DiagnosticsSink, GraphDescription};
use crate::dma::Direction;
use crate::error::ErrorKind;
use crate::graph::Graph;

pub use flow::{transfer_elements, FlowSummary};

/// One finding of the verifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum Violation {
    #[error("channel '{channel}': producer and consumer are both {tile}")]
    SelfLoop { channel: String, tile: String },

    #[error("link '{upstream}' -> '{downstream}': {reason}")]
    LinkMismatch {
        upstream: String,
        downstream: String,
        reason: String,
    },

    #[error("channel '{channel}' is the {role} of {count} links")]
    LinkFanout { channel: String, role: String, count: usize },

    #[error("channel '{channel}' {port} end is forwarded by a link but also driven by {driver}")]
    LinkedEndDriven { channel: String, port: Port, driver: String },

    #[error("links form a cycle through channel '{channel}'")]
    LinkCycle { channel: String },

    #[error("bd {bd_id} on {tile}: task #{second} created while task #{first} still holds it")]
    DescriptorCollision {
        tile: String,
        bd_id: u8,
        first: usize,
        second: usize,
    },

    #[error("{tile}: acquire of {requested} on channel '{channel}' exceeds depth {depth}")]
    CapacityExceeded {
        tile: String,
        channel: String,
        requested: usize,
        depth: usize,
    },

    #[error("{tile}: channel '{channel}' {port}: {message}")]
    ReleaseMismatch {
        tile: String,
        channel: String,
        port: Port,
        message: String,
    },

    #[error("{tile}: branch arms leave channel '{channel}' {port} unbalanced ({then_held} vs {else_held} held)")]
    BranchImbalance {
        tile: String,
        channel: String,
        port: Port,
        then_held: usize,
        else_held: usize,
    },

    #[error("{tile}: channel '{channel}' {port} still holds {held} slot(s) at program end")]
    PendingReleaseLeak {
        tile: String,
        channel: String,
        port: Port,
        held: usize,
    },

    #[error("{tile}: index {index} into {target} of length {len}")]
    IndexOutOfBounds {
        tile: String,
        target: String,
        index: usize,
        len: usize,
    },

    #[error("{tile}: {message}")]
    OwnershipViolation { tile: String, message: String },

    #[error("task #{task} on channel '{channel}': {message}")]
    SizeMismatch {
        task: usize,
        channel: String,
        message: String,
    },

    #[error("channel '{channel}': {produced} element(s) produced but {consumed} consumed")]
    FlowImbalance {
        channel: String,
        produced: u64,
        consumed: u64,
    },

    #[error("{tile}: {required} bytes of buffers and channel slots exceed {capacity} bytes")]
    MemoryOverflow {
        tile: String,
        required: usize,
        capacity: usize,
    },

    #[error("{tile}: call to '{kernel}': {message}")]
    SignatureMismatch {
        tile: String,
        kernel: String,
        message: String,
    },

    #[error("{direction} task #{task} on channel '{channel}' is never proven complete")]
    MissingAwait {
        task: usize,
        channel: String,
        direction: Direction,
    },
}

impl Violation {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Violation::SelfLoop { .. }
            | Violation::LinkMismatch { .. }
            | Violation::LinkFanout { .. }
            | Violation::LinkedEndDriven { .. }
            | Violation::LinkCycle { .. } => ErrorKind::InvalidTopology,
            Violation::DescriptorCollision { .. } => ErrorKind::DescriptorCollision,
            Violation::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Violation::ReleaseMismatch { .. } | Violation::BranchImbalance { .. } => ErrorKind::ReleaseMismatch,
            Violation::PendingReleaseLeak { .. } => ErrorKind::PendingReleaseLeak,
            Violation::IndexOutOfBounds { .. } => ErrorKind::IndexOutOfBounds,
            Violation::OwnershipViolation { .. } => ErrorKind::OwnershipViolation,
            Violation::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            Violation::FlowImbalance { .. } => ErrorKind::NotReady,
            Violation::MemoryOverflow { .. } => ErrorKind::MemoryOverflow,
            Violation::SignatureMismatch { .. } => ErrorKind::SignatureMismatch,
            Violation::MissingAwait { .. } => ErrorKind::MissingAwait,
        }
    }
}

/// All violations of one verification pass
#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("graph verification found {} violation(s)", .violations.len())]
pub struct VerificationReport {
    violations: Vec<Violation>,
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Kinds in report order
    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.violations.iter().map(Violation::kind).collect()
    }

    pub fn contains(&self, kind: ErrorKind) -> bool {
        self.violations.iter().any(|v| v.kind() == kind)
    }

    /// `Ok(())` for a valid graph, the report itself otherwise.
    pub fn into_result(self) -> std::result::Result<(), VerificationReport> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Runs every structural check over a graph
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphVerifier;

impl GraphVerifier {
    pub fn verify(graph: &Graph) -> VerificationReport {
        let mut violations = Vec::new();

        let mut program_violations = Vec::new();
        let summaries = program::interpret_all(graph, &mut program_violations);

        topology::check_endpoints(graph, &mut violations);
        topology::check_links(graph, &summaries, &mut violations);
        sequence::check_descriptors(graph, &mut violations);
        violations.extend(program_violations);
        sequence::check_sizes(graph, &mut violations);

        let flow = FlowSummary::from_summaries(graph, &summaries);
        flow::check_flow(graph, &flow, &mut violations);
        flow::check_memory(graph, &mut violations);

        let precedence = flow::Precedence::build(graph, &summaries);
        sequence::check_coverage(graph, &precedence, &mut violations);

        if violations.is_empty() {
            tracing::debug!(
                tiles = graph.tiles().count(),
                channels = graph.channels().count(),
                tasks = graph.sequence().tasks().len(),
                "graph_verified"
            );
        } else {
            tracing::debug!(violations = violations.len(), "graph_verification_failed");
        }
        VerificationReport { violations }
    }
}

impl Graph {
    /// Shorthand for [`GraphVerifier::verify`]
    pub fn verify(&self) -> VerificationReport {
        GraphVerifier::verify(self)
    }
}

/// Verify `graph`, forwarding each violation to `sink`, or the graph
/// description when there are none.
pub fn verify_and_report(graph: &Graph, sink: &mut dyn DiagnosticsSink) -> VerificationReport {
    let report = GraphVerifier::verify(graph);
    if report.is_valid() {
        sink.verified(&GraphDescription::from_graph(graph));
    } else {
        for violation in report.violations() {
            sink.violation(violation);
        }
    }
    report
}
