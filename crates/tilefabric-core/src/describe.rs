//! Graph descriptions and diagnostics sinks.
//!
//! A [`GraphDescription`] is the flattened, serializable view of a verified
//! graph handed to downstream tooling. Verification results reach the caller
//! through a [`DiagnosticsSink`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dma::{Direction, TaskState, TransferMode};
use crate::graph::Graph;
use crate::verify::{FlowSummary, Violation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileDescription {
    pub label: String,
    pub col: u8,
    pub row: u8,
    pub memory_capacity: usize,
    pub has_program: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferDescription {
    pub name: String,
    pub tile: String,
    pub ty: String,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescription {
    pub name: String,
    pub producer: String,
    pub consumer: String,
    pub depth: usize,
    pub element: String,
    /// Elements that pass through over a full run
    pub elements: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDescription {
    pub upstream: String,
    pub downstream: String,
    pub forwards: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelDescription {
    pub name: String,
    pub inputs: Vec<String>,
    pub object_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub id: usize,
    pub shim: String,
    pub bd_id: u8,
    pub channel: String,
    pub host_arg: usize,
    pub sizes: String,
    pub direction: Direction,
    pub mode: TransferMode,
    pub issue_token: bool,
    pub final_state: TaskState,
}

/// Serializable summary of a whole graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDescription {
    pub device: String,
    pub tiles: Vec<TileDescription>,
    pub buffers: Vec<BufferDescription>,
    pub channels: Vec<ChannelDescription>,
    pub links: Vec<LinkDescription>,
    pub kernels: Vec<KernelDescription>,
    pub host_args: Vec<String>,
    pub tasks: Vec<TaskDescription>,
}

impl GraphDescription {
    pub fn from_graph(graph: &Graph) -> Self {
        let flow = FlowSummary::compute(graph);
        let sequence = graph.sequence();

        Self {
            device: format!("{:?}", graph.family()),
            tiles: graph
                .tiles()
                .map(|(id, tile)| TileDescription {
                    label: tile.label(),
                    col: tile.coord.col,
                    row: tile.coord.row,
                    memory_capacity: tile.memory_capacity,
                    has_program: graph.program(id).is_some(),
                })
                .collect(),
            buffers: graph
                .buffers()
                .map(|(_, buffer)| BufferDescription {
                    name: buffer.name.clone(),
                    tile: graph.tile_label(buffer.tile),
                    ty: buffer.ty.to_string(),
                    bytes: buffer.ty.size_bytes(),
                })
                .collect(),
            channels: graph
                .channels()
                .map(|(id, fifo)| ChannelDescription {
                    name: fifo.name.clone(),
                    producer: graph.tile_label(fifo.producer),
                    consumer: graph.tile_label(fifo.consumer),
                    depth: fifo.depth,
                    element: fifo.element.to_string(),
                    elements: flow.produced(id),
                })
                .collect(),
            links: graph
                .links()
                .map(|(id, link)| LinkDescription {
                    upstream: graph.channel_name(link.upstream),
                    downstream: graph.channel_name(link.downstream),
                    forwards: flow.link_forwards(id),
                })
                .collect(),
            kernels: graph
                .kernels()
                .map(|(_, kernel)| KernelDescription {
                    name: kernel.name.clone(),
                    inputs: kernel.inputs.iter().map(ToString::to_string).collect(),
                    object_file: kernel.object_file.clone(),
                })
                .collect(),
            host_args: sequence.host_args().iter().map(ToString::to_string).collect(),
            tasks: sequence
                .tasks()
                .iter()
                .map(|task| TaskDescription {
                    id: task.id.index(),
                    shim: graph.tile_label(task.shim),
                    bd_id: task.bd_id,
                    channel: graph.channel_name(task.channel),
                    host_arg: task.host.index(),
                    sizes: task.sizes.to_string(),
                    direction: task.direction,
                    mode: task.mode,
                    issue_token: task.issue_token,
                    final_state: task.state,
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for GraphDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "device {}", self.device)?;
        for tile in &self.tiles {
            let program = if tile.has_program { " [program]" } else { "" };
            writeln!(f, "  tile {} ({} bytes){program}", tile.label, tile.memory_capacity)?;
        }
        for buffer in &self.buffers {
            writeln!(f, "  buffer {} on {}: {}", buffer.name, buffer.tile, buffer.ty)?;
        }
        for ch in &self.channels {
            writeln!(
                f,
                "  channel {}: {} -> {} depth {} of {} ({} elements)",
                ch.name, ch.producer, ch.consumer, ch.depth, ch.element, ch.elements
            )?;
        }
        for link in &self.links {
            writeln!(f, "  link {} -> {} ({} forwards)", link.upstream, link.downstream, link.forwards)?;
        }
        for kernel in &self.kernels {
            writeln!(f, "  kernel {}({})", kernel.name, kernel.inputs.join(", "))?;
        }
        for task in &self.tasks {
            writeln!(
                f,
                "  task #{} {} bd {} on {} <-> arg{} {} ({:?}, token={}, {})",
                task.id,
                task.direction,
                task.bd_id,
                task.channel,
                task.host_arg,
                task.sizes,
                task.mode,
                task.issue_token,
                task.final_state
            )?;
        }
        Ok(())
    }
}

/// Receives the outcome of a verification pass
pub trait DiagnosticsSink {
    fn violation(&mut self, violation: &Violation);

    fn verified(&mut self, description: &GraphDescription);
}

/// Keeps everything it is handed
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    pub violations: Vec<Violation>,
    pub description: Option<GraphDescription>,
}

impl DiagnosticsSink for CollectingSink {
    fn violation(&mut self, violation: &Violation) {
        self.violations.push(violation.clone());
    }

    fn verified(&mut self, description: &GraphDescription) {
        self.description = Some(description.clone());
    }
}

/// Emits `tracing` events: a warning per violation, info on success
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn violation(&mut self, violation: &Violation) {
        tracing::warn!(kind = %violation.kind(), "{violation}");
    }

    fn verified(&mut self, description: &GraphDescription) {
        tracing::info!(
            device = %description.device,
            tiles = description.tiles.len(),
            channels = description.channels.len(),
            tasks = description.tasks.len(),
            "graph_description"
        );
    }
}
