//! Static element accounting.
//!
//! Every channel's traffic is known before anything runs: programs release a
//! fixed number of elements, transfers move `total / element` elements and a
//! link forwards whatever reaches its upstream channel. The same numbers drive
//! the executor's link forwarders.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use crate::channel::{ChannelId, Port};
use crate::dma::{Direction, DmaTask};
use crate::graph::Graph;
use crate::link::{Link, LinkId};
use crate::sequence::SeqOp;
use crate::tile::TileId;

use super::program::{interpret_all, push_unique, ProgramSummary};
use super::Violation;

/// FIFO elements a transfer moves, when its size is a whole number of elements
pub fn transfer_elements(graph: &Graph, task: &DmaTask) -> Option<u64> {
    let per_element = graph.channel(task.channel).ok()?.element.num_elements();
    let total = task.sizes.total_elements();
    (total % per_element == 0).then(|| (total / per_element) as u64)
}

/// Tasks the sequence actually starts, in start order
pub(crate) fn started_tasks(graph: &Graph) -> Vec<&DmaTask> {
    let sequence = graph.sequence();
    sequence
        .ops()
        .iter()
        .flat_map(|op| match op {
            SeqOp::Memcpy(id) => vec![*id],
            SeqOp::Start(ids) => ids.clone(),
            _ => Vec::new(),
        })
        .filter_map(|id| sequence.tasks().get(id).ok())
        .collect()
}

/// Statically counted elements produced into and consumed from every channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlowSummary {
    produced: Vec<u64>,
    consumed: Vec<u64>,
    forwards: Vec<u64>,
}

impl FlowSummary {
    /// Count traffic without reporting anything.
    pub fn compute(graph: &Graph) -> Self {
        let mut ignored = Vec::new();
        let summaries = interpret_all(graph, &mut ignored);
        Self::from_summaries(graph, &summaries)
    }

    pub(crate) fn from_summaries(graph: &Graph, summaries: &BTreeMap<TileId, ProgramSummary>) -> Self {
        let channels = graph.channels().count();
        let mut direct_in = vec![0u64; channels];
        let mut direct_out = vec![0u64; channels];

        for summary in summaries.values() {
            for (&(channel, port), &count) in &summary.released {
                match port {
                    Port::Produce => direct_in[channel.index()] += count,
                    Port::Consume => direct_out[channel.index()] += count,
                }
            }
        }
        for task in started_tasks(graph) {
            let Some(elements) = transfer_elements(graph, task) else {
                continue;
            };
            match task.direction {
                Direction::Fill => direct_in[task.channel.index()] += elements,
                Direction::Drain => direct_out[task.channel.index()] += elements,
            }
        }

        let links: Vec<_> = graph.links().map(|(_, link)| *link).collect();
        let mut memo: Vec<Option<Option<u64>>> = vec![None; channels];
        let produced: Vec<u64> = (0..channels)
            .map(|ch| produced_into(ChannelId(ch), &direct_in, &links, &mut memo))
            .collect();
        let forwards: Vec<u64> = links.iter().map(|link| produced[link.upstream.index()]).collect();

        let mut consumed = direct_out;
        for (link, &count) in links.iter().zip(&forwards) {
            consumed[link.upstream.index()] += count;
        }

        Self {
            produced,
            consumed,
            forwards,
        }
    }

    pub fn produced(&self, channel: ChannelId) -> u64 {
        self.produced.get(channel.index()).copied().unwrap_or(0)
    }

    pub fn consumed(&self, channel: ChannelId) -> u64 {
        self.consumed.get(channel.index()).copied().unwrap_or(0)
    }

    /// Elements `link` forwards over the whole run
    pub fn link_forwards(&self, link: LinkId) -> u64 {
        self.forwards.get(link.index()).copied().unwrap_or(0)
    }
}

/// `memo[ch]`: `None` unvisited, `Some(None)` on the current path, `Some(Some(n))` done.
/// A link cycle contributes nothing; it is reported separately.
fn produced_into(
    channel: ChannelId,
    direct_in: &[u64],
    links: &[Link],
    memo: &mut [Option<Option<u64>>],
) -> u64 {
    match memo[channel.index()] {
        Some(Some(count)) => return count,
        Some(None) => return 0,
        None => {}
    }
    memo[channel.index()] = Some(None);
    let mut total = direct_in[channel.index()];
    for link in links.iter().filter(|link| link.downstream == channel) {
        total += produced_into(link.upstream, direct_in, links, memo);
    }
    memo[channel.index()] = Some(Some(total));
    total
}

/// Every channel must drain exactly what it is fed.
pub(crate) fn check_flow(graph: &Graph, flow: &FlowSummary, violations: &mut Vec<Violation>) {
    for (id, fifo) in graph.channels() {
        let (produced, consumed) = (flow.produced(id), flow.consumed(id));
        if produced != consumed {
            push_unique(
                violations,
                Violation::FlowImbalance {
                    channel: fifo.name.clone(),
                    produced,
                    consumed,
                },
            );
        }
    }
}

/// Buffers plus the slots of every attached channel end must fit tile memory.
pub(crate) fn check_memory(graph: &Graph, violations: &mut Vec<Violation>) {
    for (tile, info) in graph.tiles() {
        if info.is_shim() {
            continue;
        }
        let buffers: usize = graph
            .buffers()
            .filter(|(_, b)| b.tile == tile)
            .map(|(_, b)| b.ty.size_bytes())
            .sum();
        let slots: usize = graph
            .channels()
            .map(|(_, fifo)| {
                let ends = usize::from(fifo.producer == tile) + usize::from(fifo.consumer == tile);
                ends * fifo.depth * fifo.element.size_bytes()
            })
            .sum();
        let required = buffers + slots;
        if required > info.memory_capacity {
            push_unique(
                violations,
                Violation::MemoryOverflow {
                    tile: info.label(),
                    required,
                    capacity: info.memory_capacity,
                },
            );
        }
    }
}

/// Channel ordering proven by links and program release order.
///
/// `a -> b` when `a` links into `b`, or when one program consumes `a` and
/// produces `b` and its last release of `a` precedes its last release of `b`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Precedence {
    edges: BTreeMap<ChannelId, BTreeSet<ChannelId>>,
}

impl Precedence {
    pub(crate) fn build(graph: &Graph, summaries: &BTreeMap<TileId, ProgramSummary>) -> Self {
        let mut edges: BTreeMap<ChannelId, BTreeSet<ChannelId>> = BTreeMap::new();
        for (_, link) in graph.links() {
            edges.entry(link.upstream).or_default().insert(link.downstream);
        }
        for summary in summaries.values() {
            for (&(input, in_port), &consumed_at) in &summary.last_release {
                if in_port != Port::Consume {
                    continue;
                }
                for (&(output, out_port), &produced_at) in &summary.last_release {
                    if out_port == Port::Produce && output != input && consumed_at < produced_at {
                        edges.entry(input).or_default().insert(output);
                    }
                }
            }
        }
        Self { edges }
    }

    /// Whether `from` is proven complete once `to` is.
    pub(crate) fn reaches(&self, from: ChannelId, to: ChannelId) -> bool {
        let mut seen = BTreeSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(channel) = queue.pop_front() {
            if channel == to {
                return true;
            }
            for &next in self.edges.get(&channel).into_iter().flatten() {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }
}
