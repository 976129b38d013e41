//! Channel endpoint and link checks

use std::collections::{BTreeMap, BTreeSet};

use crate::channel::{ChannelId, Port};
use crate::dma::Direction;
use crate::graph::Graph;
use crate::tile::TileId;

use super::program::{push_unique, ProgramSummary};
use super::Violation;

/// A channel needs two distinct endpoint tiles.
pub(crate) fn check_endpoints(graph: &Graph, violations: &mut Vec<Violation>) {
    for (_, fifo) in graph.channels() {
        if fifo.producer == fifo.consumer {
            push_unique(
                violations,
                Violation::SelfLoop {
                    channel: fifo.name.clone(),
                    tile: graph.tile_label(fifo.producer),
                },
            );
        }
    }
}

pub(crate) fn check_links(
    graph: &Graph,
    summaries: &BTreeMap<TileId, ProgramSummary>,
    violations: &mut Vec<Violation>,
) {
    let mut as_upstream: BTreeMap<ChannelId, usize> = BTreeMap::new();
    let mut as_downstream: BTreeMap<ChannelId, usize> = BTreeMap::new();

    for (_, link) in graph.links() {
        *as_upstream.entry(link.upstream).or_insert(0) += 1;
        *as_downstream.entry(link.downstream).or_insert(0) += 1;

        let (Ok(up), Ok(down)) = (graph.channel(link.upstream), graph.channel(link.downstream)) else {
            continue;
        };
        let mismatch = |reason: String| Violation::LinkMismatch {
            upstream: up.name.clone(),
            downstream: down.name.clone(),
            reason,
        };
        if link.upstream == link.downstream {
            push_unique(violations, mismatch("links a channel to itself".to_string()));
            continue;
        }
        if up.element != down.element {
            push_unique(
                violations,
                mismatch(format!("element types {} and {} differ", up.element, down.element)),
            );
        }
        if up.consumer != down.producer {
            push_unique(
                violations,
                mismatch(format!(
                    "upstream consumer {} is not the downstream producer {}",
                    graph.tile_label(up.consumer),
                    graph.tile_label(down.producer)
                )),
            );
        }

        check_forwarded_end(graph, summaries, link.upstream, Port::Consume, violations);
        check_forwarded_end(graph, summaries, link.downstream, Port::Produce, violations);
    }

    for (role, counts) in [("upstream", &as_upstream), ("downstream", &as_downstream)] {
        for (&channel, &count) in counts {
            if count > 1 {
                push_unique(
                    violations,
                    Violation::LinkFanout {
                        channel: graph.channel_name(channel),
                        role: role.to_string(),
                        count,
                    },
                );
            }
        }
    }

    for channel in link_cycles(graph) {
        push_unique(
            violations,
            Violation::LinkCycle {
                channel: graph.channel_name(channel),
            },
        );
    }
}

/// A channel end owned by a link must not also be driven by a program or a transfer.
fn check_forwarded_end(
    graph: &Graph,
    summaries: &BTreeMap<TileId, ProgramSummary>,
    channel: ChannelId,
    port: Port,
    violations: &mut Vec<Violation>,
) {
    for (tile, summary) in summaries {
        if summary.driven.contains(&(channel, port)) {
            push_unique(
                violations,
                Violation::LinkedEndDriven {
                    channel: graph.channel_name(channel),
                    port,
                    driver: format!("the program of {}", graph.tile_label(*tile)),
                },
            );
        }
    }

    let direction = match port {
        Port::Produce => Direction::Fill,
        Port::Consume => Direction::Drain,
    };
    for task in graph.sequence().tasks().iter() {
        if task.channel == channel && task.direction == direction {
            push_unique(
                violations,
                Violation::LinkedEndDriven {
                    channel: graph.channel_name(channel),
                    port,
                    driver: format!("DMA task {}", task.id),
                },
            );
        }
    }
}

/// Smallest channel of every cycle formed by links, in channel order
fn link_cycles(graph: &Graph) -> BTreeSet<ChannelId> {
    let mut next: BTreeMap<ChannelId, Vec<ChannelId>> = BTreeMap::new();
    for (_, link) in graph.links() {
        if link.upstream != link.downstream {
            next.entry(link.upstream).or_default().push(link.downstream);
        }
    }

    let mut cycles = BTreeSet::new();
    for &start in next.keys() {
        let mut stack = vec![(start, vec![start])];
        let mut seen = BTreeSet::new();
        while let Some((channel, path)) = stack.pop() {
            for &succ in next.get(&channel).into_iter().flatten() {
                if succ == start {
                    if let Some(&min) = path.iter().min() {
                        cycles.insert(min);
                    }
                } else if seen.insert(succ) {
                    let mut extended = path.clone();
                    extended.push(succ);
                    stack.push((succ, extended));
                }
            }
        }
    }
    cycles
}
