//! Runtime sequence checks: descriptor reuse, transfer sizes and completion coverage

use std::collections::{BTreeMap, BTreeSet};

use crate::dma::{Direction, TaskId};
use crate::graph::Graph;
use crate::sequence::SeqOp;
use crate::tile::TileId;

use super::flow::{started_tasks, Precedence};
use super::program::push_unique;
use super::Violation;

/// Replay the sequence in order: no two live tasks may share a descriptor.
pub(crate) fn check_descriptors(graph: &Graph, violations: &mut Vec<Violation>) {
    let tasks = graph.sequence().tasks();
    let mut holders: BTreeMap<(TileId, u8), TaskId> = BTreeMap::new();

    for op in graph.sequence().ops() {
        match op {
            SeqOp::Create(id) | SeqOp::Memcpy(id) => {
                let Ok(task) = tasks.get(*id) else {
                    continue;
                };
                let key = (task.shim, task.bd_id);
                match holders.get(&key) {
                    Some(first) => push_unique(
                        violations,
                        Violation::DescriptorCollision {
                            tile: graph.tile_label(task.shim),
                            bd_id: task.bd_id,
                            first: first.index(),
                            second: id.index(),
                        },
                    ),
                    None => {
                        holders.insert(key, *id);
                    }
                }
            }
            SeqOp::Free(ids) | SeqOp::Wait { tasks: ids, .. } => {
                holders.retain(|_, holder| !ids.contains(holder));
            }
            SeqOp::Start(_) | SeqOp::Await(_) => {}
        }
    }
}

/// Transfer sizes must be whole channel elements inside the host region.
pub(crate) fn check_sizes(graph: &Graph, violations: &mut Vec<Violation>) {
    let sequence = graph.sequence();
    for task in sequence.tasks().iter() {
        let (Ok(fifo), Some(host)) = (graph.channel(task.channel), sequence.host_arg(task.host)) else {
            continue;
        };
        let mismatch = |message: String| Violation::SizeMismatch {
            task: task.id.index(),
            channel: fifo.name.clone(),
            message,
        };

        let total = task.sizes.total_elements();
        let per_element = fifo.element.num_elements();
        if total % per_element != 0 {
            push_unique(
                violations,
                mismatch(format!(
                    "{} moves {total} scalars, not a multiple of the {per_element}-scalar element {}",
                    task.sizes, fifo.element
                )),
            );
        }
        let last = task.sizes.max_index();
        if last >= host.num_elements() {
            push_unique(
                violations,
                mismatch(format!(
                    "{} reaches host index {last} of a {}-scalar region",
                    task.sizes,
                    host.num_elements()
                )),
            );
        }
        if host.dtype != fifo.element.dtype {
            push_unique(
                violations,
                mismatch(format!(
                    "host region is {} but channel elements are {}",
                    host.dtype, fifo.element.dtype
                )),
            );
        }
    }
}

/// Every started transfer must be proven complete before the sequence ends.
///
/// Drains need an await of their own (explicit or through `dma_wait`). A fill
/// is also covered by an awaited drain whose channel it strictly precedes.
pub(crate) fn check_coverage(graph: &Graph, precedence: &Precedence, violations: &mut Vec<Violation>) {
    let mut awaited: BTreeSet<TaskId> = BTreeSet::new();
    for op in graph.sequence().ops() {
        match op {
            SeqOp::Await(ids) | SeqOp::Wait { tasks: ids, .. } => awaited.extend(ids.iter().copied()),
            _ => {}
        }
    }

    let started = started_tasks(graph);
    let awaited_drains: Vec<_> = started
        .iter()
        .filter(|task| task.direction == Direction::Drain && awaited.contains(&task.id))
        .map(|task| task.channel)
        .collect();

    for task in &started {
        if awaited.contains(&task.id) {
            continue;
        }
        let covered = task.direction == Direction::Fill
            && awaited_drains
                .iter()
                .any(|&drain| precedence.reaches(task.channel, drain));
        if !covered {
            push_unique(
                violations,
                Violation::MissingAwait {
                    task: task.id.index(),
                    channel: graph.channel_name(task.channel),
                    direction: task.direction,
                },
            );
        }
    }
}
