//! Shim DMA transfers between host tensors and channel endpoints.
//!
//! A transfer walks its size descriptor in order and moves one FIFO element
//! per `element_len` host scalars. Transfers on the same channel are chained:
//! each waits for its predecessor's completion before touching the FIFO.

use std::sync::atomic::Ordering;

use tilefabric_core::{Direction, DmaTask, ErrorKind, FabricError, Port, TaskId};
use tilefabric_tracing::performance::{record_transfer, PerformanceSpan};

use crate::element::Element;
use crate::error::{Result, RuntimeError};
use crate::fabric::Fabric;

pub(crate) fn run_transfer<T: Element>(fabric: &Fabric<'_, T>, task: &DmaTask, previous: Option<TaskId>) -> Result<()> {
    let graph = fabric.graph;
    let fifo = fabric.fifo(task.channel)?;
    let waiter = format!("dma {} bd {} on '{}'", task.id, task.bd_id, fifo.name());

    if let Some(previous) = previous {
        fabric.completions.wait_all(&[previous], &waiter, &fabric.control)?;
    }

    let span = PerformanceSpan::new(&waiter, None);
    let _entered = span.enter();

    let element_len = fifo.element_len();
    let indices = task.sizes.host_indices();
    if indices.len() % element_len != 0 {
        return Err(FabricError::SizeMismatch(format!(
            "task {} moves {} scalars, not a multiple of the {element_len}-scalar element of '{}'",
            task.id,
            indices.len(),
            fifo.name()
        ))
        .into());
    }
    let host = fabric.host(task.host.index())?;
    let host_len = host.lock().len();
    if let Some(&index) = indices.iter().find(|&&index| index >= host_len) {
        return Err(RuntimeError::HostData(format!(
            "task {} reaches host index {index} of argument {} ({host_len} elements)",
            task.id,
            task.host.index()
        )));
    }

    let port = match task.direction {
        Direction::Fill => Port::Produce,
        Direction::Drain => Port::Consume,
    };
    let elements = indices.len() / element_len;
    for chunk in indices.chunks(element_len) {
        let handles = fifo.acquire(port, 1, &waiter, &fabric.control)?;
        let slot = handles
            .first()
            .map(|handle| handle.slot)
            .ok_or_else(|| RuntimeError::program(&waiter, ErrorKind::NotReady, "acquire returned no slot"))?;
        match task.direction {
            Direction::Fill => {
                let data: Vec<T> = {
                    let host = host.lock();
                    chunk.iter().map(|&index| host[index]).collect()
                };
                fifo.write(slot, &data)?;
            }
            Direction::Drain => {
                let data = fifo.read(slot);
                let mut host = host.lock();
                for (&index, value) in chunk.iter().zip(data) {
                    host[index] = value;
                }
            }
        }
        fifo.release(port, 1, &waiter, &fabric.control)?;
    }

    fabric.counters.transfers.fetch_add(1, Ordering::Relaxed);
    fabric
        .counters
        .elements_transferred
        .fetch_add(elements as u64, Ordering::Relaxed);
    record_transfer(
        &graph.channel_name(task.channel),
        &task.direction.to_string(),
        elements,
        span.elapsed_us(),
    );
    fabric.control.note_progress();
    fabric.completions.complete(task.id);
    Ok(())
}
