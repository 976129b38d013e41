//! Link forwarding through an intermediate tile.
//!
//! A forwarder owns the upstream channel's Consume end and the downstream
//! channel's Produce end. Each step takes one upstream slot and one
//! downstream slot, copies the element and releases both. The number of
//! steps is the statically counted traffic of the upstream channel.

use std::sync::atomic::Ordering;

use tilefabric_core::{ErrorKind, Link, Port};
use tilefabric_tracing::perf_span;

use crate::element::Element;
use crate::error::{Result, RuntimeError};
use crate::fabric::Fabric;

pub(crate) fn run_link<T: Element>(fabric: &Fabric<'_, T>, link: &Link, forwards: u64) -> Result<()> {
    let upstream = fabric.fifo(link.upstream)?;
    let downstream = fabric.fifo(link.downstream)?;
    let waiter = format!("link '{}' -> '{}'", upstream.name(), downstream.name());
    let _span = perf_span!(waiter.as_str(), forwards = forwards);

    if upstream.element_len() != downstream.element_len() {
        return Err(RuntimeError::program(
            &waiter,
            ErrorKind::InvalidTopology,
            format!(
                "elements of {} and {} scalars cannot be forwarded",
                upstream.element_len(),
                downstream.element_len()
            ),
        ));
    }

    for _ in 0..forwards {
        let src = upstream.acquire(Port::Consume, 1, &waiter, &fabric.control)?;
        let dst = downstream.acquire(Port::Produce, 1, &waiter, &fabric.control)?;
        if let (Some(src), Some(dst)) = (src.first(), dst.first()) {
            downstream.write(dst.slot, &upstream.read(src.slot))?;
        }
        upstream.release(Port::Consume, 1, &waiter, &fabric.control)?;
        downstream.release(Port::Produce, 1, &waiter, &fabric.control)?;
    }

    fabric.counters.elements_forwarded.fetch_add(forwards, Ordering::Relaxed);
    tracing::debug!(link = %waiter, forwards, "link_forward_complete");
    Ok(())
}
