//! Timing helpers for tile workers and DMA transfers.
//!
//! ```rust
//! use tilefabric_tracing::performance::{record_transfer, PerformanceSpan};
//!
//! let span = PerformanceSpan::new("tile(0,2)", Some(100));
//! drop(span); // logged only when it took at least 100µs
//!
//! record_transfer("in", "fill", 64, 12);
//! ```

use std::time::Instant;

/// RAII timer that logs its duration on drop, optionally only above a threshold.
pub struct PerformanceSpan {
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Start timing `name`. With `threshold_us`, shorter spans are not logged.
    pub fn new(name: impl AsRef<str>, threshold_us: Option<u64>) -> Self {
        let span = tracing::debug_span!("perf", name = %name.as_ref());
        Self {
            threshold_us,
            start_time: Instant::now(),
            span,
        }
    }

    /// Microseconds since the span started.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Enter the underlying tracing span.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        let elapsed_us = self.elapsed_us();
        if self.threshold_us.map_or(true, |threshold| elapsed_us >= threshold) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Record a completed DMA transfer between host memory and a channel.
pub fn record_transfer(channel: &str, direction: &str, elements: usize, duration_us: u64) {
    let elements_per_sec = if duration_us > 0 {
        elements as f64 / duration_us as f64 * 1_000_000.0
    } else {
        0.0
    };

    tracing::debug!(
        event = "dma_transfer",
        channel = channel,
        direction = direction,
        elements = elements,
        duration_us = duration_us,
        elements_per_sec = elements_per_sec,
        "dma_transfer_complete"
    );
}

/// Record the number of steps a tile program executed.
pub fn record_program(tile: &str, steps: usize, duration_us: u64) {
    tracing::debug!(
        event = "core_program",
        tile = tile,
        steps = steps,
        duration_us = duration_us,
        "core_program_complete"
    );
}
