//! Instrumentation macros.

/// Create a [`crate::performance::PerformanceSpan`], logging any
/// fields at debug when it opens.
///
/// ```rust
/// use tilefabric_tracing::perf_span;
///
/// let _span = perf_span!("link_forward", elements = 64);
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        tracing::debug!(name = $name, $($field = $value),+, "perf_span_start");
        $crate::performance::PerformanceSpan::new($name, None)
    }};
}

/// Run a block and return `(result, duration_us)`, logging the duration at debug.
///
/// ```rust
/// use tilefabric_tracing::timed_block;
///
/// let (sum, _us) = timed_block!("sum", { (1..=4).sum::<i32>() });
/// assert_eq!(sum, 10);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(operation = $name, duration_us = duration_us, "timed_block_complete");
        (result, duration_us)
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn perf_span_with_fields() {
        let _span = perf_span!("forward", elements = 16, depth = 2);
    }

    #[test]
    fn timed_block_returns_value() {
        let (value, _us) = timed_block!("answer", { 6 * 7 });
        assert_eq!(value, 42);
    }
}
