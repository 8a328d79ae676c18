//! Performance-focused tracing utilities
//!
//! This module provides utilities for performance instrumentation with automatic
//! timing, bandwidth calculation, and threshold filtering.
//!
//! ## Example
//!
//! ```rust
//! use prism_tracing::performance::{PerformanceSpan, record_allocation};
//!
//! // Create a performance span with threshold filtering
//! let span = PerformanceSpan::new("my_operation", Some(100));
//! // ... do work ...
//! drop(span); // Logs only if duration > 100μs
//!
//! // Record a buffer allocation event
//! record_allocation(1024, "read-write", 150);
//! ```

use std::time::Instant;
use tracing::Level;

/// RAII guard that measures span duration and conditionally logs based on threshold.
///
/// The span is automatically timed when created and logged when dropped, but only
/// if the duration exceeds the optional threshold.
///
/// # Example
///
/// ```rust
/// use prism_tracing::performance::PerformanceSpan;
///
/// {
///     let _span = PerformanceSpan::new("expensive_operation", Some(1000));
///     // ... operation code ...
/// } // Span logged only if duration > 1000μs
/// ```
pub struct PerformanceSpan {
    _span_name: String,
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Create a new performance span with optional threshold filtering.
    ///
    /// # Arguments
    ///
    /// * `span_name` - Name of the operation being measured
    /// * `threshold_us` - Minimum duration in microseconds to log (None = always log)
    ///
    /// # Example
    ///
    /// ```rust
    /// use prism_tracing::performance::PerformanceSpan;
    ///
    /// // Always log
    /// let span1 = PerformanceSpan::new("always_log", None);
    ///
    /// // Only log if > 100μs
    /// let span2 = PerformanceSpan::new("conditional", Some(100));
    /// ```
    pub fn new(span_name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let span_name = span_name.into();
        let span = tracing::debug_span!("perf", name = %span_name);
        let start_time = Instant::now();

        Self {
            _span_name: span_name,
            threshold_us,
            start_time,
            span,
        }
    }

    /// Create a new performance span at the specified tracing level.
    ///
    /// # Arguments
    ///
    /// * `level` - Tracing level (Debug, Info, Warn, etc.)
    /// * `span_name` - Name of the operation
    /// * `threshold_us` - Minimum duration in microseconds to log
    ///
    /// # Example
    ///
    /// ```rust
    /// use prism_tracing::performance::PerformanceSpan;
    /// use tracing::Level;
    ///
    /// let span = PerformanceSpan::with_level(
    ///     Level::INFO,
    ///     "important_operation",
    ///     Some(500)
    /// );
    /// ```
    pub fn with_level(level: Level, span_name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let span_name = span_name.into();
        let span = match level {
            Level::TRACE => tracing::trace_span!("perf", name = %span_name),
            Level::DEBUG => tracing::debug_span!("perf", name = %span_name),
            Level::INFO => tracing::info_span!("perf", name = %span_name),
            Level::WARN => tracing::warn_span!("perf", name = %span_name),
            Level::ERROR => tracing::error_span!("perf", name = %span_name),
        };
        let start_time = Instant::now();

        Self {
            _span_name: span_name,
            threshold_us,
            start_time,
            span,
        }
    }

    /// Get the elapsed time since span creation.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Enter this span's context.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        let elapsed_us = self.elapsed_us();

        // Only log if threshold is None or duration exceeds threshold
        if self.threshold_us.is_none_or(|t| elapsed_us >= t) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Record a buffer allocation event with standard format.
///
/// Emits a tracing event with allocation details including size, access mode,
/// and duration.
///
/// # Arguments
///
/// * `size_bytes` - Size of allocation in bytes
/// * `mode` - Access mode of the buffer ("read-only", "write-only", "read-write")
/// * `duration_us` - Time taken for allocation in microseconds
///
/// # Example
///
/// ```rust
/// use prism_tracing::performance::record_allocation;
///
/// record_allocation(1024, "read-write", 150);
/// ```
pub fn record_allocation(size_bytes: usize, mode: &str, duration_us: u64) {
    tracing::debug!(
        event = "allocation",
        size_bytes = size_bytes,
        size_kb = size_bytes as f64 / 1024.0,
        mode = mode,
        duration_us = duration_us,
        "buffer_allocation"
    );
}

/// Record a kernel launch completion event with standard format.
///
/// Emits a tracing event with launch details including the number of work items,
/// duration, and calculated throughput.
///
/// # Arguments
///
/// * `work_items` - Total number of work items in the launch grid
/// * `duration_us` - Execution time in microseconds
///
/// # Example
///
/// ```rust
/// use prism_tracing::performance::record_launch;
///
/// record_launch(1024, 500);
/// ```
pub fn record_launch(work_items: usize, duration_us: u64) {
    let throughput = if duration_us > 0 {
        (work_items as f64 / duration_us as f64) * 1_000_000.0
    } else {
        0.0
    };

    tracing::debug!(
        event = "launch",
        work_items = work_items,
        duration_us = duration_us,
        duration_ms = duration_us as f64 / 1000.0,
        items_per_sec = throughput,
        "kernel_launch"
    );
}

/// Record a data transfer event with standard format and bandwidth calculation.
///
/// Emits a tracing event with transfer details including size, direction,
/// duration, and calculated bandwidth.
///
/// # Arguments
///
/// * `bytes` - Number of bytes transferred
/// * `direction` - Transfer direction ("H2D" = Host to Device, "D2H" = Device to Host, "D2D" = Device to Device)
/// * `duration_us` - Transfer time in microseconds
///
/// # Example
///
/// ```rust
/// use prism_tracing::performance::record_transfer;
///
/// record_transfer(4096, "H2D", 250);
/// ```
pub fn record_transfer(bytes: usize, direction: &str, duration_us: u64) {
    let bandwidth_mbps = if duration_us > 0 {
        (bytes as f64 / duration_us as f64) * 1_000_000.0 / (1024.0 * 1024.0)
    } else {
        0.0
    };

    tracing::debug!(
        event = "transfer",
        bytes = bytes,
        kb = bytes as f64 / 1024.0,
        mb = bytes as f64 / (1024.0 * 1024.0),
        direction = direction,
        duration_us = duration_us,
        duration_ms = duration_us as f64 / 1000.0,
        bandwidth_mbps = bandwidth_mbps,
        bandwidth_gbps = bandwidth_mbps / 1024.0,
        "data_transfer"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_performance_span_creation() {
        let span = PerformanceSpan::new("test_span", None);
        assert_eq!(span._span_name, "test_span");
        assert_eq!(span.threshold_us, None);
    }

    #[test]
    fn test_performance_span_with_threshold() {
        let span = PerformanceSpan::new("test_span", Some(1000));
        assert_eq!(span.threshold_us, Some(1000));
    }

    #[test]
    fn test_performance_span_elapsed() {
        let span = PerformanceSpan::new("test_span", None);
        thread::sleep(Duration::from_millis(10));
        let elapsed = span.elapsed_us();
        assert!(elapsed >= 10_000, "elapsed should be at least 10ms");
    }

    #[test]
    fn test_performance_span_with_level() {
        let span = PerformanceSpan::with_level(Level::INFO, "test_span", Some(100));
        assert_eq!(span._span_name, "test_span");
        assert_eq!(span.threshold_us, Some(100));
    }

    #[test]
    fn test_record_allocation() {
        // Just verify it doesn't panic
        record_allocation(1024, "read-write", 150);
    }

    #[test]
    fn test_record_launch() {
        // Just verify it doesn't panic
        record_launch(1024, 500);
    }

    #[test]
    fn test_record_transfer() {
        // Just verify it doesn't panic
        record_transfer(4096, "H2D", 250);
    }

    #[test]
    fn test_bandwidth_calculation() {
        // Transfer 1MB in 1ms = 1000 MB/s
        let bytes = 1024 * 1024;
        let duration_us = 1000;
        let bandwidth_mbps = (bytes as f64 / duration_us as f64) * 1_000_000.0 / (1024.0 * 1024.0);
        assert!((bandwidth_mbps - 1000.0).abs() < 0.01);
    }

    #[test]
    fn test_launch_throughput_calculation() {
        // 1M items in 1ms = 1B items/sec
        let work_items = 1_000_000;
        let duration_us = 1000;
        let items_per_sec = (work_items as f64 / duration_us as f64) * 1_000_000.0;
        assert!((items_per_sec - 1_000_000_000.0).abs() < 1.0);
    }
}
