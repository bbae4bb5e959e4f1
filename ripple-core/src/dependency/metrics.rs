//! Dispatch counters.

use std::time::Duration;

use serde::Serialize;

/// Cumulative counters for a manager, updated at the end of every dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PerformanceMetrics {
    /// Wall time spent inside dispatch calls.
    pub total_dispatch_time: Duration,
    /// Number of dispatch calls (global and namespace-scoped).
    pub dispatch_count: u64,
    /// Events handed to delivery after deduplication.
    pub events_processed: u64,
    /// Events folded into an earlier duplicate.
    pub deduplication_savings: u64,
    /// Processor calls that returned an error or panicked.
    pub processing_errors: u64,
    /// Feedback edges removed to break cycles.
    pub cycle_edges_broken: u64,
}

impl PerformanceMetrics {
    /// Mean time per dispatch call.
    pub fn average_dispatch_time(&self) -> Duration {
        match u32::try_from(self.dispatch_count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total_dispatch_time / count,
            Err(_) => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_of_empty_metrics_is_zero() {
        assert_eq!(PerformanceMetrics::default().average_dispatch_time(), Duration::ZERO);
    }

    #[test]
    fn average_divides_total() {
        let metrics = PerformanceMetrics {
            total_dispatch_time: Duration::from_millis(30),
            dispatch_count: 3,
            ..Default::default()
        };
        assert_eq!(metrics.average_dispatch_time(), Duration::from_millis(10));
    }
}
