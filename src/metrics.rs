//! Metrics collection for consumers and producers

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Consumer metrics collector, one per consumer
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    pub messages_received: AtomicU64,
    pub messages_handled: AtomicU64,
    pub handler_errors: AtomicU64,
    pub offsets_stored: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub pauses: AtomicU64,
    pub resumes: AtomicU64,
    pub poll_errors: AtomicU64,
    handle_latency_sum: AtomicU64,
    handle_latency_count: AtomicU64,
}

impl ConsumerMetrics {
    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a handler invocation and how long it took
    pub fn record_handled(&self, ok: bool, latency: Duration) {
        if ok {
            self.messages_handled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.handler_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.handle_latency_sum
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.handle_latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self) {
        self.offsets_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pause(&self) {
        self.pauses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resume(&self) {
        self.resumes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_error(&self) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average handler latency in microseconds
    pub fn average_handle_latency_us(&self) -> f64 {
        let sum = self.handle_latency_sum.load(Ordering::Relaxed);
        let count = self.handle_latency_count.load(Ordering::Relaxed);

        if count == 0 {
            0.0
        } else {
            sum as f64 / count as f64
        }
    }

    pub fn snapshot(&self) -> ConsumerMetricsSnapshot {
        ConsumerMetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_handled: self.messages_handled.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            offsets_stored: self.offsets_stored.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            pauses: self.pauses.load(Ordering::Relaxed),
            resumes: self.resumes.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
            average_handle_latency_us: self.average_handle_latency_us(),
        }
    }
}

/// Snapshot of consumer metrics at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerMetricsSnapshot {
    pub messages_received: u64,
    pub messages_handled: u64,
    pub handler_errors: u64,
    pub offsets_stored: u64,
    pub messages_dropped: u64,
    pub pauses: u64,
    pub resumes: u64,
    pub poll_errors: u64,
    pub average_handle_latency_us: f64,
}

/// Producer metrics collector, one per producer
#[derive(Debug, Default)]
pub struct ProducerMetrics {
    pub records_produced: AtomicU64,
    pub bytes_produced: AtomicU64,
    pub produce_errors: AtomicU64,
    pub records_delivered: AtomicU64,
    pub delivery_failures: AtomicU64,
    pub transport_errors: AtomicU64,
}

impl ProducerMetrics {
    pub fn record_produced(&self, byte_count: u64) {
        self.records_produced.fetch_add(1, Ordering::Relaxed);
        self.bytes_produced.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn record_produce_error(&self) {
        self.produce_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.records_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProducerMetricsSnapshot {
        ProducerMetricsSnapshot {
            records_produced: self.records_produced.load(Ordering::Relaxed),
            bytes_produced: self.bytes_produced.load(Ordering::Relaxed),
            produce_errors: self.produce_errors.load(Ordering::Relaxed),
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of producer metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerMetricsSnapshot {
    pub records_produced: u64,
    pub bytes_produced: u64,
    pub produce_errors: u64,
    pub records_delivered: u64,
    pub delivery_failures: u64,
    pub transport_errors: u64,
}

impl ProducerMetricsSnapshot {
    /// Records produced but not yet reported either way
    pub fn outstanding(&self) -> u64 {
        self.records_produced
            .saturating_sub(self.records_delivered + self.delivery_failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_metrics() {
        let metrics = ConsumerMetrics::default();

        metrics.record_received();
        metrics.record_handled(true, Duration::from_micros(100));
        metrics.record_handled(false, Duration::from_micros(300));
        metrics.record_pause();
        metrics.record_resume();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_received, 1);
        assert_eq!(snapshot.messages_handled, 1);
        assert_eq!(snapshot.handler_errors, 1);
        assert_eq!(snapshot.pauses, 1);
        assert_eq!(snapshot.resumes, 1);
        assert_eq!(snapshot.average_handle_latency_us, 200.0);
    }

    #[test]
    fn test_producer_metrics() {
        let metrics = ProducerMetrics::default();

        metrics.record_produced(10);
        metrics.record_produced(5);
        metrics.record_delivered();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.records_produced, 2);
        assert_eq!(snapshot.bytes_produced, 15);
        assert_eq!(snapshot.outstanding(), 1);
    }
}
