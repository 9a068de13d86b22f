// Process-wide membership counters, rendered for a Prometheus scrape endpoint.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct Metrics {
    /// Ring snapshots published after a membership delta or eviction
    pub ring_rebuilds: AtomicU64,
    /// Deltas rejected by a resolver; the previous ring was kept
    pub deltas_rejected: AtomicU64,
    /// Change events handed to a listener sink
    pub events_delivered: AtomicU64,
    /// Change events dropped because a listener sink was full or closed
    pub events_dropped: AtomicU64,
    /// Lookups that found an empty ring
    pub lookups_insufficient_hosts: AtomicU64,
    pub self_evictions: AtomicU64,
}

impl Metrics {
    const fn new() -> Self {
        Self {
            ring_rebuilds: AtomicU64::new(0),
            deltas_rejected: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            lookups_insufficient_hosts: AtomicU64::new(0),
            self_evictions: AtomicU64::new(0),
        }
    }

    pub fn inc_ring_rebuild(&self) {
        self.ring_rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_delta_rejected(&self) {
        self.deltas_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_event_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_insufficient_hosts(&self) {
        self.lookups_insufficient_hosts
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_self_eviction(&self) {
        self.self_evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Format all metrics as Prometheus text
    pub fn to_prometheus(&self) -> String {
        let counters: [(&str, &str, &AtomicU64); 6] = [
            (
                "membership_ring_rebuilds_total",
                "Hash ring snapshots published",
                &self.ring_rebuilds,
            ),
            (
                "membership_deltas_rejected_total",
                "Membership deltas rejected (previous ring kept)",
                &self.deltas_rejected,
            ),
            (
                "membership_events_delivered_total",
                "Change events delivered to listeners",
                &self.events_delivered,
            ),
            (
                "membership_events_dropped_total",
                "Change events dropped due to full or closed listener sink",
                &self.events_dropped,
            ),
            (
                "membership_lookups_insufficient_hosts_total",
                "Lookups against an empty ring",
                &self.lookups_insufficient_hosts,
            ),
            (
                "membership_self_evictions_total",
                "Voluntary self-evictions from the membership view",
                &self.self_evictions,
            ),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, value.load(Ordering::Relaxed)));
        }
        output
    }
}

/// Global metrics instance
pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_output_lists_every_counter() {
        let metrics = Metrics::new();
        metrics.inc_event_dropped();
        metrics.inc_event_dropped();
        metrics.inc_ring_rebuild();

        let output = metrics.to_prometheus();
        assert!(output.contains("# TYPE membership_events_dropped_total counter"));
        assert!(output.contains("membership_events_dropped_total 2\n"));
        assert!(output.contains("membership_ring_rebuilds_total 1\n"));
        assert!(output.contains("membership_self_evictions_total 0\n"));
        assert_eq!(output.matches("# HELP").count(), 6);
    }
}
