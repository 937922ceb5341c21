//! Lock-free per-column ingest measurements.
//!
//! Every column indexer carries a [`Measurement`] that accumulates the number
//! of indexed events and the time spent indexing them. The telemetry tick
//! drains the counters with an atomic exchange; no locks are involved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Accumulated event count and indexing time for one column.
#[derive(Debug, Default)]
pub struct Measurement {
    events: AtomicU64,
    nanos: AtomicU64,
}

/// A drained snapshot of a [`Measurement`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeasurementSnapshot {
    pub events: u64,
    pub duration: Duration,
}

impl MeasurementSnapshot {
    /// Events per second over the measured duration.
    pub fn rate(&self) -> f64 {
        let nanos = self.duration.as_nanos();
        if nanos == 0 {
            return 0.0;
        }
        self.events as f64 * 1_000_000_000.0 / nanos as f64
    }
}

impl Measurement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `events` handled over `duration`.
    pub fn record(&self, events: u64, duration: Duration) {
        self.events.fetch_add(events, Ordering::Relaxed);
        self.nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Drain the counters, returning what was accumulated since the last
    /// exchange.
    pub fn exchange_reset(&self) -> MeasurementSnapshot {
        MeasurementSnapshot {
            events: self.events.swap(0, Ordering::Relaxed),
            duration: Duration::from_nanos(self.nanos.swap(0, Ordering::Relaxed)),
        }
    }
}

/// Guard that measures a timed indexing step.
pub struct MeasurementTimer<'a> {
    measurement: &'a Measurement,
    start: Instant,
}

impl<'a> MeasurementTimer<'a> {
    pub fn start(measurement: &'a Measurement) -> Self {
        Self {
            measurement,
            start: Instant::now(),
        }
    }

    /// Stop the timer, crediting `events` to the measurement.
    pub fn stop(self, events: u64) {
        self.measurement.record(events, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_drain() {
        let m = Measurement::new();
        m.record(10, Duration::from_millis(5));
        m.record(20, Duration::from_millis(10));

        let snapshot = m.exchange_reset();
        assert_eq!(snapshot.events, 30);
        assert_eq!(snapshot.duration, Duration::from_millis(15));

        // Drained.
        assert_eq!(m.exchange_reset(), MeasurementSnapshot::default());
    }

    #[test]
    fn rate_is_events_per_second() {
        let snapshot = MeasurementSnapshot {
            events: 500,
            duration: Duration::from_millis(500),
        };
        assert!((snapshot.rate() - 1000.0).abs() < 1e-6);
        assert_eq!(MeasurementSnapshot::default().rate(), 0.0);
    }
}
