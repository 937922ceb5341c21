//! Accounting reports built from per-column measurements.
//!
//! The coordinator's telemetry tick drains the measurement probes of all
//! resident partitions into a [`Report`] and pushes it to the accounting
//! sink. The engine only depends on the sink's channel contract; the sink
//! implementation itself lives elsewhere.

use event_index::MeasurementSnapshot;
use tokio::sync::mpsc;

/// One measured key, e.g. `flow.bytes` or `index.max`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    pub key: String,
    pub snapshot: MeasurementSnapshot,
}

/// A batch of measurements emitted on one telemetry tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    pub entries: Vec<ReportEntry>,
}

/// Handle to the accounting sink.
pub type AccountantRef = mpsc::UnboundedSender<Report>;

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, key: impl Into<String>, snapshot: MeasurementSnapshot) {
        self.entries.push(ReportEntry {
            key: key.into(),
            snapshot,
        });
    }

    /// Append the `index.min` / `index.max` rate extremes over the entries
    /// collected so far.
    pub fn push_extremes(&mut self) {
        let mut min: Option<MeasurementSnapshot> = None;
        let mut max: Option<MeasurementSnapshot> = None;
        for entry in &self.entries {
            let rate = entry.snapshot.rate();
            if min.is_none() || rate < min.expect("set above").rate() {
                min = Some(entry.snapshot);
            }
            if max.is_none() || rate > max.expect("set above").rate() {
                max = Some(entry.snapshot);
            }
        }
        if let Some(snapshot) = min {
            self.push("index.min", snapshot);
        }
        if let Some(snapshot) = max {
            self.push("index.max", snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn snapshot(events: u64, millis: u64) -> MeasurementSnapshot {
        MeasurementSnapshot {
            events,
            duration: Duration::from_millis(millis),
        }
    }

    #[test]
    fn extremes_track_min_and_max_rates() {
        let mut report = Report::new();
        report.push("a.x", snapshot(100, 100)); // 1000/s
        report.push("a.y", snapshot(10, 100)); // 100/s
        report.push("b.z", snapshot(500, 100)); // 5000/s
        report.push_extremes();

        assert_eq!(report.entries.len(), 5);
        assert_eq!(report.entries[3].key, "index.min");
        assert_eq!(report.entries[3].snapshot, snapshot(10, 100));
        assert_eq!(report.entries[4].key, "index.max");
        assert_eq!(report.entries[4].snapshot, snapshot(500, 100));
    }

    #[test]
    fn empty_report_gets_no_extremes() {
        let mut report = Report::new();
        report.push_extremes();
        assert!(report.is_empty());
    }
}
