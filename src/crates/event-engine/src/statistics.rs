//! Cumulative ingest statistics, persisted at `<db>/statistics`.

use event_core::collections::BTreeMap;
use event_index::blob;
use serde::{Deserialize, Serialize};
use std::path::Path;

const STATISTICS_TAG: &str = "statistics";

/// Counters for one layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutStatistics {
    /// Number of events ingested with this layout.
    pub count: u64,
}

/// Cumulative per-layout ingest counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub layouts: BTreeMap<String, LayoutStatistics>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `rows` events to `layout`.
    pub fn record(&mut self, layout: &str, rows: u64) {
        self.layouts.entry(layout.to_string()).or_default().count += rows;
    }

    /// Total events across all layouts.
    pub fn total_events(&self) -> u64 {
        self.layouts.values().map(|s| s.count).sum()
    }

    pub fn load(path: &Path) -> event_index::Result<Statistics> {
        let (_, stats) = blob::load_tagged(path, STATISTICS_TAG)?;
        Ok(stats)
    }

    pub fn save(&self, path: &Path) -> event_index::Result<()> {
        blob::save(path, STATISTICS_TAG, 0, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn record_and_round_trip() {
        let mut stats = Statistics::new();
        stats.record("flow", 10);
        stats.record("flow", 5);
        stats.record("dns", 1);
        assert_eq!(stats.layouts["flow"].count, 15);
        assert_eq!(stats.total_events(), 16);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("statistics");
        stats.save(&path).unwrap();
        assert_eq!(Statistics::load(&path).unwrap(), stats);
    }
}
