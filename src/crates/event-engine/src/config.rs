//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration of the index coordinator and its collaborators.
///
/// All options default to production values; use the builder methods to
/// override them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the database directory.
    pub db_directory: PathBuf,
    /// Maximum number of events per partition.
    pub max_partition_size: u64,
    /// Maximum number of in-memory historical partitions.
    pub max_in_mem_partitions: usize,
    /// Number of candidate partitions scheduled in the first round of a new
    /// query.
    pub taste_partitions: u32,
    /// Number of query supervisor workers.
    pub num_query_supervisors: usize,
    /// Rate at which telemetry reports are emitted.
    pub telemetry_rate: Duration,
    /// Time after which a request to the coordinator is considered failed.
    pub request_timeout: Duration,
    /// Slice credit granted to the ingest stream; bounds in-flight slices.
    pub ingest_queue_capacity: usize,
}

impl EngineConfig {
    pub fn new(db_directory: impl Into<PathBuf>) -> Self {
        Self {
            db_directory: db_directory.into(),
            max_partition_size: 1_048_576,
            max_in_mem_partitions: 10,
            taste_partitions: 5,
            num_query_supervisors: 10,
            telemetry_rate: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            ingest_queue_capacity: 64,
        }
    }

    pub fn with_max_partition_size(mut self, events: u64) -> Self {
        self.max_partition_size = events;
        self
    }

    pub fn with_max_in_mem_partitions(mut self, partitions: usize) -> Self {
        self.max_in_mem_partitions = partitions;
        self
    }

    pub fn with_taste_partitions(mut self, partitions: u32) -> Self {
        self.taste_partitions = partitions;
        self
    }

    pub fn with_query_supervisors(mut self, workers: usize) -> Self {
        self.num_query_supervisors = workers;
        self
    }

    pub fn with_telemetry_rate(mut self, rate: Duration) -> Self {
        self.telemetry_rate = rate;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_ingest_queue_capacity(mut self, slices: usize) -> Self {
        self.ingest_queue_capacity = slices;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::new("/tmp/db");
        assert_eq!(config.max_partition_size, 1_048_576);
        assert_eq!(config.max_in_mem_partitions, 10);
        assert_eq!(config.taste_partitions, 5);
        assert_eq!(config.num_query_supervisors, 10);
        assert_eq!(config.telemetry_rate, Duration::from_secs(1));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }
}
