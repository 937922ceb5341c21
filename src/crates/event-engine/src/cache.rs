//! Bounded LRU cache of loaded historical partitions.

use crate::error::Result;
use event_index::Partition;
use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// A partition shared between the coordinator and evaluator tasks.
///
/// The lock serializes appends against read-only lookups; concurrent lookups
/// proceed in parallel.
pub type PartitionHandle = Arc<RwLock<Partition>>;

/// LRU map of partition id to loaded partition, owned solely by the
/// coordinator task. Misses load from disk; evicted partitions get a final
/// best-effort flush before their indexes are dropped.
pub struct PartitionCache {
    inner: LruCache<Uuid, PartitionHandle>,
    db_directory: PathBuf,
    partition_capacity: u64,
}

impl PartitionCache {
    pub fn new(
        max_partitions: usize,
        db_directory: PathBuf,
        partition_capacity: u64,
    ) -> PartitionCache {
        let capacity = NonZeroUsize::new(max_partitions.max(1)).expect("nonzero capacity");
        PartitionCache {
            inner: LruCache::new(capacity),
            db_directory,
            partition_capacity,
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.inner.contains(id)
    }

    /// Ids of all resident partitions, most recently used first.
    pub fn ids(&self) -> Vec<Uuid> {
        self.inner.iter().map(|(id, _)| *id).collect()
    }

    /// Fetch a partition, loading it from disk on a miss.
    pub fn get_or_load(&mut self, id: Uuid) -> Result<PartitionHandle> {
        if let Some(handle) = self.inner.get(&id) {
            return Ok(Arc::clone(handle));
        }
        debug!("loading partition {} from disk", id);
        let partition = Partition::load(&self.db_directory, id, self.partition_capacity)?;
        let handle: PartitionHandle = Arc::new(RwLock::new(partition));
        if let Some((evicted_id, evicted)) = self.inner.push(id, Arc::clone(&handle)) {
            if evicted_id != id {
                if let Err(e) = evicted.write().flush_to_disk() {
                    error!("failed to flush evicted partition {}: {}", evicted_id, e);
                }
            }
        }
        Ok(handle)
    }
}
