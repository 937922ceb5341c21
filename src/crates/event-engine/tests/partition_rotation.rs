//! Partition rotation and restart behavior.

use event_core::{RecordField, RecordType, TableSlice, Type, Value};
use event_engine::{EngineConfig, IndexCoordinator, IndexHandle, QueryEvent};
use event_index::{Bitmap, Expression, RelOp};
use tempfile::TempDir;

fn layout() -> RecordType {
    RecordType::new(
        "metric",
        vec![
            RecordField::new("host", Type::string()),
            RecordField::new("value", Type::count()),
        ],
    )
}

fn slice(id: u64) -> TableSlice {
    TableSlice::new(
        layout(),
        id,
        vec![vec![
            Some(Value::from("web-1")),
            Some(Value::Count(id % 7)),
        ]],
    )
}

async fn ingest(handle: &IndexHandle, total: u64) {
    for id in 0..total {
        handle.ingest(slice(id).into_handle()).await.unwrap();
    }
    handle.subscribe_flush().await.unwrap();
}

async fn all_hits(handle: &IndexHandle, expr: Expression) -> Bitmap {
    let mut query = handle.query(expr).await.unwrap();
    let mut hits = Bitmap::new();
    let mut batches_done = 0;
    let mut scheduled = query.response.scheduled;
    while let Some(event) = query.next_event().await {
        match event {
            QueryEvent::Hits { hits: partial, .. } => hits |= partial,
            QueryEvent::Done { .. } => {
                batches_done += 1;
                if scheduled as u32 >= query.response.total || query.response.id.is_nil() {
                    break;
                }
                // Fetch everything that remains.
                let n = query.response.total - scheduled;
                scheduled = query.response.total;
                query.fetch_more(n).unwrap();
            }
        }
    }
    assert!(batches_done >= 1);
    hits
}

#[tokio::test]
async fn rotation_preserves_query_results() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::new(dir.path()).with_max_partition_size(10);
    let handle = IndexCoordinator::spawn(config).unwrap();
    ingest(&handle, 25).await;

    // 25 events spread over two rotated partitions plus the active one.
    let status = handle.status().await.unwrap();
    assert!(status.partitions.active.is_some());
    assert_eq!(status.statistics.total_events(), 25);
    let resident = 1
        + status.partitions.unpersisted.len()
        + status.partitions.cached.len();
    assert!(resident >= 1);

    let expr = Expression::field("host", RelOp::Equal, "web-1");
    let hits = all_hits(&handle, expr).await;
    assert_eq!(hits.rank(), 25);
    assert_eq!(hits, Bitmap::insert_range(0..25));

    // `value == 3` matches ids 3, 10, 17, 24 across all three partitions.
    let expr = Expression::field("value", RelOp::Equal, 3u64);
    let hits = all_hits(&handle, expr).await;
    assert_eq!(hits.iter().collect::<Vec<_>>(), vec![3, 10, 17, 24]);
}

#[tokio::test]
async fn restart_loads_partitions_from_disk() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::new(dir.path()).with_max_partition_size(10);

    let expr = Expression::field("value", RelOp::Equal, 3u64);
    let before = {
        let handle = IndexCoordinator::spawn(config.clone()).unwrap();
        ingest(&handle, 25).await;
        let hits = all_hits(&handle, expr.clone()).await;
        handle.shutdown().await.unwrap();
        hits
    };

    // A fresh coordinator over the same directory answers identically.
    let handle = IndexCoordinator::spawn(config).unwrap();
    let status = handle.status().await.unwrap();
    assert!(status.partitions.active.is_none());
    assert_eq!(status.statistics.total_events(), 25);

    let after = all_hits(&handle, expr).await;
    assert_eq!(before, after);
    assert_eq!(after.iter().collect::<Vec<_>>(), vec![3, 10, 17, 24]);
}
