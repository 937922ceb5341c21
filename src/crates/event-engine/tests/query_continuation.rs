//! Batched query delivery, continuation, and cancellation.

use event_core::{RecordField, RecordType, TableSlice, Type, Value};
use event_engine::{EngineConfig, IndexCoordinator, IndexHandle, QueryEvent};
use event_index::{Expression, RelOp};
use tempfile::TempDir;
use uuid::Uuid;

fn layout() -> RecordType {
    RecordType::new(
        "event",
        vec![RecordField::new("kind", Type::string())],
    )
}

/// Ingest 24 single-row slices with a 3-event partition capacity, producing
/// eight candidate partitions for a `kind == "x"` query.
async fn ingest_eight_partitions(handle: &IndexHandle) {
    for id in 0..24u64 {
        let slice = TableSlice::new(layout(), id, vec![vec![Some(Value::from("x"))]]);
        handle.ingest(slice.into_handle()).await.unwrap();
    }
    handle.subscribe_flush().await.unwrap();
}

fn config(dir: &TempDir) -> EngineConfig {
    EngineConfig::new(dir.path())
        .with_max_partition_size(3)
        .with_taste_partitions(2)
}

#[tokio::test]
async fn taste_caps_the_first_batch() {
    let dir = TempDir::new().unwrap();
    let handle = IndexCoordinator::spawn(config(&dir)).unwrap();
    ingest_eight_partitions(&handle).await;

    let expr = Expression::field("kind", RelOp::Equal, "x");
    let mut query = handle.query(expr).await.unwrap();
    // Eight candidates, two scheduled now, continuation id issued.
    assert_eq!(query.response.total, 8);
    assert_eq!(query.response.scheduled, 2);
    assert!(!query.response.id.is_nil());

    let mut partitions_seen = Vec::new();
    while let Some(event) = query.next_event().await {
        match event {
            QueryEvent::Hits { partition, .. } => partitions_seen.push(partition),
            QueryEvent::Done { query: id } => {
                assert_eq!(id, query.response.id);
                break;
            }
        }
    }
    assert_eq!(partitions_seen.len(), 2);
}

#[tokio::test]
async fn cancel_mid_stream_drops_pending_candidates() {
    let dir = TempDir::new().unwrap();
    let handle = IndexCoordinator::spawn(config(&dir)).unwrap();
    ingest_eight_partitions(&handle).await;

    let expr = Expression::field("kind", RelOp::Equal, "x");
    let mut query = handle.query(expr).await.unwrap();
    assert_eq!(query.response.total, 8);
    assert_eq!(query.response.scheduled, 2);

    // Drain the first batch.
    let mut first_batch = 0;
    while let Some(event) = query.next_event().await {
        match event {
            QueryEvent::Hits { .. } => first_batch += 1,
            QueryEvent::Done { .. } => break,
        }
    }
    assert_eq!(first_batch, 2);

    // Abandon the query: the remaining six are never scheduled.
    query.cancel().unwrap();
    match query.next_event().await {
        Some(QueryEvent::Done { query: id }) => assert_eq!(id, query.response.id),
        other => panic!("expected done after cancel, got {:?}", other),
    }

    let status = handle.status().await.unwrap();
    assert!(status.pending_queries.is_empty());
}

#[tokio::test]
async fn continuation_streams_the_remaining_batches() {
    let dir = TempDir::new().unwrap();
    let handle = IndexCoordinator::spawn(config(&dir)).unwrap();
    ingest_eight_partitions(&handle).await;

    let expr = Expression::field("kind", RelOp::Equal, "x");
    let mut query = handle.query(expr).await.unwrap();

    let mut partitions_seen = 0;
    let mut batches = 0;
    loop {
        match query.next_event().await {
            Some(QueryEvent::Hits { .. }) => partitions_seen += 1,
            Some(QueryEvent::Done { .. }) => {
                batches += 1;
                if partitions_seen >= query.response.total {
                    break;
                }
                query.fetch_more(3).unwrap();
            }
            None => panic!("stream ended early"),
        }
    }
    // 8 partitions over batches of 2, 3, 3.
    assert_eq!(partitions_seen, 8);
    assert_eq!(batches, 3);

    let status = handle.status().await.unwrap();
    assert!(status.pending_queries.is_empty());
}

#[tokio::test]
async fn unknown_continuation_answers_done_immediately() {
    let dir = TempDir::new().unwrap();
    let handle = IndexCoordinator::spawn(config(&dir)).unwrap();
    ingest_eight_partitions(&handle).await;

    // A fully scheduled query carries the nil id; asking for more of it is a
    // request for an unknown query.
    let expr = Expression::field("kind", RelOp::Equal, "x");
    let mut query = handle.query(expr).await.unwrap();
    query.cancel().unwrap();
    // Drain the first batch and the cancel acknowledgement.
    let mut done_seen = 0;
    while done_seen < 2 {
        match query.next_event().await {
            Some(QueryEvent::Done { .. }) => done_seen += 1,
            Some(QueryEvent::Hits { .. }) => {}
            None => panic!("stream ended early"),
        }
    }

    // Continuing the now-dropped query id answers with an immediate done.
    query.fetch_more(4).unwrap();
    match query.next_event().await {
        Some(QueryEvent::Done { query: id }) => assert_eq!(id, query.response.id),
        other => panic!("expected immediate done, got {:?}", other),
    }
}

#[tokio::test]
async fn empty_candidate_set_answers_nil_and_done() {
    let dir = TempDir::new().unwrap();
    let handle = IndexCoordinator::spawn(config(&dir)).unwrap();
    ingest_eight_partitions(&handle).await;

    let expr = Expression::field("kind", RelOp::Equal, "absent");
    let mut query = handle.query(expr).await.unwrap();
    assert_eq!(query.response.id, Uuid::nil());
    assert_eq!(query.response.total, 0);
    assert_eq!(query.response.scheduled, 0);
    match query.next_event().await {
        Some(QueryEvent::Done { query: id }) => assert!(id.is_nil()),
        other => panic!("expected done, got {:?}", other),
    }
}
