//! Query supervisors: the fixed-size worker pool driving evaluators.
//!
//! A worker receives one batch of scheduled partitions, spawns one evaluator
//! task per partition, relays every partition's hits to the client as they
//! complete, signals done, and re-registers itself with the coordinator.

use crate::cache::PartitionHandle;
use crate::coordinator::{ClientSender, IndexMsg, QueryEvent};
use crate::evaluator::evaluate;
use event_index::{Bitmap, EvaluationMap, Expression};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::debug;
use uuid::Uuid;

/// Everything an evaluator task needs for one partition.
pub(crate) struct EvaluatorSpec {
    pub partition_id: Uuid,
    pub partition: PartitionHandle,
    pub map: EvaluationMap,
    pub domain: Bitmap,
}

/// One scheduled batch of candidate partitions for one query.
pub(crate) struct WorkerJob {
    pub query: Uuid,
    pub expr: Expression,
    pub batch: Vec<EvaluatorSpec>,
    pub client: ClientSender,
}

/// Handle to a worker's inbox.
pub(crate) type WorkerRef = mpsc::UnboundedSender<WorkerJob>;

/// Spawn one query supervisor task.
///
/// The worker loops over incoming jobs; after each job it sends itself back
/// to the coordinator's idle list. Dropped clients are tolerated: their
/// results are discarded and the worker stays healthy.
pub(crate) fn spawn_worker(coordinator: mpsc::UnboundedSender<IndexMsg>) -> WorkerRef {
    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerJob>();
    let own_ref = tx.clone();
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let mut evaluators = JoinSet::new();
            for spec in job.batch {
                let expr = job.expr.clone();
                evaluators.spawn(async move {
                    let row_id_cap = spec.domain.max().map_or(0, |max| max + 1);
                    let hits = evaluate(spec.partition, expr, spec.map, spec.domain).await;
                    (spec.partition_id, hits, row_id_cap)
                });
            }
            while let Some(result) = evaluators.join_next().await {
                if let Ok((partition, hits, row_id_cap)) = result {
                    let _ = job.client.send(QueryEvent::Hits {
                        query: job.query,
                        partition,
                        hits,
                        row_id_cap,
                    });
                }
            }
            debug!("worker finished batch for query {}", job.query);
            let _ = job.client.send(QueryEvent::Done { query: job.query });
            if coordinator
                .send(IndexMsg::WorkerIdle(own_ref.clone()))
                .is_err()
            {
                // Coordinator went away; shut down with it.
                break;
            }
        }
    });
    tx
}
