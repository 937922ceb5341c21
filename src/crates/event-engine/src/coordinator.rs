//! The index coordinator: the engine's top-level state machine.
//!
//! The coordinator runs as a single tokio task owning all mutable engine
//! state: the active partition, the unpersisted list, the LRU cache of
//! historical partitions, the meta index, statistics, pending queries, and
//! the idle worker list. Everything reaches it through messages; ingest
//! backpressure comes from the bounded slice channel.
//!
//! Readiness follows a two-state machine: while no worker is idle, incoming
//! queries are deferred; dispatching a query to the last idle worker gates
//! the coordinator again until a worker releases itself.

use crate::cache::{PartitionCache, PartitionHandle};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::statistics::Statistics;
use crate::supervisor::{spawn_worker, EvaluatorSpec, WorkerJob, WorkerRef};
use crate::telemetry::{AccountantRef, Report};
use event_core::collections::{HashMap, VecDeque};
use event_core::TableSliceHandle;
use event_index::{blob, Bitmap, Expression, IndexError, MetaIndex, Partition};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const META_INDEX_TAG: &str = "meta-index";

/// A streamed query result event.
#[derive(Debug, Clone)]
pub enum QueryEvent {
    /// Hits of one scheduled partition.
    Hits {
        query: Uuid,
        partition: Uuid,
        hits: Bitmap,
        /// One past the largest row id the partition indexes.
        row_id_cap: u64,
    },
    /// All partitions of the current batch have reported.
    Done { query: Uuid },
}

/// Channel on which a client receives [`QueryEvent`]s.
pub type ClientSender = mpsc::UnboundedSender<QueryEvent>;

/// The coordinator's immediate answer to a new query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryResponse {
    /// Id for fetching further batches; nil when everything was scheduled in
    /// the first round.
    pub id: Uuid,
    /// Total candidate partitions.
    pub total: u32,
    /// Candidates scheduled in this round.
    pub scheduled: u32,
}

/// Resident-partition portion of a status snapshot.
#[derive(Debug, Clone)]
pub struct PartitionStatus {
    pub active: Option<Uuid>,
    pub cached: Vec<Uuid>,
    pub unpersisted: Vec<Uuid>,
}

/// Structured snapshot answering a status request.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub meta_index_path: PathBuf,
    pub statistics: Statistics,
    pub partitions: PartitionStatus,
    pub ingested_slices: u64,
    pub pending_queries: Vec<Uuid>,
}

/// Messages understood by the coordinator task.
pub(crate) enum IndexMsg {
    Query {
        expr: Expression,
        client: Option<ClientSender>,
        reply: oneshot::Sender<Result<QueryResponse>>,
    },
    Continue {
        id: Uuid,
        n: u32,
        client: Option<ClientSender>,
    },
    WorkerIdle(WorkerRef),
    IndexerDone {
        partition: Uuid,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    SubscribeFlush {
        listener: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Remaining candidates of a partially served query.
struct LookupState {
    expr: Expression,
    partitions: Vec<Uuid>,
}

/// A query that arrived while no worker was idle.
enum Deferred {
    Query {
        expr: Expression,
        client: ClientSender,
        reply: oneshot::Sender<Result<QueryResponse>>,
    },
    More {
        id: Uuid,
        n: u32,
        client: ClientSender,
    },
}

/// Cloneable handle to a running [`IndexCoordinator`].
#[derive(Clone)]
pub struct IndexHandle {
    control: mpsc::UnboundedSender<IndexMsg>,
    ingest: mpsc::Sender<TableSliceHandle>,
    request_timeout: std::time::Duration,
}

/// An issued query: the immediate response plus the event stream.
pub struct QueryHandle {
    pub response: QueryResponse,
    events: mpsc::UnboundedReceiver<QueryEvent>,
    sender: ClientSender,
    control: mpsc::UnboundedSender<IndexMsg>,
}

impl QueryHandle {
    /// Receive the next result event.
    pub async fn next_event(&mut self) -> Option<QueryEvent> {
        self.events.recv().await
    }

    /// Request up to `n` more candidate partitions.
    pub fn fetch_more(&self, n: u32) -> Result<()> {
        self.control
            .send(IndexMsg::Continue {
                id: self.response.id,
                n,
                client: Some(self.sender.clone()),
            })
            .map_err(|_| EngineError::Cancelled)
    }

    /// Abandon the query; remaining candidates are discarded.
    pub fn cancel(&self) -> Result<()> {
        self.fetch_more(0)
    }
}

impl IndexHandle {
    /// Push one slice into the ingest stream.
    ///
    /// Awaits until the coordinator grants credit (bounded channel), which
    /// provides the mandatory backpressure.
    pub async fn ingest(&self, slice: TableSliceHandle) -> Result<()> {
        self.ingest
            .send(slice)
            .await
            .map_err(|_| EngineError::Cancelled)
    }

    /// Submit a query expression.
    pub async fn query(&self, expr: Expression) -> Result<QueryHandle> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(IndexMsg::Query {
                expr,
                client: Some(events_tx.clone()),
                reply: reply_tx,
            })
            .map_err(|_| EngineError::Cancelled)?;
        let response = tokio::time::timeout(self.request_timeout, reply_rx)
            .await
            .map_err(|_| EngineError::Timeout)?
            .map_err(|_| EngineError::ChannelClosed)??;
        Ok(QueryHandle {
            response,
            events: events_rx,
            sender: events_tx,
            control: self.control.clone(),
        })
    }

    /// Submit a query without a result channel.
    ///
    /// Always rejected with `InvalidArgument`; exists to model clients that
    /// fail to identify themselves.
    pub async fn query_anonymous(&self, expr: Expression) -> Result<QueryResponse> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(IndexMsg::Query {
                expr,
                client: None,
                reply: reply_tx,
            })
            .map_err(|_| EngineError::Cancelled)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Request a structured status snapshot.
    pub async fn status(&self) -> Result<StatusSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(IndexMsg::Status { reply: reply_tx })
            .map_err(|_| EngineError::Cancelled)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Resolve once the ingest stream has quiesced and state hit the disk.
    pub async fn subscribe_flush(&self) -> Result<()> {
        let (listener_tx, listener_rx) = oneshot::channel();
        self.control
            .send(IndexMsg::SubscribeFlush {
                listener: listener_tx,
            })
            .map_err(|_| EngineError::Cancelled)?;
        listener_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Gracefully terminate the coordinator, flushing all state.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(IndexMsg::Shutdown { reply: reply_tx })
            .map_err(|_| EngineError::Cancelled)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// The coordinator task's owned state.
pub struct IndexCoordinator {
    dir: PathBuf,
    config: EngineConfig,
    active: Option<PartitionHandle>,
    unpersisted: Vec<(PartitionHandle, usize)>,
    cache: PartitionCache,
    meta_idx: MetaIndex,
    stats: Statistics,
    pending: HashMap<Uuid, LookupState>,
    idle_workers: Vec<WorkerRef>,
    deferred: VecDeque<Deferred>,
    flush_listeners: Vec<oneshot::Sender<()>>,
    accountant: Option<AccountantRef>,
    inbox: mpsc::UnboundedSender<IndexMsg>,
    ingested_slices: u64,
}

enum Flow {
    Continue,
    Shutdown(oneshot::Sender<()>),
}

impl IndexCoordinator {
    /// Spawn the coordinator and its worker pool on the current runtime.
    pub fn spawn(config: EngineConfig) -> Result<IndexHandle> {
        Self::spawn_with_accountant(config, None)
    }

    /// Spawn with an accounting sink receiving telemetry reports.
    pub fn spawn_with_accountant(
        config: EngineConfig,
        accountant: Option<AccountantRef>,
    ) -> Result<IndexHandle> {
        let dir = config.db_directory.clone();
        std::fs::create_dir_all(&dir).map_err(EngineError::Io)?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (ingest_tx, ingest_rx) = mpsc::channel(config.ingest_queue_capacity);

        let cache = PartitionCache::new(
            config.max_in_mem_partitions,
            dir.clone(),
            config.max_partition_size,
        );
        let mut coordinator = IndexCoordinator {
            dir,
            active: None,
            unpersisted: Vec::new(),
            cache,
            meta_idx: MetaIndex::new(),
            stats: Statistics::new(),
            pending: HashMap::new(),
            idle_workers: Vec::new(),
            deferred: VecDeque::new(),
            flush_listeners: Vec::new(),
            accountant,
            inbox: control_tx.clone(),
            ingested_slices: 0,
            config,
        };
        // Failing to read persistent state fails the coordinator.
        coordinator.load_from_disk()?;

        for _ in 0..coordinator.config.num_query_supervisors {
            let worker = spawn_worker(control_tx.clone());
            coordinator.idle_workers.push(worker);
        }

        let handle = IndexHandle {
            control: control_tx,
            ingest: ingest_tx,
            request_timeout: coordinator.config.request_timeout,
        };
        tokio::spawn(coordinator.run(control_rx, ingest_rx));
        Ok(handle)
    }

    async fn run(
        mut self,
        mut control_rx: mpsc::UnboundedReceiver<IndexMsg>,
        mut ingest_rx: mpsc::Receiver<TableSliceHandle>,
    ) {
        let mut telemetry = tokio::time::interval(self.config.telemetry_rate);
        telemetry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        telemetry.tick().await;

        loop {
            tokio::select! {
                biased;
                msg = control_rx.recv() => {
                    let Some(msg) = msg else {
                        debug!("all handles dropped, tearing down");
                        self.shutdown();
                        return;
                    };
                    match self.handle_msg(msg, ingest_rx.is_empty()) {
                        Flow::Continue => {}
                        Flow::Shutdown(reply) => {
                            self.shutdown();
                            let _ = reply.send(());
                            return;
                        }
                    }
                }
                Some(slice) = ingest_rx.recv() => {
                    self.handle_slice(slice);
                    if ingest_rx.is_empty() && !self.flush_listeners.is_empty() {
                        self.flush_and_notify();
                    }
                }
                _ = telemetry.tick() => self.send_report(),
            }
        }
    }

    fn handle_msg(&mut self, msg: IndexMsg, ingest_quiescent: bool) -> Flow {
        match msg {
            IndexMsg::Query {
                expr,
                client,
                reply,
            } => {
                let Some(client) = client else {
                    error!("got an anonymous query (ignored)");
                    let _ = reply.send(Err(EngineError::InvalidArgument("anonymous query")));
                    return Flow::Continue;
                };
                if self.idle_workers.is_empty() {
                    self.deferred.push_back(Deferred::Query {
                        expr,
                        client,
                        reply,
                    });
                } else {
                    self.serve_query(expr, client, reply);
                }
            }
            IndexMsg::Continue { id, n, client } => {
                // Zero means the client abandons the query.
                if n == 0 {
                    debug!("dropped remaining results for query {}", id);
                    self.pending.remove(&id);
                    if let Some(client) = client {
                        let _ = client.send(QueryEvent::Done { query: id });
                    }
                    return Flow::Continue;
                }
                let Some(client) = client else {
                    error!("got an anonymous continuation (ignored)");
                    return Flow::Continue;
                };
                if self.idle_workers.is_empty() {
                    self.deferred.push_back(Deferred::More { id, n, client });
                } else {
                    self.serve_continue(id, n, client);
                }
            }
            IndexMsg::WorkerIdle(worker) => {
                self.idle_workers.push(worker);
                self.drain_deferred();
            }
            IndexMsg::IndexerDone { partition } => self.indexer_done(partition),
            IndexMsg::Status { reply } => {
                let _ = reply.send(self.status());
            }
            IndexMsg::SubscribeFlush { listener } => {
                debug!("adds a new flush subscriber");
                self.flush_listeners.push(listener);
                if ingest_quiescent {
                    self.flush_and_notify();
                }
            }
            IndexMsg::Shutdown { reply } => return Flow::Shutdown(reply),
        }
        Flow::Continue
    }

    // -- persistence ---------------------------------------------------------

    fn meta_index_filename(&self) -> PathBuf {
        self.dir.join("meta")
    }

    fn statistics_filename(&self) -> PathBuf {
        self.dir.join("statistics")
    }

    fn load_from_disk(&mut self) -> Result<()> {
        match Statistics::load(&self.statistics_filename()) {
            Ok(stats) => {
                debug!("loaded statistics");
                self.stats = stats;
            }
            Err(IndexError::NoSuchFile(_)) => {}
            Err(e) => {
                error!("failed to load statistics: {}", e);
                return Err(e.into());
            }
        }
        match blob::load_tagged(&self.meta_index_filename(), META_INDEX_TAG) {
            Ok((_, meta_idx)) => {
                debug!("loaded meta index");
                self.meta_idx = meta_idx;
            }
            Err(IndexError::NoSuchFile(_)) => {}
            Err(e) => {
                error!("failed to load meta index: {}", e);
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn flush_meta_index(&self) -> Result<()> {
        blob::save(&self.meta_index_filename(), META_INDEX_TAG, 0, &self.meta_idx)?;
        Ok(())
    }

    fn flush_statistics(&self) -> Result<()> {
        self.stats.save(&self.statistics_filename())?;
        Ok(())
    }

    /// Flush meta index, statistics, the active partition, and all
    /// unpersisted partitions. Errors are logged; the first one is returned
    /// but does not abort the remaining flushes.
    fn flush_to_disk(&mut self) -> Result<()> {
        let mut first_error: Option<EngineError> = None;
        let mut note = |result: Result<()>| {
            if let Err(e) = result {
                error!("failed to flush state: {}", e);
                first_error.get_or_insert(e);
            }
        };
        note(self.flush_meta_index());
        note(self.flush_statistics());
        if let Some(active) = &self.active {
            note(active.write().flush_to_disk().map_err(Into::into));
        }
        for (partition, _) in &self.unpersisted {
            note(partition.write().flush_to_disk().map_err(Into::into));
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn flush_and_notify(&mut self) {
        if self.flush_listeners.is_empty() {
            return;
        }
        if let Err(e) = self.flush_to_disk() {
            error!("flush requested by subscriber failed: {}", e);
        }
        debug!(
            "sends flush notification to {} listeners",
            self.flush_listeners.len()
        );
        for listener in self.flush_listeners.drain(..) {
            let _ = listener.send(());
        }
    }

    // -- ingest --------------------------------------------------------------

    fn handle_slice(&mut self, slice: TableSliceHandle) {
        self.ingested_slices += 1;
        let rows = slice.rows();

        let rotate = match &self.active {
            None => false,
            Some(active) => {
                let guard = active.read();
                guard.events() > 0 && guard.events() + rows > guard.capacity()
            }
        };
        if rotate {
            self.rotate_active();
        }
        if self.active.is_none() {
            let id = Uuid::new_v4();
            debug!("starts a new partition: {}", id);
            self.active = Some(Arc::new(RwLock::new(Partition::new(
                &self.dir,
                id,
                self.config.max_partition_size,
            ))));
        }

        let active = self.active.as_ref().expect("active partition");
        let id = active.read().id();
        self.meta_idx.add(id, &slice);
        self.stats.record(&slice.layout().name, rows);
        if let Err(e) = active.write().add(&slice) {
            error!("failed to index slice into partition {}: {}", id, e);
        }
    }

    /// Replace the active partition: move it to the unpersisted list with a
    /// pending counter of its indexer count, kick off one background flush
    /// per table indexer, and persist meta index and statistics.
    fn rotate_active(&mut self) {
        if let Some(active) = self.active.take() {
            let (id, digests) = {
                let guard = active.read();
                let digests: Vec<String> =
                    guard.layouts().iter().map(|l| l.digest()).collect();
                (guard.id(), digests)
            };
            info!("rotating active partition {}", id);
            if !digests.is_empty() {
                self.unpersisted.push((Arc::clone(&active), digests.len()));
                for digest in digests {
                    let partition = Arc::clone(&active);
                    let inbox = self.inbox.clone();
                    tokio::task::spawn_blocking(move || {
                        if let Err(e) = partition.write().flush_table(&digest) {
                            error!("failed to persist indexer {} of {}: {}", digest, id, e);
                        }
                        let _ = inbox.send(IndexMsg::IndexerDone { partition: id });
                    });
                }
            }
        }
        // Keep meta index and statistics partially crash-robust.
        if let Err(e) = self.flush_meta_index() {
            error!("failed to persist the meta index: {}", e);
        }
        if let Err(e) = self.flush_statistics() {
            error!("failed to persist the statistics: {}", e);
        }
    }

    fn indexer_done(&mut self, partition: Uuid) {
        let Some(position) = self
            .unpersisted
            .iter()
            .position(|(p, _)| p.read().id() == partition)
        else {
            warn!("received done from unknown indexer for {}", partition);
            return;
        };
        let counter = &mut self.unpersisted[position].1;
        *counter -= 1;
        if *counter == 0 {
            debug!("successfully persisted {}", partition);
            self.unpersisted.remove(position);
        }
    }

    // -- queries -------------------------------------------------------------

    fn is_resident(&self, id: &Uuid) -> bool {
        self.active
            .as_ref()
            .map(|p| p.read().id() == *id)
            .unwrap_or(false)
            || self.unpersisted.iter().any(|(p, _)| p.read().id() == *id)
            || self.cache.contains(id)
    }

    fn acquire(&mut self, id: Uuid) -> Option<PartitionHandle> {
        if let Some(active) = &self.active {
            if active.read().id() == id {
                return Some(Arc::clone(active));
            }
        }
        if let Some((partition, _)) = self
            .unpersisted
            .iter()
            .find(|(p, _)| p.read().id() == id)
        {
            return Some(Arc::clone(partition));
        }
        match self.cache.get_or_load(id) {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("unable to load partition {} from disk: {}", id, e);
                None
            }
        }
    }

    /// Take up to `n` candidates off the lookup state and resolve them into
    /// evaluator specs. Memory-resident candidates are scheduled before any
    /// that would require a disk load; candidates whose evaluation map comes
    /// back empty are dropped from the batch.
    fn build_query_map(&mut self, lookup: &mut LookupState, n: u32) -> Vec<EvaluatorSpec> {
        if n == 0 || lookup.partitions.is_empty() {
            return Vec::new();
        }
        let resident: Vec<bool> = lookup
            .partitions
            .iter()
            .map(|id| self.is_resident(id))
            .collect();
        let mut ordered: Vec<Uuid> = Vec::with_capacity(lookup.partitions.len());
        ordered.extend(
            lookup
                .partitions
                .iter()
                .zip(&resident)
                .filter(|(_, r)| **r)
                .map(|(id, _)| *id),
        );
        ordered.extend(
            lookup
                .partitions
                .iter()
                .zip(&resident)
                .filter(|(_, r)| !**r)
                .map(|(id, _)| *id),
        );
        lookup.partitions = ordered;

        let mut specs = Vec::new();
        let mut consumed = 0;
        for id in &lookup.partitions {
            if specs.len() as u32 >= n {
                break;
            }
            consumed += 1;
            let Some(handle) = self.acquire(*id) else {
                continue;
            };
            let (map, domain) = {
                let mut guard = handle.write();
                let map = guard.eval(&lookup.expr);
                let domain = guard.row_ids();
                (map, domain)
            };
            if map.is_empty() {
                debug!(
                    "candidate {} produced no evaluation map, dropping it from the batch",
                    id
                );
                continue;
            }
            specs.push(EvaluatorSpec {
                partition_id: *id,
                partition: handle,
                map,
                domain,
            });
        }
        lookup.partitions.drain(..consumed);
        specs
    }

    fn dispatch(&mut self, query: Uuid, expr: Expression, batch: Vec<EvaluatorSpec>, client: ClientSender) {
        let worker = self.idle_workers.pop().expect("caller checked for an idle worker");
        if worker
            .send(WorkerJob {
                query,
                expr,
                batch,
                client,
            })
            .is_err()
        {
            error!("worker inbox closed, dropping batch for query {}", query);
        }
    }

    fn serve_query(
        &mut self,
        expr: Expression,
        client: ClientSender,
        reply: oneshot::Sender<Result<QueryResponse>>,
    ) {
        // Convenience for dropping out without hits; clients always receive
        // a done message.
        let no_result = |client: &ClientSender, reply: oneshot::Sender<Result<QueryResponse>>| {
            let _ = reply.send(Ok(QueryResponse {
                id: Uuid::nil(),
                total: 0,
                scheduled: 0,
            }));
            let _ = client.send(QueryEvent::Done { query: Uuid::nil() });
        };

        let candidates = self.meta_idx.lookup(&expr);
        if candidates.is_empty() {
            debug!("returns without result: no partitions qualify");
            no_result(&client, reply);
            return;
        }
        let mut lookup = LookupState {
            expr: expr.clone(),
            partitions: candidates,
        };
        let batch = self.build_query_map(&mut lookup, self.config.taste_partitions);
        if batch.is_empty() {
            debug!("returns without result: no candidate produced an evaluation map");
            no_result(&client, reply);
            return;
        }
        let scheduled = batch.len();
        let total = scheduled + lookup.partitions.len();
        // When the first round covers everything there is nothing to
        // continue; the nil id tells the client so.
        let query_id = if scheduled == total {
            Uuid::nil()
        } else {
            Uuid::new_v4()
        };
        debug!(
            "scheduled {}/{} partitions for query {}",
            scheduled, total, expr
        );
        let _ = reply.send(Ok(QueryResponse {
            id: query_id,
            total: total as u32,
            scheduled: scheduled as u32,
        }));
        if !lookup.partitions.is_empty() {
            self.pending.insert(query_id, lookup);
        }
        self.dispatch(query_id, expr, batch, client);
    }

    fn serve_continue(&mut self, id: Uuid, n: u32, client: ClientSender) {
        let Some(mut state) = self.pending.remove(&id) else {
            warn!("got a request for unknown query {}", id);
            let _ = client.send(QueryEvent::Done { query: id });
            return;
        };
        let batch = self.build_query_map(&mut state, n);
        if batch.is_empty() {
            debug!("query {} exhausted its candidates", id);
            let _ = client.send(QueryEvent::Done { query: id });
            return;
        }
        debug!(
            "schedules {} more partition(s) for query {} with {} remaining",
            batch.len(),
            id,
            state.partitions.len()
        );
        let expr = state.expr.clone();
        if !state.partitions.is_empty() {
            self.pending.insert(id, state);
        }
        self.dispatch(id, expr, batch, client);
    }

    fn drain_deferred(&mut self) {
        while !self.idle_workers.is_empty() {
            match self.deferred.pop_front() {
                Some(Deferred::Query {
                    expr,
                    client,
                    reply,
                }) => self.serve_query(expr, client, reply),
                Some(Deferred::More { id, n, client }) => self.serve_continue(id, n, client),
                None => break,
            }
        }
    }

    // -- status & telemetry --------------------------------------------------

    fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            meta_index_path: self.meta_index_filename(),
            statistics: self.stats.clone(),
            partitions: PartitionStatus {
                active: self.active.as_ref().map(|p| p.read().id()),
                cached: self.cache.ids(),
                unpersisted: self
                    .unpersisted
                    .iter()
                    .map(|(p, _)| p.read().id())
                    .collect(),
            },
            ingested_slices: self.ingested_slices,
            pending_queries: self.pending.keys().copied().collect(),
        }
    }

    fn send_report(&mut self) {
        let mut report = Report::new();
        if let Some(active) = &self.active {
            for (key, snapshot) in active.read().drain_measurements() {
                report.push(key, snapshot);
            }
        }
        for (partition, _) in &self.unpersisted {
            for (key, snapshot) in partition.read().drain_measurements() {
                report.push(key, snapshot);
            }
        }
        if report.is_empty() {
            return;
        }
        report.push_extremes();
        if let Some(accountant) = &self.accountant {
            let _ = accountant.send(report);
        } else {
            debug!("telemetry: {} measured columns", report.entries.len());
        }
    }

    fn shutdown(&mut self) {
        info!("tearing down");
        self.send_report();
        if let Err(e) = self.flush_to_disk() {
            error!("final flush failed: {}", e);
        }
    }
}
