//! Credit-based streaming of query results.
//!
//! A [`QueryResultCursor`] lazily materializes events from a backend source
//! and pushes them towards a sink. The sink controls the amount of data it
//! receives by granting credit; the cursor never ships more events than the
//! current credit allows and keeps at most [`MAX_CURSOR_CACHE_SIZE`]
//! materialized events outstanding.
//!
//! A pipeline is `source → zero or more stages → sink`. Stages observe both
//! directions (credit flowing up, event batches flowing down) and forward
//! unchanged by default; [`AccountingStage`] counts what passes through.

use crate::error::{EngineError, Result};
use event_core::collections::{HashMap, VecDeque};
use event_core::Event;
use event_index::Bitmap;

/// Upper bound on materialized events outstanding in a cursor.
pub const MAX_CURSOR_CACHE_SIZE: usize = 100;

/// The source-facing contract of a pipeline: a supplier of materialized
/// events.
pub trait EventSource {
    /// Ask the source to hand over up to `n` materialized events.
    fn pull(&mut self, n: usize) -> Vec<Event>;

    /// Ask the source to prepare to load data for `ids`; returns the number
    /// of newly queried events.
    fn query(&mut self, ids: &Bitmap) -> usize;

    /// Number of events the source could push immediately.
    fn available(&self) -> usize;

    /// Number of events the source is still materializing.
    fn pending(&self) -> usize;

    /// True when data is neither available nor pending.
    fn at_end(&self) -> bool {
        self.available() + self.pending() == 0
    }
}

/// The sink-facing contract of a pipeline: a consumer of event batches.
pub trait EventSink {
    /// Consume a batch of events.
    fn push(&mut self, events: Vec<Event>);

    /// The pipeline delivered everything it ever will.
    fn finalize(&mut self) {}
}

/// A pipeline stage observes both contracts and forwards unchanged by
/// default.
pub trait EventStage {
    /// Credit granted by the sink on its way to the source.
    fn on_pull(&mut self, _n: usize) {}

    /// Transform a batch on its way to the sink.
    fn transform(&mut self, events: Vec<Event>) -> Vec<Event> {
        events
    }
}

/// Stage that counts requested and shipped events.
#[derive(Debug, Default)]
pub struct AccountingStage {
    pub requested: usize,
    pub shipped: usize,
}

impl EventStage for AccountingStage {
    fn on_pull(&mut self, n: usize) {
        self.requested += n;
    }

    fn transform(&mut self, events: Vec<Event>) -> Vec<Event> {
        self.shipped += events.len();
        events
    }
}

/// Lifetime of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// New id sets and demand are accepted.
    Active,
    /// The source delivered all ids; no more may arrive.
    Sealed,
    /// The sink consumed every selected event.
    Finalized,
}

/// Flow-controlled streaming of matching events from a source through
/// optional stages to a sink.
pub struct QueryResultCursor<S: EventSource, K: EventSink> {
    state: CursorState,
    /// Result ids not yet materialized.
    hits: Bitmap,
    /// Selected events waiting for credit.
    cache: VecDeque<Event>,
    /// Events we may ship to the sink right away.
    credit: usize,
    /// Candidate check applied to every materialized event.
    selector: Box<dyn Fn(&Event) -> bool + Send>,
    stages: Vec<Box<dyn EventStage + Send>>,
    source: S,
    sink: K,
}

impl<S: EventSource, K: EventSink> QueryResultCursor<S, K> {
    pub fn new(source: S, sink: K) -> Self {
        Self::with_selector(source, sink, |_| true)
    }

    /// Create a cursor with a selector performing the final candidate check.
    pub fn with_selector(
        source: S,
        sink: K,
        selector: impl Fn(&Event) -> bool + Send + 'static,
    ) -> Self {
        QueryResultCursor {
            state: CursorState::Active,
            hits: Bitmap::new(),
            cache: VecDeque::new(),
            credit: 0,
            selector: Box::new(selector),
            stages: Vec::new(),
            source,
            sink,
        }
    }

    /// Insert a stage between source and sink.
    pub fn add_stage(&mut self, stage: impl EventStage + Send + 'static) {
        self.stages.push(Box::new(stage));
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Unshipped credit currently held.
    pub fn credit(&self) -> usize {
        self.credit
    }

    /// Number of cached events awaiting credit.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// True once the source is drained and nothing is cached.
    pub fn at_end(&self) -> bool {
        self.state == CursorState::Finalized
            || (self.source.at_end() && self.cache.is_empty())
    }

    /// Union new result ids into the pending hits and ask the source for
    /// them. Returns the number of newly queried events.
    pub fn query(&mut self, ids: &Bitmap) -> Result<usize> {
        self.add_ids(ids)?;
        Ok(self.source.query(ids))
    }

    /// Union new result ids into the pending hits.
    ///
    /// Rejected once the cursor is sealed.
    pub fn add_ids(&mut self, ids: &Bitmap) -> Result<()> {
        if self.state != CursorState::Active {
            return Err(EngineError::InvalidArgument(
                "cursor is sealed and takes no further ids",
            ));
        }
        self.hits |= ids;
        self.pull_from_source();
        Ok(())
    }

    /// The source will deliver no further ids.
    pub fn seal(&mut self) {
        if self.state == CursorState::Active {
            self.state = CursorState::Sealed;
        }
        self.try_finalize();
    }

    /// Allow `n` more events to reach the sink.
    pub fn grant_credit(&mut self, n: usize) {
        debug_assert!(n > 0);
        self.credit += n;
        for stage in self.stages.iter_mut() {
            stage.on_pull(n);
        }
        self.pull_from_source();
        self.push_to_sink();
        self.try_finalize();
    }

    /// Consume materialized events from the backend.
    ///
    /// Every event clears its id from the pending hits; events passing the
    /// selector enter the cache, then the cursor attempts to push downstream.
    pub fn push(&mut self, events: Vec<Event>) {
        debug_assert!(self.state != CursorState::Finalized);
        self.accept(events);
        self.push_to_sink();
        self.try_finalize();
    }

    /// Return the previous credit and set the current credit to zero.
    fn fetch_credit(&mut self) -> usize {
        std::mem::take(&mut self.credit)
    }

    fn accept(&mut self, events: Vec<Event>) {
        for event in events {
            self.hits.remove(event.id);
            if (self.selector)(&event) {
                self.cache.push_back(event);
            }
        }
    }

    /// Refill the cache from the source, staying under the outstanding cap.
    fn pull_from_source(&mut self) {
        while self.cache.len() < MAX_CURSOR_CACHE_SIZE {
            let budget = MAX_CURSOR_CACHE_SIZE - self.cache.len();
            let batch = self.source.pull(budget);
            if batch.is_empty() {
                break;
            }
            self.accept(batch);
        }
    }

    /// Ship as many cached events as the credit allows; unused credit is
    /// retained.
    fn push_to_sink(&mut self) {
        let granted = self.fetch_credit();
        let n = granted.min(self.cache.len());
        if n > 0 {
            let mut batch: Vec<Event> = self.cache.drain(..n).collect();
            for stage in self.stages.iter_mut() {
                batch = stage.transform(batch);
            }
            self.sink.push(batch);
        }
        self.credit += granted - n;
    }

    fn try_finalize(&mut self) {
        if self.state == CursorState::Sealed && self.hits.is_empty() && self.cache.is_empty() {
            self.state = CursorState::Finalized;
            self.sink.finalize();
        }
    }
}

/// In-memory event source modeling the storage collaborator: given a bitmap
/// of ids, it buffers the raw events it holds for them and hands them out on
/// demand.
#[derive(Debug, Default)]
pub struct BufferedSource {
    archive: HashMap<u64, Event>,
    selected: Bitmap,
    buffer: VecDeque<Event>,
}

impl BufferedSource {
    pub fn new(events: impl IntoIterator<Item = Event>) -> Self {
        BufferedSource {
            archive: events.into_iter().map(|e| (e.id, e)).collect(),
            selected: Bitmap::new(),
            buffer: VecDeque::new(),
        }
    }
}

impl EventSource for BufferedSource {
    fn pull(&mut self, n: usize) -> Vec<Event> {
        let n = n.min(self.buffer.len());
        self.buffer.drain(..n).collect()
    }

    fn query(&mut self, ids: &Bitmap) -> usize {
        // Ids queried before are not delivered twice.
        let fresh = &ids.0 - &self.selected.0;
        let newly = fresh.len() as usize;
        if newly == 0 {
            return 0;
        }
        self.selected.0 |= &fresh;
        for id in fresh.iter() {
            if let Some(event) = self.archive.get(&id) {
                self.buffer.push_back(event.clone());
            }
        }
        newly
    }

    fn available(&self) -> usize {
        self.buffer.len()
    }

    fn pending(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default, Clone)]
    struct CollectingSink {
        received: Arc<Mutex<Vec<Event>>>,
        finalized: Arc<Mutex<bool>>,
    }

    impl EventSink for CollectingSink {
        fn push(&mut self, events: Vec<Event>) {
            self.received.lock().unwrap().extend(events);
        }

        fn finalize(&mut self) {
            *self.finalized.lock().unwrap() = true;
        }
    }

    fn event(id: u64) -> Event {
        Event::new(id, "test", vec![])
    }

    fn source(ids: std::ops::Range<u64>) -> BufferedSource {
        BufferedSource::new(ids.map(event))
    }

    #[test]
    fn credit_gates_delivery() {
        // Thirty events; a query for all of them; no credit yet.
        let sink = CollectingSink::default();
        let received = Arc::clone(&sink.received);
        let mut cursor = QueryResultCursor::new(source(10..40), sink);

        let queried = cursor.query(&Bitmap::insert_range(10..40)).unwrap();
        assert_eq!(queried, 30);
        assert_eq!(received.lock().unwrap().len(), 0);

        cursor.grant_credit(10);
        assert_eq!(received.lock().unwrap().len(), 10);
        assert!(!cursor.at_end());

        cursor.grant_credit(10);
        cursor.grant_credit(10);
        assert_eq!(received.lock().unwrap().len(), 30);
        assert!(cursor.at_end());
    }

    #[test]
    fn unused_credit_is_retained() {
        let sink = CollectingSink::default();
        let received = Arc::clone(&sink.received);
        let mut cursor = QueryResultCursor::new(source(0..5), sink);
        cursor.query(&Bitmap::insert_range(0..5)).unwrap();

        cursor.grant_credit(100);
        assert_eq!(received.lock().unwrap().len(), 5);
        assert_eq!(cursor.credit(), 95);
    }

    #[test]
    fn selector_filters_the_cache() {
        let sink = CollectingSink::default();
        let received = Arc::clone(&sink.received);
        let mut cursor =
            QueryResultCursor::with_selector(source(0..10), sink, |e| e.id % 2 == 0);
        cursor.query(&Bitmap::insert_range(0..10)).unwrap();
        cursor.grant_credit(10);
        let ids: Vec<u64> = received.lock().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn sealed_cursor_rejects_new_ids_and_finalizes() {
        let sink = CollectingSink::default();
        let finalized = Arc::clone(&sink.finalized);
        let mut cursor = QueryResultCursor::new(source(0..3), sink);
        cursor.query(&Bitmap::insert_range(0..3)).unwrap();
        cursor.seal();

        assert!(cursor.add_ids(&Bitmap::insert_range(5..6)).is_err());
        assert_eq!(cursor.state(), CursorState::Sealed);
        assert!(!*finalized.lock().unwrap());

        cursor.grant_credit(3);
        assert_eq!(cursor.state(), CursorState::Finalized);
        assert!(*finalized.lock().unwrap());
        assert!(cursor.at_end());
    }

    #[test]
    fn outstanding_materialization_is_capped() {
        let sink = CollectingSink::default();
        let mut cursor = QueryResultCursor::new(source(0..500), sink);
        cursor.query(&Bitmap::insert_range(0..500)).unwrap();
        assert!(cursor.cached() <= MAX_CURSOR_CACHE_SIZE);
        // Draining the cache pulls the remainder in bounded steps.
        let mut total = 0;
        while !cursor.at_end() {
            cursor.grant_credit(50);
            total += 1;
            assert!(cursor.cached() <= MAX_CURSOR_CACHE_SIZE);
            assert!(total < 100, "cursor failed to drain");
        }
    }

    #[test]
    fn accounting_stage_counts_both_directions() {
        let counts = Arc::new(Mutex::new((0usize, 0usize)));
        struct Probe(Arc<Mutex<(usize, usize)>>);
        impl EventStage for Probe {
            fn on_pull(&mut self, n: usize) {
                self.0.lock().unwrap().0 += n;
            }
            fn transform(&mut self, events: Vec<Event>) -> Vec<Event> {
                self.0.lock().unwrap().1 += events.len();
                events
            }
        }
        let mut cursor = QueryResultCursor::new(source(0..20), CollectingSink::default());
        cursor.add_stage(Probe(Arc::clone(&counts)));
        cursor.add_stage(AccountingStage::default());
        cursor.query(&Bitmap::insert_range(0..20)).unwrap();
        cursor.grant_credit(5);
        cursor.grant_credit(25);
        // 30 credit granted, 20 events shipped.
        assert_eq!(*counts.lock().unwrap(), (30, 20));
    }

    #[test]
    fn hits_for_events_the_source_lacks_stay_pending() {
        let sink = CollectingSink::default();
        let finalized = Arc::clone(&sink.finalized);
        let mut cursor = QueryResultCursor::new(source(0..5), sink);
        // Ids 5..10 exist nowhere.
        cursor.query(&Bitmap::insert_range(0..10)).unwrap();
        cursor.grant_credit(10);
        cursor.seal();
        // Everything materializable was delivered, but the unmaterializable
        // hits keep the cursor from finalizing.
        assert_eq!(cursor.state(), CursorState::Sealed);
        assert!(!*finalized.lock().unwrap());
        assert!(cursor.at_end());
    }
}
