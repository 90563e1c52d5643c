//! The self re-arming poll loop.
//!
//! A cycle reads the page's whole [`ReadBatch`], decodes it and publishes the record. The next
//! cycle is scheduled only once the previous read has completed, so reads never pile up behind a
//! slow store. At most one read is in flight at any time: cycles take turns on a read lock.
//!
//! A poll request is only ever merged into a cycle that has not started reading yet. A request
//! arriving while a read is in flight gets one more cycle once that read completes, and a read
//! belonging to a stopped loop never stands in for a request.

use crate::connection::Store;
use crate::console::Event;
use crate::decode::{DecodedRecord, decode_record};
use crate::schema::{PageSchema, ReadBatch};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub type Latest = Option<Arc<DecodedRecord>>;

pub struct Scheduler<S> {
    shared: Arc<Shared<S>>,
}

struct Shared<S> {
    store: Arc<S>,
    page: &'static PageSchema,
    batch: ReadBatch,
    control: Mutex<Control>,
    /// Held for the duration of a read.
    reading: tokio::sync::Mutex<()>,
    wake: Notify,
    latest: watch::Sender<Latest>,
    events: broadcast::Sender<Event>,
}

struct Control {
    /// Cancelled whenever the cycles it was handed to must no longer read, publish or re-arm.
    token: CancellationToken,
    periodic: bool,
    /// A requested cycle is waiting for its turn to read.
    queued: bool,
}

impl Control {
    /// Retire everything handed out so far.
    fn reset(&mut self) {
        if !self.token.is_cancelled() {
            self.token.cancel();
        }
        self.token = CancellationToken::new();
        self.periodic = false;
        self.queued = false;
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Timer,
    Request,
}

impl<S: Store> Scheduler<S> {
    pub fn new(store: Arc<S>, page: &'static PageSchema, events: broadcast::Sender<Event>) -> Self {
        let (latest, _) = watch::channel(None);
        let shared = Shared {
            store,
            page,
            batch: page.read_batch(),
            control: Mutex::new(Control {
                token: CancellationToken::new(),
                periodic: false,
                queued: false,
            }),
            reading: tokio::sync::Mutex::new(()),
            wake: Notify::new(),
            latest,
            events,
        };
        Self { shared: Arc::new(shared) }
    }

    pub fn page(&self) -> &'static PageSchema {
        self.shared.page
    }

    /// Start polling every `interval`, restarting the loop if it is already running.
    ///
    /// A zero `interval` performs a single cycle. If a read of the previous loop is still in
    /// flight, the first cycle reads as soon as it completes.
    pub fn start(&self, interval: Duration) {
        let mut control = self.shared.control();
        control.reset();
        control.periodic = !interval.is_zero();
        info!(message = "starting poll loop", page = self.shared.page.name, ?interval);
        tokio::spawn(poll_loop(Arc::clone(&self.shared), control.token.clone(), interval));
    }

    /// Stop polling.
    ///
    /// A read that is already in flight is not interrupted, but its result is discarded and it
    /// does not schedule another cycle. Requested cycles that have not started reading are
    /// dropped.
    pub fn stop(&self) {
        self.shared.control().reset();
    }

    /// Poll now.
    ///
    /// While the loop is running this cuts the current wait short, or runs one more cycle right
    /// after the read in flight. Otherwise it queues a single cycle; requests made before that
    /// cycle starts reading are served by it.
    pub fn poll_once(&self) {
        let mut control = self.shared.control();
        if control.periodic {
            self.shared.wake.notify_one();
        } else if control.queued {
            trace!(message = "poll request coalesced with a queued cycle");
        } else {
            control.queued = true;
            let shared = Arc::clone(&self.shared);
            let token = control.token.clone();
            tokio::spawn(async move { shared.cycle(&token, Trigger::Request).await });
        }
    }

    pub fn is_armed(&self) -> bool {
        let control = self.shared.control();
        control.periodic && !control.token.is_cancelled()
    }

    pub fn is_in_flight(&self) -> bool {
        self.shared.reading.try_lock().is_err()
    }

    /// Subscribe to the most recently published record.
    pub fn records(&self) -> watch::Receiver<Latest> {
        self.shared.latest.subscribe()
    }

    pub fn latest(&self) -> Latest {
        self.shared.latest.borrow().clone()
    }
}

impl<S> Drop for Scheduler<S> {
    fn drop(&mut self) {
        self.shared.control.lock().unwrap_or_else(|e| e.into_inner()).reset();
    }
}

async fn poll_loop<S: Store>(shared: Arc<Shared<S>>, token: CancellationToken, interval: Duration) {
    loop {
        shared.cycle(&token, Trigger::Timer).await;
        if token.is_cancelled() || interval.is_zero() {
            break;
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = shared.wake.notified() => trace!(message = "poll loop woken early"),
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!(message = "poll loop exited", page = shared.page.name);
}

impl<S> Shared<S> {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<S: Store> Shared<S> {
    async fn cycle(&self, token: &CancellationToken, trigger: Trigger) {
        let _reading = self.reading.lock().await;
        if trigger == Trigger::Request {
            let mut control = self.control();
            // A cancelled request was already taken off the queue by `reset`.
            if !token.is_cancelled() {
                control.queued = false;
            }
        }
        if token.is_cancelled() {
            trace!(message = "skipping cycle of a stopped loop", page = self.page.name);
            return;
        }
        let result = self.store.read_batch(self.batch.keys()).await;
        if token.is_cancelled() {
            debug!(message = "discarding read completed after stop", page = self.page.name);
            return;
        }
        match result {
            Ok(values) => {
                let record = Arc::new(decode_record(self.page, jiff::Timestamp::now(), &values));
                trace!(message = "publishing record", page = self.page.name);
                self.latest.send_replace(Some(Arc::clone(&record)));
                let _ignore_no_receivers = self.events.send(Event::RecordPublished(record));
            }
            Err(e) => {
                warn!(
                    message = "batched read failed",
                    page = self.page.name,
                    error = (&e as &dyn std::error::Error)
                );
                let _ignore_no_receivers = self.events.send(Event::ReadFailed(Arc::new(e)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Error;
    use crate::memory_store::MemoryStore;
    use crate::schema::{BoolLabels, Scale, VariableKey, VariableKind, VariableSpec, variables};
    use crate::value::RawValue;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;
    use tokio::time::Instant;

    static VARIABLES: [VariableSpec; 2] = variables! {
        "level" at "/Equipment/HeLevel/Variables/HeLe": VariableKind::Scalar(Scale::new(1.0, 1)),
        "compressor" at "/Equipment/CompressorChiller/Variables/sta1":
            VariableKind::Boolean(BoolLabels::ON_OFF),
    };

    static PAGE: PageSchema =
        PageSchema { name: "test", title: "Test", variables: &VARIABLES, commands: &[] };

    fn memory() -> MemoryStore {
        MemoryStore::with_values([
            ("/Equipment/HeLevel/Variables/HeLe", json!(71.54)),
            ("/Equipment/CompressorChiller/Variables/sta1", json!(1)),
        ])
    }

    /// Reads block until the test hands out a permit.
    struct HeldStore {
        inner: MemoryStore,
        gate: Semaphore,
        started: AtomicUsize,
    }

    impl HeldStore {
        fn new() -> Self {
            Self { inner: memory(), gate: Semaphore::new(0), started: AtomicUsize::new(0) }
        }

        fn started(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        async fn wait_for_reads(&self, count: usize) {
            while self.started() < count {
                tokio::task::yield_now().await;
            }
        }
    }

    impl Store for HeldStore {
        async fn read_batch(&self, keys: &[VariableKey]) -> Result<Vec<RawValue>, Error> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.gate.acquire().await.unwrap().forget();
            self.inner.read_batch(keys).await
        }

        async fn write_batch(
            &self,
            keys: &[VariableKey],
            values: &[RawValue],
        ) -> Result<(), Error> {
            self.inner.write_batch(keys, values).await
        }
    }

    fn scheduler<S: Store>(store: &Arc<S>) -> (Scheduler<S>, broadcast::Receiver<Event>) {
        let (events, receiver) = broadcast::channel(64);
        (Scheduler::new(Arc::clone(store), &PAGE, events), receiver)
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_and_rearms() {
        let store = Arc::new(memory());
        let (scheduler, _) = scheduler(&store);
        let mut records = scheduler.records();
        scheduler.start(Duration::from_secs(1));
        records.changed().await.unwrap();
        let record = scheduler.latest().unwrap();
        assert_eq!(record.get("level").unwrap().as_ref().unwrap().to_string(), "71.5");
        assert_eq!(record.get("compressor").unwrap().as_ref().unwrap().to_string(), "ON");
        assert!(scheduler.is_armed());
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(store.read_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_harmless_before_start_and_idempotent() {
        let store = Arc::new(memory());
        let (scheduler, _) = scheduler(&store);
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_armed());
        scheduler.start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_armed());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.read_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_polls_once() {
        let store = Arc::new(memory());
        let (scheduler, _) = scheduler(&store);
        let mut records = scheduler.records();
        scheduler.start(Duration::ZERO);
        records.changed().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.read_count(), 1);
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reads_still_rearm() {
        let store = Arc::new(MemoryStore::with_values([(
            "/Equipment/HeLevel/Variables/HeLe",
            json!(70),
        )]));
        let (scheduler, mut events) = scheduler(&store);
        scheduler.start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(store.read_count(), 3);
        for _ in 0..3 {
            let event = events.try_recv().unwrap();
            assert!(matches!(event, Event::ReadFailed(e) if matches!(*e, Error::UnknownKey(_))));
        }
        assert!(scheduler.latest().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_read_in_flight() {
        let store = Arc::new(HeldStore::new());
        let (scheduler, mut events) = scheduler(&store);
        scheduler.start(Duration::from_secs(1));
        store.wait_for_reads(1).await;
        assert!(scheduler.is_in_flight());
        scheduler.stop();
        store.gate.add_permits(1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!scheduler.is_in_flight());
        assert!(scheduler.latest().is_none());
        assert_eq!(store.started(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn requests_during_a_read_get_one_more_cycle() {
        let store = Arc::new(HeldStore::new());
        let (scheduler, mut events) = scheduler(&store);
        scheduler.start(Duration::from_secs(10));
        store.wait_for_reads(1).await;
        scheduler.poll_once();
        scheduler.poll_once();
        store.gate.add_permits(2);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.started(), 2);
        for _ in 0..2 {
            assert!(matches!(events.try_recv(), Ok(Event::RecordPublished(_))));
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_requests_coalesce() {
        let store = Arc::new(HeldStore::new());
        let (scheduler, _) = scheduler(&store);
        scheduler.poll_once();
        store.wait_for_reads(1).await;
        scheduler.poll_once();
        scheduler.poll_once();
        scheduler.poll_once();
        store.gate.add_permits(3);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.started(), 2);
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_once_after_stop_is_not_lost_to_the_stopped_read() {
        let store = Arc::new(HeldStore::new());
        let (scheduler, _) = scheduler(&store);
        scheduler.start(Duration::from_secs(1));
        store.wait_for_reads(1).await;
        scheduler.stop();
        scheduler.poll_once();
        store.gate.add_permits(2);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.started(), 2);
        assert!(scheduler.latest().is_some());
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_mid_read_reads_as_soon_as_the_old_read_completes() {
        let store = Arc::new(HeldStore::new());
        let (scheduler, _) = scheduler(&store);
        let mut records = scheduler.records();
        scheduler.start(Duration::from_secs(60));
        store.wait_for_reads(1).await;
        scheduler.stop();
        let restarted_at = Instant::now();
        scheduler.start(Duration::from_secs(60));
        assert!(scheduler.is_in_flight());
        store.gate.add_permits(2);
        records.changed().await.unwrap();
        assert!(restarted_at.elapsed() < Duration::from_secs(1));
        assert_eq!(store.started(), 2);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.started(), 2);
        assert!(scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_drops_queued_requests() {
        let store = Arc::new(HeldStore::new());
        let (scheduler, _) = scheduler(&store);
        scheduler.poll_once();
        store.wait_for_reads(1).await;
        scheduler.poll_once();
        scheduler.stop();
        store.gate.add_permits(2);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.started(), 1);
        assert!(scheduler.latest().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_once_wakes_armed_loop_early() {
        let store = Arc::new(memory());
        let (scheduler, _) = scheduler(&store);
        let mut records = scheduler.records();
        let started_at = Instant::now();
        scheduler.start(Duration::from_secs(60));
        records.changed().await.unwrap();
        scheduler.poll_once();
        records.changed().await.unwrap();
        assert_eq!(store.read_count(), 2);
        assert!(started_at.elapsed() < Duration::from_secs(1));
        assert!(scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_once_while_stopped_runs_a_single_cycle() {
        let store = Arc::new(memory());
        let (scheduler, _) = scheduler(&store);
        let mut records = scheduler.records();
        scheduler.poll_once();
        records.changed().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.read_count(), 1);
        assert!(!scheduler.is_armed());
    }
}
