//! Background delivery loop
//!
//! One [`DeliveryWorker`] runs per tracker. Every tick it:
//!
//! 1. drains the ingestion queue and saves the built envelopes to storage
//! 2. loads the working set (including envelopes left over from earlier ticks)
//! 3. sends each envelope once; delivered ones are dropped, failures stay
//! 4. syncs storage
//! 5. sleeps for the flush interval or until a stop is requested
//!
//! A stop request wakes the sleep; the worker then runs exactly one more
//! tick so everything enqueued before the stop is delivered or persisted,
//! and publishes [`WorkerState::Stopped`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;

use crate::envelope::BatchBuilder;
use crate::queue::IngestQueue;
use crate::storage::DataStorage;
use crate::transport::Transport;

/// Lifecycle of the delivery worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Ticking on the flush interval
    Running,
    /// Stop observed; running the final tick
    StopRequested,
    /// Final tick done; the worker has exited
    Stopped,
}

/// Outcome of a single tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Records taken from the ingestion queue
    pub records_drained: usize,
    /// Envelopes built from those records
    pub envelopes_built: usize,
    /// Envelopes the collector accepted
    pub delivered: usize,
    /// Envelopes kept for a later tick
    pub failed: usize,
    /// Envelopes held by storage after sync
    pub pending: usize,
}

/// Cumulative delivery statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Ticks completed
    pub ticks: usize,
    /// Total records drained from the queue
    pub records_drained: usize,
    /// Total envelopes built
    pub envelopes_built: usize,
    /// Total envelopes delivered
    pub envelopes_delivered: usize,
    /// Total failed send attempts
    pub delivery_failures: usize,
    /// Envelopes held by storage after the last tick
    pub pending: usize,
}

impl DeliveryStats {
    /// Fold one tick into the totals
    pub fn record(&mut self, report: &TickReport) {
        self.ticks += 1;
        self.records_drained += report.records_drained;
        self.envelopes_built += report.envelopes_built;
        self.envelopes_delivered += report.delivered;
        self.delivery_failures += report.failed;
        self.pending = report.pending;
    }
}

/// Shared, lock-protected statistics
pub type SharedStats = Arc<Mutex<DeliveryStats>>;

/// Snapshot shared statistics, recovering from a poisoned lock
pub fn snapshot(stats: &SharedStats) -> DeliveryStats {
    lock_stats(stats).clone()
}

fn lock_stats(stats: &SharedStats) -> MutexGuard<'_, DeliveryStats> {
    stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drives records from the ingestion queue to the collector
pub struct DeliveryWorker {
    queue: Arc<IngestQueue>,
    builder: BatchBuilder,
    storage: Box<dyn DataStorage>,
    transport: Arc<dyn Transport>,
    interval: Duration,
    stats: SharedStats,
}

impl DeliveryWorker {
    pub fn new(
        queue: Arc<IngestQueue>,
        builder: BatchBuilder,
        storage: Box<dyn DataStorage>,
        transport: Arc<dyn Transport>,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            builder,
            storage,
            transport,
            interval,
            stats: SharedStats::default(),
        }
    }

    /// Handle to the statistics this worker updates
    pub fn stats(&self) -> SharedStats {
        Arc::clone(&self.stats)
    }

    /// Envelopes currently held by storage
    pub fn pending_count(&self) -> usize {
        self.storage.pending_count()
    }

    /// Run one drain → build → save → load → send → sync cycle.
    pub async fn tick(&mut self) -> TickReport {
        let records = self.queue.drain_all();
        let records_drained = records.len();
        let envelopes_built = self.builder.build_into(records, self.storage.as_mut());

        let working = std::mem::take(self.storage.load());
        let mut remaining = VecDeque::new();
        let mut delivered = 0;

        for envelope in working {
            match self.transport.send(&envelope).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(error = %e, "Envelope not delivered, keeping for next tick");
                    remaining.push_back(envelope);
                }
            }
        }

        let failed = remaining.len();
        *self.storage.load() = remaining;
        if let Err(e) = self.storage.sync() {
            tracing::error!(error = %e, "Failed to sync storage");
        }

        let report = TickReport {
            records_drained,
            envelopes_built,
            delivered,
            failed,
            pending: self.storage.pending_count(),
        };
        lock_stats(&self.stats).record(&report);

        if report != TickReport::default() {
            tracing::debug!(
                drained = report.records_drained,
                built = report.envelopes_built,
                delivered = report.delivered,
                failed = report.failed,
                pending = report.pending,
                "Delivery tick"
            );
        }
        report
    }

    /// Tick until a stop is requested, then tick once more and report
    /// [`WorkerState::Stopped`].
    pub async fn run(
        mut self,
        mut stop_rx: watch::Receiver<bool>,
        state_tx: watch::Sender<WorkerState>,
    ) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Delivery worker started");

        loop {
            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stop_rx.changed() => {}
            }

            if stop_requested(&mut stop_rx) {
                break;
            }
        }

        state_tx.send_replace(WorkerState::StopRequested);
        let last = self.tick().await;
        tracing::info!(
            delivered = last.delivered,
            pending = last.pending,
            "Delivery worker stopped"
        );
        state_tx.send_replace(WorkerState::Stopped);
    }

    /// Spawn [`DeliveryWorker::run`] on `runtime` and return its control handle.
    pub fn spawn(self, runtime: &tokio::runtime::Handle) -> WorkerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(WorkerState::Running);
        let stats = self.stats();

        runtime.spawn(self.run(stop_rx, state_tx));

        WorkerHandle {
            stop_tx,
            state_rx,
            stats,
        }
    }
}

// A dropped sender means the owner is gone.
fn stop_requested(stop_rx: &mut watch::Receiver<bool>) -> bool {
    stop_rx.has_changed().is_err() || *stop_rx.borrow_and_update()
}

/// Control side of a spawned worker
#[derive(Debug)]
pub struct WorkerHandle {
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<WorkerState>,
    stats: SharedStats,
}

impl WorkerHandle {
    /// Ask the worker to finish. Repeated requests are harmless.
    pub fn request_stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    pub fn stats(&self) -> DeliveryStats {
        snapshot(&self.stats)
    }

    /// Wait for [`WorkerState::Stopped`], at most `timeout` when given.
    ///
    /// Returns false on timeout, or when the worker exited without
    /// reaching `Stopped`.
    pub async fn wait_stopped(&self, timeout: Option<Duration>) -> bool {
        let mut state_rx = self.state_rx.clone();
        let stopped = async move {
            state_rx
                .wait_for(|state| *state == WorkerState::Stopped)
                .await
                .is_ok()
        };

        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, stopped)
                .await
                .unwrap_or(false),
            None => stopped.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeMeta;
    use crate::error::{Error, Result};
    use crate::record::UploadRecord;
    use crate::storage::{FileStorage, MemoryStorage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records every accepted envelope; rejects everything while offline
    /// and any envelope containing `reject`.
    #[derive(Default)]
    struct MockTransport {
        online: AtomicBool,
        reject: Mutex<Option<String>>,
        sent: Mutex<Vec<String>>,
    }

    impl MockTransport {
        fn online() -> Arc<Self> {
            let transport = Self::default();
            transport.online.store(true, Ordering::SeqCst);
            Arc::new(transport)
        }

        fn offline() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn set_online(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, envelope: &str) -> Result<()> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(Error::Transport("offline".to_string()));
            }
            if let Some(marker) = self.reject.lock().unwrap().as_deref() {
                if envelope.contains(marker) {
                    return Err(Error::Transport("rejected".to_string()));
                }
            }
            self.sent.lock().unwrap().push(envelope.to_string());
            Ok(())
        }
    }

    fn builder(max_send_size: usize) -> BatchBuilder {
        let meta = EnvelopeMeta {
            app_key: "k".to_string(),
            debug: false,
            platform: "js".to_string(),
            time_zone: 0,
            device_id: "d".to_string(),
        };
        BatchBuilder::new(meta, max_send_size)
    }

    fn worker(
        queue: &Arc<IngestQueue>,
        storage: Box<dyn DataStorage>,
        transport: &Arc<MockTransport>,
        max_send_size: usize,
    ) -> DeliveryWorker {
        DeliveryWorker::new(
            Arc::clone(queue),
            builder(max_send_size),
            storage,
            Arc::clone(transport) as Arc<dyn Transport>,
            Duration::from_secs(60),
        )
    }

    fn enqueue_events(queue: &IngestQueue, names: &[&str]) {
        for name in names {
            queue.enqueue(UploadRecord::event(*name));
        }
    }

    #[tokio::test]
    async fn test_offline_then_online() {
        let queue = Arc::new(IngestQueue::new());
        let transport = MockTransport::offline();
        let mut worker = worker(&queue, Box::new(MemoryStorage::new(100)), &transport, 2);

        enqueue_events(&queue, &["E1", "E2", "E3"]);
        let report = worker.tick().await;
        assert_eq!(report.records_drained, 3);
        assert_eq!(report.envelopes_built, 2);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, 2);
        assert_eq!(worker.pending_count(), 2);
        assert!(queue.is_empty());

        transport.set_online(true);
        let report = worker.tick().await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.pending, 0);

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("\"E1\"") && sent[0].contains("\"E2\""));
        assert!(sent[1].contains("\"E3\""));

        let stats = snapshot(&worker.stats());
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.envelopes_delivered, 2);
        assert_eq!(stats.delivery_failures, 2);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_only_failures() {
        let queue = Arc::new(IngestQueue::new());
        let transport = MockTransport::online();
        *transport.reject.lock().unwrap() = Some("P-event".to_string());
        let mut worker = worker(&queue, Box::new(MemoryStorage::new(100)), &transport, 1);

        enqueue_events(&queue, &["P-event", "Q-event"]);
        let report = worker.tick().await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.pending, 1);

        *transport.reject.lock().unwrap() = None;
        let report = worker.tick().await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pending, 0);

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("Q-event"));
        assert!(sent[1].contains("P-event"));
    }

    #[tokio::test]
    async fn test_file_storage_does_not_duplicate_across_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(IngestQueue::new());
        let transport = MockTransport::offline();
        let storage = FileStorage::open(dir.path(), 100).unwrap();
        let mut worker = worker(&queue, Box::new(storage), &transport, 2);

        enqueue_events(&queue, &["E1", "E2", "E3"]);
        worker.tick().await;
        worker.tick().await;
        assert_eq!(worker.pending_count(), 2);

        transport.set_online(true);
        let report = worker.tick().await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.pending, 0);
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_runs_final_tick() {
        let queue = Arc::new(IngestQueue::new());
        let transport = MockTransport::online();
        let worker = worker(&queue, Box::new(MemoryStorage::new(100)), &transport, 10);

        let handle = worker.spawn(&tokio::runtime::Handle::current());
        assert_eq!(handle.state(), WorkerState::Running);

        // Let the first tick pass, then enqueue during the long sleep
        tokio::time::sleep(Duration::from_millis(50)).await;
        enqueue_events(&queue, &["late"]);

        handle.request_stop();
        assert!(handle.wait_stopped(Some(Duration::from_secs(5))).await);
        assert_eq!(handle.state(), WorkerState::Stopped);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("late"));
        assert!(handle.stats().ticks >= 2);

        // Stopping again returns immediately
        handle.request_stop();
        assert!(handle.wait_stopped(Some(Duration::from_millis(10))).await);
    }

    #[tokio::test]
    async fn test_wait_stopped_times_out_while_running() {
        let queue = Arc::new(IngestQueue::new());
        let transport = MockTransport::online();
        let worker = worker(&queue, Box::new(MemoryStorage::new(100)), &transport, 10);

        let handle = worker.spawn(&tokio::runtime::Handle::current());
        assert!(!handle.wait_stopped(Some(Duration::from_millis(20))).await);

        handle.request_stop();
        assert!(handle.wait_stopped(None).await);
    }

    #[test]
    fn test_stats_record() {
        let mut stats = DeliveryStats::default();
        stats.record(&TickReport {
            records_drained: 3,
            envelopes_built: 2,
            delivered: 1,
            failed: 1,
            pending: 1,
        });
        stats.record(&TickReport {
            delivered: 1,
            ..Default::default()
        });
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.records_drained, 3);
        assert_eq!(stats.envelopes_delivered, 2);
        assert_eq!(stats.delivery_failures, 1);
        assert_eq!(stats.pending, 0);
    }
}
