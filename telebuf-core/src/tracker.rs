//! Tracker: the public face of telebuf
//!
//! A [`Tracker`] accepts records from any thread, enriches them with the
//! session context it remembers (user, session, platform, common
//! properties), and hands them to the ingestion queue. Delivery happens on a
//! private background runtime owned by the tracker.
//!
//! ```no_run
//! use telebuf_core::{CollectorConfig, Tracker, UploadRecord};
//! use std::time::Duration;
//!
//! let tracker = Tracker::new(CollectorConfig::new("collector.local", 8081, "app-key"))?;
//! tracker.identify(UploadRecord::user("someone@example.com"));
//! tracker.start_session();
//! tracker.track(UploadRecord::event("Add_cart"));
//! tracker.stop_session();
//! tracker.stop(Some(Duration::from_secs(5)));
//! # Ok::<(), telebuf_core::Error>(())
//! ```
//!
//! The tracker owns its runtime and blocks on it in [`Tracker::stop`], so it
//! must not be stopped or dropped from inside an async context.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::config::CollectorConfig;
use crate::delivery::{DeliveryStats, DeliveryWorker, WorkerHandle, WorkerState};
use crate::device;
use crate::envelope::{BatchBuilder, EnvelopeMeta};
use crate::error::{Error, Result};
use crate::queue::IngestQueue;
use crate::record::{keys, UploadRecord};
use crate::storage;
use crate::transport::{HttpTransport, Transport};

/// Name of the background delivery thread
pub const DELIVERY_THREAD_NAME: &str = "telebuf-delivery";

const UNKNOWN: &str = "unknown";

/// Context remembered between calls and used for enrichment
#[derive(Debug, Default)]
struct SessionState {
    user_id: Option<String>,
    platform: Option<UploadRecord>,
    common_system: Map<String, Value>,
    common_custom: Map<String, Value>,
}

impl SessionState {
    /// Copy `$os` and `$ov` from the last platform record
    fn fill_os(&self, record: &mut UploadRecord) {
        let Some(platform) = &self.platform else {
            return;
        };
        for key in [keys::OS, keys::OS_VERSION] {
            if !record.has_system_property(key) {
                record.add_system_property(key, platform.system_string(key, UNKNOWN));
            }
        }
    }

    fn fill_common(&self, record: &mut UploadRecord) {
        for (name, value) in &self.common_system {
            record.add_system_property_if_absent(name, value.clone());
        }
        for (name, value) in &self.common_custom {
            record.add_custom_property_if_absent(name, value.clone());
        }
    }
}

/// An event whose duration is measured between
/// [`Tracker::start_track`] and [`Tracker::end_track`]
#[derive(Debug, Clone)]
pub struct TimedEvent {
    event: UploadRecord,
    started_at: i64,
}

impl TimedEvent {
    /// Start time in epoch milliseconds
    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    pub fn event(&self) -> &UploadRecord {
        &self.event
    }
}

/// Client-side telemetry tracker
pub struct Tracker {
    queue: Arc<IngestQueue>,
    session: Mutex<SessionState>,
    /// 0 when no session is open
    session_id: AtomicI64,
    stopped: AtomicBool,
    time_zone: i64,
    device_id: String,
    worker: WorkerHandle,
    runtime: tokio::runtime::Runtime,
}

impl Tracker {
    /// Create a tracker delivering over HTTP and start its delivery worker
    pub fn new(config: CollectorConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a tracker delivering through `transport` and start its
    /// delivery worker
    pub fn with_transport(config: CollectorConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let device_id = device::resolve_device_id(&config);
        let meta = EnvelopeMeta::from_config(&config, device_id.clone())?;
        let builder = BatchBuilder::new(meta, config.max_send_size);
        let storage = storage::open(&config)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(DELIVERY_THREAD_NAME)
            .enable_all()
            .build()
            .map_err(|e| Error::Runtime(format!("failed to create runtime: {}", e)))?;

        let queue = Arc::new(IngestQueue::new());
        let worker = DeliveryWorker::new(
            Arc::clone(&queue),
            builder,
            storage,
            transport,
            config.flush_interval(),
        )
        .spawn(runtime.handle());

        tracing::info!(
            device_id = %device_id,
            max_send_size = config.max_send_size,
            flush_interval_ms = config.flush_interval_ms,
            file_storage = config.storage_dir.is_some(),
            "Tracker started"
        );

        Ok(Self {
            queue,
            session: Mutex::new(SessionState::default()),
            session_id: AtomicI64::new(0),
            stopped: AtomicBool::new(false),
            time_zone: config.time_zone,
            device_id,
            worker,
            runtime,
        })
    }

    /// Enqueue a record as-is, without enrichment
    pub fn enqueue(&self, record: UploadRecord) {
        if self.is_stopped() {
            return;
        }
        self.queue.enqueue(record);
    }

    /// Identify the current user and remember their ID for later records
    pub fn identify(&self, mut user: UploadRecord) {
        if self.is_stopped() {
            return;
        }

        user.add_system_property_if_absent(keys::TIME_ZONE, self.time_zone);
        user.add_system_property_if_absent(keys::CREATED_AT, now_millis());

        let user_id = user.user_id().filter(|id| !id.is_empty()).map(str::to_string);
        self.lock_session().user_id = user_id;
        self.queue.enqueue(user);
    }

    /// Forget the current user ID
    pub fn clean_user_id(&self) {
        self.lock_session().user_id = None;
    }

    /// Current user ID, if one was identified
    pub fn user_id(&self) -> Option<String> {
        self.lock_session().user_id.clone()
    }

    /// Report platform facts and remember them for session and event records
    pub fn platform(&self, mut record: UploadRecord) {
        if self.is_stopped() {
            return;
        }

        let mut session = self.lock_session();
        if let Some(user_id) = &session.user_id {
            record.add_system_property_if_absent(keys::USER_ID, user_id.clone());
        }
        record.add_system_property_if_absent(keys::TIME_ZONE, self.time_zone);
        record.add_system_property_if_absent(keys::CREATED_AT, now_millis());

        session.platform = Some(record.clone());
        drop(session);

        self.queue.enqueue(record);
    }

    /// Open a new session identified by the current time in milliseconds
    pub fn start_session(&self) {
        if self.is_stopped() {
            return;
        }

        let session = self.lock_session();
        let session_id = now_millis();
        self.session_id.store(session_id, Ordering::SeqCst);

        let mut record = UploadRecord::session_start(session_id);
        if let Some(user_id) = &session.user_id {
            record.add_system_property(keys::USER_ID, user_id.clone());
        }
        record.add_system_property(keys::TIME_ZONE, self.time_zone);
        record.add_system_property(keys::CREATED_AT, session_id);
        session.fill_os(&mut record);

        tracing::debug!(session_id, "Session started");
        self.queue.enqueue(record);
    }

    /// Close the open session and report its duration.
    ///
    /// Does nothing when no session is open or the clock moved backwards
    /// since the session started.
    pub fn stop_session(&self) {
        if self.is_stopped() {
            return;
        }

        let session = self.lock_session();
        let session_id = self.session_id.load(Ordering::SeqCst);
        if session_id == 0 {
            return;
        }
        let now = now_millis();
        if now < session_id {
            tracing::warn!(session_id, now, "Clock moved backwards, session not closed");
            return;
        }

        let mut record = UploadRecord::session_end(session_id);
        if let Some(user_id) = &session.user_id {
            record.add_system_property_if_absent(keys::USER_ID, user_id.clone());
        }
        record.add_system_property_if_absent(keys::TIME_ZONE, self.time_zone);
        record.add_system_property_if_absent(keys::CREATED_AT, session_id);
        record.add_system_property_if_absent(keys::DURATION, now - session_id);

        self.session_id.store(0, Ordering::SeqCst);
        tracing::debug!(session_id, duration_ms = now - session_id, "Session stopped");
        self.queue.enqueue(record);
    }

    /// ID of the open session, or 0 when none is open
    pub fn current_session_id(&self) -> i64 {
        self.session_id.load(Ordering::SeqCst)
    }

    /// Track an event enriched with user, session, time, platform and
    /// common properties. Properties already on the event win.
    pub fn track(&self, mut event: UploadRecord) {
        if self.is_stopped() {
            return;
        }

        let session = self.lock_session();
        if let Some(user_id) = &session.user_id {
            event.add_system_property_if_absent(keys::USER_ID, user_id.clone());
        }
        let session_id = self.session_id.load(Ordering::SeqCst);
        if session_id != 0 {
            event.add_system_property_if_absent(keys::SESSION_ID, session_id);
        }
        event.add_system_property_if_absent(keys::TIME_ZONE, self.time_zone);
        event.add_system_property_if_absent(keys::CREATED_AT, now_millis());
        session.fill_os(&mut event);
        session.fill_common(&mut event);
        drop(session);

        self.queue.enqueue(event);
    }

    /// Start timing `event`; pass the result to [`Tracker::end_track`]
    pub fn start_track(&self, mut event: UploadRecord) -> TimedEvent {
        let started_at = now_millis();
        event.add_system_property_if_absent(keys::CREATED_AT, started_at);
        TimedEvent { event, started_at }
    }

    /// Finish a timed event, recording its duration, and track it
    pub fn end_track(&self, timed: TimedEvent) {
        if self.is_stopped() {
            return;
        }
        let TimedEvent {
            mut event,
            started_at,
        } = timed;
        event.add_system_property(keys::DURATION, now_millis() - started_at);
        self.track(event);
    }

    /// Merge system properties added to every tracked event
    pub fn set_common_system_properties(&self, properties: Map<String, Value>) {
        if properties.is_empty() {
            return;
        }
        let mut session = self.lock_session();
        session.common_system.extend(properties);
        tracing::debug!(count = session.common_system.len(), "Common system properties set");
    }

    /// Merge custom properties added to every tracked event
    pub fn set_common_custom_properties(&self, properties: Map<String, Value>) {
        if properties.is_empty() {
            return;
        }
        let mut session = self.lock_session();
        session.common_custom.extend(properties);
        tracing::debug!(count = session.common_custom.len(), "Common custom properties set");
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Delivery statistics so far
    pub fn stats(&self) -> DeliveryStats {
        self.worker.stats()
    }

    /// Current state of the delivery worker
    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    /// Whether [`Tracker::stop`] has been called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop accepting records, flush what is pending, and wait for the
    /// delivery worker to finish.
    ///
    /// Waits at most `timeout` when given, otherwise until the worker has
    /// stopped. Returns true once the worker is observed stopped. Safe to
    /// call repeatedly and from several threads at once.
    pub fn stop(&self, timeout: Option<Duration>) -> bool {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::info!(timeout = ?timeout, "Stopping tracker");
        }
        self.worker.request_stop();

        let stopped = self.runtime.block_on(self.worker.wait_stopped(timeout));
        if !stopped {
            tracing::warn!(timeout = ?timeout, "Delivery worker did not stop in time");
        }
        stopped
    }

    // Session state stays consistent even if a holder panicked.
    fn lock_session(&self) -> MutexGuard<'_, SessionState> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("device_id", &self.device_id)
            .field("session_id", &self.current_session_id())
            .field("stopped", &self.is_stopped())
            .field("state", &self.state())
            .finish()
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
