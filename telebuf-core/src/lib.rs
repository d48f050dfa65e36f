//! # telebuf-core
//!
//! Core library for telebuf - an embedded client-side telemetry buffer.
//!
//! This library provides:
//! - The record model (users, platform facts, events, session markers)
//! - A tracker that enriches records and never blocks the caller
//! - Durable staging of envelopes in memory or on disk
//! - Background batching and delivery to a remote collector
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Records flow through four stages:
//! - **Queue:** producers enqueue records from any thread
//! - **Envelopes:** each tick the worker groups drained records into batches
//! - **Storage:** envelopes are persisted before any delivery attempt
//! - **Transport:** each stored envelope is sent once per tick; failures stay
//!   in storage for the next tick
//!
//! ## Example
//!
//! ```rust,no_run
//! use telebuf_core::{Config, Tracker, UploadRecord};
//! use std::time::Duration;
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Start tracking
//! let tracker = Tracker::new(config.collector).expect("failed to start tracker");
//! tracker.track(UploadRecord::event("app_opened"));
//!
//! // Flush before exit
//! tracker.stop(Some(Duration::from_secs(5)));
//! ```

// Re-export commonly used items at the crate root
pub use config::{CollectorConfig, Config};
pub use delivery::{DeliveryStats, TickReport, WorkerState};
pub use error::{Error, Result};
pub use record::{RecordKind, UploadRecord};
pub use storage::DataStorage;
pub use tracker::{TimedEvent, Tracker};
pub use transport::{HttpTransport, Transport};

// Public modules
pub mod config;
pub mod delivery;
pub mod device;
pub mod envelope;
pub mod error;
pub mod global;
pub mod logging;
pub mod queue;
pub mod record;
pub mod storage;
pub mod tracker;
pub mod transport;
