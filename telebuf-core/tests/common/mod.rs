//! Shared helpers for telebuf-core integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use telebuf_core::{CollectorConfig, Error, Result, Transport};

/// Transport that records accepted envelopes and can be switched offline
#[derive(Default)]
pub struct MockTransport {
    online: AtomicBool,
    attempts: Mutex<Vec<String>>,
    sent: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn online() -> Arc<Self> {
        let transport = Self::default();
        transport.set_online(true);
        Arc::new(transport)
    }

    pub fn offline() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Event names of every delivered record, in delivery order
    pub fn delivered_events(&self) -> Vec<String> {
        event_names(&self.sent())
    }

    /// Event names of every record handed to `send`, delivered or not
    pub fn attempted_events(&self) -> Vec<String> {
        event_names(&self.attempts.lock().unwrap())
    }
}

/// Event names carried by serialized envelopes, in order
pub fn event_names(envelopes: &[String]) -> Vec<String> {
    envelopes
        .iter()
        .flat_map(|envelope| {
            let value: Value = serde_json::from_str(envelope).unwrap();
            value["data"].as_array().unwrap().clone()
        })
        .filter_map(|record| record["pr"]["$eid"].as_str().map(str::to_string))
        .collect()
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, envelope: &str) -> Result<()> {
        self.attempts.lock().unwrap().push(envelope.to_string());
        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::Transport("collector unreachable".to_string()));
        }
        self.sent.lock().unwrap().push(envelope.to_string());
        Ok(())
    }
}

/// Collector config that only ticks on start and stop
pub fn test_config() -> CollectorConfig {
    telebuf_core::logging::init_test();
    CollectorConfig {
        flush_interval_ms: 60_000,
        device_id: Some("test-device".to_string()),
        ..CollectorConfig::new("test.local", 8081, "test-key")
    }
}

pub fn as_transport(transport: &Arc<MockTransport>) -> Arc<dyn Transport> {
    Arc::clone(transport) as Arc<dyn Transport>
}
