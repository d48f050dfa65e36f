//! Batch envelopes
//!
//! Drained records are grouped in order into envelopes of at most
//! `max_send_size` records. Each envelope carries the shared metadata the
//! collector needs to attribute the batch and is serialized to one JSON line:
//!
//! ```json
//! {"ak":"key","debug":0,"sln":"itn","owner":"zg","pl":"js","sdk":"zg",
//!  "sdkv":"2.0","tz":28800000,"usr":{"did":"..."},"ut":"2024-01-01 00:00:00",
//!  "data":[{"dt":"evt","pr":{"$eid":"..."}}]}
//! ```

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::config::CollectorConfig;
use crate::error::{Error, Result};
use crate::record::UploadRecord;
use crate::storage::DataStorage;

/// SDK identification sent with every envelope
const SLN: &str = "itn";
const OWNER: &str = "zg";
const SDK: &str = "zg";
const SDK_VERSION: &str = "2.0";

/// Format of the `ut` send timestamp (UTC)
pub const SEND_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Metadata shared by every envelope of one tracker
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeMeta {
    pub app_key: String,
    pub debug: bool,
    pub platform: String,
    pub time_zone: i64,
    pub device_id: String,
}

impl EnvelopeMeta {
    /// Take envelope metadata from a collector configuration
    pub fn from_config(config: &CollectorConfig, device_id: impl Into<String>) -> Result<Self> {
        let app_key = config
            .app_key
            .clone()
            .ok_or_else(|| Error::Config("collector.app_key is required".to_string()))?;

        Ok(Self {
            app_key,
            debug: config.debug,
            platform: config.platform.clone(),
            time_zone: config.time_zone,
            device_id: device_id.into(),
        })
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    ak: &'a str,
    debug: u8,
    sln: &'static str,
    owner: &'static str,
    pl: &'a str,
    sdk: &'static str,
    sdkv: &'static str,
    tz: i64,
    usr: Device<'a>,
    ut: String,
    data: Vec<Value>,
}

#[derive(Serialize)]
struct Device<'a> {
    did: &'a str,
}

/// Groups records into serialized envelopes
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    meta: EnvelopeMeta,
    max_send_size: usize,
}

impl BatchBuilder {
    pub fn new(meta: EnvelopeMeta, max_send_size: usize) -> Self {
        Self {
            meta,
            max_send_size: max_send_size.max(1),
        }
    }

    /// Serialize `records` into `ceil(n / max_send_size)` envelopes.
    ///
    /// Records keep their order; every envelope but the last holds exactly
    /// `max_send_size` records. A record that fails to render is logged and
    /// left out of its envelope.
    pub fn build(&self, records: Vec<UploadRecord>) -> Vec<String> {
        records
            .chunks(self.max_send_size)
            .filter_map(|group| self.serialize_group(group))
            .collect()
    }

    /// Build envelopes and save each one into `storage`.
    ///
    /// Returns the number of envelopes saved.
    pub fn build_into(&self, records: Vec<UploadRecord>, storage: &mut dyn DataStorage) -> usize {
        let envelopes = self.build(records);
        let count = envelopes.len();
        for envelope in envelopes {
            storage.save(envelope);
        }
        count
    }

    fn serialize_group(&self, group: &[UploadRecord]) -> Option<String> {
        let data: Vec<Value> = group
            .iter()
            .filter_map(|record| match record.to_value() {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(kind = record.kind().tag(), error = %e, "Dropping unrenderable record");
                    None
                }
            })
            .collect();
        if data.is_empty() {
            return None;
        }

        let envelope = Envelope {
            ak: &self.meta.app_key,
            debug: u8::from(self.meta.debug),
            sln: SLN,
            owner: OWNER,
            pl: &self.meta.platform,
            sdk: SDK,
            sdkv: SDK_VERSION,
            tz: self.meta.time_zone,
            usr: Device {
                did: &self.meta.device_id,
            },
            ut: Utc::now().format(SEND_TIME_FORMAT).to_string(),
            data,
        };

        match serde_json::to_string(&envelope) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::warn!(records = group.len(), error = %e, "Failed to serialize envelope");
                None
            }
        }
    }
}
