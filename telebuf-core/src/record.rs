//! Upload records
//!
//! An [`UploadRecord`] is one analytics fact waiting for delivery. Its
//! properties live in a single flat map whose keys already carry their wire
//! namespace:
//!
//! - system properties (engine-assigned) are stored as `$name`
//! - custom properties (caller-assigned) are stored as `_name`
//!
//! On the wire a record renders as `{"dt": <tag>, "pr": {...}}`.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;

/// Prefix for engine-assigned property keys
pub const SYSTEM_PREFIX: char = '$';

/// Prefix for caller-assigned property keys
pub const CUSTOM_PREFIX: char = '_';

/// Reserved system property names
pub mod keys {
    /// Caller-side user ID
    pub const USER_ID: &str = "cuid";
    /// Event name
    pub const EVENT_NAME: &str = "eid";
    /// Session ID
    pub const SESSION_ID: &str = "sid";
    /// Timezone offset in milliseconds
    pub const TIME_ZONE: &str = "tz";
    /// Creation time in epoch milliseconds
    pub const CREATED_AT: &str = "ct";
    /// Duration in milliseconds (timed events, sessions)
    pub const DURATION: &str = "dru";
    /// Operating system name
    pub const OS: &str = "os";
    /// Operating system version
    pub const OS_VERSION: &str = "ov";
    /// UI language
    pub const LANGUAGE: &str = "lang";
    /// Screen resolution
    pub const RESOLUTION: &str = "rs";
}

/// Kind of record, rendered as the `dt` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RecordKind {
    #[serde(rename = "usr")]
    User,
    #[serde(rename = "pl")]
    Platform,
    #[serde(rename = "evt")]
    Event,
    #[serde(rename = "ss")]
    SessionStart,
    #[serde(rename = "se")]
    SessionEnd,
}

impl RecordKind {
    /// Wire tag for this kind
    pub fn tag(&self) -> &'static str {
        match self {
            RecordKind::User => "usr",
            RecordKind::Platform => "pl",
            RecordKind::Event => "evt",
            RecordKind::SessionStart => "ss",
            RecordKind::SessionEnd => "se",
        }
    }
}

/// One analytics record awaiting delivery
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRecord {
    kind: RecordKind,
    properties: Map<String, Value>,
}

/// Wire shape of a record inside an envelope's `data` array
#[derive(Serialize)]
struct WireRecord<'a> {
    dt: RecordKind,
    pr: &'a Map<String, Value>,
}

impl UploadRecord {
    /// Create an empty record of the given kind
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            properties: Map::new(),
        }
    }

    /// User identification record for `user_id`
    pub fn user(user_id: impl Into<String>) -> Self {
        let mut record = Self::new(RecordKind::User);
        record.add_system_property(keys::USER_ID, user_id.into());
        record
    }

    /// Platform facts record; properties are filled in by the caller
    pub fn platform() -> Self {
        Self::new(RecordKind::Platform)
    }

    /// Custom event record named `name`
    pub fn event(name: impl Into<String>) -> Self {
        let mut record = Self::new(RecordKind::Event);
        record.add_system_property(keys::EVENT_NAME, name.into());
        record
    }

    /// Session start marker
    pub fn session_start(session_id: i64) -> Self {
        let mut record = Self::new(RecordKind::SessionStart);
        record.add_system_property(keys::SESSION_ID, session_id);
        record
    }

    /// Session end marker
    pub fn session_end(session_id: i64) -> Self {
        let mut record = Self::new(RecordKind::SessionEnd);
        record.add_system_property(keys::SESSION_ID, session_id);
        record
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// User ID carried by a user record (or any record with `$cuid`)
    pub fn user_id(&self) -> Option<&str> {
        self.system_property(keys::USER_ID).and_then(Value::as_str)
    }

    /// All properties with their wire prefixes
    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub fn add_system_property(&mut self, name: &str, value: impl Into<Value>) {
        self.properties.insert(system_key(name), value.into());
    }

    pub fn add_custom_property(&mut self, name: &str, value: impl Into<Value>) {
        self.properties.insert(custom_key(name), value.into());
    }

    /// Set a system property unless the record already has one by that name
    pub fn add_system_property_if_absent(&mut self, name: &str, value: impl Into<Value>) {
        self.properties
            .entry(system_key(name))
            .or_insert_with(|| value.into());
    }

    /// Set a custom property unless the record already has one by that name
    pub fn add_custom_property_if_absent(&mut self, name: &str, value: impl Into<Value>) {
        self.properties
            .entry(custom_key(name))
            .or_insert_with(|| value.into());
    }

    pub fn has_system_property(&self, name: &str) -> bool {
        self.properties.contains_key(&system_key(name))
    }

    pub fn has_custom_property(&self, name: &str) -> bool {
        self.properties.contains_key(&custom_key(name))
    }

    pub fn system_property(&self, name: &str) -> Option<&Value> {
        self.properties.get(&system_key(name))
    }

    pub fn custom_property(&self, name: &str) -> Option<&Value> {
        self.properties.get(&custom_key(name))
    }

    /// System property rendered as a string, or `default` when missing
    pub fn system_string(&self, name: &str, default: &str) -> String {
        match self.system_property(name) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => default.to_string(),
        }
    }

    /// Render the record as its wire JSON value
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(WireRecord {
            dt: self.kind,
            pr: &self.properties,
        })?)
    }
}

fn system_key(name: &str) -> String {
    format!("{}{}", SYSTEM_PREFIX, name)
}

fn custom_key(name: &str) -> String {
    format!("{}{}", CUSTOM_PREFIX, name)
}
