//! Device identity and platform facts

use std::path::Path;

use crate::config::CollectorConfig;
use crate::record::{keys, UploadRecord};

const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Device ID sent as `usr.did`
///
/// Uses the configured ID when present, then the host machine ID, and
/// finally a random UUID (stable only for this process).
pub fn resolve_device_id(config: &CollectorConfig) -> String {
    if let Some(id) = config.device_id.as_deref() {
        let id = id.trim();
        if !id.is_empty() {
            return id.to_string();
        }
    }

    if let Some(id) = read_machine_id(Path::new(MACHINE_ID_PATH)) {
        return id;
    }

    let id = uuid::Uuid::new_v4().to_string();
    tracing::debug!(device_id = %id, "No machine ID available, using random device ID");
    id
}

fn read_machine_id(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let id = content.trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// Platform record describing the current host
///
/// Carries `$os` and, when `LANG` is set, `$lang`.
pub fn platform_snapshot() -> UploadRecord {
    let mut record = UploadRecord::platform();
    record.add_system_property(keys::OS, std::env::consts::OS);
    if let Some(lang) = std::env::var("LANG").ok().filter(|l| !l.is_empty()) {
        record.add_system_property(keys::LANGUAGE, lang);
    }
    record
}
