//! Disk-backed [`StateStore`]: a small JSON document under the user's home
//! directory (default `~/.auto-encore/state.json`).
//!
//! The file is read once at startup and held in memory; every committed write
//! rewrites it through a sibling temp file + rename so a crash mid-write never
//! leaves a truncated document behind. A failed write is rolled back in memory
//! too: a `set_bool` that returns `Err` was never observable.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::{StateStore, StoreError, CHANGE_CHANNEL_CAPACITY};
use crate::core::types::StateChange;

/// On-disk document shape. `updated_at` is informational only; nothing reads
/// it back.
#[derive(serde::Serialize, serde::Deserialize, Default)]
struct StateFile {
    #[serde(default)]
    entries: HashMap<String, bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct JsonFileStore {
    path: PathBuf,
    entries: std::sync::Mutex<HashMap<String, bool>>,
    tx: broadcast::Sender<StateChange>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file silently starts from defaults;
    /// an unreadable or corrupt one logs a warning and starts from defaults.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<StateFile>(&contents) {
                Ok(doc) => {
                    info!(
                        "state loaded from {} ({} entries)",
                        path.display(),
                        doc.entries.len()
                    );
                    doc.entries
                }
                Err(e) => {
                    warn!(
                        "state file {} is corrupt ({}), starting from defaults",
                        path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(), // first run
        };
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            path,
            entries: std::sync::Mutex::new(entries),
            tx,
        }
    }

    fn persist(&self, entries: &HashMap<String, bool>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let doc = StateFile {
            entries: entries.clone(),
            updated_at: Some(chrono::Utc::now()),
        };
        let json = serde_json::to_string_pretty(&doc)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn get_bool(&self, key: &str, default: bool) -> Result<bool, StoreError> {
        Ok(self.entries.lock().unwrap().get(key).copied().unwrap_or(default))
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        let old = {
            let mut entries = self.entries.lock().unwrap();
            let old = entries.get(key).copied();
            if old == Some(value) {
                return Ok(()); // no transition, no write, no event
            }
            entries.insert(key.to_string(), value);
            if let Err(e) = self.persist(&entries) {
                // A set that errors must never be readable afterwards.
                match old {
                    Some(v) => entries.insert(key.to_string(), v),
                    None => entries.remove(key),
                };
                return Err(e);
            }
            old
        };
        let _ = self.tx.send(StateChange {
            key: key.to_string(),
            old_value: old,
            new_value: value,
        });
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<StateChange> {
        self.tx.subscribe()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
