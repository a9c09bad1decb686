//! Shared persistent state: the canonical home of the `enabled` flag.
//!
//! Every context (coordinator, page agents, control surface) reads and writes
//! the flag through the [`StateStore`] trait so tests can swap the disk-backed
//! store for [`MemoryStore`]. Two contract points matter to everything built on
//! top:
//!
//! * **Equal-value writes are no-ops.** `set_bool` with the already-stored
//!   value performs no write and emits no change event. Agents persist inside
//!   their `setEnabled` handler; without this rule every coordinator fan-out
//!   would re-trigger the change subscription and loop forever.
//! * **Change events are ordered per key** (single broadcast channel). A
//!   subscriber that lags gets `RecvError::Lagged` and must recover by
//!   re-reading the canonical value, not by replaying events.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::core::types::StateChange;

pub mod file;

pub use file::JsonFileStore;

/// Store key of the user-facing toggle.
pub const ENABLED_KEY: &str = "enabled";
/// Dismissal is on until the user says otherwise.
pub const DEFAULT_ENABLED: bool = true;

const CHANGE_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state store unavailable: {0}")]
    Unavailable(String),
    #[error("state file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file encoding error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a flag, falling back to `default` when the key was never written.
    async fn get_bool(&self, key: &str, default: bool) -> Result<bool, StoreError>;

    /// Write a flag. Writing the currently-stored value is a no-op that emits
    /// no change event.
    async fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError>;

    /// Subscribe to committed changes. Only actual value transitions are
    /// delivered (see the no-op rule above).
    fn changes(&self) -> broadcast::Receiver<StateChange>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────────────────

/// Same contract as [`JsonFileStore`], no disk. Used by the integration tests
/// and as the degraded fallback when no writable state path exists.
pub struct MemoryStore {
    entries: std::sync::Mutex<HashMap<String, bool>>,
    tx: broadcast::Sender<StateChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: std::sync::Mutex::new(HashMap::new()),
            tx,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get_bool(&self, key: &str, default: bool) -> Result<bool, StoreError> {
        Ok(self.entries.lock().unwrap().get(key).copied().unwrap_or(default))
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        let old = {
            let mut entries = self.entries.lock().unwrap();
            let old = entries.get(key).copied();
            if old == Some(value) {
                return Ok(()); // no transition, no event
            }
            entries.insert(key.to_string(), value);
            old
        };
        // Send fails only when nobody subscribes yet, which is fine.
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

#[cfg(test)]
mod tests {
    use super::*;

    /// Unwritten key reads as the caller's default, whatever it is.
    #[tokio::test]
    async fn test_get_unwritten_key_uses_default() {
        let store = MemoryStore::new();
        assert!(store.get_bool(ENABLED_KEY, true).await.unwrap());
        assert!(!store.get_bool(ENABLED_KEY, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_then_get_reads_own_write() {
        let store = MemoryStore::new();
        store.set_bool(ENABLED_KEY, false).await.unwrap();
        assert!(!store.get_bool(ENABLED_KEY, true).await.unwrap());
    }

    /// First-ever write carries no old value; later transitions carry both.
    #[tokio::test]
    async fn test_change_events_carry_transition() {
        let store = MemoryStore::new();
        let mut rx = store.changes();

        store.set_bool(ENABLED_KEY, false).await.unwrap();
        store.set_bool(ENABLED_KEY, true).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.key, ENABLED_KEY);
        assert_eq!(first.old_value, None);
        assert!(!first.new_value);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.old_value, Some(false));
        assert!(second.new_value);
    }

    /// Re-writing the stored value must emit nothing; this is what keeps the
    /// agent-persist → change-event → fan-out → agent-persist cycle from
    /// spinning.
    #[tokio::test]
    async fn test_equal_value_write_is_silent() {
        let store = MemoryStore::new();
        store.set_bool(ENABLED_KEY, false).await.unwrap();

        let mut rx = store.changes();
        store.set_bool(ENABLED_KEY, false).await.unwrap();
        store.set_bool(ENABLED_KEY, false).await.unwrap();
        store.set_bool(ENABLED_KEY, true).await.unwrap();

        // The only event the subscriber sees is the real transition.
        let change = rx.recv().await.unwrap();
        assert_eq!(change.old_value, Some(false));
        assert!(change.new_value);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
