//! Persistence seam for durable verification state.
//!
//! The core persists three small pieces of state (the disabled flag, the
//! self-check health reading, and the scheduler's next-run watermark) via
//! a pluggable [`KeyValueStore`]. [`StateStore`] layers the well-known keys
//! and serde round-tripping on top of the raw trait. An [`InMemoryStore`]
//! implementation ships in-tree for tests and embedders without a durable
//! backend.

use std::{collections::HashMap, sync::Arc, sync::Mutex};

use async_trait::async_trait;
use thiserror::Error;

use crate::health::HealthState;

/// Persisted flag set by `disable()`.
pub const KEY_DISABLED: &str = "keywatch.disabled";
/// Persisted [`HealthState`] of the local account binding.
pub const KEY_SELF_HEALTH: &str = "keywatch.self_health";
/// Persisted next-run watermark of the periodic self-check.
pub const KEY_NEXT_SELF_CHECK: &str = "keywatch.next_self_check_run_at";

/// Errors from the persistence layer.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The underlying store failed.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A persisted value could not be decoded.
    #[error("Corrupt persisted value under '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Minimal key-value persistence contract.
///
/// Values are opaque strings; callers own their encoding. Implementations
/// must make writes durable before returning for the restart guarantees in
/// the scheduler to hold.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value.
    async fn put(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Remove a value. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Typed access to the well-known verification state keys.
#[derive(Clone)]
pub struct StateStore {
    store: Arc<dyn KeyValueStore>,
}

impl StateStore {
    /// Wrap a raw key-value store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The raw store, for collaborators that manage their own keys.
    pub fn raw(&self) -> Arc<dyn KeyValueStore> {
        self.store.clone()
    }

    /// Whether the persisted disabled flag is set.
    pub async fn is_disabled(&self) -> Result<bool, StoreError> {
        Ok(self.store.get(KEY_DISABLED).await?.is_some())
    }

    /// Set the persisted disabled flag.
    pub async fn set_disabled(&self) -> Result<(), StoreError> {
        self.store.put(KEY_DISABLED, "true".to_string()).await
    }

    /// The persisted health reading; absent reads as [`HealthState::Unknown`].
    pub async fn health(&self) -> Result<HealthState, StoreError> {
        match self.store.get(KEY_SELF_HEALTH).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                key: KEY_SELF_HEALTH.to_string(),
                reason: e.to_string(),
            }),
            None => Ok(HealthState::Unknown),
        }
    }

    /// Persist a health reading.
    pub async fn set_health(&self, health: HealthState) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&health).map_err(|e| StoreError::Corrupt {
            key: KEY_SELF_HEALTH.to_string(),
            reason: e.to_string(),
        })?;
        self.store.put(KEY_SELF_HEALTH, raw).await
    }

    /// Remove the persisted health reading.
    pub async fn clear_health(&self) -> Result<(), StoreError> {
        self.store.remove(KEY_SELF_HEALTH).await
    }

    /// Remove the persisted scheduler watermark.
    pub async fn clear_schedule(&self) -> Result<(), StoreError> {
        self.store.remove(KEY_NEXT_SELF_CHECK).await
    }
}

/// Read a persisted epoch-milliseconds watermark.
pub(crate) async fn read_watermark(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<u64>, StoreError> {
    match store.get(key).await? {
        Some(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Persist an epoch-milliseconds watermark.
pub(crate) async fn write_watermark(
    store: &dyn KeyValueStore,
    key: &str,
    millis: u64,
) -> Result<(), StoreError> {
    store.put(key, millis.to_string()).await
}

/// In-memory [`KeyValueStore`].
///
/// Not durable; suitable for tests and ephemeral embedders.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.values.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}
