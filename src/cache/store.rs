//! Cache store abstraction and the in-process implementation.
//!
//! The response cache talks to its backing store through [`CacheStore`], a
//! narrow async key/value contract. Two logical namespaces share one store:
//! response bodies under `res:…` keys and `Last-Modified` timestamps under
//! `date:res:…` keys (see [`encode_timestamp`]).

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Errors surfaced by a [`CacheStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cache read cancelled")]
    Cancelled,

    #[error("corrupt cache entry `{key}`")]
    Corrupt { key: String },
}

impl StoreError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Key/value backend for cached responses.
///
/// No atomicity is assumed across keys. Reads observe `cancel` and return
/// [`StoreError::Cancelled`] once it fires.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str, cancel: &CancellationToken)
    -> Result<Option<Bytes>, StoreError>;

    /// Stores `value` under `key`. `ttl = None` keeps it until overwritten.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Entry limit of [`MemoryCacheStore::new`].
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// In-process store on a sharded concurrent map.
///
/// Expired entries are dropped when read. Once `max_entries` is reached a
/// write of a new key first sweeps every expired entry, then, if the map
/// is still full, drops a tenth of it.
#[derive(Debug)]
pub struct MemoryCacheStore {
    entries: DashMap<String, Entry>,
    max_entries: usize,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES)
    }
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Number of entries held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn lookup(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let hit = self.entries.get(key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        })?;

        if hit.is_none() {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
            trace!(key, "evicted expired cache entry");
        }
        hit
    }

    /// Drops every expired entry; returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn make_room(&self) {
        let swept = self.sweep_expired();
        if self.entries.len() < self.max_entries {
            trace!(swept, "swept expired cache entries");
            return;
        }

        let victims: Vec<String> = self
            .entries
            .iter()
            .take((self.max_entries / 10).max(1))
            .map(|entry| entry.key().clone())
            .collect();
        for key in &victims {
            self.entries.remove(key);
        }
        debug!(
            swept,
            evicted = victims.len(),
            len = self.entries.len(),
            "memory cache full, evicted entries"
        );
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        Ok(self.lookup(key))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), StoreError> {
        // A TTL too far out to represent never expires.
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(key) {
            self.make_room();
        }
        self.entries
            .insert(key.to_owned(), Entry { value, expires_at });
        Ok(())
    }
}

/// Encodes a timestamp as 8 big-endian bytes of milliseconds since the Unix epoch.
pub fn encode_timestamp(time: SystemTime) -> Bytes {
    let millis = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Bytes::copy_from_slice(&millis.to_be_bytes())
}

/// Last millisecond an HTTP date can express (9999-12-31T23:59:59.999Z).
const MAX_TIMESTAMP_MILLIS: u64 = 253_402_300_799_999;

/// Inverse of [`encode_timestamp`]. Anything but exactly 8 bytes, or a
/// time past year 9999, is `Corrupt`.
pub fn decode_timestamp(key: &str, raw: &[u8]) -> Result<SystemTime, StoreError> {
    let corrupt = || StoreError::Corrupt {
        key: key.to_owned(),
    };
    let bytes: [u8; 8] = raw.try_into().map_err(|_| corrupt())?;
    let millis = u64::from_be_bytes(bytes);
    if millis > MAX_TIMESTAMP_MILLIS {
        return Err(corrupt());
    }
    Ok(UNIX_EPOCH + Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get() {
        let store = MemoryCacheStore::new();
        let cancel = CancellationToken::new();
        assert_eq!(store.get("k", &cancel).await.unwrap(), None);

        store.set("k", Bytes::from_static(b"v1"), None).await.unwrap();
        store.set("k", Bytes::from_static(b"v2"), None).await.unwrap();
        assert_eq!(
            store.get("k", &cancel).await.unwrap(),
            Some(Bytes::from_static(b"v2"))
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_evicted_on_read() {
        let store = MemoryCacheStore::new();
        let cancel = CancellationToken::new();
        store
            .set("k", Bytes::from_static(b"v"), Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(store.get("k", &cancel).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn full_store_sweeps_expired_entries_first() {
        let store = MemoryCacheStore::with_max_entries(100);
        for i in 0..100 {
            store
                .set(&format!("k{i}"), Bytes::from_static(b"v"), Some(Duration::from_millis(1)))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        store.set("fresh", Bytes::from_static(b"v"), None).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn full_store_evicts_live_entries() {
        let store = MemoryCacheStore::with_max_entries(20);
        let cancel = CancellationToken::new();
        for i in 0..50 {
            store
                .set(&format!("k{i}"), Bytes::from_static(b"v"), None)
                .await
                .unwrap();
            assert!(store.len() <= 20);
        }
        assert!(store.get("k49", &cancel).await.unwrap().is_some());

        // overwriting a key never evicts
        let before = store.len();
        store.set("k49", Bytes::from_static(b"w"), None).await.unwrap();
        assert_eq!(store.len(), before);
    }

    #[tokio::test]
    async fn cancelled_read_errors() {
        let store = MemoryCacheStore::new();
        store.set("k", Bytes::from_static(b"v"), None).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            store.get("k", &cancel).await,
            Err(StoreError::Cancelled)
        ));
    }

    #[test]
    fn timestamp_round_trip_and_corruption() {
        let at = UNIX_EPOCH + Duration::from_millis(784_111_777_123);
        let raw = encode_timestamp(at);
        assert_eq!(raw.len(), 8);
        assert_eq!(decode_timestamp("date:k", &raw).unwrap(), at);
        assert!(matches!(
            decode_timestamp("date:k", b"short"),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn timestamps_past_year_9999_are_corrupt() {
        let last = MAX_TIMESTAMP_MILLIS.to_be_bytes();
        assert!(decode_timestamp("date:k", &last).is_ok());
        let past = (MAX_TIMESTAMP_MILLIS + 1).to_be_bytes();
        assert!(matches!(
            decode_timestamp("date:k", &past),
            Err(StoreError::Corrupt { .. })
        ));
        assert!(matches!(
            decode_timestamp("date:k", &[0xff; 8]),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn unrepresentable_ttl_never_expires() {
        let store = MemoryCacheStore::new();
        let cancel = CancellationToken::new();
        store
            .set("k", Bytes::from_static(b"v"), Some(Duration::from_secs(u64::MAX)))
            .await
            .unwrap();
        assert_eq!(
            store.get("k", &cancel).await.unwrap(),
            Some(Bytes::from_static(b"v"))
        );
    }
}
