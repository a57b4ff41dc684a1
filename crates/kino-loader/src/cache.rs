//! Process-wide asset cache
//!
//! Maps an asset URL to the bytes fetched for it so far, plus the content
//! metadata declared by the server. Entries outlive playback sessions: an asset
//! prefetched before playback is served from memory once the player asks for it.
//!
//! Each entry sits behind its own lock and is shared with the fetch session
//! writing into it, so the session appends into the cached buffer directly.

use crate::{config::LoaderConfig, types::ContentInfo};
use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Cache entry shared between the cache and an active fetch session
pub type SharedEntry = Arc<RwLock<AssetCacheEntry>>;

/// Bytes and metadata accumulated for one asset URL
#[derive(Debug, Default)]
pub struct AssetCacheEntry {
    /// Append-only buffer of fetched bytes
    data: BytesMut,
    /// Asset offset of the first buffered byte (non-zero only for range-start fetches)
    base_offset: u64,
    /// Declared MIME type
    content_type: Option<String>,
    /// Declared total length
    content_length: Option<u64>,
    /// Fetch reached end-of-stream
    finished: bool,
    /// A fetch session is writing into this entry
    active: bool,
}

impl AssetCacheEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffered bytes, starting at [`base_offset`](Self::base_offset)
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Asset offset one past the last buffered byte
    pub fn buffered_end(&self) -> u64 {
        self.base_offset + self.data.len() as u64
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Finished and holding the asset from its first byte
    pub fn is_complete(&self) -> bool {
        self.finished && self.base_offset == 0
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// True if asset bytes `[start, end)` are buffered
    pub fn covers(&self, start: u64, end: u64) -> bool {
        start >= self.base_offset && end <= self.buffered_end() && start <= end
    }

    pub fn content_info(&self) -> ContentInfo {
        ContentInfo {
            content_type: self.content_type.clone(),
            content_length: self.content_length,
        }
    }

    /// Copy of asset bytes `[start, end)`, clamped to what is buffered
    pub fn slice(&self, start: u64, end: u64) -> Bytes {
        let from = start.saturating_sub(self.base_offset).min(self.data.len() as u64) as usize;
        let to = end.saturating_sub(self.base_offset).min(self.data.len() as u64) as usize;
        if from >= to {
            return Bytes::new();
        }
        Bytes::copy_from_slice(&self.data[from..to])
    }

    /// Drop buffered bytes and metadata ahead of a new fetch
    pub(crate) fn reset(&mut self, base_offset: u64) {
        self.data.clear();
        self.base_offset = base_offset;
        self.content_type = None;
        self.content_length = None;
        self.finished = false;
    }

    pub(crate) fn set_response(&mut self, content_type: Option<String>, content_length: Option<u64>) {
        if content_type.is_some() {
            self.content_type = content_type;
        }
        self.content_length = content_length;
    }

    /// Append a chunk. Fails with the would-be total if the declared length
    /// would be exceeded; nothing is appended in that case.
    pub(crate) fn append(&mut self, chunk: &[u8]) -> std::result::Result<(), u64> {
        let received = self.buffered_end() + chunk.len() as u64;
        if let Some(declared) = self.content_length {
            if received > declared {
                return Err(received);
            }
        }
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    /// Mark end-of-stream. An unknown length becomes the buffered length.
    pub(crate) fn finish(&mut self) {
        self.finished = true;
        if self.content_length.is_none() {
            self.content_length = Some(self.buffered_end());
        }
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub bytes_used: u64,
    /// Byte budget (0 = unbounded)
    pub max_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Slot {
    entry: SharedEntry,
    last_access: u64,
}

#[derive(Default)]
struct CacheInner {
    slots: HashMap<String, Slot>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    fn touch(&mut self, url: &str) -> Option<SharedEntry> {
        self.tick += 1;
        let tick = self.tick;
        self.slots.get_mut(url).map(|slot| {
            slot.last_access = tick;
            slot.entry.clone()
        })
    }

    fn touch_or_insert(&mut self, url: &str) -> SharedEntry {
        if let Some(entry) = self.touch(url) {
            return entry;
        }
        let entry: SharedEntry = Arc::new(RwLock::new(AssetCacheEntry::new()));
        self.slots.insert(
            url.to_string(),
            Slot {
                entry: entry.clone(),
                last_access: self.tick,
            },
        );
        debug!(url = %url, "Cache entry created");
        entry
    }
}

/// Asset cache keyed by asset URL
///
/// Shared by every player instance through an `Arc`. Eviction is least recently
/// used by byte budget and never touches an entry a fetch is writing into.
pub struct AssetCache {
    /// Byte budget (0 = unbounded)
    max_bytes: u64,
    inner: Mutex<CacheInner>,
}

impl AssetCache {
    /// Create a cache with a byte budget (0 = unbounded)
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Cache without eviction
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::new(config.max_cache_bytes)
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Existing entry for `url`, or a new empty one
    pub fn entry_for(&self, url: &str) -> SharedEntry {
        self.inner.lock().touch_or_insert(url)
    }

    /// Entry for `url` reset to `base_offset` and marked active for a new fetch.
    ///
    /// The entry is marked while the cache lock is held, so a concurrent
    /// `evict_to_budget` never sees it inactive.
    pub(crate) fn acquire(&self, url: &str, base_offset: u64) -> SharedEntry {
        let mut inner = self.inner.lock();
        let entry = inner.touch_or_insert(url);
        {
            let mut e = entry.write();
            e.reset(base_offset);
            e.set_active(true);
        }
        entry
    }

    /// Entry for `url` if present; counts as an access
    pub fn get(&self, url: &str) -> Option<SharedEntry> {
        self.inner.lock().touch(url)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.inner.lock().slots.contains_key(url)
    }

    /// True if the whole asset for `url` is buffered
    pub fn is_complete(&self, url: &str) -> bool {
        let entry = self.inner.lock().slots.get(url).map(|s| s.entry.clone());
        entry.map(|e| e.read().is_complete()).unwrap_or(false)
    }

    /// Remove an entry regardless of its state
    pub fn remove(&self, url: &str) -> Option<SharedEntry> {
        let removed = self.inner.lock().slots.remove(url).map(|slot| slot.entry);
        if removed.is_some() {
            debug!(url = %url, "Cache entry removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total buffered bytes across entries
    pub fn bytes_used(&self) -> u64 {
        let inner = self.inner.lock();
        inner
            .slots
            .values()
            .map(|slot| slot.entry.read().len() as u64)
            .sum()
    }

    pub(crate) fn record_lookups(&self, hits: u64, misses: u64) {
        if hits == 0 && misses == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.hits += hits;
        inner.misses += misses;
    }

    /// Evict least recently used inactive entries until the budget holds.
    /// Returns the evicted URLs with the bytes each one held.
    pub fn evict_to_budget(&self) -> Vec<(String, u64)> {
        if self.max_bytes == 0 {
            return Vec::new();
        }

        let mut inner = self.inner.lock();
        let mut candidates = Vec::with_capacity(inner.slots.len());
        let mut used = 0u64;
        for (url, slot) in inner.slots.iter() {
            let entry = slot.entry.read();
            let size = entry.len() as u64;
            used += size;
            if !entry.is_active() {
                candidates.push((slot.last_access, url.clone(), size));
            }
        }
        if used <= self.max_bytes {
            return Vec::new();
        }

        candidates.sort_by_key(|(last_access, _, _)| *last_access);

        let mut evicted = Vec::new();
        for (_, url, size) in candidates {
            if used <= self.max_bytes {
                break;
            }
            inner.slots.remove(&url);
            inner.evictions += 1;
            used -= size;
            debug!(url = %url, bytes = size, "Evicted cache entry");
            evicted.push((url, size));
        }
        evicted
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entry_count: inner.slots.len(),
            bytes_used: inner
                .slots
                .values()
                .map(|slot| slot.entry.read().len() as u64)
                .sum(),
            max_bytes: self.max_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}

impl Default for AssetCache {
    fn default() -> Self {
        Self::from_config(&LoaderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(cache: &AssetCache, url: &str, size: usize) -> SharedEntry {
        let entry = cache.entry_for(url);
        {
            let mut e = entry.write();
            e.append(&vec![7u8; size]).unwrap();
            e.finish();
        }
        entry
    }

    #[test]
    fn test_entry_for_is_idempotent() {
        let cache = AssetCache::unbounded();
        let a = cache.entry_for("kino://a");
        let b = cache.entry_for("kino://a");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_append_concatenates_in_order() {
        let mut entry = AssetCacheEntry::new();
        entry.append(b"abc").unwrap();
        entry.append(b"").unwrap();
        entry.append(b"defg").unwrap();
        assert_eq!(entry.data(), b"abcdefg");
        assert_eq!(entry.slice(2, 5), Bytes::from_static(b"cde"));
    }

    #[test]
    fn test_append_rejects_overflow_of_declared_length() {
        let mut entry = AssetCacheEntry::new();
        entry.set_response(Some("video/mp4".into()), Some(4));
        entry.append(b"abc").unwrap();
        assert_eq!(entry.append(b"de"), Err(5));
        assert_eq!(entry.data(), b"abc");
    }

    #[test]
    fn test_finish_fills_unknown_length() {
        let mut entry = AssetCacheEntry::new();
        entry.append(b"hello").unwrap();
        entry.finish();
        assert_eq!(entry.content_length(), Some(5));
        assert!(entry.is_complete());
    }

    #[test]
    fn test_range_start_entry_covers_from_base() {
        let mut entry = AssetCacheEntry::new();
        entry.reset(100);
        entry.append(&[1u8; 50]).unwrap();
        assert!(entry.covers(100, 150));
        assert!(!entry.covers(99, 120));
        assert_eq!(entry.slice(140, 150).len(), 10);
        entry.finish();
        assert!(!entry.is_complete());
    }

    #[test]
    fn test_acquired_entry_survives_eviction() {
        let cache = AssetCache::new(10);
        filled(&cache, "kino://done", 100);
        // A finished entry reused by a new fetch is active from the moment it is handed out
        filled(&cache, "kino://refetch", 100);
        let live = cache.acquire("kino://refetch", 0);
        live.write().append(&[1u8; 40]).unwrap();
        let fresh = cache.acquire("kino://fresh", 0);
        assert!(fresh.read().is_active());

        let evicted = cache.evict_to_budget();
        assert_eq!(evicted, vec![("kino://done".to_string(), 100)]);
        assert!(cache.contains("kino://refetch"));
        assert!(cache.contains("kino://fresh"));
        assert!(Arc::ptr_eq(&cache.get("kino://refetch").unwrap(), &live));
        assert_eq!(live.read().len(), 40);
    }

    #[test]
    fn test_lru_eviction_by_bytes() {
        let cache = AssetCache::new(250);
        filled(&cache, "kino://a", 100);
        filled(&cache, "kino://b", 100);
        // Touch a so b becomes least recently used
        cache.get("kino://a");
        filled(&cache, "kino://c", 100);

        let evicted = cache.evict_to_budget();
        assert_eq!(evicted, vec![("kino://b".to_string(), 100)]);
        assert!(cache.contains("kino://a"));
        assert!(cache.contains("kino://c"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_eviction_skips_active_entries() {
        let cache = AssetCache::new(50);
        let active = filled(&cache, "kino://busy", 100);
        active.write().set_active(true);

        assert!(cache.evict_to_budget().is_empty());
        assert!(cache.contains("kino://busy"));

        active.write().set_active(false);
        assert_eq!(cache.evict_to_budget().len(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unbounded_never_evicts() {
        let cache = AssetCache::unbounded();
        filled(&cache, "kino://a", 10_000);
        assert!(cache.evict_to_budget().is_empty());
        assert_eq!(cache.bytes_used(), 10_000);
    }
}
