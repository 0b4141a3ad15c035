//! Process-local caches owned by the engine.
//!
//! Neither cache is transactional with the store. Correctness comes from
//! the write paths invalidating entries, never from read-your-writes.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use mini_moka::sync::{Cache, ConcurrentCacheExt};

use crate::bm25::Bm25Index;
use crate::models::DocumentMetadata;

/// Default lifetime of a metadata entry.
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(300);

/// Concurrent map with a fixed time-to-live per entry.
///
/// Expiry is enforced by the underlying `mini_moka` cache. Each value also
/// carries its insertion instant so [`TtlCache::get_at`] can answer for an
/// arbitrary point in time.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Cache<K, (V, Instant)>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Cache::builder().time_to_live(ttl).build(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Look up `key` as of `now`.
    pub fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let (value, stored_at) = self.entries.get(key)?;
        (now.saturating_duration_since(stored_at) < self.ttl).then_some(value)
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn insert_at(&self, key: K, value: V, now: Instant) {
        self.entries.insert(key, (value, now));
    }

    pub fn remove(&self, key: &K) {
        self.entries.invalidate(key);
    }

    pub fn len(&self) -> usize {
        self.entries.sync();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Document metadata keyed by document id.
pub type MetadataCache = TtlCache<String, DocumentMetadata>;

#[derive(Debug, Default)]
struct Slot {
    index: Option<Arc<Bm25Index>>,
    /// Ticket of the installed index or of the last invalidation.
    ticket: u64,
}

/// Per-owner BM25 indexes.
///
/// Writers swap in a complete new index, so readers holding an `Arc` from
/// before the swap keep a consistent snapshot.
///
/// A rebuild takes a ticket with [`LexicalIndexCache::begin_rebuild`] before
/// it reads the store. [`LexicalIndexCache::install`] only accepts an index
/// whose ticket is newer than both the installed index and the last
/// invalidation, so a slow rebuild can never put an older snapshot back.
#[derive(Debug, Default)]
pub struct LexicalIndexCache {
    slots: RwLock<HashMap<String, Slot>>,
    tickets: AtomicU64,
}

impl LexicalIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self, owner_id: &str) -> Option<Arc<Bm25Index>> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        slots.get(owner_id).and_then(|slot| slot.index.clone())
    }

    /// Ticket for a rebuild that is about to read the store.
    pub fn begin_rebuild(&self) -> u64 {
        self.next_ticket()
    }

    /// Install `index` unless something newer already happened for the
    /// owner. Returns whether it was installed.
    pub fn install(&self, owner_id: &str, ticket: u64, index: Arc<Bm25Index>) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let slot = slots.entry(owner_id.to_string()).or_default();
        if ticket <= slot.ticket {
            return false;
        }
        slot.index = Some(index);
        slot.ticket = ticket;
        true
    }

    /// Install unconditionally.
    pub fn replace(&self, owner_id: &str, index: Arc<Bm25Index>) {
        let ticket = self.next_ticket();
        self.install(owner_id, ticket, index);
    }

    /// Drop the owner's index; the next query rebuilds from the store.
    /// Rebuilds that started before this call can no longer install.
    pub fn invalidate(&self, owner_id: &str) -> bool {
        let ticket = self.next_ticket();
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let slot = slots.entry(owner_id.to_string()).or_default();
        slot.ticket = ticket;
        slot.index.take().is_some()
    }

    pub fn contains(&self, owner_id: &str) -> bool {
        self.get(owner_id).is_some()
    }
}
