// In-memory player cache shared between the dispatcher loop and population
// workers.
//
// Every operation takes the single mutex for exactly one read or write of the
// map. Nothing else (I/O, logging of payloads, callbacks) happens under it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::player::PlayerRecord;
use crate::protocol::PlayerId;

/// Result of [`PlayerCache::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// The identity was not cached yet.
    Inserted,
    /// An older-or-equal record was replaced.
    Replaced,
    /// The cached record is newer; nothing changed.
    Stale,
}

/// Result of [`PlayerCache::insert_for_epoch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion {
    Inserted,
    /// Someone else cached the identity first; their entry is returned.
    Present(PlayerRecord),
    /// The cache was cleared after the caller read the epoch.
    Superseded,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<PlayerId, PlayerRecord>,
    /// Bumped by every `clear`.
    epoch: u64,
    /// Bumped by every successful mutation.
    revision: u64,
}

/// Deduplicated player records keyed by identity.
#[derive(Debug, Default)]
pub struct PlayerCache {
    inner: Mutex<Inner>,
}

impl PlayerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A panic while holding the lock cannot leave the map half-written (all
    /// mutations are single `HashMap` calls), so a poisoned lock is reused.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `record` unless the cached copy for the same identity has a
    /// newer `observed_at`. Equal timestamps replace.
    pub fn upsert(&self, record: PlayerRecord) -> Upsert {
        let mut inner = self.lock();
        let outcome = match inner.records.get(&record.id) {
            Some(existing) if record.observed_at < existing.observed_at => return Upsert::Stale,
            Some(_) => Upsert::Replaced,
            None => Upsert::Inserted,
        };
        inner.records.insert(record.id, record);
        inner.revision += 1;
        outcome
    }

    pub fn get(&self, id: PlayerId) -> Option<PlayerRecord> {
        self.lock().records.get(&id).cloned()
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.lock().records.contains_key(&id)
    }

    /// Drop every record and start a new epoch.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.records.clear();
        inner.epoch += 1;
        inner.revision += 1;
    }

    /// Insert `record` only if its identity is not cached. Returns `true` if
    /// inserted.
    pub fn insert_if_absent(&self, record: PlayerRecord) -> bool {
        let mut inner = self.lock();
        if inner.records.contains_key(&record.id) {
            return false;
        }
        inner.records.insert(record.id, record);
        inner.revision += 1;
        true
    }

    /// Check-and-insert in one critical section, refusing the write when the
    /// cache has been cleared since `epoch` was read.
    pub fn insert_for_epoch(&self, epoch: u64, record: PlayerRecord) -> Insertion {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return Insertion::Superseded;
        }
        if let Some(existing) = inner.records.get(&record.id) {
            return Insertion::Present(existing.clone());
        }
        inner.records.insert(record.id, record);
        inner.revision += 1;
        Insertion::Inserted
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Number of mutations applied so far. Unchanged revision means the cache
    /// was not touched.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    fn record(id: PlayerId, name: &str, observed_at: i64) -> PlayerRecord {
        PlayerRecord {
            name: name.into(),
            observed_at,
            ..PlayerRecord::placeholder(id)
        }
    }

    #[test]
    fn upsert_keeps_newer_record() {
        let cache = PlayerCache::new();
        assert_eq!(cache.upsert(record(1, "new", 10)), Upsert::Inserted);
        assert_eq!(cache.upsert(record(1, "old", 5)), Upsert::Stale);
        assert_eq!(cache.get(1).unwrap().name, "new");

        assert_eq!(cache.upsert(record(1, "newer", 11)), Upsert::Replaced);
        assert_eq!(cache.get(1).unwrap().name, "newer");
    }

    #[test]
    fn upsert_tie_keeps_later_call() {
        let cache = PlayerCache::new();
        cache.upsert(record(1, "first", 7));
        assert_eq!(cache.upsert(record(1, "second", 7)), Upsert::Replaced);
        assert_eq!(cache.get(1).unwrap().name, "second");
    }

    #[test]
    fn upsert_new_identity_ignores_timestamp() {
        let cache = PlayerCache::new();
        cache.upsert(record(1, "a", 100));
        assert_eq!(cache.upsert(record(2, "b", -5)), Upsert::Inserted);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn stale_upsert_does_not_bump_revision() {
        let cache = PlayerCache::new();
        cache.upsert(record(1, "a", 10));
        let rev = cache.revision();
        cache.upsert(record(1, "b", 1));
        assert_eq!(cache.revision(), rev);
    }

    #[test]
    fn get_missing_returns_none() {
        let cache = PlayerCache::new();
        assert!(cache.get(42).is_none());
        assert!(!cache.contains(42));
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_if_absent_only_inserts_once() {
        let cache = PlayerCache::new();
        assert!(cache.insert_if_absent(record(3, "first", 1)));
        assert!(!cache.insert_if_absent(record(3, "second", 99)));
        assert_eq!(cache.get(3).unwrap().name, "first");
    }

    #[test]
    fn insert_for_epoch_reports_existing_entry() {
        let cache = PlayerCache::new();
        let epoch = cache.epoch();
        cache.insert_for_epoch(epoch, record(3, "first", 1));
        match cache.insert_for_epoch(epoch, record(3, "second", 1)) {
            Insertion::Present(existing) => assert_eq!(existing.name, "first"),
            other => panic!("expected Present, got {other:?}"),
        }
    }

    #[test]
    fn clear_empties_and_supersedes_old_epoch() {
        let cache = PlayerCache::new();
        let epoch = cache.epoch();
        cache.upsert(record(1, "a", 1));
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.epoch(), epoch + 1);
        assert_eq!(
            cache.insert_for_epoch(epoch, record(2, "late", 1)),
            Insertion::Superseded
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_insert_if_absent_yields_single_entry() {
        const THREADS: usize = 16;
        let cache = Arc::new(PlayerCache::new());
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.insert_if_absent(record(77, &format!("t{i}"), i as i64))
                })
            })
            .collect();

        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|inserted| *inserted)
            .count();

        assert_eq!(inserted, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_upserts_converge_on_newest() {
        let cache = Arc::new(PlayerCache::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for ts in 0..50 {
                        cache.upsert(record(1, &format!("{t}-{ts}"), ts * 8 + t));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.get(1).unwrap().observed_at, 49 * 8 + 7);
    }
}
