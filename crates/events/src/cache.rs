//! Authoritative local copy of one entity type.
//!
//! An [`EntityCache`] is an ordered list of rows keyed by id. It is only
//! mutated through the reconciliation loop and through the owning
//! session's own successful writes.

use std::sync::{PoisonError, RwLock};

use roster_core::types::{DbId, Timestamp};
use roster_db::models::battle_entry::Participant;
use roster_db::models::battle_event::BattleEvent;
use roster_db::models::member::Member;

/// A row with a stable identity.
pub trait Keyed {
    fn key(&self) -> DbId;
}

impl Keyed for Member {
    fn key(&self) -> DbId {
        self.id
    }
}

impl Keyed for BattleEvent {
    fn key(&self) -> DbId {
        self.id
    }
}

impl Keyed for Participant {
    fn key(&self) -> DbId {
        self.entry_id
    }
}

/// Ordered, id-keyed rows behind a read/write lock.
pub struct EntityCache<T> {
    rows: RwLock<Vec<T>>,
}

impl<T: Keyed + Clone> EntityCache<T> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
        }
    }

    /// Drop everything and take `rows` as the new contents.
    pub fn replace_all(&self, rows: Vec<T>) {
        *self.rows.write().unwrap_or_else(PoisonError::into_inner) = rows;
    }

    /// Replace the row with the same key in place. Returns `false` if the
    /// key is not cached.
    pub fn merge(&self, row: T) -> bool {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        match rows.iter_mut().find(|r| r.key() == row.key()) {
            Some(slot) => {
                *slot = row;
                true
            }
            None => false,
        }
    }

    /// Put `row` first, or merge it if its key is already cached.
    pub fn prepend(&self, row: T) {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        match rows.iter_mut().find(|r| r.key() == row.key()) {
            Some(slot) => *slot = row,
            None => rows.insert(0, row),
        }
    }

    pub fn remove(&self, key: DbId) -> Option<T> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        let pos = rows.iter().position(|r| r.key() == key)?;
        Some(rows.remove(pos))
    }

    pub fn get(&self, key: DbId) -> Option<T> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.key() == key)
            .cloned()
    }

    pub fn contains(&self, key: DbId) -> bool {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|r| r.key() == key)
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn keys(&self) -> Vec<DbId> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Keyed::key)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EntityCache<Member> {
    /// Lease expiries of every cached member, for badge refresh timing.
    pub fn lease_expiries(&self) -> Vec<Option<Timestamp>> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|m| m.lock_expires_at)
            .collect()
    }
}

impl<T: Keyed + Clone> Default for EntityCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row(DbId, &'static str);

    impl Keyed for Row {
        fn key(&self) -> DbId {
            self.0
        }
    }

    #[test]
    fn merge_replaces_in_place_only_when_cached() {
        let cache = EntityCache::new();
        cache.replace_all(vec![Row(1, "a"), Row(2, "b")]);

        assert!(cache.merge(Row(2, "B")));
        assert!(!cache.merge(Row(3, "c")));
        assert_eq!(cache.snapshot(), vec![Row(1, "a"), Row(2, "B")]);
    }

    #[test]
    fn prepend_puts_new_rows_first() {
        let cache = EntityCache::new();
        cache.replace_all(vec![Row(1, "a")]);
        cache.prepend(Row(2, "b"));
        cache.prepend(Row(1, "A"));
        assert_eq!(cache.keys(), vec![2, 1]);
        assert_eq!(cache.get(1), Some(Row(1, "A")));
    }

    #[test]
    fn remove_purges_key() {
        let cache = EntityCache::new();
        cache.replace_all(vec![Row(1, "a"), Row(2, "b")]);
        assert_eq!(cache.remove(1), Some(Row(1, "a")));
        assert_eq!(cache.remove(1), None);
        assert!(!cache.contains(1));
        assert_eq!(cache.len(), 1);
    }
}
