//! In-process [`RecordStore`] and [`ChangeFeed`].
//!
//! [`MemoryStore`] mirrors the PostgreSQL schema rule for rule: named
//! unique and foreign-key constraints, cascading deletes, the
//! `applicant_count` trigger, a fresh version token on every row write,
//! and one change event per affected row. Each operation runs under one
//! mutex, and change events are published before the mutex is released,
//! so per-table delivery order matches commit order.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use roster_core::clock::{Clock, SystemClock};
use roster_core::locking::can_acquire;
use roster_core::roster::page_range;
use roster_core::scheduling::{BattleCategory, EntryStatus, EventStatus};
use roster_core::types::{DbId, Timestamp, VersionToken};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::change::{ChangeFeed, FeedMessage, RowChange, Table};
use crate::error::{StoreError, FK_ENTRY_EVENT, FK_ENTRY_MEMBER, UQ_ENTRY_MEMBER, UQ_EVENT_SLOT};
use crate::models::battle_entry::{BattleEntry, Participant};
use crate::models::battle_event::{BattleEvent, CreateBattleEvent};
use crate::models::member::{CreateMember, Member, MemberPage, UpdateMember};
use crate::store::{RecordStore, WriteGuard};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Default)]
struct Tables {
    members: BTreeMap<DbId, Member>,
    events: BTreeMap<DbId, BattleEvent>,
    entries: BTreeMap<DbId, BattleEntry>,
    member_seq: DbId,
    event_seq: DbId,
    entry_seq: DbId,
    offline: bool,
}

impl Tables {
    fn next_id(seq: &mut DbId) -> DbId {
        *seq += 1;
        *seq
    }
}

/// Store and feed held entirely in memory.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    senders: HashMap<Table, broadcast::Sender<FeedMessage>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(clock, DEFAULT_CAPACITY)
    }

    /// Store whose per-table feed buffers `capacity` messages.
    pub fn with_capacity(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        let senders = Table::ALL
            .into_iter()
            .map(|table| (table, broadcast::channel(capacity.max(1)).0))
            .collect();
        Self {
            tables: Mutex::new(Tables::default()),
            senders,
            clock,
        }
    }

    /// While offline every operation fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.offline = offline;
        }
    }

    /// Report a [`FeedMessage::Gap`] to every listener of `table`.
    pub fn interrupt_feed(&self, table: Table) {
        if let Some(sender) = self.senders.get(&table) {
            let _ = sender.send(FeedMessage::Gap);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        let tables = self
            .tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))?;
        if tables.offline {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(tables)
    }

    fn publish(&self, change: RowChange) {
        if let Some(sender) = self.senders.get(&change.table) {
            let _ = sender.send(FeedMessage::Change(change));
        }
    }

    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Apply `delta` to an event's applicant count and publish the update.
    fn adjust_applicants(&self, tables: &mut Tables, event_id: DbId, delta: i32) {
        let now = self.now();
        if let Some(event) = tables.events.get_mut(&event_id) {
            let old = event.clone();
            event.applicant_count = (event.applicant_count + delta).max(0);
            event.updated_at = now;
            self.publish(RowChange::updated(Table::BattleEvents, &old, event));
        }
    }

    /// Remove entries matching `pred`, with the same side effects as a
    /// cascading delete in the database.
    fn cascade_entries(&self, tables: &mut Tables, pred: impl Fn(&BattleEntry) -> bool) {
        let doomed: Vec<DbId> = tables
            .entries
            .values()
            .filter(|e| pred(e))
            .map(|e| e.id)
            .collect();
        for id in doomed {
            if let Some(entry) = tables.entries.remove(&id) {
                self.publish(RowChange::deleted(Table::BattleEntries, &entry));
                self.adjust_applicants(tables, entry.event_id, -1);
            }
        }
    }

    fn insert_entry_row(
        &self,
        tables: &mut Tables,
        event_id: DbId,
        member_id: DbId,
    ) -> Result<BattleEntry, StoreError> {
        if !tables.events.contains_key(&event_id) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: FK_ENTRY_EVENT.into(),
            });
        }
        if !tables.members.contains_key(&member_id) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: FK_ENTRY_MEMBER.into(),
            });
        }
        if tables
            .entries
            .values()
            .any(|e| e.event_id == event_id && e.member_id == member_id)
        {
            return Err(StoreError::UniqueViolation {
                constraint: UQ_ENTRY_MEMBER.into(),
            });
        }

        let now = self.now();
        let entry = BattleEntry {
            id: Tables::next_id(&mut tables.entry_seq),
            event_id,
            member_id,
            status: EntryStatus::Pending,
            version: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        };
        tables.entries.insert(entry.id, entry.clone());
        self.publish(RowChange::inserted(Table::BattleEntries, &entry));
        self.adjust_applicants(tables, event_id, 1);
        Ok(entry)
    }

    /// Mutate a member in place, bump its version, and publish the update.
    fn write_member(
        &self,
        tables: &mut Tables,
        id: DbId,
        apply: impl FnOnce(&mut Member),
    ) -> Option<Member> {
        let now = self.now();
        let member = tables.members.get_mut(&id)?;
        let old = member.clone();
        apply(member);
        member.version = Uuid::new_v4();
        member.updated_at = now;
        let new = member.clone();
        self.publish(RowChange::updated(Table::Members, &old, &new));
        Some(new)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl ChangeFeed for MemoryStore {
    async fn listen(&self, table: Table) -> Result<broadcast::Receiver<FeedMessage>, StoreError> {
        self.senders
            .get(&table)
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| StoreError::Unavailable(format!("No feed for table {table}")))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    // --- members -----------------------------------------------------------

    async fn list_members(&self, page: i64) -> Result<MemberPage, StoreError> {
        let tables = self.lock()?;
        let (from, to) = page_range(page);
        let rows = tables
            .members
            .values()
            .skip(from as usize)
            .take((to - from + 1) as usize)
            .cloned()
            .collect();
        Ok(MemberPage {
            page: page.max(1),
            total: tables.members.len() as i64,
            rows,
        })
    }

    async fn list_members_by_name(&self) -> Result<Vec<Member>, StoreError> {
        let tables = self.lock()?;
        let mut rows: Vec<Member> = tables.members.values().cloned().collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn find_member(&self, id: DbId) -> Result<Option<Member>, StoreError> {
        Ok(self.lock()?.members.get(&id).cloned())
    }

    async fn insert_member(&self, input: &CreateMember) -> Result<Member, StoreError> {
        let mut tables = self.lock()?;
        let now = self.now();
        let member = Member {
            id: Tables::next_id(&mut tables.member_seq),
            name: input.name.clone(),
            first_squad_power: input.first_squad_power,
            hero_power: input.hero_power,
            version: Uuid::new_v4(),
            lock_holder: None,
            lock_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        tables.members.insert(member.id, member.clone());
        self.publish(RowChange::inserted(Table::Members, &member));
        Ok(member)
    }

    async fn update_member(
        &self,
        id: DbId,
        input: &UpdateMember,
        guard: WriteGuard,
    ) -> Result<Option<Member>, StoreError> {
        let mut tables = self.lock()?;
        let Some(current) = tables.members.get(&id) else {
            return Ok(None);
        };
        if current.version != guard.expected_version {
            return Ok(None);
        }
        if let Some(holder) = guard.holder {
            if current.lock_holder != Some(holder) {
                return Ok(None);
            }
        }
        Ok(self.write_member(&mut tables, id, |m| {
            m.name = input.name.clone();
            m.first_squad_power = input.first_squad_power;
            m.hero_power = input.hero_power;
            if guard.holder.is_some() {
                m.lock_holder = None;
                m.lock_expires_at = None;
            }
        }))
    }

    async fn set_member_power(&self, id: DbId, power: f64) -> Result<Option<Member>, StoreError> {
        let mut tables = self.lock()?;
        Ok(self.write_member(&mut tables, id, |m| m.first_squad_power = Some(power)))
    }

    async fn delete_member(
        &self,
        id: DbId,
        holder: DbId,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        let Some(member) = tables.members.get(&id) else {
            return Ok(false);
        };
        if !can_acquire(member.lock_holder, member.lock_expires_at, holder, now) {
            return Ok(false);
        }
        self.cascade_entries(&mut tables, |e| e.member_id == id);
        if let Some(member) = tables.members.remove(&id) {
            self.publish(RowChange::deleted(Table::Members, &member));
        }
        Ok(true)
    }

    async fn try_lock_member(
        &self,
        id: DbId,
        holder: DbId,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<Option<Member>, StoreError> {
        let mut tables = self.lock()?;
        let Some(member) = tables.members.get(&id) else {
            return Ok(None);
        };
        if !can_acquire(member.lock_holder, member.lock_expires_at, holder, now) {
            return Ok(None);
        }
        Ok(self.write_member(&mut tables, id, |m| {
            m.lock_holder = Some(holder);
            m.lock_expires_at = Some(until);
        }))
    }

    async fn extend_member_lock(
        &self,
        id: DbId,
        holder: DbId,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<Option<Member>, StoreError> {
        let mut tables = self.lock()?;
        let live = tables.members.get(&id).is_some_and(|m| {
            m.lock_holder == Some(holder) && m.lock_expires_at.is_some_and(|at| at > now)
        });
        if !live {
            return Ok(None);
        }
        Ok(self.write_member(&mut tables, id, |m| m.lock_expires_at = Some(until)))
    }

    async fn unlock_member(&self, id: DbId, holder: DbId) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        let owned = tables
            .members
            .get(&id)
            .is_some_and(|m| m.lock_holder == Some(holder));
        if !owned {
            return Ok(false);
        }
        Ok(self
            .write_member(&mut tables, id, |m| {
                m.lock_holder = None;
                m.lock_expires_at = None;
            })
            .is_some())
    }

    // --- events ------------------------------------------------------------

    async fn list_events(&self, category: BattleCategory) -> Result<Vec<BattleEvent>, StoreError> {
        let tables = self.lock()?;
        let mut rows: Vec<BattleEvent> = tables
            .events
            .values()
            .filter(|e| e.category == category)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.scheduled_on.cmp(&a.scheduled_on).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn find_event(&self, id: DbId) -> Result<Option<BattleEvent>, StoreError> {
        Ok(self.lock()?.events.get(&id).cloned())
    }

    async fn insert_event(&self, input: &CreateBattleEvent) -> Result<BattleEvent, StoreError> {
        let mut tables = self.lock()?;
        let taken = tables.events.values().any(|e| {
            e.category == input.category
                && e.squad == input.squad
                && e.scheduled_on == input.scheduled_on
        });
        if taken {
            return Err(StoreError::UniqueViolation {
                constraint: UQ_EVENT_SLOT.into(),
            });
        }

        let now = self.now();
        let event = BattleEvent {
            id: Tables::next_id(&mut tables.event_seq),
            category: input.category,
            squad: input.squad,
            scheduled_on: input.scheduled_on,
            status: EventStatus::Pending,
            applicant_count: 0,
            created_at: now,
            updated_at: now,
        };
        tables.events.insert(event.id, event.clone());
        self.publish(RowChange::inserted(Table::BattleEvents, &event));
        Ok(event)
    }

    async fn confirm_event(&self, id: DbId) -> Result<Option<BattleEvent>, StoreError> {
        let mut tables = self.lock()?;
        let now = self.now();
        let Some(event) = tables.events.get_mut(&id) else {
            return Ok(None);
        };
        if event.status != EventStatus::Pending {
            return Ok(None);
        }
        let old = event.clone();
        event.status = EventStatus::Confirmed;
        event.updated_at = now;
        let new = event.clone();
        self.publish(RowChange::updated(Table::BattleEvents, &old, &new));
        Ok(Some(new))
    }

    async fn delete_event(&self, id: DbId) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        if !tables.events.contains_key(&id) {
            return Ok(false);
        }
        self.cascade_entries(&mut tables, |e| e.event_id == id);
        if let Some(event) = tables.events.remove(&id) {
            self.publish(RowChange::deleted(Table::BattleEvents, &event));
        }
        Ok(true)
    }

    // --- entries -----------------------------------------------------------

    async fn list_participants(&self, event_id: DbId) -> Result<Vec<Participant>, StoreError> {
        let tables = self.lock()?;
        let rows = tables
            .entries
            .values()
            .filter(|e| e.event_id == event_id)
            .filter_map(|e| {
                let m = tables.members.get(&e.member_id)?;
                Some(Participant {
                    entry_id: e.id,
                    event_id: e.event_id,
                    member_id: e.member_id,
                    name: m.name.clone(),
                    first_squad_power: m.first_squad_power,
                    hero_power: m.hero_power,
                    status: e.status,
                    version: e.version,
                })
            })
            .collect();
        Ok(rows)
    }

    async fn find_entry(&self, id: DbId) -> Result<Option<BattleEntry>, StoreError> {
        Ok(self.lock()?.entries.get(&id).cloned())
    }

    async fn count_entries(&self, event_id: DbId) -> Result<i64, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .entries
            .values()
            .filter(|e| e.event_id == event_id)
            .count() as i64)
    }

    async fn insert_entries(
        &self,
        event_id: DbId,
        member_ids: &[DbId],
    ) -> Result<Vec<BattleEntry>, StoreError> {
        let mut tables = self.lock()?;
        // The whole statement fails on a dangling reference, before any row
        // is written.
        if !tables.events.contains_key(&event_id) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: FK_ENTRY_EVENT.into(),
            });
        }
        if member_ids.iter().any(|id| !tables.members.contains_key(id)) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: FK_ENTRY_MEMBER.into(),
            });
        }

        let mut inserted = Vec::new();
        for &member_id in member_ids {
            match self.insert_entry_row(&mut tables, event_id, member_id) {
                Ok(entry) => inserted.push(entry),
                Err(e) if e.is_unique_violation(UQ_ENTRY_MEMBER) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(inserted)
    }

    async fn insert_entry(
        &self,
        event_id: DbId,
        member_id: DbId,
    ) -> Result<BattleEntry, StoreError> {
        let mut tables = self.lock()?;
        self.insert_entry_row(&mut tables, event_id, member_id)
    }

    async fn set_entry_status(
        &self,
        id: DbId,
        expected: VersionToken,
        status: EntryStatus,
    ) -> Result<Option<BattleEntry>, StoreError> {
        let mut tables = self.lock()?;
        let now = self.now();
        let Some(entry) = tables.entries.get_mut(&id) else {
            return Ok(None);
        };
        if entry.version != expected {
            return Ok(None);
        }
        let old = entry.clone();
        entry.status = status;
        entry.version = Uuid::new_v4();
        entry.updated_at = now;
        let new = entry.clone();
        self.publish(RowChange::updated(Table::BattleEntries, &old, &new));
        Ok(Some(new))
    }

    async fn delete_entry(
        &self,
        event_id: DbId,
        id: DbId,
        expected: VersionToken,
    ) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        let matches = tables
            .entries
            .get(&id)
            .is_some_and(|e| e.event_id == event_id && e.version == expected);
        if !matches {
            return Ok(false);
        }
        if let Some(entry) = tables.entries.remove(&id) {
            self.publish(RowChange::deleted(Table::BattleEntries, &entry));
            self.adjust_applicants(&mut tables, entry.event_id, -1);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{Duration, NaiveDate};
    use roster_core::clock::ManualClock;
    use roster_core::scheduling::Squad;

    use super::*;
    use crate::change::ChangeOp;

    fn store() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::default();
        (MemoryStore::new(Arc::new(clock.clone())), clock)
    }

    fn member(name: &str) -> CreateMember {
        CreateMember {
            name: name.into(),
            first_squad_power: Some(10.0),
            hero_power: None,
        }
    }

    fn friday_event() -> CreateBattleEvent {
        CreateBattleEvent {
            category: BattleCategory::Desert,
            squad: Squad::A,
            scheduled_on: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
        }
    }

    #[tokio::test]
    async fn pages_past_the_end_are_empty() {
        let (store, _) = store();
        for i in 0..3 {
            store.insert_member(&member(&format!("m{i}"))).await.unwrap();
        }
        let page = store.list_members(i64::MAX).await.unwrap();
        assert!(page.rows.is_empty());
        assert_eq!(page.total, 3);
        assert_eq!(store.list_members(1).await.unwrap().rows.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_slot_is_named_unique_violation() {
        let (store, _) = store();
        store.insert_event(&friday_event()).await.unwrap();
        let err = store.insert_event(&friday_event()).await.unwrap_err();
        assert!(err.is_unique_violation(UQ_EVENT_SLOT));
        assert_eq!(store.list_events(BattleCategory::Desert).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bulk_insert_skips_existing_pairs_and_counts_applicants() {
        let (store, _) = store();
        let event = store.insert_event(&friday_event()).await.unwrap();
        let a = store.insert_member(&member("a")).await.unwrap();
        let b = store.insert_member(&member("b")).await.unwrap();

        let first = store.insert_entries(event.id, &[a.id]).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = store.insert_entries(event.id, &[a.id, b.id]).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].member_id, b.id);

        let event = store.find_event(event.id).await.unwrap().unwrap();
        assert_eq!(event.applicant_count, 2);
    }

    #[tokio::test]
    async fn bulk_insert_with_unknown_member_writes_nothing() {
        let (store, _) = store();
        let event = store.insert_event(&friday_event()).await.unwrap();
        let a = store.insert_member(&member("a")).await.unwrap();
        let err = store.insert_entries(event.id, &[a.id, 999]).await.unwrap_err();
        assert!(err.is_foreign_key_violation(FK_ENTRY_MEMBER));
        assert_eq!(store.count_entries(event.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn deleting_event_cascades_to_entries() {
        let (store, _) = store();
        let event = store.insert_event(&friday_event()).await.unwrap();
        let a = store.insert_member(&member("a")).await.unwrap();
        let b = store.insert_member(&member("b")).await.unwrap();
        store.insert_entries(event.id, &[a.id, b.id]).await.unwrap();

        assert!(store.delete_event(event.id).await.unwrap());
        assert_eq!(store.count_entries(event.id).await.unwrap(), 0);
        assert!(!store.delete_event(event.id).await.unwrap());
    }

    #[tokio::test]
    async fn every_write_replaces_the_version() {
        let (store, clock) = store();
        let m = store.insert_member(&member("a")).await.unwrap();
        let until = clock.now() + Duration::minutes(5);
        let locked = store
            .try_lock_member(m.id, 1, clock.now(), until)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(locked.version, m.version);

        let powered = store.set_member_power(m.id, 42.0).await.unwrap().unwrap();
        assert_ne!(powered.version, locked.version);
        assert_eq!(powered.first_squad_power, Some(42.0));
    }

    #[tokio::test]
    async fn guarded_update_checks_holder_and_version_then_releases() {
        let (store, clock) = store();
        let m = store.insert_member(&member("a")).await.unwrap();
        let until = clock.now() + Duration::minutes(5);
        let locked = store
            .try_lock_member(m.id, 1, clock.now(), until)
            .await
            .unwrap()
            .unwrap();
        let patch = UpdateMember {
            name: "Nova".into(),
            first_squad_power: None,
            hero_power: Some(5),
        };

        let stale = store
            .update_member(m.id, &patch, WriteGuard::leased(1, m.version))
            .await
            .unwrap();
        assert!(stale.is_none());

        let wrong_holder = store
            .update_member(m.id, &patch, WriteGuard::leased(2, locked.version))
            .await
            .unwrap();
        assert!(wrong_holder.is_none());

        let updated = store
            .update_member(m.id, &patch, WriteGuard::leased(1, locked.version))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Nova");
        assert_eq!(updated.lock_holder, None);
        assert_eq!(updated.lock_expires_at, None);
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over() {
        let (store, clock) = store();
        let m = store.insert_member(&member("a")).await.unwrap();
        let ttl = Duration::minutes(5);
        store
            .try_lock_member(m.id, 1, clock.now(), clock.now() + ttl)
            .await
            .unwrap()
            .unwrap();
        assert!(store
            .try_lock_member(m.id, 2, clock.now(), clock.now() + ttl)
            .await
            .unwrap()
            .is_none());

        clock.advance(ttl);
        let taken = store
            .try_lock_member(m.id, 2, clock.now(), clock.now() + ttl)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(taken.lock_holder, Some(2));
    }

    #[tokio::test]
    async fn feed_delivers_changes_in_commit_order() {
        let (store, _) = store();
        let mut events_rx = store.listen(Table::BattleEvents).await.unwrap();
        let mut entries_rx = store.listen(Table::BattleEntries).await.unwrap();

        let event = store.insert_event(&friday_event()).await.unwrap();
        let a = store.insert_member(&member("a")).await.unwrap();
        let entry = store.insert_entry(event.id, a.id).await.unwrap();
        store.delete_entry(event.id, entry.id, entry.version).await.unwrap();

        assert_matches!(
            entries_rx.recv().await.unwrap(),
            FeedMessage::Change(RowChange { op: ChangeOp::Inserted, .. })
        );
        assert_matches!(
            entries_rx.recv().await.unwrap(),
            FeedMessage::Change(RowChange { op: ChangeOp::Deleted, .. })
        );

        let ops: Vec<ChangeOp> = (0..3)
            .map(|_| match events_rx.try_recv().unwrap() {
                FeedMessage::Change(c) => c.op,
                FeedMessage::Gap => panic!("unexpected gap"),
            })
            .collect();
        assert_eq!(ops, vec![ChangeOp::Inserted, ChangeOp::Updated, ChangeOp::Updated]);
    }

    #[tokio::test]
    async fn change_payload_decodes_back_into_model() {
        let (store, _) = store();
        let mut rx = store.listen(Table::Members).await.unwrap();
        let created = store.insert_member(&member("a")).await.unwrap();
        let FeedMessage::Change(change) = rx.recv().await.unwrap() else {
            panic!("expected change");
        };
        let decoded: Member = change.decode_new().unwrap().unwrap();
        assert_eq!(decoded, created);
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let (store, _) = store();
        store.set_offline(true);
        assert_matches!(
            store.find_member(1).await,
            Err(StoreError::Unavailable(_))
        );
        store.set_offline(false);
        assert!(store.find_member(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn interrupt_feed_sends_gap() {
        let (store, _) = store();
        let mut rx = store.listen(Table::Members).await.unwrap();
        store.interrupt_feed(Table::Members);
        assert_eq!(rx.recv().await.unwrap(), FeedMessage::Gap);
    }
}
