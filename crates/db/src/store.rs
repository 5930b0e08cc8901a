//! The typed store seam used by the engine.
//!
//! [`RecordStore`] is the minimal surface the concurrency core needs from
//! the data service: reads, inserts that report constraint violations
//! distinctly, and conditional updates/deletes whose failed precondition
//! surfaces as "no row" rather than as an error.

use async_trait::async_trait;
use roster_core::scheduling::{BattleCategory, EntryStatus};
use roster_core::types::{DbId, Timestamp, VersionToken};

use crate::error::StoreError;
use crate::models::battle_entry::{BattleEntry, Participant};
use crate::models::battle_event::{BattleEvent, CreateBattleEvent};
use crate::models::member::{CreateMember, Member, MemberPage, UpdateMember};
use crate::repositories::{BattleEntryRepo, BattleEventRepo, MemberRepo};
use crate::DbPool;

/// Preconditions for a compare-and-swap member edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteGuard {
    /// When set, the caller must hold the lease; the edit also clears it.
    pub holder: Option<DbId>,
    /// The version the caller last read.
    pub expected_version: VersionToken,
}

impl WriteGuard {
    pub fn leased(holder: DbId, expected_version: VersionToken) -> Self {
        Self {
            holder: Some(holder),
            expected_version,
        }
    }

    pub fn versioned(expected_version: VersionToken) -> Self {
        Self {
            holder: None,
            expected_version,
        }
    }
}

/// Typed operations against the authoritative store.
///
/// Every method is a single atomic statement against the store: a
/// precondition and the write it guards can never interleave with another
/// caller's write to the same row.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // --- members -----------------------------------------------------------

    async fn list_members(&self, page: i64) -> Result<MemberPage, StoreError>;

    async fn list_members_by_name(&self) -> Result<Vec<Member>, StoreError>;

    async fn find_member(&self, id: DbId) -> Result<Option<Member>, StoreError>;

    async fn insert_member(&self, input: &CreateMember) -> Result<Member, StoreError>;

    /// Compare-and-swap edit; `None` means a precondition failed.
    async fn update_member(
        &self,
        id: DbId,
        input: &UpdateMember,
        guard: WriteGuard,
    ) -> Result<Option<Member>, StoreError>;

    async fn set_member_power(&self, id: DbId, power: f64) -> Result<Option<Member>, StoreError>;

    /// Delete unless another holder has a live lease at `now`.
    async fn delete_member(&self, id: DbId, holder: DbId, now: Timestamp)
        -> Result<bool, StoreError>;

    /// Take the lease if it is absent, expired at `now`, or held by `holder`.
    async fn try_lock_member(
        &self,
        id: DbId,
        holder: DbId,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<Option<Member>, StoreError>;

    async fn extend_member_lock(
        &self,
        id: DbId,
        holder: DbId,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<Option<Member>, StoreError>;

    async fn unlock_member(&self, id: DbId, holder: DbId) -> Result<bool, StoreError>;

    // --- events ------------------------------------------------------------

    async fn list_events(&self, category: BattleCategory) -> Result<Vec<BattleEvent>, StoreError>;

    async fn find_event(&self, id: DbId) -> Result<Option<BattleEvent>, StoreError>;

    async fn insert_event(&self, input: &CreateBattleEvent) -> Result<BattleEvent, StoreError>;

    /// `PENDING` → `CONFIRMED`; `None` if missing or already confirmed.
    async fn confirm_event(&self, id: DbId) -> Result<Option<BattleEvent>, StoreError>;

    /// Delete an event and, by cascade, all of its entries.
    async fn delete_event(&self, id: DbId) -> Result<bool, StoreError>;

    // --- entries -----------------------------------------------------------

    async fn list_participants(&self, event_id: DbId) -> Result<Vec<Participant>, StoreError>;

    async fn find_entry(&self, id: DbId) -> Result<Option<BattleEntry>, StoreError>;

    async fn count_entries(&self, event_id: DbId) -> Result<i64, StoreError>;

    /// Idempotent bulk insert: existing `(event_id, member_id)` pairs are
    /// skipped. Returns only the inserted rows.
    async fn insert_entries(
        &self,
        event_id: DbId,
        member_ids: &[DbId],
    ) -> Result<Vec<BattleEntry>, StoreError>;

    async fn insert_entry(&self, event_id: DbId, member_id: DbId)
        -> Result<BattleEntry, StoreError>;

    async fn set_entry_status(
        &self,
        id: DbId,
        expected: VersionToken,
        status: EntryStatus,
    ) -> Result<Option<BattleEntry>, StoreError>;

    async fn delete_entry(
        &self,
        event_id: DbId,
        id: DbId,
        expected: VersionToken,
    ) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

/// [`RecordStore`] backed by PostgreSQL through the repositories.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn list_members(&self, page: i64) -> Result<MemberPage, StoreError> {
        let (rows, total) = MemberRepo::list_page(&self.pool, page).await?;
        Ok(MemberPage {
            page: page.max(1),
            total,
            rows,
        })
    }

    async fn list_members_by_name(&self) -> Result<Vec<Member>, StoreError> {
        Ok(MemberRepo::list_by_name(&self.pool).await?)
    }

    async fn find_member(&self, id: DbId) -> Result<Option<Member>, StoreError> {
        Ok(MemberRepo::find_by_id(&self.pool, id).await?)
    }

    async fn insert_member(&self, input: &CreateMember) -> Result<Member, StoreError> {
        Ok(MemberRepo::create(&self.pool, input).await?)
    }

    async fn update_member(
        &self,
        id: DbId,
        input: &UpdateMember,
        guard: WriteGuard,
    ) -> Result<Option<Member>, StoreError> {
        Ok(MemberRepo::update_guarded(
            &self.pool,
            id,
            input,
            guard.holder,
            guard.expected_version,
        )
        .await?)
    }

    async fn set_member_power(&self, id: DbId, power: f64) -> Result<Option<Member>, StoreError> {
        Ok(MemberRepo::set_power(&self.pool, id, power).await?)
    }

    async fn delete_member(
        &self,
        id: DbId,
        holder: DbId,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        Ok(MemberRepo::delete_unlocked(&self.pool, id, holder, now).await?)
    }

    async fn try_lock_member(
        &self,
        id: DbId,
        holder: DbId,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<Option<Member>, StoreError> {
        Ok(MemberRepo::try_lock(&self.pool, id, holder, now, until).await?)
    }

    async fn extend_member_lock(
        &self,
        id: DbId,
        holder: DbId,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<Option<Member>, StoreError> {
        Ok(MemberRepo::extend_lock(&self.pool, id, holder, now, until).await?)
    }

    async fn unlock_member(&self, id: DbId, holder: DbId) -> Result<bool, StoreError> {
        Ok(MemberRepo::unlock(&self.pool, id, holder).await?)
    }

    async fn list_events(&self, category: BattleCategory) -> Result<Vec<BattleEvent>, StoreError> {
        Ok(BattleEventRepo::list_by_category(&self.pool, category).await?)
    }

    async fn find_event(&self, id: DbId) -> Result<Option<BattleEvent>, StoreError> {
        Ok(BattleEventRepo::find_by_id(&self.pool, id).await?)
    }

    async fn insert_event(&self, input: &CreateBattleEvent) -> Result<BattleEvent, StoreError> {
        Ok(BattleEventRepo::create(&self.pool, input).await?)
    }

    async fn confirm_event(&self, id: DbId) -> Result<Option<BattleEvent>, StoreError> {
        Ok(BattleEventRepo::confirm(&self.pool, id).await?)
    }

    async fn delete_event(&self, id: DbId) -> Result<bool, StoreError> {
        Ok(BattleEventRepo::delete(&self.pool, id).await?)
    }

    async fn list_participants(&self, event_id: DbId) -> Result<Vec<Participant>, StoreError> {
        Ok(BattleEntryRepo::list_participants(&self.pool, event_id).await?)
    }

    async fn find_entry(&self, id: DbId) -> Result<Option<BattleEntry>, StoreError> {
        Ok(BattleEntryRepo::find_by_id(&self.pool, id).await?)
    }

    async fn count_entries(&self, event_id: DbId) -> Result<i64, StoreError> {
        Ok(BattleEntryRepo::count_for_event(&self.pool, event_id).await?)
    }

    async fn insert_entries(
        &self,
        event_id: DbId,
        member_ids: &[DbId],
    ) -> Result<Vec<BattleEntry>, StoreError> {
        Ok(BattleEntryRepo::create_many_skip_existing(&self.pool, event_id, member_ids).await?)
    }

    async fn insert_entry(
        &self,
        event_id: DbId,
        member_id: DbId,
    ) -> Result<BattleEntry, StoreError> {
        Ok(BattleEntryRepo::create(&self.pool, event_id, member_id).await?)
    }

    async fn set_entry_status(
        &self,
        id: DbId,
        expected: VersionToken,
        status: EntryStatus,
    ) -> Result<Option<BattleEntry>, StoreError> {
        Ok(BattleEntryRepo::set_status(&self.pool, id, expected, status).await?)
    }

    async fn delete_entry(
        &self,
        event_id: DbId,
        id: DbId,
        expected: VersionToken,
    ) -> Result<bool, StoreError> {
        Ok(BattleEntryRepo::delete_guarded(&self.pool, event_id, id, expected).await?)
    }
}
