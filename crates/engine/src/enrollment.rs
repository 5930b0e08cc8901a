//! Event enrollment.
//!
//! Bulk enrollment is idempotent: pairs that already exist are skipped and
//! reported, never failed. Single enrollment treats a duplicate as
//! [`CoreError::DuplicateEntry`]. Removal and status changes are guarded by
//! the entry version.

use std::collections::HashSet;
use std::sync::Arc;

use roster_core::error::CoreError;
use roster_core::roster::{select_candidates, validate_squad_power, NameOrder};
use roster_core::scheduling::EntryStatus;
use roster_core::types::{DbId, VersionToken};
use roster_db::error::{FK_ENTRY_EVENT, FK_ENTRY_MEMBER, UQ_ENTRY_MEMBER};
use roster_db::models::battle_entry::{BattleEntry, Participant};
use roster_db::models::member::Member;
use roster_db::{RecordStore, StoreError};
use serde::Serialize;

const EVENT: &str = "battle_event";
const ENTRY: &str = "battle_entry";
const MEMBER: &str = "member";

/// Outcome of a bulk enrollment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentReport {
    pub inserted: Vec<BattleEntry>,
    /// Requested members that were already enrolled.
    pub skipped: Vec<DbId>,
}

impl EnrollmentReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Adds and removes participants of battle events.
#[derive(Clone)]
pub struct EnrollmentManager {
    store: Arc<dyn RecordStore>,
}

impl EnrollmentManager {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Enroll every member in `member_ids`, skipping existing pairs.
    ///
    /// Repeated ids in the input are collapsed. An unknown event or member
    /// fails the whole call with [`CoreError::NotFound`] and writes nothing.
    pub async fn add_many(
        &self,
        event_id: DbId,
        member_ids: &[DbId],
    ) -> Result<EnrollmentReport, CoreError> {
        let mut seen = HashSet::new();
        let requested: Vec<DbId> = member_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        if requested.is_empty() {
            return Ok(EnrollmentReport {
                inserted: Vec::new(),
                skipped: Vec::new(),
            });
        }

        let inserted = match self.store.insert_entries(event_id, &requested).await {
            Ok(rows) => rows,
            Err(e) => return Err(self.missing_reference(e, event_id, &requested).await),
        };

        let added: HashSet<DbId> = inserted.iter().map(|e| e.member_id).collect();
        let skipped: Vec<DbId> = requested
            .into_iter()
            .filter(|id| !added.contains(id))
            .collect();

        tracing::info!(
            event_id,
            inserted = inserted.len(),
            skipped = skipped.len(),
            "Entries added"
        );
        Ok(EnrollmentReport { inserted, skipped })
    }

    /// Enroll one member. A duplicate is [`CoreError::DuplicateEntry`].
    pub async fn add_one(&self, event_id: DbId, member_id: DbId) -> Result<BattleEntry, CoreError> {
        match self.store.insert_entry(event_id, member_id).await {
            Ok(entry) => {
                tracing::info!(event_id, member_id, entry_id = entry.id, "Entry added");
                Ok(entry)
            }
            Err(e) if e.is_unique_violation(UQ_ENTRY_MEMBER) => {
                Err(CoreError::DuplicateEntry {
                    event_id,
                    member_id,
                })
            }
            Err(e) => Err(self.missing_reference(e, event_id, &[member_id]).await),
        }
    }

    /// Remove an entry, unless it changed since `expected` was read.
    pub async fn remove_one(
        &self,
        event_id: DbId,
        entry_id: DbId,
        expected: VersionToken,
    ) -> Result<(), CoreError> {
        if self.store.delete_entry(event_id, entry_id, expected).await? {
            tracing::info!(event_id, entry_id, "Entry removed");
            return Ok(());
        }
        match self.store.find_entry(entry_id).await? {
            Some(entry) if entry.event_id == event_id => {
                tracing::warn!(event_id, entry_id, "Stale entry delete rejected");
                Err(CoreError::VersionConflict {
                    entity: ENTRY,
                    id: entry_id,
                })
            }
            _ => Err(CoreError::NotFound {
                entity: ENTRY,
                id: entry_id,
            }),
        }
    }

    /// Change an entry's status, unless it changed since `expected` was read.
    pub async fn set_status(
        &self,
        entry_id: DbId,
        expected: VersionToken,
        status: EntryStatus,
    ) -> Result<BattleEntry, CoreError> {
        if let Some(entry) = self.store.set_entry_status(entry_id, expected, status).await? {
            tracing::info!(entry_id, status = %status, "Entry status changed");
            return Ok(entry);
        }
        match self.store.find_entry(entry_id).await? {
            Some(_) => Err(CoreError::VersionConflict {
                entity: ENTRY,
                id: entry_id,
            }),
            None => Err(CoreError::NotFound {
                entity: ENTRY,
                id: entry_id,
            }),
        }
    }

    /// Overwrite a member's first squad power.
    ///
    /// Power belongs to the member, so the change shows in every event the
    /// member is enrolled in.
    ///
    /// This write bypasses member leases on purpose: power is maintained from
    /// the participant list by any approved operator, while a lease only
    /// guards the full member edit.
    pub async fn edit_power(&self, member_id: DbId, power: f64) -> Result<Member, CoreError> {
        validate_squad_power(power).map_err(CoreError::Validation)?;
        let member = self
            .store
            .set_member_power(member_id, power)
            .await?
            .ok_or(CoreError::NotFound {
                entity: MEMBER,
                id: member_id,
            })?;
        tracing::info!(member_id, power, "Member power edited");
        Ok(member)
    }

    pub async fn participants(&self, event_id: DbId) -> Result<Vec<Participant>, CoreError> {
        Ok(self.store.list_participants(event_id).await?)
    }

    /// Members not yet enrolled in `event_id`, filtered by name and sorted.
    pub async fn candidates(
        &self,
        event_id: DbId,
        search: &str,
        order: NameOrder,
    ) -> Result<Vec<Member>, CoreError> {
        let members = self.store.list_members_by_name().await?;
        let enrolled: Vec<DbId> = self
            .store
            .list_participants(event_id)
            .await?
            .iter()
            .map(|p| p.member_id)
            .collect();
        Ok(select_candidates(members, &enrolled, search, order, |m: &Member| {
            (m.id, m.name.as_str())
        }))
    }

    /// Turn a foreign-key failure into the [`CoreError::NotFound`] it means.
    async fn missing_reference(&self, err: StoreError, event_id: DbId, members: &[DbId]) -> CoreError {
        if err.is_foreign_key_violation(FK_ENTRY_EVENT) {
            return CoreError::NotFound {
                entity: EVENT,
                id: event_id,
            };
        }
        if err.is_foreign_key_violation(FK_ENTRY_MEMBER) {
            for &id in members {
                match self.store.find_member(id).await {
                    Ok(Some(_)) => continue,
                    Ok(None) => return CoreError::NotFound { entity: MEMBER, id },
                    Err(e) => return e.into(),
                }
            }
        }
        err.into()
    }
}
