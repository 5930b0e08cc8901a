//! Optimistic updates and member administration.
//!
//! An update is a single compare-and-swap write: it applies only while the
//! stored version equals the caller's and, for leased edits, the caller
//! holds the lease. The same write clears the lease. When zero rows are
//! affected the row is re-read to say which precondition failed; nothing is
//! ever retried or overwritten blindly.

use std::sync::Arc;

use roster_core::clock::Clock;
use roster_core::error::CoreError;
use roster_core::operator::OperatorProfile;
use roster_core::types::{DbId, VersionToken};
use roster_db::models::member::{CreateMember, Member, MemberPage, UpdateMember};
use roster_db::{RecordStore, WriteGuard};

use crate::lock_manager::lease_failure;

const ENTITY: &str = "member";
const DELETE_ATTEMPTS: usize = 3;

/// Compare-and-swap writes against member records.
#[derive(Clone)]
pub struct UpdateCoordinator {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl UpdateCoordinator {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Apply `patch` under `operator`'s lease and release the lease.
    ///
    /// Fails with [`CoreError::VersionConflict`] when `expected` is stale,
    /// [`CoreError::LockConflict`] when someone else holds a live lease, and
    /// [`CoreError::LeaseNotHeld`] when the caller's lease is gone.
    pub async fn update(
        &self,
        operator: &OperatorProfile,
        member_id: DbId,
        expected: VersionToken,
        patch: UpdateMember,
    ) -> Result<Member, CoreError> {
        operator.ensure_can_manage()?;
        let patch = patch.normalized()?;
        let holder = operator.id;
        let guard = WriteGuard::leased(holder, expected);
        match self.store.update_member(member_id, &patch, guard).await? {
            Some(member) => {
                tracing::info!(member_id, holder, "Member updated, lease released");
                Ok(member)
            }
            None => Err(self.diagnose(member_id, Some(holder), expected).await),
        }
    }

    /// Apply `patch` guarded by version only, for records edited without a
    /// lease.
    pub async fn update_versioned(
        &self,
        operator: &OperatorProfile,
        member_id: DbId,
        expected: VersionToken,
        patch: UpdateMember,
    ) -> Result<Member, CoreError> {
        operator.ensure_can_manage()?;
        let patch = patch.normalized()?;
        match self
            .store
            .update_member(member_id, &patch, WriteGuard::versioned(expected))
            .await?
        {
            Some(member) => {
                tracing::info!(member_id, operator = operator.id, "Member updated");
                Ok(member)
            }
            None => Err(self.diagnose(member_id, None, expected).await),
        }
    }

    async fn diagnose(
        &self,
        member_id: DbId,
        holder: Option<DbId>,
        expected: VersionToken,
    ) -> CoreError {
        let current = match self.store.find_member(member_id).await {
            Ok(Some(member)) => member,
            Ok(None) => {
                return CoreError::NotFound {
                    entity: ENTITY,
                    id: member_id,
                }
            }
            Err(e) => return e.into(),
        };

        if current.version != expected {
            tracing::warn!(member_id, "Stale version, update rejected");
            return CoreError::VersionConflict {
                entity: ENTITY,
                id: member_id,
            };
        }
        match holder {
            Some(holder) => {
                tracing::warn!(member_id, holder, "Update without lease rejected");
                lease_failure(&current, holder, self.clock.now())
            }
            // Version matched on re-read, so it changed and changed back.
            None => CoreError::VersionConflict {
                entity: ENTITY,
                id: member_id,
            },
        }
    }

    // --- administration ----------------------------------------------------

    pub async fn create_member(
        &self,
        operator: &OperatorProfile,
        input: CreateMember,
    ) -> Result<Member, CoreError> {
        operator.ensure_can_manage()?;
        let input = input.normalized()?;
        let member = self.store.insert_member(&input).await?;
        tracing::info!(member_id = member.id, operator = operator.id, "Member created");
        Ok(member)
    }

    /// Delete a member unless another operator holds a live lease on it.
    /// Entries cascade.
    pub async fn delete_member(
        &self,
        operator: &OperatorProfile,
        member_id: DbId,
    ) -> Result<(), CoreError> {
        operator.ensure_can_manage()?;

        for _ in 0..DELETE_ATTEMPTS {
            let now = self.clock.now();
            if self.store.delete_member(member_id, operator.id, now).await? {
                tracing::info!(member_id, operator = operator.id, "Member deleted");
                return Ok(());
            }
            let member = self
                .store
                .find_member(member_id)
                .await?
                .ok_or(CoreError::NotFound {
                    entity: ENTITY,
                    id: member_id,
                })?;
            if let err @ CoreError::LockConflict { .. } =
                lease_failure(&member, operator.id, self.clock.now())
            {
                return Err(err);
            }
        }

        Err(CoreError::Internal(format!(
            "Delete of member {member_id} kept racing lease changes"
        )))
    }

    pub async fn find_member(&self, member_id: DbId) -> Result<Member, CoreError> {
        self.store
            .find_member(member_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: ENTITY,
                id: member_id,
            })
    }

    pub async fn list_members(&self, page: i64) -> Result<MemberPage, CoreError> {
        Ok(self.store.list_members(page).await?)
    }
}
