//! Lease-based locks on member records.
//!
//! Acquisition is one conditional write: the store only takes the lease when
//! it is absent, expired, or already held by the caller, so two concurrent
//! acquirers can never both win. Expiry is lazy; nothing sweeps stale
//! leases, and any reader compares `lock_expires_at` against its own clock.

use std::sync::Arc;
use std::time::Duration;

use roster_core::clock::Clock;
use roster_core::error::CoreError;
use roster_core::locking::{lease_expiry, validate_lease_ttl, LeaseStatus, DEFAULT_LEASE_TTL_SECS};
use roster_core::types::{DbId, Timestamp, VersionToken};
use roster_db::models::member::Member;
use roster_db::RecordStore;
use serde::Serialize;

const ENTITY: &str = "member";

/// How many times acquire re-tries when the lease frees up between its
/// conditional write and the follow-up read.
const ACQUIRE_ATTEMPTS: usize = 3;

/// Lease settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    pub ttl: Duration,
}

impl LockConfig {
    pub fn new(ttl: Duration) -> Result<Self, CoreError> {
        validate_lease_ttl(ttl).map_err(CoreError::Validation)?;
        Ok(Self { ttl })
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_LEASE_TTL_SECS),
        }
    }
}

/// A held lease.
///
/// Taking or extending a lease is a row write, so it carries the record's
/// new version; edits made under the lease must use it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Lease {
    pub member_id: DbId,
    pub holder: DbId,
    pub expires_at: Timestamp,
    pub version: VersionToken,
}

impl Lease {
    fn from_member(member: &Member, holder: DbId, expires_at: Timestamp) -> Self {
        Self {
            member_id: member.id,
            holder,
            expires_at,
            version: member.version,
        }
    }
}

/// Acquires, extends, and releases member leases.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    config: LockConfig,
}

impl LockManager {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, config: LockConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> LockConfig {
        self.config
    }

    /// Take the lease for the configured TTL.
    pub async fn acquire(&self, member_id: DbId, holder: DbId) -> Result<Lease, CoreError> {
        self.acquire_for(member_id, holder, self.config.ttl).await
    }

    /// Take the lease for `ttl`.
    ///
    /// Succeeds when the lease is absent, expired, or already ours.
    /// Otherwise returns [`CoreError::LockConflict`] naming the winner.
    pub async fn acquire_for(
        &self,
        member_id: DbId,
        holder: DbId,
        ttl: Duration,
    ) -> Result<Lease, CoreError> {
        validate_lease_ttl(ttl).map_err(CoreError::Validation)?;

        for _ in 0..ACQUIRE_ATTEMPTS {
            let now = self.clock.now();
            let until = lease_expiry(now, ttl);

            if let Some(member) = self
                .store
                .try_lock_member(member_id, holder, now, until)
                .await?
            {
                tracing::info!(member_id, holder, expires_at = %until, "Lease acquired");
                return Ok(Lease::from_member(&member, holder, until));
            }

            // Lost the race or the row is gone; read back to report why.
            let member = self
                .store
                .find_member(member_id)
                .await?
                .ok_or(CoreError::NotFound {
                    entity: ENTITY,
                    id: member_id,
                })?;
            if let LeaseStatus::HeldByOther {
                holder: winner,
                expires_at,
            } = member.lease_status(holder, self.clock.now())
            {
                tracing::warn!(member_id, holder, winner, "Lease held by another operator");
                return Err(CoreError::LockConflict {
                    entity: ENTITY,
                    id: member_id,
                    holder: winner,
                    expires_at,
                });
            }
        }

        Err(CoreError::Internal(format!(
            "Lease on member {member_id} kept changing hands"
        )))
    }

    /// Push the expiry of a live lease forward by the configured TTL.
    pub async fn extend(&self, member_id: DbId, holder: DbId) -> Result<Lease, CoreError> {
        let now = self.clock.now();
        let until = lease_expiry(now, self.config.ttl);

        if let Some(member) = self
            .store
            .extend_member_lock(member_id, holder, now, until)
            .await?
        {
            tracing::debug!(member_id, holder, expires_at = %until, "Lease extended");
            return Ok(Lease::from_member(&member, holder, until));
        }

        let member = self
            .store
            .find_member(member_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: ENTITY,
                id: member_id,
            })?;
        Err(lease_failure(&member, holder, self.clock.now()))
    }

    /// Clear the lease if `holder` owns it. A mismatched release is a no-op
    /// and returns `false`.
    pub async fn release(&self, member_id: DbId, holder: DbId) -> Result<bool, CoreError> {
        let released = self.store.unlock_member(member_id, holder).await?;
        if released {
            tracing::info!(member_id, holder, "Lease released");
        } else {
            tracing::debug!(member_id, holder, "Release ignored, lease not held");
        }
        Ok(released)
    }

    /// The lease as `viewer` sees it now.
    pub async fn status(&self, member_id: DbId, viewer: DbId) -> Result<LeaseStatus, CoreError> {
        let member = self
            .store
            .find_member(member_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: ENTITY,
                id: member_id,
            })?;
        Ok(member.lease_status(viewer, self.clock.now()))
    }
}

/// Why `holder` could not use the lease on `member`.
pub(crate) fn lease_failure(member: &Member, holder: DbId, now: Timestamp) -> CoreError {
    match member.lease_status(holder, now) {
        LeaseStatus::HeldByOther {
            holder: other,
            expires_at,
        } => CoreError::LockConflict {
            entity: ENTITY,
            id: member.id,
            holder: other,
            expires_at,
        },
        LeaseStatus::Free | LeaseStatus::HeldBySelf { .. } => CoreError::LeaseNotHeld {
            entity: ENTITY,
            id: member.id,
            holder,
        },
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use roster_core::clock::ManualClock;
    use roster_db::models::member::CreateMember;
    use roster_db::MemoryStore;

    use super::*;

    async fn setup() -> (LockManager, Arc<MemoryStore>, ManualClock, DbId) {
        let clock = ManualClock::default();
        let store = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
        let member = store
            .insert_member(&CreateMember {
                name: "Ari".into(),
                first_squad_power: None,
                hero_power: None,
            })
            .await
            .unwrap();
        let locks = LockManager::new(store.clone(), Arc::new(clock.clone()), LockConfig::default());
        (locks, store, clock, member.id)
    }

    // -----------------------------------------------------------------------
    // Acquire
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn acquire_returns_expiry_and_new_version() {
        let (locks, store, clock, id) = setup().await;
        let before = store.find_member(id).await.unwrap().unwrap();

        let lease = locks.acquire(id, 1).await.unwrap();
        assert_eq!(lease.expires_at, clock.now() + chrono::Duration::minutes(5));
        assert_ne!(lease.version, before.version);
        assert_matches!(locks.status(id, 1).await.unwrap(), LeaseStatus::HeldBySelf { .. });
    }

    #[tokio::test]
    async fn reacquire_by_holder_refreshes() {
        let (locks, _, clock, id) = setup().await;
        locks.acquire(id, 1).await.unwrap();
        clock.advance(chrono::Duration::minutes(1));
        let again = locks.acquire(id, 1).await.unwrap();
        assert_eq!(again.expires_at, clock.now() + chrono::Duration::minutes(5));
    }

    #[tokio::test]
    async fn loser_sees_winner() {
        let (locks, _, _, id) = setup().await;
        let lease = locks.acquire(id, 1).await.unwrap();
        let err = locks.acquire(id, 2).await.unwrap_err();
        assert_matches!(
            err,
            CoreError::LockConflict { holder: 1, expires_at, .. } if expires_at == lease.expires_at
        );
    }

    #[tokio::test]
    async fn concurrent_acquire_has_exactly_one_winner() {
        let (locks, _, _, id) = setup().await;
        let tasks: Vec<_> = (1..=8)
            .map(|holder| {
                let locks = locks.clone();
                tokio::spawn(async move { (holder, locks.acquire(id, holder).await) })
            })
            .collect();

        let mut winners = Vec::new();
        let mut losers = Vec::new();
        for task in tasks {
            let (holder, result) = task.await.unwrap();
            match result {
                Ok(_) => winners.push(holder),
                Err(e) => losers.push(e),
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(losers.len(), 7);
        for err in losers {
            assert_matches!(err, CoreError::LockConflict { holder, .. } if holder == winners[0]);
        }
    }

    #[tokio::test]
    async fn expired_lease_is_available_without_release() {
        let (locks, _, clock, id) = setup().await;
        locks.acquire(id, 1).await.unwrap();

        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(locks.status(id, 2).await.unwrap(), LeaseStatus::Free);
        let lease = locks.acquire(id, 2).await.unwrap();
        assert_eq!(lease.holder, 2);
    }

    #[tokio::test]
    async fn acquire_missing_member_is_not_found() {
        let (locks, _, _, _) = setup().await;
        assert_matches!(
            locks.acquire(999, 1).await,
            Err(CoreError::NotFound { id: 999, .. })
        );
    }

    #[tokio::test]
    async fn ttl_outside_bounds_is_rejected() {
        let (locks, _, _, id) = setup().await;
        assert_matches!(
            locks.acquire_for(id, 1, Duration::from_secs(10)).await,
            Err(CoreError::Validation(_))
        );
        assert!(LockConfig::new(Duration::from_secs(7200)).is_err());
    }

    // -----------------------------------------------------------------------
    // Extend / release
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn only_live_holder_can_extend() {
        let (locks, _, clock, id) = setup().await;
        locks.acquire(id, 1).await.unwrap();

        assert_matches!(locks.extend(id, 2).await, Err(CoreError::LockConflict { .. }));

        clock.advance(chrono::Duration::minutes(2));
        let extended = locks.extend(id, 1).await.unwrap();
        assert_eq!(extended.expires_at, clock.now() + chrono::Duration::minutes(5));

        clock.advance(chrono::Duration::minutes(6));
        assert_matches!(
            locks.extend(id, 1).await,
            Err(CoreError::LeaseNotHeld { holder: 1, .. })
        );
    }

    #[tokio::test]
    async fn mismatched_release_is_noop() {
        let (locks, _, _, id) = setup().await;
        locks.acquire(id, 1).await.unwrap();

        assert!(!locks.release(id, 2).await.unwrap());
        assert_matches!(locks.status(id, 2).await.unwrap(), LeaseStatus::HeldByOther { holder: 1, .. });

        assert!(locks.release(id, 1).await.unwrap());
        assert_eq!(locks.status(id, 2).await.unwrap(), LeaseStatus::Free);
    }
}
