//! Lease constants, validation, and lazy-expiry evaluation.
//!
//! A lease is a soft, advisory claim stored on the record itself as
//! `lock_holder` / `lock_expires_at`. There is no background sweeper: a
//! lease whose expiry has passed is void for every reader and acquirer,
//! whatever the stored columns still say.

use std::time::Duration;

use serde::Serialize;

use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Lease duration constants
// ---------------------------------------------------------------------------

/// Default lease TTL in seconds (5 minutes).
pub const DEFAULT_LEASE_TTL_SECS: u64 = 300;

/// Minimum allowed lease TTL in seconds (1 minute).
pub const MIN_LEASE_TTL_SECS: u64 = 60;

/// Maximum allowed lease TTL in seconds (1 hour).
pub const MAX_LEASE_TTL_SECS: u64 = 3600;

/// Lower bound for the lock-badge refresh timer.
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(2);

/// Upper bound for the lock-badge refresh timer.
const MAX_REFRESH_DELAY: Duration = Duration::from_secs(30);

/// Grace added past the soonest expiry so the refresh lands after it.
const REFRESH_GRACE_MS: i64 = 500;

/// Validate a lease TTL. Returns `Ok(())` or an error message.
pub fn validate_lease_ttl(ttl: Duration) -> Result<(), String> {
    let secs = ttl.as_secs();
    if secs < MIN_LEASE_TTL_SECS {
        return Err(format!(
            "Lease TTL must be at least {MIN_LEASE_TTL_SECS} seconds, got {secs}"
        ));
    }
    if secs > MAX_LEASE_TTL_SECS {
        return Err(format!(
            "Lease TTL must be at most {MAX_LEASE_TTL_SECS} seconds, got {secs}"
        ));
    }
    Ok(())
}

/// Compute the expiry instant for a lease taken at `now`.
pub fn lease_expiry(now: Timestamp, ttl: Duration) -> Timestamp {
    let ttl = chrono::Duration::from_std(ttl)
        .unwrap_or_else(|_| chrono::Duration::seconds(MAX_LEASE_TTL_SECS as i64));
    now + ttl
}

// ---------------------------------------------------------------------------
// Lease state
// ---------------------------------------------------------------------------

/// The lease as seen by one viewer at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LeaseStatus {
    /// No holder, or the stored lease has expired.
    Free,
    /// The viewer holds a live lease.
    HeldBySelf { expires_at: Timestamp },
    /// Someone else holds a live lease.
    HeldByOther { holder: DbId, expires_at: Timestamp },
}

impl LeaseStatus {
    /// Evaluate the stored lock columns for `viewer` at `now`.
    ///
    /// A lease is live only while `expires_at > now`; a half-written lock
    /// (holder without expiry or the reverse) counts as free.
    pub fn evaluate(
        holder: Option<DbId>,
        expires_at: Option<Timestamp>,
        viewer: DbId,
        now: Timestamp,
    ) -> Self {
        match (holder, expires_at) {
            (Some(holder), Some(expires_at)) if expires_at > now => {
                if holder == viewer {
                    LeaseStatus::HeldBySelf { expires_at }
                } else {
                    LeaseStatus::HeldByOther { holder, expires_at }
                }
            }
            _ => LeaseStatus::Free,
        }
    }

    /// `true` when the viewer must not edit or delete the record.
    pub fn blocks_viewer(&self) -> bool {
        matches!(self, LeaseStatus::HeldByOther { .. })
    }
}

/// `true` if `holder` may take the lease given the stored columns at `now`.
///
/// This is the same predicate the store applies inside its conditional
/// write; it is exposed so caches can pre-check without a round-trip.
pub fn can_acquire(
    stored_holder: Option<DbId>,
    stored_expires_at: Option<Timestamp>,
    holder: DbId,
    now: Timestamp,
) -> bool {
    match stored_holder {
        None => true,
        Some(current) if current == holder => true,
        Some(_) => stored_expires_at.map_or(true, |expires| expires <= now),
    }
}

/// How long to wait before re-evaluating lock badges on a cached view.
///
/// Picks the soonest expiry still in the future, adds a short grace, and
/// clamps the result to a 2..=30 second window. Returns `None` when no
/// displayed lease will lapse.
pub fn next_refresh_delay<I>(expiries: I, now: Timestamp) -> Option<Duration>
where
    I: IntoIterator<Item = Option<Timestamp>>,
{
    let soonest = expiries
        .into_iter()
        .flatten()
        .filter(|expires| *expires > now)
        .min()?;

    let delta_ms = (soonest - now).num_milliseconds() + REFRESH_GRACE_MS;
    let delay = Duration::from_millis(delta_ms.max(0) as u64);
    Some(delay.clamp(MIN_REFRESH_DELAY, MAX_REFRESH_DELAY))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
