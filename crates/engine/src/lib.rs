//! Roster coordination engine.
//!
//! - [`lock_manager`]: lease acquire / extend / release on member records.
//! - [`coordinator`]: compare-and-swap member updates and administration.
//! - [`scheduler`]: battle event creation with weekday and slot rules.
//! - [`enrollment`]: idempotent bulk enrollment and entry maintenance.
//! - [`session`]: one operator's views, loops, and held lease.

pub mod coordinator;
pub mod enrollment;
pub mod lock_manager;
pub mod scheduler;
pub mod session;

pub use coordinator::UpdateCoordinator;
pub use enrollment::{EnrollmentManager, EnrollmentReport};
pub use lock_manager::{Lease, LockConfig, LockManager};
pub use scheduler::EventScheduler;
pub use session::{OperatorSession, SessionConfig};
