//! Change propagation for the roster.
//!
//! - [`ChangeDispatcher`]: per-table subscriptions and the reconciliation
//!   loop with drop-and-resync.
//! - [`EntityCache`]: the authoritative local copy of one entity type.
//! - [`views`]: the member roster, event board, and participant list.
//! - [`NoticeBus`]: fan-out of [`ViewNotice`]s to UI collaborators.

pub mod bus;
pub mod cache;
pub mod dispatcher;
pub mod views;

pub use bus::{NoticeBus, ViewKind, ViewNotice};
pub use cache::{EntityCache, Keyed};
pub use dispatcher::{
    ChangeDispatcher, Delivery, DispatcherConfig, Reconciler, ResyncReason, Subscription,
};
pub use views::{EventBoard, MemberRoster, ParticipantList};
