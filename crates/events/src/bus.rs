//! In-process notice bus backed by a `tokio::sync::broadcast` channel.
//!
//! Views publish a [`ViewNotice`] after every reconciliation step so UI
//! collaborators can re-render or show a message. Share it via
//! `Arc<NoticeBus>`.

use roster_core::types::DbId;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::dispatcher::ResyncReason;

// ---------------------------------------------------------------------------
// ViewNotice
// ---------------------------------------------------------------------------

/// Which cached view a notice is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum ViewKind {
    MemberRoster,
    EventBoard,
    Participants { event_id: DbId },
}

/// Something changed in a cached view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewNotice {
    /// A cached row was replaced in place.
    Merged { view: ViewKind, id: DbId },
    /// A row was removed from the cache.
    Purged { view: ViewKind, id: DbId },
    /// A new row was put at the head of the view.
    Prepended { view: ViewKind, id: DbId },
    /// The view reloaded its rows in response to a change.
    Reloaded { view: ViewKind },
    /// The view dropped its rows and reloaded after losing continuity.
    Resynced { view: ViewKind, reason: ResyncReason },
    /// The event open in the detail view was deleted by another operator.
    SelectedEventDeleted { event_id: DbId },
}

// ---------------------------------------------------------------------------
// NoticeBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out bus for [`ViewNotice`]s.
///
/// When the buffer is full the oldest notices are dropped and slow
/// receivers observe `RecvError::Lagged`.
pub struct NoticeBus {
    sender: broadcast::Sender<ViewNotice>,
}

impl NoticeBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped if nobody listens.
    pub fn publish(&self, notice: ViewNotice) {
        let _ = self.sender.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewNotice> {
        self.sender.subscribe()
    }
}

impl Default for NoticeBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
