//! Participants of one event.

use std::sync::Arc;

use async_trait::async_trait;
use roster_core::error::CoreError;
use roster_core::types::DbId;
use roster_db::models::battle_entry::Participant;
use roster_db::{RecordStore, RowChange, RowFilter, Table};

use crate::bus::{NoticeBus, ViewKind, ViewNotice};
use crate::cache::EntityCache;
use crate::dispatcher::{Reconciler, ResyncReason};

/// Entries of one event joined with their members.
///
/// Rows are joins, so any entry change reloads the whole list.
pub struct ParticipantList {
    store: Arc<dyn RecordStore>,
    notices: Arc<NoticeBus>,
    event_id: DbId,
    cache: EntityCache<Participant>,
}

impl ParticipantList {
    pub fn new(store: Arc<dyn RecordStore>, notices: Arc<NoticeBus>, event_id: DbId) -> Self {
        Self {
            store,
            notices,
            event_id,
            cache: EntityCache::new(),
        }
    }

    pub fn event_id(&self) -> DbId {
        self.event_id
    }

    pub fn rows(&self) -> Vec<Participant> {
        self.cache.snapshot()
    }

    pub fn member_ids(&self) -> Vec<DbId> {
        self.cache.snapshot().iter().map(|p| p.member_id).collect()
    }

    /// Reload after a write made by this session.
    pub async fn reload(&self) -> Result<(), CoreError> {
        let rows = self.store.list_participants(self.event_id).await?;
        self.cache.replace_all(rows);
        self.notices.publish(ViewNotice::Reloaded { view: self.view() });
        Ok(())
    }

    fn view(&self) -> ViewKind {
        ViewKind::Participants {
            event_id: self.event_id,
        }
    }
}

#[async_trait]
impl Reconciler for ParticipantList {
    fn name(&self) -> &'static str {
        "participants"
    }

    fn table(&self) -> Table {
        Table::BattleEntries
    }

    fn filter(&self) -> Option<RowFilter> {
        Some(RowFilter::eq("event_id", self.event_id))
    }

    async fn apply(&self, change: RowChange) -> Result<(), CoreError> {
        tracing::debug!(event_id = self.event_id, op = ?change.op, "Participant change");
        self.reload().await
    }

    async fn resync(&self, reason: ResyncReason) -> Result<(), CoreError> {
        let rows = self.store.list_participants(self.event_id).await?;
        self.cache.replace_all(rows);
        self.notices.publish(ViewNotice::Resynced {
            view: self.view(),
            reason,
        });
        Ok(())
    }
}
