//! Paged member roster.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use roster_core::error::CoreError;
use roster_core::locking::next_refresh_delay;
use roster_core::roster::total_pages;
use roster_core::types::{DbId, Timestamp};
use roster_db::models::member::Member;
use roster_db::{ChangeOp, RecordStore, RowChange, Table};

use crate::bus::{NoticeBus, ViewKind, ViewNotice};
use crate::cache::EntityCache;
use crate::dispatcher::{Reconciler, ResyncReason};

const VIEW: ViewKind = ViewKind::MemberRoster;

/// One page of members kept in sync with the store.
///
/// Updates are merged in place. Inserts and deletes shift page
/// boundaries, so both reload the current page.
pub struct MemberRoster {
    store: Arc<dyn RecordStore>,
    notices: Arc<NoticeBus>,
    cache: EntityCache<Member>,
    page: AtomicI64,
    total: AtomicI64,
}

impl MemberRoster {
    pub fn new(store: Arc<dyn RecordStore>, notices: Arc<NoticeBus>) -> Self {
        Self {
            store,
            notices,
            cache: EntityCache::new(),
            page: AtomicI64::new(1),
            total: AtomicI64::new(0),
        }
    }

    pub fn page(&self) -> i64 {
        self.page.load(Ordering::SeqCst)
    }

    /// Exact row count as of the last load.
    pub fn total(&self) -> i64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn total_pages(&self) -> i64 {
        total_pages(self.total())
    }

    pub fn rows(&self) -> Vec<Member> {
        self.cache.snapshot()
    }

    pub fn get(&self, id: DbId) -> Option<Member> {
        self.cache.get(id)
    }

    /// Switch to `page` and load it.
    pub async fn show_page(&self, page: i64) -> Result<(), CoreError> {
        self.page.store(page.max(1), Ordering::SeqCst);
        self.reload().await?;
        self.notices.publish(ViewNotice::Reloaded { view: VIEW });
        Ok(())
    }

    /// Merge a row the session itself just wrote.
    pub fn merge_local(&self, member: Member) {
        let id = member.id;
        if self.cache.merge(member) {
            self.notices.publish(ViewNotice::Merged { view: VIEW, id });
        }
    }

    /// When to re-render lock badges on this page, if any lease will lapse.
    pub fn refresh_delay(&self, now: Timestamp) -> Option<Duration> {
        next_refresh_delay(self.cache.lease_expiries(), now)
    }

    async fn reload(&self) -> Result<(), CoreError> {
        let page = self.store.list_members(self.page()).await?;
        self.total.store(page.total, Ordering::SeqCst);
        self.cache.replace_all(page.rows);
        Ok(())
    }
}

#[async_trait]
impl Reconciler for MemberRoster {
    fn name(&self) -> &'static str {
        "member_roster"
    }

    fn table(&self) -> Table {
        Table::Members
    }

    async fn apply(&self, change: RowChange) -> Result<(), CoreError> {
        match change.op {
            ChangeOp::Updated => {
                let member: Member = change
                    .decode_new()
                    .map_err(|e| CoreError::Internal(format!("Bad member payload: {e}")))?
                    .ok_or_else(|| CoreError::Internal("Update without new row".into()))?;
                let id = member.id;
                if self.cache.merge(member) {
                    tracing::debug!(member_id = id, "Merged member");
                    self.notices.publish(ViewNotice::Merged { view: VIEW, id });
                }
            }
            ChangeOp::Deleted => {
                if let Some(id) = change.row_id() {
                    if self.cache.remove(id).is_some() {
                        self.notices.publish(ViewNotice::Purged { view: VIEW, id });
                    }
                }
                self.reload().await?;
                self.notices.publish(ViewNotice::Reloaded { view: VIEW });
            }
            ChangeOp::Inserted => {
                self.reload().await?;
                self.notices.publish(ViewNotice::Reloaded { view: VIEW });
            }
        }
        Ok(())
    }

    async fn resync(&self, reason: ResyncReason) -> Result<(), CoreError> {
        self.reload().await?;
        self.notices.publish(ViewNotice::Resynced { view: VIEW, reason });
        Ok(())
    }
}
