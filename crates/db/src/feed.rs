//! PostgreSQL `LISTEN/NOTIFY` change feed.
//!
//! Row triggers publish a JSON payload on [`CHANGE_CHANNEL`] for every
//! insert, update, and delete. [`PgChangeFeed::run`] holds one listener
//! connection and fans each notification out to the broadcast channel of
//! the table it names.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::change::{ChangeFeed, FeedMessage, RowChange, Table};
use crate::error::StoreError;
use crate::DbPool;

/// Notification channel written by the `notify_row_change` trigger.
pub const CHANGE_CHANNEL: &str = "roster_changes";

/// Upper bound for the reconnect backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Default per-table broadcast capacity.
const DEFAULT_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// PgChangeFeed
// ---------------------------------------------------------------------------

/// Change feed backed by a single `PgListener`.
///
/// Share it via `Arc<PgChangeFeed>`: one task drives [`run`](Self::run),
/// any number of consumers call [`ChangeFeed::listen`].
pub struct PgChangeFeed {
    pool: DbPool,
    senders: HashMap<Table, broadcast::Sender<FeedMessage>>,
    initial_backoff: Duration,
}

impl PgChangeFeed {
    /// Create a feed with `capacity` buffered messages per table.
    pub fn new(pool: DbPool, capacity: usize, initial_backoff: Duration) -> Self {
        let senders = Table::ALL
            .into_iter()
            .map(|table| (table, broadcast::channel(capacity.max(1)).0))
            .collect();
        Self {
            pool,
            senders,
            initial_backoff,
        }
    }

    /// Feed with the default capacity and a 500 ms initial backoff.
    pub fn with_defaults(pool: DbPool) -> Self {
        Self::new(pool, DEFAULT_CAPACITY, Duration::from_millis(500))
    }

    /// Pump notifications until `cancel` fires.
    ///
    /// A dropped listener connection is reported to every table as
    /// [`FeedMessage::Gap`] because notifications sent while disconnected
    /// are lost. Reconnects back off exponentially up to 30 seconds.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut backoff = self.initial_backoff;
        let mut connected_before = false;

        loop {
            let mut listener = match self.connect().await {
                Ok(listener) => {
                    backoff = self.initial_backoff;
                    listener
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "Change listener connect failed"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            if connected_before {
                self.broadcast_gap();
            }
            connected_before = true;
            tracing::info!(channel = CHANGE_CHANNEL, "Change listener connected");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Change feed cancelled");
                        return;
                    }
                    received = listener.try_recv() => match received {
                        Ok(Some(notification)) => self.dispatch(notification.payload()),
                        Ok(None) => {
                            // The listener reconnects on the next call.
                            tracing::warn!("Change listener connection lost");
                            self.broadcast_gap();
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Change listener failed");
                            self.broadcast_gap();
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("Change feed cancelled");
    }

    async fn connect(&self) -> Result<PgListener, sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        Ok(listener)
    }

    fn dispatch(&self, payload: &str) {
        let change: RowChange = match serde_json::from_str(payload) {
            Ok(change) => change,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed change payload");
                return;
            }
        };
        tracing::trace!(table = %change.table, op = ?change.op, "Row change");
        if let Some(sender) = self.senders.get(&change.table) {
            // No receivers is fine.
            let _ = sender.send(FeedMessage::Change(change));
        }
    }

    fn broadcast_gap(&self) {
        for sender in self.senders.values() {
            let _ = sender.send(FeedMessage::Gap);
        }
    }
}

#[async_trait]
impl ChangeFeed for PgChangeFeed {
    async fn listen(&self, table: Table) -> Result<broadcast::Receiver<FeedMessage>, StoreError> {
        self.senders
            .get(&table)
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| StoreError::Unavailable(format!("No feed for table {table}")))
    }
}
