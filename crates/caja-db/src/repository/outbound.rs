//! # Outbound Event Repository
//!
//! The durable queue of sales and cash movements waiting for the Back Office.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL OPERATION (sale closed, cash drawer movement)                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  INSERT INTO outbound_events (id, kind, entity_id, payload)            │
//! │       │         seq = AUTOINCREMENT  ← defines FIFO order per kind     │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            SYNC ENGINE (push / flush)                           │   │
//! │  │                                                                 │   │
//! │  │  1. SELECT ... WHERE kind = ? AND delivered_at IS NULL          │   │
//! │  │     ORDER BY seq                                                │   │
//! │  │                                                                 │   │
//! │  │  2. For each entry, in order:                                  │   │
//! │  │     a. POST /transactions                                      │   │
//! │  │     b. On success: delivered_at = NOW()                        │   │
//! │  │     c. On failure: attempts += 1, last_error = ?; STOP         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • An event is never lost (it's in local DB)                           │
//! │  • Within a kind, event N+1 is never delivered before event N          │
//! │  • Offline? Entries queue up; back online, the next flush drains them  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use caja_core::{EventKind, OutboundEvent};

const SELECT_COLUMNS: &str = "id, seq, kind, entity_id, payload, attempts, last_error, \
                              created_at, attempted_at, delivered_at";

/// Repository for the outbound event queue.
#[derive(Debug, Clone)]
pub struct OutboundRepository {
    pool: SqlitePool,
}

impl OutboundRepository {
    /// Creates a new OutboundRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OutboundRepository { pool }
    }

    /// Queues an event for delivery.
    ///
    /// ## Arguments
    /// * `kind` - Which FIFO queue the event joins
    /// * `entity_id` - The sale or cash movement id
    /// * `payload` - JSON body sent to the Back Office
    ///
    /// ## Example
    /// ```rust,ignore
    /// let payload = serde_json::to_string(&sale)?;
    /// let event = db.outbound().enqueue(EventKind::Sale, &sale.sale_id, &payload).await?;
    /// ```
    pub async fn enqueue(
        &self,
        kind: EventKind,
        entity_id: &str,
        payload: &str,
    ) -> DbResult<OutboundEvent> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO outbound_events (id, kind, entity_id, payload, attempts, created_at)
            VALUES (?1, ?2, ?3, ?4, 0, ?5)
            "#,
        )
        .bind(&id)
        .bind(kind)
        .bind(entity_id)
        .bind(payload)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let seq = result.last_insert_rowid();

        debug!(
            kind = %kind,
            entity_id = %entity_id,
            seq = seq,
            "Event queued for delivery"
        );

        Ok(OutboundEvent {
            id,
            seq,
            kind,
            entity_id: entity_id.to_string(),
            payload: payload.to_string(),
            attempts: 0,
            last_error: None,
            created_at: now,
            attempted_at: None,
            delivered_at: None,
        })
    }

    /// Gets an event by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<OutboundEvent>> {
        let event = sqlx::query_as::<_, OutboundEvent>(&format!(
            "SELECT {} FROM outbound_events WHERE id = ?1",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }

    /// Undelivered events of one kind, oldest first.
    pub async fn pending(&self, kind: EventKind, limit: u32) -> DbResult<Vec<OutboundEvent>> {
        let events = sqlx::query_as::<_, OutboundEvent>(&format!(
            "SELECT {} FROM outbound_events \
             WHERE kind = ?1 AND delivered_at IS NULL \
             ORDER BY seq ASC LIMIT ?2",
            SELECT_COLUMNS
        ))
        .bind(kind)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Undelivered events of one kind queued at or before `seq`, oldest first.
    ///
    /// This is everything that must be delivered before (and including) the
    /// event at `seq`.
    pub async fn pending_through(&self, kind: EventKind, seq: i64) -> DbResult<Vec<OutboundEvent>> {
        let events = sqlx::query_as::<_, OutboundEvent>(&format!(
            "SELECT {} FROM outbound_events \
             WHERE kind = ?1 AND delivered_at IS NULL AND seq <= ?2 \
             ORDER BY seq ASC",
            SELECT_COLUMNS
        ))
        .bind(kind)
        .bind(seq)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Marks an event as delivered.
    pub async fn mark_delivered(&self, id: &str) -> DbResult<()> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE outbound_events SET
                delivered_at = ?2,
                attempted_at = ?2,
                attempts = attempts + 1
            WHERE id = ?1 AND delivered_at IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && self.get(id).await?.is_none() {
            return Err(DbError::not_found("outbound event", id));
        }

        Ok(())
    }

    /// Records a failed delivery attempt.
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE outbound_events SET
                attempts = attempts + 1,
                last_error = ?2,
                attempted_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("outbound event", id));
        }

        Ok(())
    }

    /// Counts undelivered events across all kinds.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbound_events WHERE delivered_at IS NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Deletes events delivered more than `days_old` days ago.
    ///
    /// ## Returns
    /// Number of deleted entries.
    pub async fn cleanup_delivered(&self, days_old: u32) -> DbResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days_old));

        let result = sqlx::query(
            "DELETE FROM outbound_events WHERE delivered_at IS NOT NULL AND delivered_at < ?1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_enqueue_assigns_increasing_seq() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.outbound();

        let a = repo.enqueue(EventKind::Sale, "sale-1", "{}").await.unwrap();
        let b = repo.enqueue(EventKind::CashMovement, "mov-1", "{}").await.unwrap();
        let c = repo.enqueue(EventKind::Sale, "sale-2", "{}").await.unwrap();

        assert!(a.seq < b.seq && b.seq < c.seq);
        assert_eq!(repo.count_pending().await.unwrap(), 3);

        let stored = repo.get(&a.id).await.unwrap().unwrap();
        assert_eq!(stored.kind, EventKind::Sale);
        assert_eq!(stored.seq, a.seq);
        assert!(!stored.is_delivered());
    }

    #[tokio::test]
    async fn test_pending_is_fifo_per_kind() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.outbound();

        for i in 0..3 {
            repo.enqueue(EventKind::Sale, &format!("sale-{}", i), "{}").await.unwrap();
            repo.enqueue(EventKind::CashMovement, &format!("mov-{}", i), "{}").await.unwrap();
        }

        let sales = repo.pending(EventKind::Sale, 10).await.unwrap();
        let ids: Vec<&str> = sales.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["sale-0", "sale-1", "sale-2"]);

        let through = repo.pending_through(EventKind::Sale, sales[1].seq).await.unwrap();
        assert_eq!(through.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_then_delivery() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.outbound();
        let event = repo.enqueue(EventKind::Sale, "sale-1", "{}").await.unwrap();

        repo.mark_failed(&event.id, "connection refused").await.unwrap();
        let stored = repo.get(&event.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.last_error.as_deref(), Some("connection refused"));
        assert!(stored.attempted_at.is_some());

        repo.mark_delivered(&event.id).await.unwrap();
        let stored = repo.get(&event.id).await.unwrap().unwrap();
        assert!(stored.is_delivered());
        assert_eq!(stored.attempts, 2);
        assert!(repo.pending(EventKind::Sale, 10).await.unwrap().is_empty());

        // Payload and order are untouched by delivery bookkeeping.
        assert_eq!(stored.payload, event.payload);
        assert_eq!(stored.seq, event.seq);
    }

    #[tokio::test]
    async fn test_unknown_event() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.outbound();

        assert!(matches!(
            repo.mark_failed("missing", "x").await,
            Err(DbError::NotFound { .. })
        ));
        assert!(matches!(
            repo.mark_delivered("missing").await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_and_pending() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.outbound();

        let event = repo.enqueue(EventKind::Sale, "sale-1", "{}").await.unwrap();
        repo.enqueue(EventKind::Sale, "sale-2", "{}").await.unwrap();
        repo.mark_delivered(&event.id).await.unwrap();

        assert_eq!(repo.cleanup_delivered(7).await.unwrap(), 0);
        assert_eq!(repo.count_pending().await.unwrap(), 1);
    }
}
