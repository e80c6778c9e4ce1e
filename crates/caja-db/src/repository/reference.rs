//! # Reference Data Repository
//!
//! Local copies of Back Office products, promotions and clients.
//!
//! ## Last-Write-Wins
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  upsert(empresa_id, entity{id, version})                               │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │    SELECT remote_version WHERE id = ?                                  │
//! │      ├── none                 ──► INSERT            → Inserted         │
//! │      ├── stored ≤ incoming    ──► UPDATE            → Updated          │
//! │      └── stored > incoming    ──► (no write)        → Stale            │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  The UPDATE re-checks the version in its WHERE clause, so a newer row  │
//! │  written by a concurrent caller is never overwritten.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The sync engine is the only writer. Everything else reads.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use caja_core::{EntityKind, SyncEntity};

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The stored row has a newer remote version; nothing was written.
    Stale,
}

impl UpsertOutcome {
    /// Whether the row now holds the incoming data.
    pub fn is_applied(&self) -> bool {
        !matches!(self, UpsertOutcome::Stale)
    }
}

/// Repository for reference data tables.
#[derive(Debug, Clone)]
pub struct ReferenceRepository {
    pool: SqlitePool,
}

impl ReferenceRepository {
    /// Creates a new ReferenceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReferenceRepository { pool }
    }

    /// Inserts or updates one entity, last-write-wins by remote version.
    pub async fn upsert(&self, empresa_id: &str, entity: &SyncEntity) -> DbResult<UpsertOutcome> {
        let table = entity.kind().as_str();
        let payload = serde_json::to_string(entity)
            .map_err(|e| DbError::invalid_data(table, e.to_string()))?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let stored: Option<i64> =
            sqlx::query_scalar(&format!("SELECT remote_version FROM {} WHERE id = ?1", table))
                .bind(entity.id())
                .fetch_optional(&mut *tx)
                .await?;

        let outcome = match stored {
            None => {
                sqlx::query(&format!(
                    "INSERT INTO {} (id, empresa_id, name, remote_version, payload, synced_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    table
                ))
                .bind(entity.id())
                .bind(empresa_id)
                .bind(entity.name())
                .bind(entity.version())
                .bind(&payload)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                UpsertOutcome::Inserted
            }
            Some(version) if version > entity.version() => UpsertOutcome::Stale,
            Some(_) => {
                let result = sqlx::query(&format!(
                    "UPDATE {} SET empresa_id = ?2, name = ?3, remote_version = ?4, \
                     payload = ?5, synced_at = ?6 \
                     WHERE id = ?1 AND remote_version <= ?4",
                    table
                ))
                .bind(entity.id())
                .bind(empresa_id)
                .bind(entity.name())
                .bind(entity.version())
                .bind(&payload)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    UpsertOutcome::Stale
                } else {
                    UpsertOutcome::Updated
                }
            }
        };

        tx.commit().await?;

        debug!(
            kind = %entity.kind(),
            id = %entity.id(),
            version = entity.version(),
            outcome = ?outcome,
            "Reference entity upserted"
        );

        Ok(outcome)
    }

    /// Gets one entity by remote id.
    pub async fn get(&self, kind: EntityKind, id: &str) -> DbResult<Option<SyncEntity>> {
        let payload: Option<String> =
            sqlx::query_scalar(&format!("SELECT payload FROM {} WHERE id = ?1", kind.as_str()))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        payload.map(|p| decode(kind, &p)).transpose()
    }

    /// Lists a company's entities of one kind, ordered by name.
    pub async fn list(&self, kind: EntityKind, empresa_id: &str) -> DbResult<Vec<SyncEntity>> {
        let payloads: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT payload FROM {} WHERE empresa_id = ?1 ORDER BY name ASC, id ASC",
            kind.as_str()
        ))
        .bind(empresa_id)
        .fetch_all(&self.pool)
        .await?;

        payloads.iter().map(|p| decode(kind, p)).collect()
    }

    /// Stored remote version of an entity, if present.
    pub async fn version(&self, kind: EntityKind, id: &str) -> DbResult<Option<i64>> {
        let version = sqlx::query_scalar(&format!(
            "SELECT remote_version FROM {} WHERE id = ?1",
            kind.as_str()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(version)
    }

    /// Counts stored entities of one kind.
    pub async fn count(&self, kind: EntityKind) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", kind.as_str()))
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

fn decode(kind: EntityKind, payload: &str) -> DbResult<SyncEntity> {
    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| DbError::invalid_data(kind.as_str(), e.to_string()))?;

    SyncEntity::parse(kind, value).map_err(|e| DbError::invalid_data(kind.as_str(), e.to_string()))
}
