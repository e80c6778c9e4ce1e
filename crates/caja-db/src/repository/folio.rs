//! # Folio Repository
//!
//! Authorized folio ranges (CAF) and atomic allocation from them.
//!
//! ## Allocation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  next(Boleta)                                                           │
//! │                                                                         │
//! │  UPDATE folio_pools                                                     │
//! │     SET next_available = next_available + 1                             │
//! │   WHERE document_type = 39                                              │
//! │     AND exhausted = 0                                                   │
//! │     AND next_available <= range_end                                     │
//! │  RETURNING next_available - 1          ← the folio handed out           │
//! │                                                                         │
//! │  One statement: SQLite serializes writers, so two callers can never    │
//! │  read the same cursor. No row back means the range is used up.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use caja_core::{DocumentType, FolioPool};

#[derive(Debug, sqlx::FromRow)]
struct FolioPoolRow {
    document_type: DocumentType,
    range_start: i64,
    range_end: i64,
    next_available: i64,
    exhausted: bool,
}

impl TryFrom<FolioPoolRow> for FolioPool {
    type Error = DbError;

    fn try_from(row: FolioPoolRow) -> Result<Self, Self::Error> {
        Ok(FolioPool {
            document_type: row.document_type,
            range_start: to_folio(row.range_start)?,
            range_end: to_folio(row.range_end)?,
            next_available: to_folio(row.next_available)?,
            exhausted: row.exhausted,
        })
    }
}

pub(crate) fn to_folio(value: i64) -> DbResult<u64> {
    u64::try_from(value).map_err(|_| DbError::invalid_data("folio", format!("negative value {}", value)))
}

pub(crate) fn from_folio(value: u64) -> DbResult<i64> {
    i64::try_from(value).map_err(|_| DbError::invalid_data("folio", format!("{} out of range", value)))
}

/// Repository for folio pools.
#[derive(Debug, Clone)]
pub struct FolioRepository {
    pool: SqlitePool,
}

impl FolioRepository {
    /// Creates a new FolioRepository.
    pub fn new(pool: SqlitePool) -> Self {
        FolioRepository { pool }
    }

    /// Takes the next folio for a document type.
    ///
    /// ## Returns
    /// * `Ok(Some(folio))` - The folio now belongs to the caller
    /// * `Ok(None)` - No range installed, or the range is used up (the pool
    ///   is flagged exhausted)
    pub async fn next(&self, document_type: DocumentType) -> DbResult<Option<u64>> {
        let now = Utc::now();

        let folio: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE folio_pools SET
                next_available = next_available + 1,
                updated_at = ?2
            WHERE document_type = ?1
              AND exhausted = 0
              AND next_available <= range_end
            RETURNING next_available - 1
            "#,
        )
        .bind(document_type)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match folio {
            Some(folio) => {
                let folio = to_folio(folio)?;
                debug!(document_type = %document_type, folio = folio, "Folio allocated");
                Ok(Some(folio))
            }
            None => {
                let flagged = sqlx::query(
                    "UPDATE folio_pools SET exhausted = 1, updated_at = ?2 \
                     WHERE document_type = ?1 AND exhausted = 0",
                )
                .bind(document_type)
                .bind(now)
                .execute(&self.pool)
                .await?;

                if flagged.rows_affected() > 0 {
                    warn!(document_type = %document_type, "Folio range exhausted");
                }
                Ok(None)
            }
        }
    }

    /// Installs an authorized range and returns the pool as stored.
    ///
    /// The cursor never moves backwards: over an existing pool the new
    /// cursor is `MAX(range_start, next_available)`, in the same statement
    /// as the write. A range that ends before the current cursor is not
    /// installed at all and the current pool is returned.
    pub async fn install(&self, pool: &FolioPool) -> DbResult<FolioPool> {
        let now = Utc::now();

        let row = sqlx::query_as::<_, FolioPoolRow>(
            r#"
            INSERT INTO folio_pools (
                document_type, range_start, range_end, next_available, exhausted, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(document_type) DO UPDATE SET
                range_start = excluded.range_start,
                range_end = excluded.range_end,
                next_available = MAX(excluded.range_start, folio_pools.next_available),
                exhausted = 0,
                updated_at = excluded.updated_at
            WHERE excluded.range_end >= folio_pools.next_available
            RETURNING document_type, range_start, range_end, next_available, exhausted
            "#,
        )
        .bind(pool.document_type)
        .bind(from_folio(pool.range_start)?)
        .bind(from_folio(pool.range_end)?)
        .bind(from_folio(pool.next_available)?)
        .bind(pool.exhausted)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let installed = FolioPool::try_from(row)?;
                info!(
                    document_type = %installed.document_type,
                    range_start = installed.range_start,
                    range_end = installed.range_end,
                    next_available = installed.next_available,
                    "Folio range installed"
                );
                Ok(installed)
            }
            None => {
                warn!(
                    document_type = %pool.document_type,
                    range_start = pool.range_start,
                    range_end = pool.range_end,
                    "Folio range ends before the current cursor, not installed"
                );
                self.get(pool.document_type)
                    .await?
                    .ok_or_else(|| DbError::not_found("folio pool", pool.document_type.to_string()))
            }
        }
    }

    /// Current state of a document type's pool.
    pub async fn get(&self, document_type: DocumentType) -> DbResult<Option<FolioPool>> {
        let row = sqlx::query_as::<_, FolioPoolRow>(
            r#"
            SELECT document_type, range_start, range_end, next_available, exhausted
            FROM folio_pools
            WHERE document_type = ?1
            "#,
        )
        .bind(document_type)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FolioPool::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_single_folio_range() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.folios();
        repo.install(&FolioPool::new(DocumentType::Boleta, 1, 1).unwrap())
            .await
            .unwrap();

        assert_eq!(repo.next(DocumentType::Boleta).await.unwrap(), Some(1));
        let pool = repo.get(DocumentType::Boleta).await.unwrap().unwrap();
        assert_eq!(pool.next_available, 2);
        assert!(!pool.exhausted);

        assert_eq!(repo.next(DocumentType::Boleta).await.unwrap(), None);
        let pool = repo.get(DocumentType::Boleta).await.unwrap().unwrap();
        assert!(pool.exhausted);
    }

    #[tokio::test]
    async fn test_missing_range_yields_none() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert_eq!(db.folios().next(DocumentType::Factura).await.unwrap(), None);
        assert!(db.folios().get(DocumentType::Factura).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_allocations_are_distinct_without_gaps() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.folios()
            .install(&FolioPool::new(DocumentType::Boleta, 100, 149).unwrap())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let repo = db.folios();
            handles.push(tokio::spawn(async move { repo.next(DocumentType::Boleta).await }));
        }

        let mut folios = HashSet::new();
        for handle in handles {
            let folio = handle.await.unwrap().unwrap().unwrap();
            assert!(folios.insert(folio), "folio {} handed out twice", folio);
        }

        let expected: HashSet<u64> = (100..=149).collect();
        assert_eq!(folios, expected);
        assert_eq!(db.folios().next(DocumentType::Boleta).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_install_replaces_exhausted_range() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.folios();

        repo.install(&FolioPool::new(DocumentType::Factura, 1, 1).unwrap()).await.unwrap();
        repo.next(DocumentType::Factura).await.unwrap();
        assert_eq!(repo.next(DocumentType::Factura).await.unwrap(), None);

        repo.install(&FolioPool::new(DocumentType::Factura, 2, 10).unwrap()).await.unwrap();
        assert_eq!(repo.next(DocumentType::Factura).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_pools_are_independent_per_type() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.folios();

        repo.install(&FolioPool::new(DocumentType::Boleta, 1, 5).unwrap()).await.unwrap();
        repo.install(&FolioPool::new(DocumentType::Factura, 1, 5).unwrap()).await.unwrap();

        assert_eq!(repo.next(DocumentType::Boleta).await.unwrap(), Some(1));
        assert_eq!(repo.next(DocumentType::Boleta).await.unwrap(), Some(2));
        assert_eq!(repo.next(DocumentType::Factura).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_overlapping_install_keeps_cursor() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.folios();

        repo.install(&FolioPool::new(DocumentType::Boleta, 1, 10).unwrap()).await.unwrap();
        for expected in 1..=5 {
            assert_eq!(repo.next(DocumentType::Boleta).await.unwrap(), Some(expected));
        }

        let pool = repo
            .install(&FolioPool::new(DocumentType::Boleta, 1, 20).unwrap())
            .await
            .unwrap();
        assert_eq!((pool.range_start, pool.range_end), (1, 20));
        assert_eq!(pool.next_available, 6);
        assert_eq!(repo.next(DocumentType::Boleta).await.unwrap(), Some(6));
    }

    #[tokio::test]
    async fn test_stale_install_is_ignored() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.folios();

        repo.install(&FolioPool::new(DocumentType::Boleta, 1, 10).unwrap()).await.unwrap();
        for _ in 0..8 {
            repo.next(DocumentType::Boleta).await.unwrap();
        }

        // Ends before the cursor (9): nothing changes
        let pool = repo
            .install(&FolioPool::new(DocumentType::Boleta, 1, 5).unwrap())
            .await
            .unwrap();
        assert_eq!((pool.range_start, pool.range_end), (1, 10));
        assert_eq!(pool.next_available, 9);
        assert_eq!(repo.next(DocumentType::Boleta).await.unwrap(), Some(9));
    }
}
