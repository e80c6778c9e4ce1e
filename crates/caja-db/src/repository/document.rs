//! # Tax Document Repository
//!
//! Signed documents and their submission records.
//!
//! A document and its first `pending` record are written in one transaction,
//! so a stored document always has a record. The UNIQUE index on
//! `(emitter_rut, document_type, folio)` is the last line of defense against
//! a folio being issued twice.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::folio::{from_folio, to_folio};
use caja_core::{DocumentType, SubmissionRecord, SubmissionStatus};

/// A persisted, signed tax document.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredDocument {
    pub id: String,
    pub emitter_rut: String,
    pub document_type: DocumentType,
    pub folio: i64,
    pub issue_date: NaiveDate,
    pub total_amount: i64,
    /// Canonical unsigned XML.
    pub xml: String,
    /// XML with the signature block, exactly as submitted.
    pub signed_xml: String,
    pub created_at: DateTime<Utc>,
}

impl StoredDocument {
    pub fn folio(&self) -> DbResult<u64> {
        to_folio(self.folio)
    }
}

const SUBMISSION_COLUMNS: &str =
    "document_id, tracking_id, status, last_checked_at, response_message, attempts";

/// Repository for tax documents and submission records.
#[derive(Debug, Clone)]
pub struct DocumentRepository {
    pool: SqlitePool,
}

impl DocumentRepository {
    /// Creates a new DocumentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DocumentRepository { pool }
    }

    /// Stores a signed document together with its initial submission record.
    ///
    /// ## Errors
    /// `DbError::UniqueViolation` when the folio was already used for this
    /// emitter and document type.
    pub async fn insert(&self, document: &StoredDocument, record: &SubmissionRecord) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO tax_documents (
                id, emitter_rut, document_type, folio, issue_date,
                total_amount, xml, signed_xml, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&document.id)
        .bind(&document.emitter_rut)
        .bind(document.document_type)
        .bind(document.folio)
        .bind(document.issue_date)
        .bind(document.total_amount)
        .bind(&document.xml)
        .bind(&document.signed_xml)
        .bind(document.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } if field.contains("folio") => DbError::duplicate(
                "folio",
                format!("{}-{}-{}", document.emitter_rut, document.document_type.code(), document.folio),
            ),
            other => other,
        })?;

        sqlx::query(
            r#"
            INSERT INTO submissions (
                document_id, tracking_id, status, last_checked_at, response_message, attempts
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&record.document_id)
        .bind(&record.tracking_id)
        .bind(record.status)
        .bind(record.last_checked_at)
        .bind(&record.response_message)
        .bind(record.attempts)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            document_id = %document.id,
            document_type = %document.document_type,
            folio = document.folio,
            "Tax document stored"
        );

        Ok(())
    }

    /// Gets a document by local id.
    pub async fn get(&self, id: &str) -> DbResult<Option<StoredDocument>> {
        let document = sqlx::query_as::<_, StoredDocument>(
            r#"
            SELECT id, emitter_rut, document_type, folio, issue_date,
                   total_amount, xml, signed_xml, created_at
            FROM tax_documents
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(document)
    }

    /// Finds a document by its tax identity.
    pub async fn find_by_folio(
        &self,
        emitter_rut: &str,
        document_type: DocumentType,
        folio: u64,
    ) -> DbResult<Option<StoredDocument>> {
        let document = sqlx::query_as::<_, StoredDocument>(
            r#"
            SELECT id, emitter_rut, document_type, folio, issue_date,
                   total_amount, xml, signed_xml, created_at
            FROM tax_documents
            WHERE emitter_rut = ?1 AND document_type = ?2 AND folio = ?3
            "#,
        )
        .bind(emitter_rut)
        .bind(document_type)
        .bind(from_folio(folio)?)
        .fetch_optional(&self.pool)
        .await?;

        Ok(document)
    }

    /// Gets the submission record of a document.
    pub async fn get_submission(&self, document_id: &str) -> DbResult<Option<SubmissionRecord>> {
        let record = sqlx::query_as::<_, SubmissionRecord>(&format!(
            "SELECT {} FROM submissions WHERE document_id = ?1",
            SUBMISSION_COLUMNS
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Finds the submission record holding a tracking id.
    pub async fn find_by_tracking_id(&self, tracking_id: &str) -> DbResult<Option<SubmissionRecord>> {
        let record = sqlx::query_as::<_, SubmissionRecord>(&format!(
            "SELECT {} FROM submissions WHERE tracking_id = ?1",
            SUBMISSION_COLUMNS
        ))
        .bind(tracking_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Writes back a submission record after a state change.
    pub async fn save_submission(&self, record: &SubmissionRecord) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE submissions SET
                tracking_id = ?2,
                status = ?3,
                last_checked_at = ?4,
                response_message = ?5,
                attempts = ?6
            WHERE document_id = ?1
            "#,
        )
        .bind(&record.document_id)
        .bind(&record.tracking_id)
        .bind(record.status)
        .bind(record.last_checked_at)
        .bind(&record.response_message)
        .bind(record.attempts)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("submission", &record.document_id));
        }

        debug!(
            document_id = %record.document_id,
            status = %record.status,
            "Submission record saved"
        );

        Ok(())
    }

    /// Records in a given status, oldest document first.
    pub async fn list_by_status(
        &self,
        status: SubmissionStatus,
        limit: u32,
    ) -> DbResult<Vec<SubmissionRecord>> {
        let records = sqlx::query_as::<_, SubmissionRecord>(
            r#"
            SELECT s.document_id, s.tracking_id, s.status, s.last_checked_at,
                   s.response_message, s.attempts
            FROM submissions s
            JOIN tax_documents d ON d.id = s.document_id
            WHERE s.status = ?1
            ORDER BY d.created_at ASC
            LIMIT ?2
            "#,
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    fn document(id: &str, folio: i64) -> StoredDocument {
        StoredDocument {
            id: id.to_string(),
            emitter_rut: "76123456-0".to_string(),
            document_type: DocumentType::Boleta,
            folio,
            issue_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            total_amount: 44_500,
            xml: "<DTE></DTE>".to_string(),
            signed_xml: "<DTE><Signature/></DTE>".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.documents();
        let doc = document("doc-1", 120);

        repo.insert(&doc, &SubmissionRecord::new_pending("doc-1")).await.unwrap();

        let stored = repo.get("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.folio().unwrap(), 120);
        assert_eq!(stored.document_type, DocumentType::Boleta);
        assert_eq!(stored.signed_xml, doc.signed_xml);

        let found = repo
            .find_by_folio("76123456-0", DocumentType::Boleta, 120)
            .await
            .unwrap();
        assert_eq!(found.map(|d| d.id), Some("doc-1".to_string()));

        let record = repo.get_submission("doc-1").await.unwrap().unwrap();
        assert_eq!(record.status, SubmissionStatus::Pending);
    }

    #[tokio::test]
    async fn test_duplicate_folio_is_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.documents();

        repo.insert(&document("doc-1", 7), &SubmissionRecord::new_pending("doc-1"))
            .await
            .unwrap();
        let err = repo
            .insert(&document("doc-2", 7), &SubmissionRecord::new_pending("doc-2"))
            .await
            .unwrap_err();

        assert!(err.is_unique_violation());
        assert!(repo.get("doc-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_submission_and_lookup_by_tracking() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.documents();
        repo.insert(&document("doc-1", 1), &SubmissionRecord::new_pending("doc-1"))
            .await
            .unwrap();

        let mut record = repo.get_submission("doc-1").await.unwrap().unwrap();
        record.mark_sent("TRK-9", Utc::now()).unwrap();
        record.attempts = 1;
        repo.save_submission(&record).await.unwrap();

        let found = repo.find_by_tracking_id("TRK-9").await.unwrap().unwrap();
        assert_eq!(found.document_id, "doc-1");
        assert_eq!(found.status, SubmissionStatus::Sent);
        assert_eq!(found.attempts, 1);

        let sent = repo.list_by_status(SubmissionStatus::Sent, 10).await.unwrap();
        assert_eq!(sent.len(), 1);
        assert!(repo
            .list_by_status(SubmissionStatus::Pending, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_save_unknown_submission() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let err = db
            .documents()
            .save_submission(&SubmissionRecord::new_pending("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
