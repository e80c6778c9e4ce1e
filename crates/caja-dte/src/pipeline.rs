//! # Issuing Pipeline
//!
//! From a finalized sale to a document the SII has (or will have).
//!
//! ```text
//!  FinalizedSale
//!       │
//!       ▼
//!  allocate folio ──► assemble ──► sign ──► persist (pending) ──► submit
//!       │                 │           │                             │
//!  FolioExhausted    Validation    Signing                 retryable error:
//!                    (folio consumed, nothing stored)      returned as `error`,
//!                                                          retry() later
//!                                                                   │
//!                                                          refused upload:
//!                                                          `rejected`, final
//! ```
//!
//! `issue` makes a single upload attempt so checkout never waits on
//! backoff. `retry` and `retry_unsent` go through the configured
//! `RetryPolicy`.
//!
//! Folios are never returned to the pool. A folio burned by a validation or
//! signing failure is logged so the gap can be explained to the SII.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use caja_core::xml::extract_tag;
use caja_core::{assemble, Emitter, FinalizedSale, SubmissionRecord, SubmissionStatus, TaxDocument};
use caja_db::{Database, DbError, StoredDocument};

use crate::backoffice::BackOfficeApi;
use crate::config::{DteConfig, FolioSource};
use crate::error::{DteError, DteResult};
use crate::folio::{CafFolioAuthority, FolioAllocator, FolioAuthority, RemoteFolioAuthority};
use crate::signer::{CertificateSigner, SignedDocument, Signer};
use crate::submission::{RetryPolicy, SiiTransport, SubmissionClient};

/// A document that went through the pipeline.
#[derive(Debug, Clone)]
pub struct IssuedDocument {
    /// Local id (`tax_documents.id`).
    pub id: String,
    pub document: TaxDocument,
    pub signed: SignedDocument,
    /// `sent` on success; `error` or `pending` when the upload must be retried.
    pub record: SubmissionRecord,
}

/// The DTE pipeline for one company context.
pub struct DteService {
    emitter: Emitter,
    allocator: FolioAllocator,
    signer: Arc<dyn Signer>,
    submissions: SubmissionClient,
    db: Arc<Database>,
}

impl DteService {
    pub fn new(
        emitter: Emitter,
        allocator: FolioAllocator,
        signer: Arc<dyn Signer>,
        submissions: SubmissionClient,
        db: Arc<Database>,
    ) -> Self {
        Self {
            emitter,
            allocator,
            signer,
            submissions,
            db,
        }
    }

    /// Wires the pipeline from configuration.
    pub fn from_config(
        config: &DteConfig,
        db: Arc<Database>,
        api: Arc<dyn BackOfficeApi>,
        transport: Arc<dyn SiiTransport>,
    ) -> DteResult<Self> {
        let authority: Arc<dyn FolioAuthority> = match config.sync.folio {
            FolioSource::Remote => Arc::new(RemoteFolioAuthority::new(api, config.empresa_id())),
            FolioSource::Caf => Arc::new(CafFolioAuthority::new(db.clone(), api, config.empresa_id())),
        };

        let submissions = SubmissionClient::new(db.clone(), transport, config.sii_timeout())
            .with_retry(RetryPolicy::from_settings(&config.sync));

        Ok(Self::new(
            config.emitter()?,
            FolioAllocator::new(authority),
            Arc::new(CertificateSigner::from_config(&config.certificate)?),
            submissions,
            db,
        ))
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    /// Issues a tax document for a finalized sale.
    ///
    /// ## Errors
    /// - `FolioExhausted` when no folio could be obtained
    /// - `Validation` / signing errors; nothing is stored
    /// - `RemoteRejection` when the SII refused the upload (stored as
    ///   `rejected`; the sale needs a new document and folio)
    /// - other non-retryable submission errors (stored as `error`)
    pub async fn issue(&self, sale: &FinalizedSale) -> DteResult<IssuedDocument> {
        let folio = self.allocator.allocate(sale.document_type).await?;

        let document = assemble(sale, &self.emitter, folio).map_err(|e| {
            warn!(
                sale_id = %sale.sale_id,
                document_type = %sale.document_type,
                folio = folio,
                error = %e,
                "Sale rejected by assembler, folio consumed"
            );
            DteError::from(e)
        })?;

        let unsigned = document.to_xml();
        let signed = self.signer.sign(&unsigned).map_err(|e| {
            warn!(
                sale_id = %sale.sale_id,
                folio = folio,
                error = %e,
                "Signing failed, folio consumed"
            );
            e
        })?;

        let id = Uuid::new_v4().to_string();
        let stored = StoredDocument {
            id: id.clone(),
            emitter_rut: self.emitter.rut.to_string(),
            document_type: document.document_type,
            folio: i64::try_from(folio)
                .map_err(|_| DteError::Database(format!("folio {} out of range", folio)))?,
            issue_date: document.issue_date,
            total_amount: document.total_amount.amount(),
            xml: unsigned,
            signed_xml: signed.xml.clone(),
            created_at: Utc::now(),
        };
        self.db
            .documents()
            .insert(&stored, &SubmissionRecord::new_pending(&id))
            .await?;

        info!(
            document_id = %id,
            dte = %document.document_id(),
            sale_id = %sale.sale_id,
            total = %document.total_amount,
            "Document signed and stored"
        );

        let record = match self
            .submissions
            .submit(&id, &signed, &document.idempotency_key())
            .await
        {
            Ok(record) => record,
            Err(e) if e.is_retryable() => {
                warn!(document_id = %id, error = %e, "Submission deferred");
                self.load_record(&id).await?
            }
            Err(e) => return Err(e),
        };

        Ok(IssuedDocument {
            id,
            document,
            signed,
            record,
        })
    }

    /// Resubmits a stored document that is `pending` or `error`, backing off
    /// while the failure is retryable.
    pub async fn retry(&self, document_id: &str) -> DteResult<SubmissionRecord> {
        let stored = self
            .db
            .documents()
            .get(document_id)
            .await?
            .ok_or_else(|| DteError::from(DbError::not_found("tax document", document_id)))?;

        self.load_record(document_id).await?.ensure_not_final()?;

        let signed = SignedDocument {
            digest: extract_tag(&stored.signed_xml, "DigestValue").unwrap_or_default(),
            signature: extract_tag(&stored.signed_xml, "SignatureValue").unwrap_or_default(),
            xml: stored.signed_xml.clone(),
        };
        let key = format!(
            "{}-{}-{}",
            stored.emitter_rut,
            stored.document_type.code(),
            stored.folio
        );

        debug!(document_id = %document_id, key = %key, "Retrying submission");
        self.submissions
            .submit_with_retry(document_id, &signed, &key)
            .await
    }

    /// Retries up to `limit` unsent documents, `error` records before
    /// `pending` ones, oldest first within each.
    ///
    /// Rejected documents are never picked up: a refused upload is final.
    /// Returns how many reached `sent`.
    pub async fn retry_unsent(&self, limit: u32) -> DteResult<usize> {
        let mut candidates = self
            .db
            .documents()
            .list_by_status(SubmissionStatus::Error, limit)
            .await?;
        candidates.extend(
            self.db
                .documents()
                .list_by_status(SubmissionStatus::Pending, limit)
                .await?,
        );

        let mut sent = 0;
        for record in candidates.into_iter().take(limit as usize) {
            match self.retry(&record.document_id).await {
                Ok(_) => sent += 1,
                Err(e) if e.is_retryable() => {
                    debug!(document_id = %record.document_id, error = %e, "Still unsent");
                }
                Err(DteError::RemoteRejection(message)) => {
                    warn!(
                        document_id = %record.document_id,
                        message = %message,
                        "Upload refused, document rejected"
                    );
                }
                Err(e) => {
                    warn!(document_id = %record.document_id, error = %e, "Retry failed");
                }
            }
        }

        Ok(sent)
    }

    /// Polls the SII for a document's verdict.
    ///
    /// A document that was never sent has nothing to poll; its record is
    /// returned unchanged.
    pub async fn refresh_status(&self, document_id: &str) -> DteResult<SubmissionRecord> {
        let record = self.load_record(document_id).await?;
        match record.tracking_id.as_deref() {
            Some(tracking_id) => self.submissions.check_status(tracking_id).await,
            None => Ok(record),
        }
    }

    async fn load_record(&self, document_id: &str) -> DteResult<SubmissionRecord> {
        self.db
            .documents()
            .get_submission(document_id)
            .await?
            .ok_or_else(|| DteError::from(DbError::not_found("submission", document_id)))
    }
}
