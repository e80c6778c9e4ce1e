//! # Submission Client
//!
//! Sends signed documents to the SII and follows them to a verdict.
//!
//! ## Submit
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  submit(document_id, signed, key)                                       │
//! │                                                                         │
//! │  record = submissions[document_id]                                      │
//! │     │                                                                   │
//! │     ├── accepted / rejected ──► AlreadyFinalized (transport untouched)  │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  transport.upload(xml, key)   (bounded by tokio::time::timeout)        │
//! │     │                                                                   │
//! │     ├── Ok(track_id) ──► sent, tracking_id saved                        │
//! │     ├── refused      ──► rejected (final), authority message saved     │
//! │     ├── timeout      ──► state untouched, attempts+1, Timeout          │
//! │     └── other error  ──► error, message saved, error returned          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The idempotency key `{rut}-{type}-{folio}` lets a resend after a timeout
//! be deduplicated by the authority.

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use chrono::Utc;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use caja_core::xml::extract_tag;
use caja_core::{SubmissionRecord, SubmissionStatus};
use caja_db::{Database, DbError};

use crate::config::{DteConfig, SyncSettings};
use crate::error::{DteError, DteResult};
use crate::signer::SignedDocument;

/// What the authority says about an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
    /// `sent` while still processing, otherwise the verdict.
    pub status: SubmissionStatus,
    /// Authority message, verbatim.
    pub message: Option<String>,
}

/// Tax authority web service.
#[async_trait]
pub trait SiiTransport: Send + Sync {
    /// Uploads signed XML. Returns the tracking id.
    async fn upload(&self, signed_xml: &str, idempotency_key: &str) -> DteResult<String>;

    async fn query_status(&self, tracking_id: &str) -> DteResult<RemoteStatus>;
}

// =============================================================================
// Status Codes
// =============================================================================

const ACCEPTED_CODES: [&str; 3] = ["EPR", "DOK", "ACEPTADO"];
const REJECTED_CODES: [&str; 4] = ["RCH", "RFR", "RCT", "RECHAZADO"];

/// Maps an `ESTADO` code to a submission status.
///
/// Unknown codes mean the authority is still processing.
pub fn status_from_code(code: &str) -> SubmissionStatus {
    let code = code.trim().to_uppercase();
    if ACCEPTED_CODES.contains(&code.as_str()) {
        SubmissionStatus::Accepted
    } else if REJECTED_CODES.contains(&code.as_str()) {
        SubmissionStatus::Rejected
    } else {
        SubmissionStatus::Sent
    }
}

/// Parses an upload reply: `<TRACKID>` when `<STATUS>` is 0.
pub fn parse_upload_response(body: &str) -> DteResult<String> {
    let status = extract_tag(body, "STATUS")
        .ok_or_else(|| DteError::InvalidResponse("upload reply has no STATUS".into()))?;

    if status != "0" {
        let detail = extract_tag(body, "DETAIL")
            .or_else(|| extract_tag(body, "GLOSA"))
            .unwrap_or_default();
        return Err(DteError::RemoteRejection(format!(
            "upload status {} {}",
            status, detail
        )
        .trim_end()
        .to_string()));
    }

    extract_tag(body, "TRACKID")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| DteError::InvalidResponse("upload reply has no TRACKID".into()))
}

/// Parses a status reply: `<ESTADO>` and optional `<GLOSA>`.
pub fn parse_status_response(body: &str) -> DteResult<RemoteStatus> {
    let estado = extract_tag(body, "ESTADO")
        .ok_or_else(|| DteError::InvalidResponse("status reply has no ESTADO".into()))?;

    Ok(RemoteStatus {
        status: status_from_code(&estado),
        message: extract_tag(body, "GLOSA").filter(|g| !g.is_empty()),
    })
}

// =============================================================================
// HTTP Transport
// =============================================================================

/// SII web service over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpSiiTransport {
    http: Client,
    upload_url: Url,
    status_url: Url,
    timeout: Duration,
}

impl HttpSiiTransport {
    pub fn new(config: &DteConfig) -> DteResult<Self> {
        Self::with_urls(
            Url::parse(config.upload_url())?,
            Url::parse(config.status_url())?,
            config.sii_timeout(),
        )
    }

    pub fn with_urls(upload_url: Url, status_url: Url, timeout: Duration) -> DteResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            upload_url,
            status_url,
            timeout,
        })
    }

    fn map_error(&self, err: reqwest::Error) -> DteError {
        if err.is_timeout() {
            DteError::Timeout(self.timeout)
        } else {
            DteError::from(err)
        }
    }

    async fn read_body(&self, res: reqwest::Response) -> DteResult<String> {
        let status = res.status();
        let body = res.text().await.map_err(|e| self.map_error(e))?;
        if !status.is_success() {
            return Err(DteError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl SiiTransport for HttpSiiTransport {
    async fn upload(&self, signed_xml: &str, idempotency_key: &str) -> DteResult<String> {
        let res = self
            .http
            .post(self.upload_url.clone())
            .header("Content-Type", "application/xml; charset=utf-8")
            .header("Idempotency-Key", idempotency_key)
            .body(signed_xml.to_string())
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let body = self.read_body(res).await?;
        parse_upload_response(&body)
    }

    async fn query_status(&self, tracking_id: &str) -> DteResult<RemoteStatus> {
        let mut url = self.status_url.clone();
        url.query_pairs_mut().append_pair("TrackId", tracking_id);

        let res = self.http.get(url).send().await.map_err(|e| self.map_error(e))?;
        let body = self.read_body(res).await?;
        parse_status_response(&body)
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Exponential backoff for `submit_with_retry`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            initial_interval: Duration::from_millis(settings.initial_backoff_ms),
            max_interval: Duration::from_secs(settings.max_backoff_secs),
            max_elapsed: Duration::from_secs(settings.max_elapsed_secs),
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: 2.0,
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

// =============================================================================
// Submission Client
// =============================================================================

/// Drives submission records through the state machine.
#[derive(Clone)]
pub struct SubmissionClient {
    db: Arc<Database>,
    transport: Arc<dyn SiiTransport>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl SubmissionClient {
    pub fn new(db: Arc<Database>, transport: Arc<dyn SiiTransport>, timeout: Duration) -> Self {
        Self {
            db,
            transport,
            timeout,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn load_record(&self, document_id: &str) -> DteResult<SubmissionRecord> {
        self.db
            .documents()
            .get_submission(document_id)
            .await?
            .ok_or_else(|| DbError::not_found("submission", document_id).into())
    }

    /// Uploads a signed document.
    ///
    /// ## Returns
    /// The record in `sent` with its tracking id.
    ///
    /// ## Errors
    /// - `AlreadyFinalized` for accepted/rejected documents; nothing is sent
    /// - `RemoteRejection`; the record moves to `rejected` and is never resent
    /// - `Timeout`; the record keeps its previous status
    /// - any other transport or remote error; the record moves to `error`
    pub async fn submit(
        &self,
        document_id: &str,
        signed: &SignedDocument,
        idempotency_key: &str,
    ) -> DteResult<SubmissionRecord> {
        let mut record = self.load_record(document_id).await?;
        record.ensure_not_final()?;
        if !record.status.can_transition_to(SubmissionStatus::Sent) {
            return Err(DteError::InvalidTransition {
                from: record.status,
                to: SubmissionStatus::Sent,
            });
        }

        record.attempts += 1;
        debug!(document_id = %document_id, attempt = record.attempts, "Submitting document");

        let outcome = tokio::time::timeout(
            self.timeout,
            self.transport.upload(&signed.xml, idempotency_key),
        )
        .await
        .unwrap_or(Err(DteError::Timeout(self.timeout)));

        let now = Utc::now();
        match outcome {
            Ok(tracking_id) => {
                record.mark_sent(tracking_id.clone(), now)?;
                self.db.documents().save_submission(&record).await?;
                info!(
                    document_id = %document_id,
                    tracking_id = %tracking_id,
                    "Document sent to SII"
                );
                Ok(record)
            }
            Err(DteError::Timeout(after)) => {
                self.db.documents().save_submission(&record).await?;
                warn!(
                    document_id = %document_id,
                    status = %record.status,
                    "SII upload timed out, status unchanged"
                );
                Err(DteError::Timeout(after))
            }
            Err(DteError::RemoteRejection(message)) => {
                record.mark_rejected(message.clone(), now)?;
                self.db.documents().save_submission(&record).await?;
                warn!(
                    document_id = %document_id,
                    message = %message,
                    "SII refused the upload, document rejected"
                );
                Err(DteError::RemoteRejection(message))
            }
            Err(e) => {
                record.mark_error(e.to_string(), now)?;
                self.db.documents().save_submission(&record).await?;
                warn!(document_id = %document_id, error = %e, "SII upload failed");
                Err(e)
            }
        }
    }

    /// `submit`, retried with exponential backoff while the error is
    /// retryable.
    pub async fn submit_with_retry(
        &self,
        document_id: &str,
        signed: &SignedDocument,
        idempotency_key: &str,
    ) -> DteResult<SubmissionRecord> {
        backoff::future::retry(self.retry.backoff(), || async move {
            self.submit(document_id, signed, idempotency_key)
                .await
                .map_err(|e| {
                    if e.is_retryable() {
                        debug!(document_id = %document_id, error = %e, "Retrying submission");
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
        })
        .await
    }

    /// Polls the authority for a tracking id and applies the answer.
    ///
    /// A record that is already final is returned as-is without a remote
    /// call.
    pub async fn check_status(&self, tracking_id: &str) -> DteResult<SubmissionRecord> {
        let mut record = self
            .db
            .documents()
            .find_by_tracking_id(tracking_id)
            .await?
            .ok_or_else(|| DteError::from(DbError::not_found("submission", tracking_id)))?;

        if record.status.is_terminal() {
            return Ok(record);
        }

        let outcome = tokio::time::timeout(self.timeout, self.transport.query_status(tracking_id))
            .await
            .unwrap_or(Err(DteError::Timeout(self.timeout)));

        let now = Utc::now();
        match outcome {
            Ok(remote) => {
                // The authority knows the document, so an earlier error is moot.
                if record.status == SubmissionStatus::Error {
                    record.transition(SubmissionStatus::Sent)?;
                }
                let previous = record.status;
                record.apply_remote(remote.status, remote.message, now)?;
                self.db.documents().save_submission(&record).await?;

                if previous != record.status {
                    info!(
                        document_id = %record.document_id,
                        tracking_id = %tracking_id,
                        status = %record.status,
                        message = ?record.response_message,
                        "Submission status changed"
                    );
                }
                Ok(record)
            }
            Err(e @ DteError::Timeout(_)) => {
                warn!(tracking_id = %tracking_id, "SII status query timed out");
                Err(e)
            }
            Err(e) => {
                record.mark_error(e.to_string(), now)?;
                self.db.documents().save_submission(&record).await?;
                warn!(tracking_id = %tracking_id, error = %e, "SII status query failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caja_core::DocumentType;
    use caja_db::{DbConfig, StoredDocument};
    use chrono::NaiveDate;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSii {
        uploads: Mutex<VecDeque<DteResult<String>>>,
        statuses: Mutex<VecDeque<DteResult<RemoteStatus>>>,
        upload_calls: Mutex<Vec<String>>,
        hang: bool,
    }

    impl RecordingSii {
        fn with_uploads(uploads: Vec<DteResult<String>>) -> Self {
            Self {
                uploads: Mutex::new(VecDeque::from(uploads)),
                ..Default::default()
            }
        }

        async fn upload_calls(&self) -> Vec<String> {
            self.upload_calls.lock().await.clone()
        }
    }

    #[async_trait]
    impl SiiTransport for RecordingSii {
        async fn upload(&self, _signed_xml: &str, idempotency_key: &str) -> DteResult<String> {
            self.upload_calls.lock().await.push(idempotency_key.to_string());
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.uploads
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok("TRK-1".into()))
        }

        async fn query_status(&self, _tracking_id: &str) -> DteResult<RemoteStatus> {
            self.statuses.lock().await.pop_front().unwrap_or(Ok(RemoteStatus {
                status: SubmissionStatus::Sent,
                message: None,
            }))
        }
    }

    fn signed() -> SignedDocument {
        SignedDocument {
            xml: "<DTE><Signature></Signature></DTE>".into(),
            digest: "d".into(),
            signature: "s".into(),
        }
    }

    async fn setup(sii: Arc<RecordingSii>) -> (SubmissionClient, Arc<Database>) {
        setup_with_timeout(sii, Duration::from_secs(5)).await
    }

    async fn setup_with_timeout(
        sii: Arc<RecordingSii>,
        timeout: Duration,
    ) -> (SubmissionClient, Arc<Database>) {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        db.documents()
            .insert(
                &StoredDocument {
                    id: "doc-1".into(),
                    emitter_rut: "76123456-0".into(),
                    document_type: DocumentType::Boleta,
                    folio: 120,
                    issue_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                    total_amount: 44_500,
                    xml: "<DTE></DTE>".into(),
                    signed_xml: signed().xml,
                    created_at: Utc::now(),
                },
                &SubmissionRecord::new_pending("doc-1"),
            )
            .await
            .unwrap();

        let client = SubmissionClient::new(db.clone(), sii, timeout).with_retry(
            RetryPolicy {
                initial_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(5),
                max_elapsed: Duration::from_secs(5),
            },
        );
        (client, db)
    }

    const KEY: &str = "76123456-0-39-120";

    #[test]
    fn test_status_codes() {
        assert_eq!(status_from_code("EPR"), SubmissionStatus::Accepted);
        assert_eq!(status_from_code("dok"), SubmissionStatus::Accepted);
        assert_eq!(status_from_code("RCH"), SubmissionStatus::Rejected);
        assert_eq!(status_from_code("RECHAZADO"), SubmissionStatus::Rejected);
        assert_eq!(status_from_code("REC"), SubmissionStatus::Sent);
        assert_eq!(status_from_code("-11"), SubmissionStatus::Sent);
    }

    #[test]
    fn test_parse_upload_response() {
        let ok = "<RECEPCIONDTE><RUTSENDER>12345678-5</RUTSENDER><TRACKID>0123456789</TRACKID><STATUS>0</STATUS></RECEPCIONDTE>";
        assert_eq!(parse_upload_response(ok).unwrap(), "0123456789");

        let refused = "<RECEPCIONDTE><STATUS>7</STATUS></RECEPCIONDTE>";
        assert!(matches!(
            parse_upload_response(refused),
            Err(DteError::RemoteRejection(msg)) if msg == "upload status 7"
        ));

        assert!(matches!(
            parse_upload_response("<html>busy</html>"),
            Err(DteError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_status_response() {
        let body = "<SII:RESPUESTA><SII:RESP_HDR><ESTADO>RCH</ESTADO><GLOSA>Firma invalida</GLOSA></SII:RESP_HDR></SII:RESPUESTA>";
        let status = parse_status_response(body).unwrap();
        assert_eq!(status.status, SubmissionStatus::Rejected);
        assert_eq!(status.message.as_deref(), Some("Firma invalida"));

        let namespaced = "<SII:RESP_HDR><SII:ESTADO>EPR</SII:ESTADO></SII:RESP_HDR>";
        assert_eq!(
            parse_status_response(namespaced).unwrap().status,
            SubmissionStatus::Accepted
        );
    }

    #[tokio::test]
    async fn test_submit_success() {
        let sii = Arc::new(RecordingSii::with_uploads(vec![Ok("4567".into())]));
        let (client, db) = setup(sii.clone()).await;

        let record = client.submit("doc-1", &signed(), KEY).await.unwrap();
        assert_eq!(record.status, SubmissionStatus::Sent);
        assert_eq!(record.tracking_id.as_deref(), Some("4567"));
        assert_eq!(record.attempts, 1);

        let stored = db.documents().get_submission("doc-1").await.unwrap().unwrap();
        assert_eq!(stored, record);
        assert_eq!(sii.upload_calls().await, vec![KEY.to_string()]);
    }

    #[tokio::test]
    async fn test_transport_failure_marks_error() {
        let sii = Arc::new(RecordingSii::with_uploads(vec![Err(DteError::Transport(
            "connection refused".into(),
        ))]));
        let (client, db) = setup(sii).await;

        let err = client.submit("doc-1", &signed(), KEY).await.unwrap_err();
        assert!(err.is_retryable());

        let stored = db.documents().get_submission("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Error);
        assert!(stored.response_message.unwrap().contains("connection refused"));

        // error -> sent on the next attempt
        let record = client.submit("doc-1", &signed(), KEY).await.unwrap();
        assert_eq!(record.status, SubmissionStatus::Sent);
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test]
    async fn test_timeout_keeps_status() {
        let sii = Arc::new(RecordingSii {
            hang: true,
            ..Default::default()
        });
        let (client, db) = setup_with_timeout(sii, Duration::from_millis(50)).await;

        let err = client.submit("doc-1", &signed(), KEY).await.unwrap_err();
        assert!(matches!(err, DteError::Timeout(_)));

        let stored = db.documents().get_submission("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Pending);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_finalized_document_is_never_resent() {
        let sii = Arc::new(RecordingSii::default());
        let (client, db) = setup(sii.clone()).await;

        client.submit("doc-1", &signed(), KEY).await.unwrap();
        sii.statuses.lock().await.push_back(Ok(RemoteStatus {
            status: SubmissionStatus::Accepted,
            message: None,
        }));
        client.check_status("TRK-1").await.unwrap();
        assert_eq!(sii.upload_calls().await.len(), 1);

        let err = client.submit("doc-1", &signed(), KEY).await.unwrap_err();
        assert!(matches!(
            err,
            DteError::AlreadyFinalized { status: SubmissionStatus::Accepted, .. }
        ));
        assert_eq!(sii.upload_calls().await.len(), 1);

        let stored = db.documents().get_submission("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_rejection_keeps_remote_message() {
        let sii = Arc::new(RecordingSii::default());
        let (client, _db) = setup(sii.clone()).await;
        client.submit("doc-1", &signed(), KEY).await.unwrap();

        sii.statuses.lock().await.push_back(Ok(RemoteStatus {
            status: SubmissionStatus::Sent,
            message: None,
        }));
        sii.statuses.lock().await.push_back(Ok(RemoteStatus {
            status: SubmissionStatus::Rejected,
            message: Some("RCH - Folio fuera de rango CAF".into()),
        }));

        let still = client.check_status("TRK-1").await.unwrap();
        assert_eq!(still.status, SubmissionStatus::Sent);

        let record = client.check_status("TRK-1").await.unwrap();
        assert_eq!(record.status, SubmissionStatus::Rejected);
        assert_eq!(
            record.response_message.as_deref(),
            Some("RCH - Folio fuera de rango CAF")
        );

        // Final: polling again does not change anything
        assert_eq!(client.check_status("TRK-1").await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_submit_with_retry_recovers() {
        let sii = Arc::new(RecordingSii::with_uploads(vec![
            Err(DteError::Transport("reset".into())),
            Err(DteError::HttpStatus { status: 503, body: String::new() }),
            Ok("TRK-9".into()),
        ]));
        let (client, _db) = setup(sii.clone()).await;

        let record = client.submit_with_retry("doc-1", &signed(), KEY).await.unwrap();
        assert_eq!(record.tracking_id.as_deref(), Some("TRK-9"));
        assert_eq!(record.attempts, 3);
        assert_eq!(sii.upload_calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_submit_with_retry_stops_on_permanent_error() {
        let sii = Arc::new(RecordingSii::with_uploads(vec![Err(DteError::RemoteRejection(
            "upload status 5".into(),
        ))]));
        let (client, db) = setup(sii.clone()).await;

        let err = client.submit_with_retry("doc-1", &signed(), KEY).await.unwrap_err();
        assert!(matches!(err, DteError::RemoteRejection(_)));
        assert_eq!(sii.upload_calls().await.len(), 1);

        let stored = db.documents().get_submission("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Rejected);
    }

    #[tokio::test]
    async fn test_refused_upload_is_rejected_and_never_resent() {
        let sii = Arc::new(RecordingSii::with_uploads(vec![
            Err(DteError::Transport("connection reset".into())),
            Err(DteError::RemoteRejection("upload status 5 esquema invalido".into())),
        ]));
        let (client, db) = setup(sii.clone()).await;

        // pending -> error -> rejected
        client.submit("doc-1", &signed(), KEY).await.unwrap_err();
        let err = client.submit("doc-1", &signed(), KEY).await.unwrap_err();
        assert!(matches!(err, DteError::RemoteRejection(_)));

        let stored = db.documents().get_submission("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Rejected);
        assert_eq!(
            stored.response_message.as_deref(),
            Some("upload status 5 esquema invalido")
        );
        assert_eq!(stored.attempts, 2);

        let err = client.submit("doc-1", &signed(), KEY).await.unwrap_err();
        assert!(matches!(
            err,
            DteError::AlreadyFinalized { status: SubmissionStatus::Rejected, .. }
        ));
        assert_eq!(sii.upload_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_document() {
        let (client, _db) = setup(Arc::new(RecordingSii::default())).await;
        assert!(matches!(
            client.submit("nope", &signed(), KEY).await,
            Err(DteError::Database(_))
        ));
    }
}
