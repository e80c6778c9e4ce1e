//! # Back Office Client
//!
//! JSON over HTTP to the Back Office, the system of record.
//!
//! ## Endpoints
//! ```text
//! ┌──────────────────────────────┬──────────────────────────────────────────┐
//! │ POST /auth/terminal          │ {terminal_id, rut} → {success}          │
//! │ GET  /sync/{kind}            │ ?empresa_id= → [entity, ...]            │
//! │ GET  /sync/caf               │ ?empresa_id=&tipo= → {tipo,desde,hasta} │
//! │ POST /transactions           │ event JSON, Idempotency-Key header      │
//! │ POST /folio/next             │ {empresa_id, tipo_documento} → {folio}  │
//! └──────────────────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! Paths are joined onto the configured base URL, so a base of
//! `https://bo.example.cl/api/` yields `https://bo.example.cl/api/sync/caf`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use caja_core::{DocumentType, EntityKind, OutboundEvent};

use crate::config::{as_base_url, DteConfig};
use crate::error::{DteError, DteResult};

/// A CAF folio range granted by the Back Office.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CafRange {
    /// SII document type code.
    pub tipo: u16,
    pub desde: u64,
    pub hasta: u64,
}

/// Everything the core needs from the Back Office.
#[async_trait]
pub trait BackOfficeApi: Send + Sync {
    /// Registers this terminal; `false` means the Back Office refused it.
    async fn authenticate_terminal(&self, terminal_id: &str, rut: &str) -> DteResult<bool>;

    /// Raw reference records of one kind. Elements are parsed by the caller.
    async fn fetch_entities(&self, kind: EntityKind, empresa_id: &str) -> DteResult<Vec<Value>>;

    async fn fetch_caf(&self, empresa_id: &str, document_type: DocumentType) -> DteResult<CafRange>;

    /// Delivers one outbound event. Safe to repeat: the event id is sent as
    /// the idempotency key.
    async fn send_transaction(&self, event: &OutboundEvent) -> DteResult<()>;

    /// Takes the next folio from the remote authority.
    async fn next_folio(&self, empresa_id: &str, document_type: DocumentType) -> DteResult<u64>;
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct AuthResponse {
    success: bool,
}

#[derive(Debug, Deserialize)]
struct FolioResponse {
    folio: u64,
}

/// List endpoints answer either a bare array or `{"data": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListResponse {
    Bare(Vec<Value>),
    Wrapped { data: Vec<Value> },
}

impl ListResponse {
    fn into_items(self) -> Vec<Value> {
        match self {
            ListResponse::Bare(items) => items,
            ListResponse::Wrapped { data } => data,
        }
    }
}

// =============================================================================
// HTTP Client
// =============================================================================

#[derive(Clone)]
pub struct BackOfficeClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for BackOfficeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackOfficeClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl BackOfficeClient {
    pub fn new(config: &DteConfig) -> DteResult<Self> {
        Self::with_base_url(config.backoffice_url()?, config.backoffice_timeout())
    }

    pub fn with_base_url(base_url: Url, timeout: Duration) -> DteResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("caja-pos/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: as_base_url(base_url),
        })
    }

    fn endpoint(&self, path: &str) -> DteResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Turns a non-2xx response into `HttpStatus`.
    async fn check(res: reqwest::Response) -> DteResult<reqwest::Response> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        warn!(status = %status, body = %body, "Back Office returned an error");
        Err(DteError::HttpStatus {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl BackOfficeApi for BackOfficeClient {
    async fn authenticate_terminal(&self, terminal_id: &str, rut: &str) -> DteResult<bool> {
        let res = self
            .http
            .post(self.endpoint("auth/terminal")?)
            .json(&json!({ "terminal_id": terminal_id, "rut": rut }))
            .send()
            .await?;

        if res.status() == StatusCode::UNAUTHORIZED || res.status() == StatusCode::FORBIDDEN {
            return Ok(false);
        }

        let auth: AuthResponse = Self::check(res).await?.json().await?;
        debug!(terminal_id = %terminal_id, success = auth.success, "Terminal authentication");
        Ok(auth.success)
    }

    async fn fetch_entities(&self, kind: EntityKind, empresa_id: &str) -> DteResult<Vec<Value>> {
        let mut url = self.endpoint(&format!("sync/{}", kind.as_str()))?;
        url.query_pairs_mut().append_pair("empresa_id", empresa_id);

        let res = self.http.get(url).send().await?;
        let list: ListResponse = Self::check(res).await?.json().await?;
        let items = list.into_items();

        debug!(kind = %kind, count = items.len(), "Fetched reference data");
        Ok(items)
    }

    async fn fetch_caf(&self, empresa_id: &str, document_type: DocumentType) -> DteResult<CafRange> {
        let mut url = self.endpoint("sync/caf")?;
        url.query_pairs_mut()
            .append_pair("empresa_id", empresa_id)
            .append_pair("tipo", &document_type.code().to_string());

        let res = self.http.get(url).send().await?;
        let caf: CafRange = Self::check(res).await?.json().await?;

        if caf.tipo != document_type.code() {
            return Err(DteError::InvalidResponse(format!(
                "asked CAF for type {}, got type {}",
                document_type.code(),
                caf.tipo
            )));
        }

        Ok(caf)
    }

    async fn send_transaction(&self, event: &OutboundEvent) -> DteResult<()> {
        let payload: Value = serde_json::from_str(&event.payload)?;
        let body = json!({
            "id": event.id,
            "kind": event.kind,
            "entity_id": event.entity_id,
            "created_at": event.created_at,
            "payload": payload,
        });

        let res = self
            .http
            .post(self.endpoint("transactions")?)
            .header("Idempotency-Key", &event.id)
            .json(&body)
            .send()
            .await?;

        Self::check(res).await?;
        Ok(())
    }

    async fn next_folio(&self, empresa_id: &str, document_type: DocumentType) -> DteResult<u64> {
        let res = self
            .http
            .post(self.endpoint("folio/next")?)
            .json(&json!({
                "empresa_id": empresa_id,
                "tipo_documento": document_type.code(),
            }))
            .send()
            .await?;

        // 409/410: the authority has no folios left for this type
        if res.status() == StatusCode::CONFLICT || res.status() == StatusCode::GONE {
            return Err(DteError::FolioExhausted { document_type });
        }

        let folio: FolioResponse = Self::check(res).await?.json().await?;
        if folio.folio == 0 {
            return Err(DteError::InvalidResponse("folio 0 from Back Office".into()));
        }
        Ok(folio.folio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_onto_base() {
        let client = BackOfficeClient::with_base_url(
            Url::parse("https://bo.example.cl/api/").unwrap(),
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            client.endpoint("sync/caf").unwrap().as_str(),
            "https://bo.example.cl/api/sync/caf"
        );
        assert_eq!(
            client.endpoint("folio/next").unwrap().as_str(),
            "https://bo.example.cl/api/folio/next"
        );
    }

    #[test]
    fn test_base_without_trailing_slash_keeps_its_path() {
        let client = BackOfficeClient::with_base_url(
            Url::parse("https://bo.example.cl/api").unwrap(),
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            client.endpoint("sync/products").unwrap().as_str(),
            "https://bo.example.cl/api/sync/products"
        );
    }

    #[test]
    fn test_list_response_shapes() {
        let bare: ListResponse = serde_json::from_str(r#"[{"id":"p1"},{"id":"p2"}]"#).unwrap();
        assert_eq!(bare.into_items().len(), 2);

        let wrapped: ListResponse = serde_json::from_str(r#"{"data":[{"id":"p1"}]}"#).unwrap();
        assert_eq!(wrapped.into_items().len(), 1);
    }

    #[test]
    fn test_caf_range_wire_format() {
        let caf: CafRange = serde_json::from_str(r#"{"tipo":39,"desde":1001,"hasta":2000}"#).unwrap();
        assert_eq!(caf, CafRange { tipo: 39, desde: 1001, hasta: 2000 });
    }

    #[test]
    fn test_debug_shows_base_url() {
        let client = BackOfficeClient::with_base_url(
            Url::parse("http://localhost:8000/").unwrap(),
            Duration::from_secs(5),
        )
        .unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.starts_with("BackOfficeClient"));
        assert!(debug.contains("localhost"));
    }
}
