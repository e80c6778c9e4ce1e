//! Recording fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use caja_core::{DocumentType, EntityKind, OutboundEvent, Rut, SubmissionStatus};
use caja_db::{Database, DbConfig};
use caja_dte::{
    BackOfficeApi, CafRange, Certificate, CertificateSigner, DteConfig, DteError, DteResult,
    RemoteStatus, SiiTransport,
};

pub const EMITTER_RUT: &str = "76123456-0";

pub async fn memory_db() -> Arc<Database> {
    Arc::new(Database::new(DbConfig::in_memory()).await.unwrap())
}

/// A WAL database file under the temp dir with a real connection pool, so
/// concurrent writers contend the way they do on a terminal.
pub async fn file_db(max_connections: u32) -> (Arc<Database>, PathBuf) {
    let path = std::env::temp_dir().join(format!("caja-test-{}.db", uuid::Uuid::new_v4()));
    let config = DbConfig::new(&path).max_connections(max_connections);
    (Arc::new(Database::new(config).await.unwrap()), path)
}

pub fn remove_db_files(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        let _ = std::fs::remove_file(file);
    }
}

pub fn test_config() -> DteConfig {
    let mut config = DteConfig::default();
    config.company.empresa_id = "empresa-1".into();
    config.company.terminal_id = "caja-01".into();
    config.emitter.rut = EMITTER_RUT.into();
    config.emitter.legal_name = "Comercial Los Andes SpA".into();
    config.emitter.business_line = "Venta al por menor de calzado".into();
    config.emitter.address = "Av. Providencia 1234, Santiago".into();
    config.sync.batch_size = 50;
    config.sync.max_concurrency = 4;
    config
}

pub fn test_signer() -> CertificateSigner {
    CertificateSigner::new(Certificate::from_seed(
        [7u8; 32],
        Rut::parse(EMITTER_RUT).unwrap(),
        None,
        None,
    ))
}

// =============================================================================
// Back Office
// =============================================================================

/// Back Office whose answers are queued up front.
#[derive(Default)]
pub struct RecordingBackOffice {
    pub entities: Mutex<HashMap<EntityKind, Vec<Value>>>,
    /// Popped per `send_transaction`; empty means success.
    pub send_results: Mutex<VecDeque<DteResult<()>>>,
    /// Entity ids of delivered events, in delivery order.
    pub delivered: Mutex<Vec<String>>,
    pub send_attempts: Mutex<u32>,
    pub caf: Mutex<Option<CafRange>>,
    pub next_folio: Mutex<u64>,
}

impl RecordingBackOffice {
    pub async fn fail_next_sends(&self, count: usize) {
        let mut results = self.send_results.lock().await;
        for _ in 0..count {
            results.push_back(Err(DteError::Transport("connection refused".into())));
        }
    }

    pub async fn delivered(&self) -> Vec<String> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl BackOfficeApi for RecordingBackOffice {
    async fn authenticate_terminal(&self, _terminal_id: &str, _rut: &str) -> DteResult<bool> {
        Ok(true)
    }

    async fn fetch_entities(&self, kind: EntityKind, _empresa_id: &str) -> DteResult<Vec<Value>> {
        Ok(self
            .entities
            .lock()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_caf(&self, _empresa_id: &str, document_type: DocumentType) -> DteResult<CafRange> {
        self.caf
            .lock()
            .await
            .ok_or(DteError::FolioExhausted { document_type })
    }

    async fn send_transaction(&self, event: &OutboundEvent) -> DteResult<()> {
        *self.send_attempts.lock().await += 1;
        let result = self.send_results.lock().await.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.delivered.lock().await.push(event.entity_id.clone());
        }
        result
    }

    async fn next_folio(&self, _empresa_id: &str, _document_type: DocumentType) -> DteResult<u64> {
        let mut next = self.next_folio.lock().await;
        *next += 1;
        Ok(*next)
    }
}

// =============================================================================
// SII
// =============================================================================

/// SII transport that records every call.
#[derive(Default)]
pub struct RecordingSii {
    pub uploads: Mutex<VecDeque<DteResult<String>>>,
    pub statuses: Mutex<VecDeque<DteResult<RemoteStatus>>>,
    pub upload_calls: Mutex<Vec<(String, String)>>,
    pub status_calls: Mutex<Vec<String>>,
}

impl RecordingSii {
    pub fn with_uploads(uploads: Vec<DteResult<String>>) -> Self {
        Self {
            uploads: Mutex::new(VecDeque::from(uploads)),
            ..Default::default()
        }
    }

    pub async fn push_status(&self, status: SubmissionStatus, message: Option<&str>) {
        self.statuses.lock().await.push_back(Ok(RemoteStatus {
            status,
            message: message.map(str::to_string),
        }));
    }

    pub async fn upload_count(&self) -> usize {
        self.upload_calls.lock().await.len()
    }

    pub async fn status_count(&self) -> usize {
        self.status_calls.lock().await.len()
    }
}

#[async_trait]
impl SiiTransport for RecordingSii {
    async fn upload(&self, signed_xml: &str, idempotency_key: &str) -> DteResult<String> {
        self.upload_calls
            .lock()
            .await
            .push((idempotency_key.to_string(), signed_xml.to_string()));
        self.uploads
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok("TRK-1".into()))
    }

    async fn query_status(&self, tracking_id: &str) -> DteResult<RemoteStatus> {
        self.status_calls.lock().await.push(tracking_id.to_string());
        self.statuses
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(RemoteStatus {
                status: SubmissionStatus::Sent,
                message: None,
            }))
    }
}

pub const SII_TIMEOUT: Duration = Duration::from_secs(5);
