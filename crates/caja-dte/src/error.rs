//! # DTE Error Types
//!
//! Error types for the issuing pipeline and the sync engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       DTE Error Categories                              │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Remote              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Transport      │  │  HttpStatus             │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  RemoteRejection        │ │
//! │  │  ConfigLoad/Save│  │                 │  │  InvalidResponse        │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Document     │  │     Folios      │  │      Signing            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Validation     │  │  FolioExhausted │  │  NoActiveCertificate    │ │
//! │  │  AlreadyFinal.  │  │  InvalidRange   │  │  CertificateExpired     │ │
//! │  │  InvalidTrans.  │  │  DuplicateFolio │  │  Signing                │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Checkout Remediation
//! | Error                | UI action                         |
//! |----------------------|-----------------------------------|
//! | `Validation`         | fix the sale                      |
//! | `FolioExhausted`     | "Solicitar nuevo rango de folios" |
//! | `DuplicateFolio`     | report it, retry the sale         |
//! | `Signing`            | check the certificate             |
//! | retryable            | leave queued, retry later         |
//! | `RemoteRejection`    | show the authority's message      |
//! | `AlreadyFinalized`   | nothing to do                     |

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use caja_core::{CoreError, DocumentType, SubmissionStatus, ValidationError};

/// Result type alias for DTE operations.
pub type DteResult<T> = Result<T, DteError>;

/// Error type covering every pipeline and sync failure.
#[derive(Debug, Error)]
pub enum DteError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid endpoint URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Document Errors
    // =========================================================================
    /// The sale cannot become a tax document.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The document already reached `accepted` or `rejected`.
    ///
    /// ## When This Occurs
    /// - Resubmitting an accepted document
    /// - Resubmitting a rejected document (a new folio is needed instead)
    #[error("Document {document_id} is already {status}")]
    AlreadyFinalized {
        document_id: String,
        status: SubmissionStatus,
    },

    /// A submission transition the state machine forbids.
    #[error("Invalid submission transition: {from} -> {to}")]
    InvalidTransition {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },

    // =========================================================================
    // Folio Errors
    // =========================================================================
    /// No folios left, even after one refill.
    ///
    /// ## When This Occurs
    /// - The CAF range is used up and the Back Office has no new range
    /// - The remote folio authority answered 409/410
    #[error("No folios available for {document_type}")]
    FolioExhausted { document_type: DocumentType },

    /// A document with this `{rut}-{type}-{folio}` is already stored.
    ///
    /// ## When This Occurs
    /// - The remote folio authority handed out a folio twice
    /// - Local data was restored over newer issued documents
    #[error("Folio already issued: {key}")]
    DuplicateFolio { key: String },

    /// A CAF range received from the Back Office is malformed.
    #[error("Invalid folio range {start}..={end}")]
    InvalidFolioRange { start: u64, end: u64 },

    // =========================================================================
    // Signing Errors
    // =========================================================================
    /// No certificate is configured or loaded.
    #[error("No active signing certificate")]
    NoActiveCertificate,

    /// The certificate is outside its validity window.
    #[error("Signing certificate expired at {not_after}")]
    CertificateExpired { not_after: DateTime<Utc> },

    /// Any other signing failure (unreadable key, bad seed length).
    #[error("Signing failed: {0}")]
    Signing(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The request never produced an HTTP response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote did not answer in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// Unexpected HTTP status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The remote explicitly refused the request.
    #[error("Rejected by remote: {0}")]
    RemoteRejection(String),

    /// The remote answered with something we cannot parse.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// Local database failure.
    #[error("Database error: {0}")]
    Database(String),

    /// JSON serialization failure.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Sync engine is shutting down.
    #[error("Sync engine is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for DteError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::FolioExhausted { document_type, .. } => {
                DteError::FolioExhausted { document_type }
            }
            CoreError::InvalidFolioRange { start, end } => {
                DteError::InvalidFolioRange { start, end }
            }
            CoreError::AlreadyFinalized {
                document_id,
                status,
            } => DteError::AlreadyFinalized {
                document_id,
                status,
            },
            CoreError::InvalidTransition { from, to } => DteError::InvalidTransition { from, to },
            CoreError::Validation(v) => DteError::Validation(v),
        }
    }
}

impl From<caja_db::DbError> for DteError {
    fn from(err: caja_db::DbError) -> Self {
        match err {
            caja_db::DbError::UniqueViolation { field, value } if field == "folio" => {
                DteError::DuplicateFolio { key: value }
            }
            other => DteError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for DteError {
    fn from(err: serde_json::Error) -> Self {
        DteError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for DteError {
    fn from(err: url::ParseError) -> Self {
        DteError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for DteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DteError::Transport(format!("request timed out: {}", err))
        } else if err.is_decode() {
            DteError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            DteError::HttpStatus {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            DteError::Transport(err.to_string())
        }
    }
}

impl From<std::io::Error> for DteError {
    fn from(err: std::io::Error) -> Self {
        DteError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for DteError {
    fn from(err: toml::de::Error) -> Self {
        DteError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for DteError {
    fn from(err: toml::ser::Error) -> Self {
        DteError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl DteError {
    /// Returns true if the operation can be retried as-is.
    ///
    /// ## Retryable Errors
    /// - Transport failures (network issues)
    /// - Timeouts
    /// - HTTP 5xx and 429
    ///
    /// ## Non-Retryable Errors
    /// - Validation, signing and configuration errors
    /// - Remote rejections and other 4xx
    /// - Terminal submission states
    pub fn is_retryable(&self) -> bool {
        match self {
            DteError::Transport(_) | DteError::Timeout(_) => true,
            DteError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if a folio refill might resolve the error.
    pub fn requires_folio_refill(&self) -> bool {
        matches!(self, DteError::FolioExhausted { .. })
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            DteError::InvalidConfig(_)
                | DteError::InvalidUrl(_)
                | DteError::ConfigLoadFailed(_)
                | DteError::ConfigSaveFailed(_)
        )
    }

    /// Returns true for certificate and signature failures.
    pub fn is_signing_error(&self) -> bool {
        matches!(
            self,
            DteError::NoActiveCertificate
                | DteError::CertificateExpired { .. }
                | DteError::Signing(_)
        )
    }
}
