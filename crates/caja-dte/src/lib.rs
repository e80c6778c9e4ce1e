//! # caja-dte: Tax Documents and Back Office Sync for Caja POS
//!
//! This crate turns finalized sales into signed electronic tax documents
//! (DTE), submits them to the SII, and keeps the terminal in step with the
//! Back Office.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         caja-dte Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    DteService (issuing pipeline)                 │  │
//! │  │                                                                  │  │
//! │  │   FinalizedSale ─► folio ─► assemble ─► sign ─► store ─► submit  │  │
//! │  └───────┬───────────────────────┬─────────────────────┬────────────┘  │
//! │          ▼                       ▼                     ▼               │
//! │  ┌────────────────┐  ┌────────────────────┐  ┌────────────────────┐   │
//! │  │ FolioAllocator │  │ Signer             │  │ SubmissionClient   │   │
//! │  │                │  │                    │  │                    │   │
//! │  │ Back Office or │  │ Certificate-backed │  │ SiiTransport with  │   │
//! │  │ local CAF pool │  │ digest + signature │  │ timeout + backoff  │   │
//! │  └────────────────┘  └────────────────────┘  └────────────────────┘   │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    SyncEngine (background)                       │  │
//! │  │                                                                  │  │
//! │  │  push outbound events (FIFO per kind) ──► BackOfficeApi          │  │
//! │  │  pull products / promotions / clients ◄── BackOfficeApi          │  │
//! │  │  refill CAF folio ranges                                         │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Terminal configuration (TOML file + environment)
//! - [`error`] - Error types and retry classification
//! - [`backoffice`] - Back Office HTTP API client
//! - [`folio`] - Folio authorities and the allocator
//! - [`signer`] - Document signing
//! - [`submission`] - SII transport and submission state handling
//! - [`pipeline`] - The issuing pipeline (`DteService`)
//! - [`sync`] - Back Office sync engine
//!
//! ## Usage
//!
//! ```rust,ignore
//! use caja_dte::{BackOfficeClient, DteConfig, DteService, HttpSiiTransport};
//!
//! let config = DteConfig::load_or_default(None);
//! let api = Arc::new(BackOfficeClient::new(&config)?);
//! let sii = Arc::new(HttpSiiTransport::new(&config)?);
//! let service = DteService::from_config(&config, db, api, sii)?;
//!
//! let issued = service.issue(&sale).await?;
//! println!("{} -> {}", issued.document.document_id(), issued.record.status);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod backoffice;
pub mod config;
pub mod error;
pub mod folio;
pub mod pipeline;
pub mod signer;
pub mod submission;
pub mod sync;

// =============================================================================
// Re-exports
// =============================================================================

pub use backoffice::{BackOfficeApi, BackOfficeClient, CafRange};
pub use config::{DteConfig, Environment, FolioSource, SyncSettings};
pub use error::{DteError, DteResult};
pub use folio::{install_caf, CafFolioAuthority, FolioAllocator, FolioAuthority, RemoteFolioAuthority};
pub use pipeline::{DteService, IssuedDocument};
pub use signer::{Certificate, CertificateSigner, SignedDocument, Signer};
pub use submission::{HttpSiiTransport, RemoteStatus, RetryPolicy, SiiTransport, SubmissionClient};
pub use sync::{CycleReport, FlushReport, PullReport, SyncEngine, SyncEngineHandle};
