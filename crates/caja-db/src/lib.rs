//! # caja-db: Database Layer for Caja POS
//!
//! Local SQLite storage for one terminal, using sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Caja POS Data Flow                               │
//! │                                                                         │
//! │  caja-dte (DteService, SyncEngine, CafFolioAuthority)                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     caja-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ Reference      │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ Outbound       │    │ 001_init.sql │  │   │
//! │  │   │               │    │ Folio          │    │              │  │   │
//! │  │   │               │    │ Document       │    │              │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file (WAL mode)                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use caja_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("./caja.db")).await?;
//! let folio = db.folios().next(DocumentType::Boleta).await?;
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::document::{DocumentRepository, StoredDocument};
pub use repository::folio::FolioRepository;
pub use repository::outbound::OutboundRepository;
pub use repository::reference::{ReferenceRepository, UpsertOutcome};
