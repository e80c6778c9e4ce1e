//! # Repository Module
//!
//! Database repository implementations for Caja POS.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  SyncEngine                                                            │
//! │       │  db.reference().upsert("empresa-1", &entity)                   │
//! │       ▼                                                                 │
//! │  ReferenceRepository                                                   │
//! │  ├── upsert(&self, empresa_id, entity)                                 │
//! │  ├── get(&self, kind, id)                                              │
//! │  └── list(&self, kind, empresa_id)                                     │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`reference::ReferenceRepository`] - Products, promotions and clients (last-write-wins)
//! - [`outbound::OutboundRepository`] - FIFO queue of sales and cash movements
//! - [`folio::FolioRepository`] - Atomic folio allocation from CAF ranges
//! - [`document::DocumentRepository`] - Signed documents and submission records

pub mod document;
pub mod folio;
pub mod outbound;
pub mod reference;
