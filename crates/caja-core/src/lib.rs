//! # caja-core: Pure Domain Logic for Caja POS
//!
//! This crate holds the tax-document rules of Caja POS as pure functions
//! with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Caja POS Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Checkout UI (external collaborator)                │   │
//! │  │      Sale finalized ──► "Emitir boleta" ──► status badge        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                caja-dte (pipeline + sync engine)                │   │
//! │  │     allocate folio ──► assemble ──► sign ──► submit ──► poll    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ caja-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │ document  │  │   folio   │  │   │
//! │  │   │  Rut      │  │   Pesos   │  │ TaxDoc    │  │ FolioPool │  │   │
//! │  │   │  Sale     │  │  IVA split│  │ xml       │  │submission │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Rut, FinalizedSale, SyncEntity, OutboundEvent)
//! - [`money`] - Integer pesos with IVA split (no floating point!)
//! - [`document`] - Document Assembler: sale + folio ──► `TaxDocument`
//! - [`xml`] - Deterministic DTE XML serialization
//! - [`folio`] - Folio pool arithmetic
//! - [`submission`] - Submission state machine
//! - [`error`] - Domain error types
//! - [`validation`] - Field-level validation
//!
//! ## Example Usage
//!
//! ```rust
//! use caja_core::money::Pesos;
//! use caja_core::IVA_RATE;
//!
//! // A boleta total always includes IVA
//! let (net, tax) = Pesos::from_pesos(44_500).split_gross(IVA_RATE);
//! assert_eq!(net.amount(), 37_395);
//! assert_eq!(tax.amount(), 7_105);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod document;
pub mod error;
pub mod folio;
pub mod money;
pub mod submission;
pub mod types;
pub mod validation;
pub mod xml;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use document::{assemble, DocumentLine, TaxDocument};
pub use error::{CoreError, CoreResult, ValidationError};
pub use folio::FolioPool;
pub use money::Pesos;
pub use submission::{SubmissionRecord, SubmissionStatus};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Chilean IVA (value-added tax): 19%.
pub const IVA_RATE: TaxRate = TaxRate::from_bps(1900);

/// Maximum `Detalle` lines in a boleta.
pub const MAX_BOLETA_LINES: usize = 1000;

/// Maximum `Detalle` lines in a factura or nota de crédito.
pub const MAX_FACTURA_LINES: usize = 60;
