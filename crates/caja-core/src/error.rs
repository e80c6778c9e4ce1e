//! # Error Types
//!
//! Domain-specific error types for caja-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  caja-core errors (this file)                                          │
//! │  ├── CoreError        - Folio and submission rule violations           │
//! │  └── ValidationError  - Malformed input to the assembler               │
//! │                                                                         │
//! │  caja-db errors (separate crate)                                       │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  caja-dte errors                                                       │
//! │  └── DteError         - What the checkout UI sees                      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DteError → UI remediation         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (folio, line number, RUT)
//! 3. Errors are enum variants, never String
//! 4. Each error variant maps to a user-facing remediation

use thiserror::Error;

use crate::money::Pesos;
use crate::submission::SubmissionStatus;
use crate::types::DocumentType;

// =============================================================================
// Core Error
// =============================================================================

/// Core business rule errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The folio pool for a document type has no folios left.
    ///
    /// ## When This Occurs
    /// - `next_available > range_end` on the local CAF range
    /// - The remote authority reports the range as used up
    ///
    /// ## User Workflow
    /// ```text
    /// Emitir boleta
    ///      │
    ///      ▼
    /// allocate(Boleta) ──► FolioExhausted
    ///      │
    ///      ▼
    /// refill once ──► FolioExhausted again
    ///      │
    ///      ▼
    /// UI shows: "Solicitar nuevo rango de folios"
    /// ```
    #[error("No folios left for {document_type} (range ended at {range_end})")]
    FolioExhausted {
        document_type: DocumentType,
        range_end: u64,
    },

    /// A folio range is malformed.
    #[error("Invalid folio range {start}..={end}")]
    InvalidFolioRange { start: u64, end: u64 },

    /// The document already reached a terminal submission state.
    ///
    /// ## When This Occurs
    /// - Resubmitting a document that was accepted
    /// - Resubmitting a document that was rejected (a new folio is needed)
    #[error("Document {document_id} is already {status}")]
    AlreadyFinalized {
        document_id: String,
        status: SubmissionStatus,
    },

    /// A submission state change that the state machine does not allow.
    #[error("Invalid submission transition: {from} -> {to}")]
    InvalidTransition {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These are local errors: they are never retried, and the caller must fix
/// the sale before asking for a document again.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid date, unknown JSON shape).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// RUT fails the mod-11 check or is malformed.
    #[error("Invalid RUT '{value}': {reason}")]
    InvalidRut { value: String, reason: String },

    /// A document needs at least one line.
    #[error("Document has no line items")]
    EmptyDocument,

    /// More lines than the document type accepts.
    #[error("{document_type} accepts at most {max} lines, got {actual}")]
    TooManyLines {
        document_type: DocumentType,
        max: usize,
        actual: usize,
    },

    /// `total != net + tax`.
    #[error("Totals do not reconcile: net {net} + tax {tax} != total {total}")]
    TotalsMismatch { net: Pesos, tax: Pesos, total: Pesos },

    /// A line total is not `round(quantity * unit_price)`.
    #[error("Line {line}: total {actual} does not match quantity x price ({expected})")]
    LineTotalMismatch {
        line: usize,
        expected: Pesos,
        actual: Pesos,
    },

    /// The document type requires a receiver block.
    #[error("{document_type} requires a receiver")]
    MissingReceiver { document_type: DocumentType },

    /// A credit note must reference the document it corrects.
    #[error("{document_type} requires a reference document")]
    MissingReference { document_type: DocumentType },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
