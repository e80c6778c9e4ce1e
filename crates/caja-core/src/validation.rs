//! # Validation Module
//!
//! Field-level validation for sale lines and parties.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Checkout UI                                                  │
//! │  └── Immediate feedback (empty fields, RUT typing)                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Document Assembler (Rust)                                    │
//! │  ├── THIS MODULE: per-field rules                                      │
//! │  └── document.rs: totals and per-type requirements                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  └── UNIQUE (emitter_rut, document_type, folio)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::money::Pesos;
use crate::types::{Quantity, Rut};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest `CdgItem` accepted.
pub const MAX_ITEM_CODE_LEN: usize = 35;

/// Longest `NmbItem` accepted.
pub const MAX_ITEM_NAME_LEN: usize = 80;

/// Longest `RznSoc` / `RznSocRecep` accepted.
pub const MAX_LEGAL_NAME_LEN: usize = 100;

// =============================================================================
// String Validators
// =============================================================================

/// Validates an item code (`CdgItem`).
///
/// ## Rules
/// - Must not be empty
/// - At most 35 characters
/// - Letters, digits, hyphens, underscores and dots only
///
/// ## Example
/// ```rust
/// use caja_core::validation::validate_item_code;
///
/// assert!(validate_item_code("COCA-350").is_ok());
/// assert!(validate_item_code("").is_err());
/// assert!(validate_item_code("has space").is_err());
/// ```
pub fn validate_item_code(code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "item code".to_string(),
        });
    }

    if code.chars().count() > MAX_ITEM_CODE_LEN {
        return Err(ValidationError::TooLong {
            field: "item code".to_string(),
            max: MAX_ITEM_CODE_LEN,
        });
    }

    if !code
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ValidationError::InvalidFormat {
            field: "item code".to_string(),
            reason: "must contain only letters, numbers, dots, hyphens, and underscores"
                .to_string(),
        });
    }

    Ok(())
}

/// Validates a free-text field: non-empty and at most `max` characters.
pub fn validate_text(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(())
}

/// Validates and normalizes a RUT string.
///
/// ## Example
/// ```rust
/// use caja_core::validation::validate_rut;
///
/// assert_eq!(validate_rut("76.123.456-0").unwrap().to_string(), "76123456-0");
/// assert!(validate_rut("76.123.456-9").is_err());
/// ```
pub fn validate_rut(value: &str) -> ValidationResult<Rut> {
    Rut::parse(value)
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be strictly positive. Returns are credit notes, never negative lines.
pub fn validate_quantity(qty: Quantity) -> ValidationResult<()> {
    if !qty.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    Ok(())
}

/// Validates a unit price.
///
/// ## Rules
/// - Must be non-negative (>= 0)
/// - Zero is allowed (gifts, promotional items)
pub fn validate_unit_price(price: Pesos) -> ValidationResult<()> {
    if price.is_negative() {
        return Err(ValidationError::OutOfRange {
            field: "unit price".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a folio number. Folio 0 does not exist.
pub fn validate_folio(folio: u64) -> ValidationResult<()> {
    if folio == 0 {
        return Err(ValidationError::MustBePositive {
            field: "folio".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
