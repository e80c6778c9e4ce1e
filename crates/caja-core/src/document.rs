//! # Document Assembler
//!
//! Turns a finalized sale plus an allocated folio into a `TaxDocument`.
//!
//! ## Assembly Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        assemble(sale, emitter, folio)                   │
//! │                                                                         │
//! │  FinalizedSale ──┬──► lines non-empty, ≤ max for type                   │
//! │                  ├──► each line: qty > 0, price ≥ 0,                    │
//! │                  │    line_total == round(qty × price)                  │
//! │                  ├──► total == net + tax                                │
//! │                  ├──► receiver present if the type requires it          │
//! │                  └──► reference present for credit notes                │
//! │                              │                                          │
//! │                              ▼                                          │
//! │  TaxDocument { lines numbered 1..N in input order,                      │
//! │                amounts copied exactly, never recomputed }               │
//! │                              │                                          │
//! │                              ▼                                          │
//! │                     to_xml() ── deterministic bytes                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Assembly is pure. The folio comes from the allocator, which runs first.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Pesos;
use crate::types::{DocumentReference, DocumentType, Emitter, FinalizedSale, Quantity, Receiver};
use crate::validation::{
    validate_folio, validate_item_code, validate_quantity, validate_text, validate_unit_price,
    MAX_ITEM_NAME_LEN, MAX_LEGAL_NAME_LEN,
};
use crate::xml;

// =============================================================================
// Tax Document
// =============================================================================

/// One `Detalle/Item`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DocumentLine {
    /// `NroLinDet`, contiguous from 1.
    pub line_number: u32,
    pub code: String,
    pub name: String,
    pub quantity: Quantity,
    pub unit_price: Pesos,
    pub line_total: Pesos,
}

/// An electronic tax document (DTE), immutable once assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxDocument {
    pub document_type: DocumentType,
    pub folio: u64,
    #[ts(as = "String")]
    pub issue_date: NaiveDate,
    pub emitter: Emitter,
    pub receiver: Option<Receiver>,
    pub lines: Vec<DocumentLine>,
    pub net_amount: Pesos,
    pub tax_amount: Pesos,
    pub total_amount: Pesos,
    pub reference: Option<DocumentReference>,
}

impl TaxDocument {
    /// The `Documento ID` attribute, e.g. `F120T39`.
    pub fn document_id(&self) -> String {
        format!("F{}T{}", self.folio, self.document_type.code())
    }

    /// Key the tax authority deduplicates on: `{emitter_rut}-{type}-{folio}`.
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.emitter.rut,
            self.document_type.code(),
            self.folio
        )
    }

    /// Serializes to canonical DTE XML.
    pub fn to_xml(&self) -> String {
        xml::render_document(self)
    }
}

// =============================================================================
// Assembly
// =============================================================================

/// Builds a `TaxDocument` from a finalized sale.
///
/// ## Errors
/// `ValidationError` when the sale is malformed; see the module diagram.
///
/// ## Example
/// ```rust
/// use caja_core::{assemble, DocumentType, Emitter, FinalizedSale, Pesos, Quantity, Rut, SaleLine, IVA_RATE};
/// use chrono::NaiveDate;
///
/// let emitter = Emitter {
///     rut: Rut::parse("76.123.456-0").unwrap(),
///     legal_name: "Comercial Los Andes SpA".into(),
///     business_line: "Venta al por menor".into(),
///     address: "Av. Providencia 1234, Santiago".into(),
/// };
/// let sale = FinalizedSale::from_gross_lines(
///     "sale-1",
///     DocumentType::Boleta,
///     NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
///     vec![SaleLine::new("A1", "Pan", Quantity::from_units(1), Pesos::from_pesos(1_190))],
///     IVA_RATE,
/// );
///
/// let doc = assemble(&sale, &emitter, 1).unwrap();
/// assert_eq!(doc.total_amount, doc.net_amount + doc.tax_amount);
/// ```
pub fn assemble(
    sale: &FinalizedSale,
    emitter: &Emitter,
    folio: u64,
) -> Result<TaxDocument, ValidationError> {
    validate_folio(folio)?;
    validate_text("emitter legal name", &emitter.legal_name, MAX_LEGAL_NAME_LEN)?;

    let document_type = sale.document_type;

    if sale.lines.is_empty() {
        return Err(ValidationError::EmptyDocument);
    }
    if sale.lines.len() > document_type.max_lines() {
        return Err(ValidationError::TooManyLines {
            document_type,
            max: document_type.max_lines(),
            actual: sale.lines.len(),
        });
    }

    let mut lines = Vec::with_capacity(sale.lines.len());
    for (index, line) in sale.lines.iter().enumerate() {
        let line_number = index + 1;

        validate_item_code(&line.code)?;
        validate_text("item name", &line.name, MAX_ITEM_NAME_LEN)?;
        validate_quantity(line.quantity)?;
        validate_unit_price(line.unit_price)?;

        let expected = line.unit_price.multiply_quantity(line.quantity);
        if expected != line.line_total {
            return Err(ValidationError::LineTotalMismatch {
                line: line_number,
                expected,
                actual: line.line_total,
            });
        }

        lines.push(DocumentLine {
            line_number: line_number as u32,
            code: line.code.trim().to_string(),
            name: line.name.trim().to_string(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: line.line_total,
        });
    }

    if sale.net_amount + sale.tax_amount != sale.total_amount {
        return Err(ValidationError::TotalsMismatch {
            net: sale.net_amount,
            tax: sale.tax_amount,
            total: sale.total_amount,
        });
    }

    if document_type.requires_receiver() {
        let receiver = sale
            .receiver
            .as_ref()
            .ok_or(ValidationError::MissingReceiver { document_type })?;
        validate_text("receiver legal name", &receiver.legal_name, MAX_LEGAL_NAME_LEN)?;
    }

    if document_type.requires_reference() {
        let reference = sale
            .reference
            .as_ref()
            .ok_or(ValidationError::MissingReference { document_type })?;
        validate_folio(reference.folio)?;
    }

    Ok(TaxDocument {
        document_type,
        folio,
        issue_date: sale.issue_date,
        emitter: emitter.clone(),
        receiver: sale.receiver.clone(),
        lines,
        net_amount: sale.net_amount,
        tax_amount: sale.tax_amount,
        total_amount: sale.total_amount,
        reference: sale.reference.clone(),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
