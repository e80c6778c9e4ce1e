//! # Domain Types
//!
//! Core domain types used throughout Caja POS.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  FinalizedSale  │   │   SyncEntity    │   │  OutboundEvent  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  document_type  │   │  Product        │   │  seq (FIFO)     │       │
//! │  │  receiver?      │   │  Promotion      │   │  kind           │       │
//! │  │  lines          │   │  Client         │   │  payload        │       │
//! │  │  net/tax/total  │   │  id + version   │   │  delivered_at   │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  DocumentType   │   │      Rut        │   │    Quantity     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Factura  = 33  │   │  body + dv      │   │  thousandths    │       │
//! │  │  Boleta   = 39  │   │  mod-11 check   │   │  1500 = 1.5     │       │
//! │  │  NotaCred = 61  │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Pesos;
use crate::{MAX_BOLETA_LINES, MAX_FACTURA_LINES};

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// 1 basis point = 0.01%, so IVA (19%) is 1900 bps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Zero tax rate (exempt documents).
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Quantity
// =============================================================================

/// A fixed-point quantity with three decimals (thousandths of a unit).
///
/// Weighed goods are sold in fractions (`1.250` kg), so quantities are not
/// plain integers. `Quantity::from_milli(1_250)` is 1.25 units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export)]
pub struct Quantity(i64);

impl Quantity {
    /// Creates a quantity from thousandths of a unit.
    #[inline]
    pub const fn from_milli(milli: i64) -> Self {
        Quantity(milli)
    }

    /// Creates a quantity from whole units.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Quantity(units * 1_000)
    }

    /// Returns the quantity in thousandths.
    #[inline]
    pub const fn milli(&self) -> i64 {
        self.0
    }

    /// Checks if the quantity is strictly positive.
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

/// Renders as the XML expects it: `1`, `1.5`, `0.25` (no trailing zeros).
impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / 1_000;
        let frac = abs % 1_000;

        if frac == 0 {
            return write!(f, "{}{}", sign, whole);
        }

        let frac = format!("{:03}", frac);
        write!(f, "{}{}.{}", sign, whole, frac.trim_end_matches('0'))
    }
}

// =============================================================================
// Document Type
// =============================================================================

/// SII document type, carried as `TipoDTE` in the XML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[repr(i32)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Factura electrónica (invoice, receiver required).
    Factura = 33,
    /// Boleta electrónica (retail receipt, receiver optional).
    Boleta = 39,
    /// Nota de crédito electrónica (credit note, references another document).
    NotaCredito = 61,
}

impl DocumentType {
    /// All document types the terminal can emit.
    pub const ALL: [DocumentType; 3] = [
        DocumentType::Factura,
        DocumentType::Boleta,
        DocumentType::NotaCredito,
    ];

    /// Returns the SII numeric code (`TipoDTE`).
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Looks up a document type by its SII code.
    pub fn from_code(code: u16) -> Result<Self, ValidationError> {
        match code {
            33 => Ok(DocumentType::Factura),
            39 => Ok(DocumentType::Boleta),
            61 => Ok(DocumentType::NotaCredito),
            other => Err(ValidationError::NotAllowed {
                field: format!("document type {}", other),
                allowed: vec!["33".into(), "39".into(), "61".into()],
            }),
        }
    }

    /// Whether the document must carry a `Receptor` block.
    pub const fn requires_receiver(&self) -> bool {
        matches!(self, DocumentType::Factura | DocumentType::NotaCredito)
    }

    /// Whether the document must carry a `Referencia` block.
    pub const fn requires_reference(&self) -> bool {
        matches!(self, DocumentType::NotaCredito)
    }

    /// Maximum number of `Detalle` lines.
    pub const fn max_lines(&self) -> usize {
        match self {
            DocumentType::Boleta => MAX_BOLETA_LINES,
            DocumentType::Factura | DocumentType::NotaCredito => MAX_FACTURA_LINES,
        }
    }

    /// Short lowercase name.
    pub const fn name(&self) -> &'static str {
        match self {
            DocumentType::Factura => "factura",
            DocumentType::Boleta => "boleta",
            DocumentType::NotaCredito => "nota_credito",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

// =============================================================================
// RUT
// =============================================================================

/// Chilean tax identifier: a numeric body plus a mod-11 check digit.
///
/// Accepts `76.123.456-0`, `76123456-0` and `761234560`; always renders in
/// the SII form without dots (`76123456-0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rut {
    body: u32,
    check_digit: char,
}

impl Rut {
    /// Parses and validates a RUT.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidRut {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let cleaned: String = value
            .trim()
            .chars()
            .filter(|c| *c != '.' && *c != '-' && !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();

        if cleaned.len() < 2 {
            return Err(invalid("too short"));
        }

        let (body_str, dv_str) = cleaned.split_at(cleaned.len() - 1);
        if body_str.len() > 8 || !body_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("body must be 1 to 8 digits"));
        }

        let body: u32 = body_str.parse().map_err(|_| invalid("body is not a number"))?;
        if body == 0 {
            return Err(invalid("body must be positive"));
        }

        let check_digit = dv_str.chars().next().ok_or_else(|| invalid("missing check digit"))?;
        let expected = Self::compute_check_digit(body);
        if check_digit != expected {
            return Err(invalid(&format!("check digit should be {}", expected)));
        }

        Ok(Rut { body, check_digit })
    }

    /// Computes the mod-11 check digit for a RUT body.
    pub fn compute_check_digit(body: u32) -> char {
        let mut sum = 0u32;
        let mut factor = 2u32;
        let mut rest = body;

        while rest > 0 {
            sum += (rest % 10) * factor;
            rest /= 10;
            factor = if factor == 7 { 2 } else { factor + 1 };
        }

        match 11 - (sum % 11) {
            11 => '0',
            10 => 'K',
            d => char::from_digit(d, 10).unwrap_or('0'),
        }
    }

    /// Returns the numeric body.
    pub fn body(&self) -> u32 {
        self.body
    }

    /// Returns the check digit (`0`-`9` or `K`).
    pub fn check_digit(&self) -> char {
        self.check_digit
    }
}

impl fmt::Display for Rut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.body, self.check_digit)
    }
}

impl FromStr for Rut {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rut::parse(s)
    }
}

impl TryFrom<String> for Rut {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Rut::parse(&value)
    }
}

impl From<Rut> for String {
    fn from(rut: Rut) -> Self {
        rut.to_string()
    }
}

// =============================================================================
// Parties
// =============================================================================

/// The company issuing documents. Loaded once per company context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Emitter {
    #[ts(as = "String")]
    pub rut: Rut,
    /// `RznSoc`
    pub legal_name: String,
    /// `GiroEmis`
    pub business_line: String,
    /// `DirOrigen`
    pub address: String,
}

/// The buyer named on a factura or credit note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Receiver {
    #[ts(as = "String")]
    pub rut: Rut,
    /// `RznSocRecep`
    pub legal_name: String,
    /// `DirRecep`
    pub address: String,
}

// =============================================================================
// Finalized Sale
// =============================================================================

/// A sold line, frozen at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleLine {
    /// Item code (`CdgItem`).
    pub code: String,
    /// Item name at time of sale (`NmbItem`).
    pub name: String,
    pub quantity: Quantity,
    pub unit_price: Pesos,
    /// `round(quantity * unit_price)`.
    pub line_total: Pesos,
}

impl SaleLine {
    /// Creates a line and computes its total.
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        quantity: Quantity,
        unit_price: Pesos,
    ) -> Self {
        SaleLine {
            code: code.into(),
            name: name.into(),
            quantity,
            unit_price,
            line_total: unit_price.multiply_quantity(quantity),
        }
    }
}

/// The document a credit note corrects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DocumentReference {
    /// `TpoDocRef`
    pub document_type: DocumentType,
    /// `FolioRef`
    pub folio: u64,
    /// `RazonRef`
    pub reason: String,
}

/// A sale the checkout has closed, ready to become a tax document.
///
/// Amounts are authoritative: the assembler copies them and only checks
/// that they reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FinalizedSale {
    pub sale_id: String,
    pub document_type: DocumentType,
    #[ts(as = "String")]
    pub issue_date: NaiveDate,
    pub receiver: Option<Receiver>,
    pub lines: Vec<SaleLine>,
    pub net_amount: Pesos,
    pub tax_amount: Pesos,
    pub total_amount: Pesos,
    pub reference: Option<DocumentReference>,
}

impl FinalizedSale {
    /// Builds a sale from tax-inclusive lines, splitting the gross total
    /// into net and tax at the given rate.
    pub fn from_gross_lines(
        sale_id: impl Into<String>,
        document_type: DocumentType,
        issue_date: NaiveDate,
        lines: Vec<SaleLine>,
        rate: TaxRate,
    ) -> Self {
        let total: Pesos = lines.iter().map(|l| l.line_total).sum();
        let (net, tax) = total.split_gross(rate);

        FinalizedSale {
            sale_id: sale_id.into(),
            document_type,
            issue_date,
            receiver: None,
            lines,
            net_amount: net,
            tax_amount: tax,
            total_amount: total,
            reference: None,
        }
    }

    /// Attaches a receiver.
    pub fn with_receiver(mut self, receiver: Receiver) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Attaches the reference a credit note needs.
    pub fn with_reference(mut self, reference: DocumentReference) -> Self {
        self.reference = Some(reference);
        self
    }
}

// =============================================================================
// Reference Data (Sync Entities)
// =============================================================================

/// Kind of reference dataset pulled from the Back Office.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Products,
    Promotions,
    Clients,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Products,
        EntityKind::Promotions,
        EntityKind::Clients,
    ];

    /// Path segment under `/sync/` and local table name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Products => "products",
            EntityKind::Promotions => "promotions",
            EntityKind::Clients => "clients",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Back Office ids arrive as numbers or strings; both become strings.
fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!("expected string or number id, got {}", other))),
    }
}

fn default_true() -> bool {
    true
}

/// A product in the Back Office catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(alias = "codigo", alias = "sku")]
    pub code: String,
    #[serde(alias = "nombre")]
    pub name: String,
    #[serde(alias = "precio")]
    pub price: Pesos,
    #[serde(default = "default_true", alias = "activo")]
    pub active: bool,
    /// Remote version, used for last-write-wins.
    #[serde(default)]
    pub version: i64,
}

/// A promotion defined in the Back Office.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Promotion {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(alias = "nombre")]
    pub name: String,
    /// Discount in basis points (1000 = 10%).
    #[serde(default, alias = "descuento_bps")]
    pub discount_bps: u32,
    #[serde(default, alias = "productos")]
    pub product_ids: Vec<String>,
    #[serde(default, alias = "fecha_inicio")]
    #[ts(as = "Option<String>")]
    pub starts_on: Option<NaiveDate>,
    #[serde(default, alias = "fecha_fin")]
    #[ts(as = "Option<String>")]
    pub ends_on: Option<NaiveDate>,
    #[serde(default = "default_true", alias = "activo")]
    pub active: bool,
    #[serde(default)]
    pub version: i64,
}

/// A registered client (factura receiver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Client {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[ts(as = "String")]
    pub rut: Rut,
    #[serde(alias = "razon_social")]
    pub legal_name: String,
    #[serde(default, alias = "direccion")]
    pub address: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub version: i64,
}

impl Client {
    /// The `Receptor` block for documents issued to this client.
    pub fn to_receiver(&self) -> Receiver {
        Receiver {
            rut: self.rut.clone(),
            legal_name: self.legal_name.clone(),
            address: self.address.clone(),
        }
    }
}

/// Any reference entity the sync engine stores locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SyncEntity {
    Product(Product),
    Promotion(Promotion),
    Client(Client),
}

impl SyncEntity {
    /// Parses one element of a Back Office array.
    ///
    /// ## Errors
    /// `ValidationError::InvalidFormat` when the JSON does not match the
    /// kind, or a required field is empty or negative.
    pub fn parse(kind: EntityKind, value: serde_json::Value) -> Result<Self, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidFormat {
            field: kind.to_string(),
            reason,
        };

        let entity = match kind {
            EntityKind::Products => {
                SyncEntity::Product(serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?)
            }
            EntityKind::Promotions => SyncEntity::Promotion(
                serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?,
            ),
            EntityKind::Clients => {
                SyncEntity::Client(serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?)
            }
        };

        if entity.id().trim().is_empty() {
            return Err(ValidationError::Required {
                field: format!("{} id", kind),
            });
        }
        if entity.name().trim().is_empty() {
            return Err(ValidationError::Required {
                field: format!("{} name", kind),
            });
        }
        if let SyncEntity::Product(p) = &entity {
            if p.price.is_negative() {
                return Err(invalid(format!("product {} has negative price", p.id)));
            }
        }

        Ok(entity)
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            SyncEntity::Product(_) => EntityKind::Products,
            SyncEntity::Promotion(_) => EntityKind::Promotions,
            SyncEntity::Client(_) => EntityKind::Clients,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            SyncEntity::Product(p) => &p.id,
            SyncEntity::Promotion(p) => &p.id,
            SyncEntity::Client(c) => &c.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SyncEntity::Product(p) => &p.name,
            SyncEntity::Promotion(p) => &p.name,
            SyncEntity::Client(c) => &c.legal_name,
        }
    }

    pub fn version(&self) -> i64 {
        match self {
            SyncEntity::Product(p) => p.version,
            SyncEntity::Promotion(p) => p.version,
            SyncEntity::Client(c) => c.version,
        }
    }
}

// =============================================================================
// Outbound Events
// =============================================================================

/// Kind of transactional event pushed to the Back Office.
///
/// Each kind is its own FIFO queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Sale,
    CashMovement,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::Sale, EventKind::CashMovement];

    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::Sale => "sale",
            EventKind::CashMovement => "cash_movement",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A locally created event queued for delivery.
///
/// Only `attempts`, `last_error`, `attempted_at` and `delivered_at` change
/// after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OutboundEvent {
    pub id: String,
    /// Monotonic insertion sequence; defines FIFO order within a kind.
    pub seq: i64,
    pub kind: EventKind,
    /// ID of the sale or cash movement.
    pub entity_id: String,
    /// The event body as JSON.
    pub payload: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub attempted_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OutboundEvent {
    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rut_parsing() {
        let rut = Rut::parse("76.123.456-0").unwrap();
        assert_eq!(rut.body(), 76_123_456);
        assert_eq!(rut.to_string(), "76123456-0");

        assert_eq!(Rut::parse("60803000-k").unwrap().to_string(), "60803000-K");
        assert_eq!(Rut::parse("123456785").unwrap().to_string(), "12345678-5");

        assert!(Rut::parse("76.123.456-1").is_err());
        assert!(Rut::parse("").is_err());
        assert!(Rut::parse("abc-1").is_err());
        assert!(Rut::parse("0-0").is_err());
    }

    #[test]
    fn test_rut_serde_roundtrip_uses_string_form() {
        let rut: Rut = serde_json::from_value(json!("11.111.111-1")).unwrap();
        assert_eq!(serde_json::to_value(&rut).unwrap(), json!("11111111-1"));
        assert!(serde_json::from_value::<Rut>(json!("11111111-2")).is_err());
    }

    #[test]
    fn test_quantity_display() {
        assert_eq!(Quantity::from_units(2).to_string(), "2");
        assert_eq!(Quantity::from_milli(1_500).to_string(), "1.5");
        assert_eq!(Quantity::from_milli(250).to_string(), "0.25");
        assert_eq!(Quantity::from_milli(1_005).to_string(), "1.005");
    }

    #[test]
    fn test_document_type_codes() {
        assert_eq!(DocumentType::Boleta.code(), 39);
        assert_eq!(DocumentType::from_code(33).unwrap(), DocumentType::Factura);
        assert_eq!(DocumentType::from_code(61).unwrap(), DocumentType::NotaCredito);
        assert!(DocumentType::from_code(52).is_err());

        assert!(!DocumentType::Boleta.requires_receiver());
        assert!(DocumentType::Factura.requires_receiver());
        assert!(DocumentType::NotaCredito.requires_reference());
        assert_eq!(DocumentType::Boleta.max_lines(), 1000);
        assert_eq!(DocumentType::Factura.max_lines(), 60);
    }

    #[test]
    fn test_sale_from_gross_lines() {
        let sale = FinalizedSale::from_gross_lines(
            "sale-1",
            DocumentType::Boleta,
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            vec![
                SaleLine::new("A1", "Zapatillas", Quantity::from_units(1), Pesos::from_pesos(34_500)),
                SaleLine::new("B2", "Calcetines", Quantity::from_units(2), Pesos::from_pesos(5_000)),
            ],
            crate::IVA_RATE,
        );

        assert_eq!(sale.total_amount.amount(), 44_500);
        assert_eq!(sale.net_amount.amount(), 37_395);
        assert_eq!(sale.tax_amount.amount(), 7_105);
        assert!(sale.receiver.is_none());
    }

    #[test]
    fn test_sync_entity_parse_product() {
        let entity = SyncEntity::parse(
            EntityKind::Products,
            json!({"id": 17, "codigo": "COCA-350", "nombre": "Coca-Cola 350ml", "precio": 990, "version": 4}),
        )
        .unwrap();

        assert_eq!(entity.kind(), EntityKind::Products);
        assert_eq!(entity.id(), "17");
        assert_eq!(entity.version(), 4);
        match entity {
            SyncEntity::Product(p) => {
                assert_eq!(p.price.amount(), 990);
                assert!(p.active);
            }
            other => panic!("unexpected entity {:?}", other),
        }
    }

    #[test]
    fn test_sync_entity_parse_rejects_malformed() {
        assert!(SyncEntity::parse(EntityKind::Products, json!({"id": "1"})).is_err());
        assert!(SyncEntity::parse(
            EntityKind::Products,
            json!({"id": "", "code": "X", "name": "X", "price": 1})
        )
        .is_err());
        assert!(SyncEntity::parse(
            EntityKind::Clients,
            json!({"id": "c1", "rut": "11111111-2", "legal_name": "ACME"})
        )
        .is_err());
    }

    #[test]
    fn test_client_to_receiver() {
        let entity = SyncEntity::parse(
            EntityKind::Clients,
            json!({"id": "c1", "rut": "12.345.678-5", "razon_social": "Comercial Sur Ltda", "direccion": "Av. Matta 100"}),
        )
        .unwrap();

        let SyncEntity::Client(client) = entity else {
            panic!("expected client");
        };
        let receiver = client.to_receiver();
        assert_eq!(receiver.rut.to_string(), "12345678-5");
        assert_eq!(receiver.address, "Av. Matta 100");
    }
}
