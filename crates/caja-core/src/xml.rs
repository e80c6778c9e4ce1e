//! # DTE XML
//!
//! Canonical serialization of a `TaxDocument`.
//!
//! The output is byte-for-byte deterministic: fixed element order, two-space
//! indentation, `\n` line endings, no self-closing tags, UTF-8. The signer
//! digests these exact bytes, so any change here changes every signature.
//!
//! ## Layout
//! ```text
//! <?xml version="1.0" encoding="UTF-8"?>
//! <DTE version="1.0">
//!   <Documento ID="F120T39">
//!     <Encabezado>
//!       <IdDoc>      TipoDTE, Folio, FchEmis
//!       <Emisor>     RUTEmisor, RznSoc, GiroEmis, DirOrigen
//!       <Receptor>   RUTRecep, RznSocRecep, DirRecep      (only with receiver)
//!       <Totales>    MntNeto, IVA, MntTotal
//!     </Encabezado>
//!     <Detalle>
//!       <Item>       NroLinDet, CdgItem, NmbItem, QtyItem, PrcItem, MontoItem
//!     </Detalle>
//!     <Referencia>   TpoDocRef, FolioRef, RazonRef        (credit notes)
//!   </Documento>
//! </DTE>
//! ```

use crate::document::TaxDocument;

pub const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

/// Renders the document.
pub fn render_document(doc: &TaxDocument) -> String {
    let mut xml = String::with_capacity(1024 + doc.lines.len() * 256);

    xml.push_str(XML_DECLARATION);
    xml.push('\n');
    xml.push_str("<DTE version=\"1.0\">\n");
    xml.push_str(&format!(
        "  <Documento ID=\"{}\">\n",
        xml_escape(&doc.document_id())
    ));

    open(&mut xml, 2, "Encabezado");

    open(&mut xml, 3, "IdDoc");
    xml_tag(&mut xml, 4, "TipoDTE", &doc.document_type.code().to_string());
    xml_tag(&mut xml, 4, "Folio", &doc.folio.to_string());
    xml_tag(&mut xml, 4, "FchEmis", &doc.issue_date.format("%Y-%m-%d").to_string());
    close(&mut xml, 3, "IdDoc");

    open(&mut xml, 3, "Emisor");
    xml_tag(&mut xml, 4, "RUTEmisor", &doc.emitter.rut.to_string());
    xml_tag(&mut xml, 4, "RznSoc", &doc.emitter.legal_name);
    xml_tag(&mut xml, 4, "GiroEmis", &doc.emitter.business_line);
    xml_tag(&mut xml, 4, "DirOrigen", &doc.emitter.address);
    close(&mut xml, 3, "Emisor");

    if let Some(receiver) = &doc.receiver {
        open(&mut xml, 3, "Receptor");
        xml_tag(&mut xml, 4, "RUTRecep", &receiver.rut.to_string());
        xml_tag(&mut xml, 4, "RznSocRecep", &receiver.legal_name);
        xml_tag(&mut xml, 4, "DirRecep", &receiver.address);
        close(&mut xml, 3, "Receptor");
    }

    open(&mut xml, 3, "Totales");
    xml_tag(&mut xml, 4, "MntNeto", &doc.net_amount.amount().to_string());
    xml_tag(&mut xml, 4, "IVA", &doc.tax_amount.amount().to_string());
    xml_tag(&mut xml, 4, "MntTotal", &doc.total_amount.amount().to_string());
    close(&mut xml, 3, "Totales");

    close(&mut xml, 2, "Encabezado");

    open(&mut xml, 2, "Detalle");
    for line in &doc.lines {
        open(&mut xml, 3, "Item");
        xml_tag(&mut xml, 4, "NroLinDet", &line.line_number.to_string());
        xml_tag(&mut xml, 4, "CdgItem", &line.code);
        xml_tag(&mut xml, 4, "NmbItem", &line.name);
        xml_tag(&mut xml, 4, "QtyItem", &line.quantity.to_string());
        xml_tag(&mut xml, 4, "PrcItem", &line.unit_price.amount().to_string());
        xml_tag(&mut xml, 4, "MontoItem", &line.line_total.amount().to_string());
        close(&mut xml, 3, "Item");
    }
    close(&mut xml, 2, "Detalle");

    if let Some(reference) = &doc.reference {
        open(&mut xml, 2, "Referencia");
        xml_tag(&mut xml, 3, "TpoDocRef", &reference.document_type.code().to_string());
        xml_tag(&mut xml, 3, "FolioRef", &reference.folio.to_string());
        xml_tag(&mut xml, 3, "RazonRef", &reference.reason);
        close(&mut xml, 2, "Referencia");
    }

    xml.push_str("  </Documento>\n");
    xml.push_str("</DTE>\n");
    xml
}

fn open(xml: &mut String, indent: usize, tag: &str) {
    xml.push_str(&" ".repeat(indent * 2));
    xml.push('<');
    xml.push_str(tag);
    xml.push_str(">\n");
}

fn close(xml: &mut String, indent: usize, tag: &str) {
    xml.push_str(&" ".repeat(indent * 2));
    xml.push_str("</");
    xml.push_str(tag);
    xml.push_str(">\n");
}

/// Writes `<tag>value</tag>` on its own line, escaping the value.
fn xml_tag(xml: &mut String, indent: usize, tag: &str, value: &str) {
    xml.push_str(&format!(
        "{}<{}>{}</{}>\n",
        " ".repeat(indent * 2),
        tag,
        xml_escape(value),
        tag
    ));
}

/// Escapes the five XML special characters.
pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Returns the text of the first `<tag>...</tag>`, trimmed.
///
/// Falls back to a namespaced form (`<ns:tag>`) when the bare tag is absent.
/// Used for the small, flat XML replies of the tax authority; not a general
/// XML parser.
pub fn extract_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);

    if let Some(start) = xml.find(&open) {
        let from = start + open.len();
        let end = xml[from..].find(&close)?;
        return Some(xml[from..from + end].trim().to_string());
    }

    // <ns:TAG> ... </ns:TAG>
    let suffix = format!(":{}>", tag);
    let pos = xml.find(&suffix)?;
    let lt = xml[..pos].rfind('<')?;
    let prefix = &xml[lt + 1..pos];
    if prefix.contains(|c: char| c.is_whitespace() || c == '/' || c == '>') {
        return None;
    }
    let from = pos + suffix.len();
    let close = format!("</{}:{}>", prefix, tag);
    let end = xml[from..].find(&close)?;
    Some(xml[from..from + end].trim().to_string())
}

// =============================================================================
// Unit Tests
// =============================================================================
