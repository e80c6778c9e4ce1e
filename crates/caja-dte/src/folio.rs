//! # Folio Allocator
//!
//! Hands out folios for document types, refilling once when a range runs out.
//!
//! ```text
//!   allocate(Boleta)
//!        │
//!        ▼
//!   authority.next_folio ──ok──► folio
//!        │
//!   FolioExhausted
//!        │
//!        ▼
//!   authority.refill ──► authority.next_folio ──ok──► folio
//!                               │
//!                        FolioExhausted ──► caller ("Solicitar nuevo rango")
//! ```
//!
//! Two authorities exist: the Back Office (`POST /folio/next`, atomic on the
//! remote side) and a local CAF range in SQLite (atomic via a single
//! `UPDATE … RETURNING`).

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use caja_core::{DocumentType, FolioPool};
use caja_db::Database;

use crate::backoffice::BackOfficeApi;
use crate::error::{DteError, DteResult};

/// Source of folios.
#[async_trait]
pub trait FolioAuthority: Send + Sync {
    /// Atomically takes the next folio. `FolioExhausted` when none are left.
    async fn next_folio(&self, document_type: DocumentType) -> DteResult<u64>;

    /// Obtains a fresh range. A no-op for authorities that cannot refill.
    async fn refill(&self, document_type: DocumentType) -> DteResult<()>;
}

// =============================================================================
// Remote Authority
// =============================================================================

/// Folios from the Back Office.
pub struct RemoteFolioAuthority {
    api: Arc<dyn BackOfficeApi>,
    empresa_id: String,
}

impl RemoteFolioAuthority {
    pub fn new(api: Arc<dyn BackOfficeApi>, empresa_id: impl Into<String>) -> Self {
        Self {
            api,
            empresa_id: empresa_id.into(),
        }
    }
}

#[async_trait]
impl FolioAuthority for RemoteFolioAuthority {
    async fn next_folio(&self, document_type: DocumentType) -> DteResult<u64> {
        self.api.next_folio(&self.empresa_id, document_type).await
    }

    async fn refill(&self, document_type: DocumentType) -> DteResult<()> {
        // The Back Office manages its own ranges.
        debug!(document_type = %document_type, "Remote folio authority has no refill step");
        Ok(())
    }
}

// =============================================================================
// CAF Authority
// =============================================================================

/// Folios from a CAF range stored locally.
pub struct CafFolioAuthority {
    db: Arc<Database>,
    api: Arc<dyn BackOfficeApi>,
    empresa_id: String,
}

impl CafFolioAuthority {
    pub fn new(db: Arc<Database>, api: Arc<dyn BackOfficeApi>, empresa_id: impl Into<String>) -> Self {
        Self {
            db,
            api,
            empresa_id: empresa_id.into(),
        }
    }
}

#[async_trait]
impl FolioAuthority for CafFolioAuthority {
    async fn next_folio(&self, document_type: DocumentType) -> DteResult<u64> {
        self.db
            .folios()
            .next(document_type)
            .await?
            .ok_or(DteError::FolioExhausted { document_type })
    }

    async fn refill(&self, document_type: DocumentType) -> DteResult<()> {
        install_caf(&self.db, self.api.as_ref(), &self.empresa_id, document_type).await?;
        Ok(())
    }
}

/// Fetches the current CAF range for a type and installs it locally.
///
/// Returns the pool as stored. Folios below the local cursor are never
/// handed out again: an overlapping range keeps the cursor where it is, and
/// a range that is already used up (the Back Office had nothing new) is not
/// installed.
pub async fn install_caf(
    db: &Database,
    api: &dyn BackOfficeApi,
    empresa_id: &str,
    document_type: DocumentType,
) -> DteResult<FolioPool> {
    let caf = api.fetch_caf(empresa_id, document_type).await?;
    let fresh = FolioPool::new(document_type, caf.desde, caf.hasta)?;

    if let Some(current) = db.folios().get(document_type).await? {
        let same_range =
            current.range_start == fresh.range_start && current.range_end == fresh.range_end;
        if same_range || fresh.range_end < current.next_available {
            warn!(
                document_type = %document_type,
                desde = caf.desde,
                hasta = caf.hasta,
                "Back Office returned no new CAF range"
            );
            return Ok(current);
        }
    }

    let installed = db.folios().install(&fresh).await?;
    if installed.next_available > fresh.range_start {
        info!(
            document_type = %document_type,
            desde = caf.desde,
            hasta = caf.hasta,
            next_available = installed.next_available,
            "CAF range overlaps folios already issued"
        );
    }
    Ok(installed)
}

// =============================================================================
// Allocator
// =============================================================================

/// Allocates folios through an authority, with one refill on exhaustion.
#[derive(Clone)]
pub struct FolioAllocator {
    authority: Arc<dyn FolioAuthority>,
}

impl FolioAllocator {
    pub fn new(authority: Arc<dyn FolioAuthority>) -> Self {
        Self { authority }
    }

    /// Takes the next folio for `document_type`.
    ///
    /// ## Errors
    /// `FolioExhausted` when the range is empty both before and after a
    /// refill. Other authority errors are returned as-is.
    pub async fn allocate(&self, document_type: DocumentType) -> DteResult<u64> {
        match self.authority.next_folio(document_type).await {
            Ok(folio) => {
                info!(document_type = %document_type, folio = folio, "Folio allocated");
                Ok(folio)
            }
            Err(e) if e.requires_folio_refill() => {
                warn!(document_type = %document_type, "Folio range exhausted, refilling");
                self.authority.refill(document_type).await?;

                let folio = self.authority.next_folio(document_type).await?;
                info!(
                    document_type = %document_type,
                    folio = folio,
                    "Folio allocated after refill"
                );
                Ok(folio)
            }
            Err(e) => Err(e),
        }
    }
}
