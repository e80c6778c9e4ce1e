//! # Folio Pool
//!
//! In-memory view of an authorized folio range (a CAF) for one document type.
//!
//! ```text
//!  range_start                next_available             range_end
//!      │                            │                        │
//!      ▼                            ▼                        ▼
//!      [ 1 ][ 2 ][ 3 ] ... [ k-1 ] [ k ] [k+1] ...          [ N ]
//!      └──────── used ────────────┘└────────── remaining ───────┘
//! ```
//!
//! A folio is handed out at most once. The durable, concurrency-safe version
//! of this arithmetic lives in the database repository; this type carries
//! the same rules for the remote-authority path and for tests.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::types::DocumentType;

/// An authorized folio range with a cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FolioPool {
    pub document_type: DocumentType,
    pub range_start: u64,
    pub range_end: u64,
    pub next_available: u64,
    pub exhausted: bool,
}

impl FolioPool {
    /// Creates a fresh pool covering `range_start..=range_end`.
    ///
    /// ## Errors
    /// `CoreError::InvalidFolioRange` when the start is zero or after the end.
    pub fn new(document_type: DocumentType, range_start: u64, range_end: u64) -> CoreResult<Self> {
        if range_start == 0 || range_start > range_end {
            return Err(CoreError::InvalidFolioRange {
                start: range_start,
                end: range_end,
            });
        }

        Ok(FolioPool {
            document_type,
            range_start,
            range_end,
            next_available: range_start,
            exhausted: false,
        })
    }

    /// Takes the next folio.
    ///
    /// ## Errors
    /// `CoreError::FolioExhausted` once the cursor passes `range_end`; the
    /// pool is then flagged and stays exhausted.
    pub fn allocate(&mut self) -> CoreResult<u64> {
        if self.exhausted || self.next_available > self.range_end {
            self.exhausted = true;
            return Err(CoreError::FolioExhausted {
                document_type: self.document_type,
                range_end: self.range_end,
            });
        }

        let folio = self.next_available;
        self.next_available += 1;
        Ok(folio)
    }

    /// Folios not yet handed out.
    pub fn remaining(&self) -> u64 {
        if self.exhausted {
            return 0;
        }
        (self.range_end + 1).saturating_sub(self.next_available)
    }
}
