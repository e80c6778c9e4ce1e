//! # Submission State Machine
//!
//! Tracks a signed document through the tax authority.
//!
//! ```text
//!                 ┌──────────── transport error ─────────────┐
//!                 │                                          ▼
//!   ┌─────────┐  send ok  ┌────────┐  remote verdict  ┌──────────────┐
//!   │ pending │──────────►│  sent  │─────────────────►│  accepted ✓  │
//!   └────┬────┘           └───┬────┘                  │  rejected ✗  │
//!        │                    │ poll error            └──────────────┘
//!        │ send error         ▼                         (terminal)
//!        │               ┌────────┐  retry ok                ▲
//!        └──────────────►│ error  │──────────► sent          │
//!                        └───┬────┘                          │
//!                            ├──► error (retry failed again) │
//!                            └──► rejected ──────────────────┘
//!                                 (upload refused by the authority,
//!                                  also straight from pending)
//! ```
//!
//! `accepted` and `rejected` are final. A rejected document is never
//! resubmitted under the same folio.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};

/// Where a document stands with the tax authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Signed and stored, not yet sent.
    Pending,
    /// Received by the authority; a tracking ID exists.
    Sent,
    /// Final: the authority accepted the document.
    Accepted,
    /// Final: the authority rejected the document.
    Rejected,
    /// Sending or polling failed; eligible for retry.
    Error,
}

impl SubmissionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Sent => "sent",
            SubmissionStatus::Accepted => "accepted",
            SubmissionStatus::Rejected => "rejected",
            SubmissionStatus::Error => "error",
        }
    }

    /// `accepted` and `rejected` never change again.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Accepted | SubmissionStatus::Rejected)
    }

    /// Whether `self -> to` is an edge of the state machine.
    pub const fn can_transition_to(&self, to: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        matches!(
            (*self, to),
            (Pending, Sent)
                | (Pending, Error)
                | (Pending, Rejected)
                | (Sent, Accepted)
                | (Sent, Rejected)
                | (Sent, Error)
                | (Error, Sent)
                | (Error, Error)
                | (Error, Rejected)
        )
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Submission bookkeeping for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SubmissionRecord {
    /// Local id of the stored tax document.
    pub document_id: String,
    /// Assigned by the authority on a successful send.
    pub tracking_id: Option<String>,
    pub status: SubmissionStatus,
    #[ts(as = "Option<String>")]
    pub last_checked_at: Option<DateTime<Utc>>,
    pub response_message: Option<String>,
    /// Number of send attempts made.
    pub attempts: i64,
}

impl SubmissionRecord {
    /// A freshly signed document.
    pub fn new_pending(document_id: impl Into<String>) -> Self {
        SubmissionRecord {
            document_id: document_id.into(),
            tracking_id: None,
            status: SubmissionStatus::Pending,
            last_checked_at: None,
            response_message: None,
            attempts: 0,
        }
    }

    /// Fails with `AlreadyFinalized` when the record is terminal.
    pub fn ensure_not_final(&self) -> CoreResult<()> {
        if self.status.is_terminal() {
            return Err(CoreError::AlreadyFinalized {
                document_id: self.document_id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    /// Moves to `to`, enforcing the state machine.
    pub fn transition(&mut self, to: SubmissionStatus) -> CoreResult<()> {
        self.ensure_not_final()?;
        if !self.status.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Records a successful send.
    pub fn mark_sent(&mut self, tracking_id: impl Into<String>, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition(SubmissionStatus::Sent)?;
        self.tracking_id = Some(tracking_id.into());
        self.last_checked_at = Some(now);
        self.response_message = None;
        Ok(())
    }

    /// Records a failed send or poll.
    pub fn mark_error(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition(SubmissionStatus::Error)?;
        self.last_checked_at = Some(now);
        self.response_message = Some(message.into());
        Ok(())
    }

    /// Records an upload the authority refused outright. Final.
    pub fn mark_rejected(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition(SubmissionStatus::Rejected)?;
        self.last_checked_at = Some(now);
        self.response_message = Some(message.into());
        Ok(())
    }

    /// Applies a status reported by the authority.
    ///
    /// A remote `sent` (still processing) only refreshes the check time.
    pub fn apply_remote(
        &mut self,
        status: SubmissionStatus,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        if status != self.status {
            self.transition(status)?;
        } else {
            self.ensure_not_final()?;
        }
        self.last_checked_at = Some(now);
        if message.is_some() {
            self.response_message = message;
        }
        Ok(())
    }
}
