//! # Sync Engine
//!
//! Keeps the terminal and the Back Office in step.
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Engine                                     │
//! │                                                                         │
//! │   PULL (reference data)                 PUSH (transactional events)    │
//! │                                                                         │
//! │   GET /sync/{kind}                      outbound_events (FIFO per kind)│
//! │        │                                   seq │ kind │ delivered_at   │
//! │        ▼                                   ────┼──────┼──────────────  │
//! │   [v0, v1, v2, ...]                         1  │ sale │ 10:01          │
//! │        │ buffer_unordered(N)                2  │ sale │ NULL  ◄─ head  │
//! │        ▼                                    3  │ sale │ NULL           │
//! │   parse ──► upsert (version LWW)                   │                   │
//! │        │                                           ▼                   │
//! │        ▼                                POST /transactions (in order)  │
//! │   PullReport {inserted, updated,           ok   ──► delivered_at = now │
//! │               stale, failures}             fail ──► attempts+1, stop   │
//! │                                                                         │
//! │   run loop: interval tick │ trigger() │ shutdown()                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A malformed entity never fails a pull: it lands in `PullReport::failures`
//! and the rest are applied. A failed delivery stops its kind's queue so
//! nothing overtakes it; other kinds keep going.

use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use caja_core::{DocumentType, EntityKind, EventKind, FolioPool, OutboundEvent, SyncEntity};
use caja_db::{Database, UpsertOutcome};

use crate::backoffice::BackOfficeApi;
use crate::config::{DteConfig, FolioSource};
use crate::error::{DteError, DteResult};
use crate::folio::install_caf;

// =============================================================================
// Reports
// =============================================================================

/// One entity that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
    /// Position in the Back Office array.
    pub index: usize,
    /// Remote id, when the element had one.
    pub id: Option<String>,
    pub error: String,
}

/// Outcome of pulling one reference dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullReport {
    pub kind: EntityKind,
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Older than what is stored; skipped.
    pub stale: usize,
    /// Sorted by index.
    pub failures: Vec<EntityFailure>,
}

impl PullReport {
    fn new(kind: EntityKind, fetched: usize) -> Self {
        Self {
            kind,
            fetched,
            inserted: 0,
            updated: 0,
            stale: 0,
            failures: Vec::new(),
        }
    }

    /// Entities written (inserted or updated).
    pub fn applied(&self) -> usize {
        self.inserted + self.updated
    }
}

/// A queue that stopped at a failed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedQueue {
    pub kind: EventKind,
    pub event_id: String,
    pub error: String,
}

/// Outcome of draining the outbound queues.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub blocked: Vec<BlockedQueue>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.blocked.is_empty()
    }
}

/// Outcome of one full sync cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub flush: FlushReport,
    pub pulls: Vec<PullReport>,
    /// Datasets whose fetch failed entirely.
    pub pull_errors: Vec<(EntityKind, String)>,
    /// CAF ranges installed this cycle.
    pub folio_refills: Vec<FolioPool>,
    /// Delivered events deleted after the retention window.
    pub pruned: u64,
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Pulls reference data and pushes outbound events.
#[derive(Clone)]
pub struct SyncEngine {
    db: Arc<Database>,
    api: Arc<dyn BackOfficeApi>,
    config: Arc<DteConfig>,
}

impl SyncEngine {
    pub fn new(db: Arc<Database>, api: Arc<dyn BackOfficeApi>, config: Arc<DteConfig>) -> Self {
        Self { db, api, config }
    }

    /// Fetches one dataset and upserts every element independently.
    ///
    /// ## Errors
    /// Only when the fetch itself fails. Per-element failures are reported in
    /// `PullReport::failures`.
    pub async fn pull_reference_data(
        &self,
        kind: EntityKind,
        empresa_id: &str,
    ) -> DteResult<PullReport> {
        let items = self.api.fetch_entities(kind, empresa_id).await?;
        let mut report = PullReport::new(kind, items.len());

        let reference = self.db.reference();
        let concurrency = self.config.sync.max_concurrency.max(1);

        let outcomes: Vec<(usize, Option<String>, Result<UpsertOutcome, String>)> =
            stream::iter(items.into_iter().enumerate())
                .map(|(index, value)| {
                    let reference = reference.clone();
                    async move {
                        let id = remote_id(&value);
                        let outcome = match SyncEntity::parse(kind, value) {
                            Ok(entity) => reference
                                .upsert(empresa_id, &entity)
                                .await
                                .map_err(|e| e.to_string()),
                            Err(e) => Err(e.to_string()),
                        };
                        (index, id, outcome)
                    }
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        for (index, id, outcome) in outcomes {
            match outcome {
                Ok(UpsertOutcome::Inserted) => report.inserted += 1,
                Ok(UpsertOutcome::Updated) => report.updated += 1,
                Ok(UpsertOutcome::Stale) => report.stale += 1,
                Err(error) => {
                    warn!(
                        kind = %kind,
                        index = index,
                        id = ?id,
                        error = %error,
                        "Reference entity rejected"
                    );
                    report.failures.push(EntityFailure { index, id, error });
                }
            }
        }
        report.failures.sort_by_key(|f| f.index);

        info!(
            kind = %kind,
            fetched = report.fetched,
            inserted = report.inserted,
            updated = report.updated,
            stale = report.stale,
            failed = report.failures.len(),
            "Reference data pulled"
        );

        Ok(report)
    }

    /// Delivers `event`'s queue in order, up to and including `event`.
    ///
    /// ## Returns
    /// `true` once `event` is acknowledged; `false` if it (or an older event
    /// of the same kind) failed and stays queued.
    pub async fn push_outbound(&self, event: &OutboundEvent) -> DteResult<bool> {
        let queue = self.db.outbound().pending_through(event.kind, event.seq).await?;

        if !queue.iter().any(|e| e.id == event.id) {
            let stored = self
                .db
                .outbound()
                .get(&event.id)
                .await?
                .ok_or_else(|| DteError::from(caja_db::DbError::not_found("outbound event", &event.id)))?;
            return Ok(stored.is_delivered());
        }

        for queued in &queue {
            if let Err(e) = self.deliver(queued).await {
                debug!(
                    event_id = %event.id,
                    blocked_by = %queued.id,
                    error = %e,
                    "Push stopped"
                );
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Drains every kind's queue in FIFO order, up to `batch_size` each.
    pub async fn flush_outbound(&self) -> DteResult<FlushReport> {
        let mut report = FlushReport::default();

        for kind in EventKind::ALL {
            let queue = self.db.outbound().pending(kind, self.config.sync.batch_size).await?;

            for event in &queue {
                match self.deliver(event).await {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        report.blocked.push(BlockedQueue {
                            kind,
                            event_id: event.id.clone(),
                            error: e.to_string(),
                        });
                        break;
                    }
                }
            }
        }

        if report.delivered > 0 || !report.is_clean() {
            info!(
                delivered = report.delivered,
                blocked = report.blocked.len(),
                "Outbound queue flushed"
            );
        }

        Ok(report)
    }

    /// Sends one event and records the outcome. Delivery errors are recorded
    /// on the event and returned; database errors are returned as-is.
    async fn deliver(&self, event: &OutboundEvent) -> DteResult<()> {
        match self.api.send_transaction(event).await {
            Ok(()) => {
                self.db.outbound().mark_delivered(&event.id).await?;
                debug!(event_id = %event.id, kind = %event.kind, seq = event.seq, "Event delivered");
                Ok(())
            }
            Err(e) => {
                self.db.outbound().mark_failed(&event.id, &e.to_string()).await?;
                warn!(
                    event_id = %event.id,
                    kind = %event.kind,
                    attempts = event.attempts + 1,
                    error = %e,
                    "Event delivery failed"
                );
                Err(e)
            }
        }
    }

    /// Fetches and installs the current CAF range for a document type.
    pub async fn refresh_folios(&self, document_type: DocumentType) -> DteResult<FolioPool> {
        install_caf(
            &self.db,
            self.api.as_ref(),
            self.config.empresa_id(),
            document_type,
        )
        .await
    }

    /// Flushes outbound events, prunes old delivered ones, then pulls every
    /// reference dataset.
    ///
    /// With CAF folios, missing or exhausted ranges are refreshed as well.
    pub async fn run_cycle(&self, empresa_id: &str) -> DteResult<CycleReport> {
        let mut report = CycleReport {
            flush: self.flush_outbound().await?,
            ..Default::default()
        };

        let retention_days = self.config.sync.delivered_retention_days;
        report.pruned = self.db.outbound().cleanup_delivered(retention_days).await?;
        if report.pruned > 0 {
            debug!(
                pruned = report.pruned,
                retention_days = retention_days,
                "Delivered events pruned"
            );
        }

        for kind in EntityKind::ALL {
            match self.pull_reference_data(kind, empresa_id).await {
                Ok(pull) => report.pulls.push(pull),
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Reference pull failed");
                    report.pull_errors.push((kind, e.to_string()));
                }
            }
        }

        if self.config.sync.folio == FolioSource::Caf {
            for document_type in DocumentType::ALL {
                let needs_refill = match self.db.folios().get(document_type).await? {
                    Some(pool) => pool.exhausted || pool.remaining() == 0,
                    None => true,
                };
                if !needs_refill {
                    continue;
                }
                match self.refresh_folios(document_type).await {
                    Ok(pool) if pool.remaining() > 0 => report.folio_refills.push(pool),
                    Ok(_) => {}
                    Err(e) => warn!(document_type = %document_type, error = %e, "CAF refresh failed"),
                }
            }
        }

        Ok(report)
    }

    /// Starts the periodic run loop on the current runtime.
    pub fn spawn(self) -> (SyncEngineHandle, JoinHandle<()>) {
        let (runner, handle) = SyncLoop::new(self);
        (handle, tokio::spawn(runner.run()))
    }
}

fn remote_id(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

// =============================================================================
// Run Loop
// =============================================================================

/// Handle for controlling a spawned sync engine.
#[derive(Clone)]
pub struct SyncEngineHandle {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl SyncEngineHandle {
    /// Requests a cycle now. Requests made while one is pending coalesce.
    pub fn trigger(&self) -> DteResult<()> {
        match self.trigger_tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(())) => Err(DteError::ShuttingDown),
        }
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> DteResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| DteError::ChannelError("Shutdown channel closed".into()))
    }
}

struct SyncLoop {
    engine: SyncEngine,
    trigger_rx: mpsc::Receiver<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl SyncLoop {
    fn new(engine: SyncEngine) -> (Self, SyncEngineHandle) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let runner = SyncLoop {
            engine,
            trigger_rx,
            shutdown_rx,
        };

        (runner, SyncEngineHandle { trigger_tx, shutdown_tx })
    }

    async fn run(mut self) {
        info!("Sync engine starting");

        let mut interval = tokio::time::interval(self.engine.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Sync engine shutting down");
                    break;
                }

                _ = interval.tick() => self.cycle().await,

                Some(()) = self.trigger_rx.recv() => {
                    debug!("Sync cycle triggered");
                    self.cycle().await;
                }
            }
        }

        info!("Sync engine stopped");
    }

    async fn cycle(&self) {
        let empresa_id = self.engine.config.empresa_id().to_string();
        if let Err(e) = self.engine.run_cycle(&empresa_id).await {
            error!(error = %e, "Sync cycle failed");
        }
    }
}
