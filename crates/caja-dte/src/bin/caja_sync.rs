//! # caja-sync
//!
//! Background worker for one terminal: drains the outbound queues, pulls
//! reference data, refills CAF ranges and resubmits unsent documents.
//!
//! ```text
//!   caja-sync --once      one cycle, print the report, exit
//!   caja-sync             loop until Ctrl+C
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use caja_db::{Database, DbConfig};
use caja_dte::{
    BackOfficeApi, BackOfficeClient, CycleReport, DteConfig, DteService, HttpSiiTransport,
    SyncEngine,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Caja POS Back Office sync worker")]
struct Args {
    /// Path to caja.toml (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single sync cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = Arc::new(DteConfig::load(args.config).context("loading configuration")?);
    info!(
        empresa_id = %config.company.empresa_id,
        terminal_id = %config.company.terminal_id,
        environment = %config.environment(),
        folio_source = %config.sync.folio,
        "Configuration loaded"
    );

    let db = Arc::new(
        Database::new(DbConfig::new(&config.database.path))
            .await
            .context("opening local database")?,
    );

    let api = Arc::new(BackOfficeClient::new(&config)?);
    if !api
        .authenticate_terminal(&config.company.terminal_id, &config.emitter.rut)
        .await
        .context("authenticating terminal")?
    {
        bail!(
            "terminal {} is not registered for {}",
            config.company.terminal_id,
            config.emitter.rut
        );
    }

    let sii = Arc::new(HttpSiiTransport::new(&config)?);
    let service = DteService::from_config(&config, db.clone(), api.clone(), sii)?;
    let engine = SyncEngine::new(db, api, config.clone());

    if args.once {
        let report = engine.run_cycle(config.empresa_id()).await?;
        print_report(&report);

        let resent = service.retry_unsent(config.sync.batch_size).await?;
        println!("documents resent: {}", resent);
        return Ok(());
    }

    let (handle, engine_task) = engine.spawn();

    let mut resend = interval(config.poll_interval());
    resend.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = resend.tick() => {
                match service.retry_unsent(config.sync.batch_size).await {
                    Ok(0) => {}
                    Ok(n) => info!(sent = n, "Unsent documents delivered"),
                    Err(e) => warn!(error = %e, "Document resend failed"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Shutdown requested");
                break;
            }
        }
    }

    handle.shutdown().await?;
    engine_task.await.context("sync engine task panicked")?;

    info!("caja-sync stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,caja=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn print_report(report: &CycleReport) {
    println!("delivered: {}, pruned: {}", report.flush.delivered, report.pruned);
    for blocked in &report.flush.blocked {
        println!("  blocked {} at {}: {}", blocked.kind, blocked.event_id, blocked.error);
    }

    for pull in &report.pulls {
        println!(
            "{}: fetched {}, inserted {}, updated {}, stale {}, failed {}",
            pull.kind,
            pull.fetched,
            pull.inserted,
            pull.updated,
            pull.stale,
            pull.failures.len()
        );
    }
    for (kind, error) in &report.pull_errors {
        println!("{}: fetch failed: {}", kind, error);
    }

    for pool in &report.folio_refills {
        println!(
            "CAF {} installed: {}..={}",
            pool.document_type, pool.range_start, pool.range_end
        );
    }
}
