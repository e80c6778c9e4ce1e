//! Sync engine against a recording Back Office.

mod common;

use serde_json::json;
use std::sync::Arc;

use caja_core::{EntityKind, EventKind};
use caja_dte::{FolioSource, SyncEngine};

use common::{memory_db, test_config, RecordingBackOffice};

async fn engine_with(api: Arc<RecordingBackOffice>) -> (SyncEngine, Arc<caja_db::Database>) {
    let db = memory_db().await;
    let engine = SyncEngine::new(db.clone(), api, Arc::new(test_config()));
    (engine, db)
}

#[tokio::test]
async fn test_outage_then_recovery_delivers_in_creation_order() {
    let api = Arc::new(RecordingBackOffice::default());
    let (engine, db) = engine_with(api.clone()).await;

    for sale in ["venta-1", "venta-2", "venta-3"] {
        db.outbound()
            .enqueue(EventKind::Sale, sale, &json!({ "sale_id": sale }).to_string())
            .await
            .unwrap();
    }
    let movement = db
        .outbound()
        .enqueue(EventKind::CashMovement, "mov-1", r#"{"amount":10000}"#)
        .await
        .unwrap();

    // Back Office down for the first sale only
    api.fail_next_sends(1).await;
    let first = engine.flush_outbound().await.unwrap();
    assert_eq!(first.blocked.len(), 1);
    assert_eq!(first.blocked[0].kind, EventKind::Sale);
    // The other kind was not held back
    assert_eq!(first.delivered, 1);
    assert!(db.outbound().get(&movement.id).await.unwrap().unwrap().is_delivered());
    assert_eq!(db.outbound().count_pending().await.unwrap(), 3);

    let head = db.outbound().pending(EventKind::Sale, 1).await.unwrap();
    assert_eq!(head[0].entity_id, "venta-1");
    assert_eq!(head[0].attempts, 1);
    assert!(head[0].last_error.is_some());

    let second = engine.flush_outbound().await.unwrap();
    assert!(second.is_clean());
    assert_eq!(second.delivered, 3);
    assert_eq!(db.outbound().count_pending().await.unwrap(), 0);

    assert_eq!(api.delivered().await, vec!["mov-1", "venta-1", "venta-2", "venta-3"]);
}

#[tokio::test]
async fn test_push_delivers_older_events_first() {
    let api = Arc::new(RecordingBackOffice::default());
    let (engine, db) = engine_with(api.clone()).await;

    db.outbound().enqueue(EventKind::Sale, "a", "{}").await.unwrap();
    db.outbound().enqueue(EventKind::Sale, "b", "{}").await.unwrap();
    let c = db.outbound().enqueue(EventKind::Sale, "c", "{}").await.unwrap();

    assert!(engine.push_outbound(&c).await.unwrap());
    assert_eq!(api.delivered().await, vec!["a", "b", "c"]);

    // Acknowledged events are not sent twice
    assert!(engine.push_outbound(&c).await.unwrap());
    assert_eq!(*api.send_attempts.lock().await, 3);
}

#[tokio::test]
async fn test_push_stops_behind_a_failed_event() {
    let api = Arc::new(RecordingBackOffice::default());
    let (engine, db) = engine_with(api.clone()).await;

    db.outbound().enqueue(EventKind::Sale, "a", "{}").await.unwrap();
    let b = db.outbound().enqueue(EventKind::Sale, "b", "{}").await.unwrap();

    api.fail_next_sends(1).await;
    assert!(!engine.push_outbound(&b).await.unwrap());
    assert!(api.delivered().await.is_empty());
    assert!(!db.outbound().get(&b.id).await.unwrap().unwrap().is_delivered());
}

#[tokio::test]
async fn test_malformed_entity_does_not_fail_the_pull() {
    let api = Arc::new(RecordingBackOffice::default());
    let products: Vec<_> = (0..10)
        .map(|i| {
            if i == 3 {
                json!({ "id": "p3", "name": "Sin precio" })
            } else {
                json!({
                    "id": format!("p{}", i),
                    "code": format!("SKU-{:03}", i),
                    "name": format!("Producto {}", i),
                    "price": 1_000 * (i + 1),
                    "version": 1
                })
            }
        })
        .collect();
    api.entities.lock().await.insert(EntityKind::Products, products);
    let (engine, db) = engine_with(api).await;

    let report = engine
        .pull_reference_data(EntityKind::Products, "empresa-1")
        .await
        .unwrap();

    assert_eq!(report.fetched, 10);
    assert_eq!(report.applied(), 9);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 3);
    assert_eq!(report.failures[0].id.as_deref(), Some("p3"));

    assert_eq!(db.reference().count(EntityKind::Products).await.unwrap(), 9);
    assert!(db
        .reference()
        .get(EntityKind::Products, "p3")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_cycle_pulls_every_kind_and_refills_caf() {
    let api = Arc::new(RecordingBackOffice::default());
    api.entities.lock().await.insert(
        EntityKind::Clients,
        vec![json!({
            "id": 7,
            "rut": "12.345.678-5",
            "legal_name": "Distribuidora Sur Ltda",
            "address": "Calle Maipú 55, Concepción",
            "version": 4
        })],
    );
    *api.caf.lock().await = Some(caja_dte::CafRange { tipo: 39, desde: 1, hasta: 500 });

    let mut config = test_config();
    config.sync.folio = FolioSource::Caf;
    let db = memory_db().await;
    let engine = SyncEngine::new(db.clone(), api, Arc::new(config));

    let report = engine.run_cycle("empresa-1").await.unwrap();

    assert_eq!(report.pulls.len(), EntityKind::ALL.len());
    assert!(report.pull_errors.is_empty());
    assert!(report.flush.is_clean());
    assert_eq!(db.reference().count(EntityKind::Clients).await.unwrap(), 1);

    assert!(!report.folio_refills.is_empty());
    let pool = db
        .folios()
        .get(caja_core::DocumentType::Boleta)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((pool.range_start, pool.range_end), (1, 500));

    // A second cycle with the same range installs nothing new
    let again = engine.run_cycle("empresa-1").await.unwrap();
    assert!(again.folio_refills.is_empty());
}

#[tokio::test]
async fn test_cycle_prunes_delivered_events_after_retention() {
    let api = Arc::new(RecordingBackOffice::default());
    let db = memory_db().await;

    let kept = SyncEngine::new(db.clone(), api.clone(), Arc::new(test_config()));
    for sale in ["venta-1", "venta-2"] {
        db.outbound().enqueue(EventKind::Sale, sale, "{}").await.unwrap();
    }
    let report = kept.run_cycle("empresa-1").await.unwrap();
    assert_eq!(report.flush.delivered, 2);
    // Within the default 7 days
    assert_eq!(report.pruned, 0);

    let mut config = test_config();
    config.sync.delivered_retention_days = 0;
    let pruning = SyncEngine::new(db.clone(), api.clone(), Arc::new(config));

    api.fail_next_sends(1).await;
    let stuck = db.outbound().enqueue(EventKind::Sale, "venta-3", "{}").await.unwrap();

    let report = pruning.run_cycle("empresa-1").await.unwrap();
    assert_eq!(report.flush.blocked.len(), 1);
    assert_eq!(report.pruned, 2);

    // Undelivered events are never pruned
    assert!(db.outbound().get(&stuck.id).await.unwrap().is_some());
    assert_eq!(db.outbound().count_pending().await.unwrap(), 1);
}
