//! Repair sweeps: snapshots, missing plants, orphaned payments

mod common;

use bamboo_backend::database::payment_repository::PaymentStatus;
use bamboo_backend::database::plant_repository::PlantStatus;
use bamboo_backend::services::{BackfillConfig, BackfillService};
use common::{dec, engine, MemoryStore};
use sqlx::types::Json;
use std::sync::Arc;

fn backfill(store: &Arc<MemoryStore>) -> BackfillService {
    paged_backfill(store, BackfillConfig::default().batch_size)
}

fn paged_backfill(store: &Arc<MemoryStore>, batch_size: i64) -> BackfillService {
    BackfillService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        engine(store),
        BackfillConfig { batch_size },
    )
}

#[tokio::test]
async fn snapshot_gaps_are_filled_from_the_catalog() {
    let store = MemoryStore::seeded();
    let quarterly = store.package_id("quarterly");
    let bentong = store.location_id("Bentong Forest");
    let blank = store.insert_adoption(|a| {
        a.package_id = Some(quarterly);
        a.location_id = Some(bentong);
    });

    let report = backfill(&store).repair_denormalized().await.unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.repaired, vec![blank.id]);
    let repaired = store.adoption(blank.id);
    assert_eq!(repaired.package_name.as_deref(), Some("Quarterly Bamboo"));
    assert_eq!(repaired.package_price, Some(dec("150.00")));
    assert_eq!(repaired.package_period_months, Some(3));
    assert_eq!(repaired.features(), ["Quarterly Bamboo certificate".to_string()]);
    assert_eq!(repaired.location_name.as_deref(), Some("Bentong Forest"));
    assert!(!repaired.missing_snapshot());
}

#[tokio::test]
async fn existing_snapshot_values_are_kept() {
    let store = MemoryStore::seeded();
    let quarterly = store.package_id("quarterly");
    let bentong = store.location_id("Bentong Forest");
    let partial = store.insert_adoption(|a| {
        a.package_id = Some(quarterly);
        a.location_id = Some(bentong);
        a.package_name = Some("Founders Edition".to_string());
        a.package_price = Some(dec("99.00"));
    });

    backfill(&store).repair_denormalized().await.unwrap();

    let repaired = store.adoption(partial.id);
    assert_eq!(repaired.package_name.as_deref(), Some("Founders Edition"));
    assert_eq!(repaired.package_price, Some(dec("99.00")));
    assert_eq!(repaired.package_period_months, Some(3));
    assert_eq!(repaired.location_name.as_deref(), Some("Bentong Forest"));
}

#[tokio::test]
async fn retired_catalog_rows_still_resolve() {
    let store = MemoryStore::seeded();
    let retired_package = store.add_package("legacy", "Legacy Grove", "80.00", 6, 9, false);
    let retired_location = store.location_id("Old Site");
    let adoption = store.insert_adoption(|a| {
        a.package_id = Some(retired_package);
        a.location_id = Some(retired_location);
    });

    let report = backfill(&store).repair_denormalized().await.unwrap();

    assert_eq!(report.repaired, vec![adoption.id]);
    let repaired = store.adoption(adoption.id);
    assert_eq!(repaired.package_name.as_deref(), Some("Legacy Grove"));
    assert_eq!(repaired.location_name.as_deref(), Some("Old Site"));
}

#[tokio::test]
async fn unresolvable_snapshots_are_reported_not_guessed() {
    let store = MemoryStore::seeded();
    let gone = store.add_package("gone", "Gone", "10.00", 1, 9, true);
    let bentong = store.location_id("Bentong Forest");
    let no_package = store.insert_adoption(|a| a.location_id = Some(bentong));
    let deleted_package = store.insert_adoption(|a| {
        a.package_id = Some(gone);
        a.location_id = Some(bentong);
    });
    store.remove_package(gone);

    let report = backfill(&store).repair_denormalized().await.unwrap();

    assert_eq!(report.scanned, 2);
    assert!(report.repaired.is_empty());
    let unresolved: Vec<i64> = report.unresolved.iter().map(|u| u.adoption_id).collect();
    assert_eq!(unresolved, vec![no_package.id, deleted_package.id]);
    assert!(store.adoption(no_package.id).package_name.is_none());
    assert!(store.adoption(deleted_package.id).package_name.is_none());
}

#[tokio::test]
async fn snapshot_repair_is_idempotent() {
    let store = MemoryStore::seeded();
    let quarterly = store.package_id("quarterly");
    let bentong = store.location_id("Bentong Forest");
    store.insert_adoption(|a| {
        a.package_id = Some(quarterly);
        a.location_id = Some(bentong);
    });
    let service = backfill(&store);

    let first = service.repair_denormalized().await.unwrap();
    let second = service.repair_denormalized().await.unwrap();

    assert_eq!(first.repaired.len(), 1);
    assert_eq!(second.scanned, 0);
    assert!(second.repaired.is_empty());
}

#[tokio::test]
async fn active_adoptions_get_a_starting_plant() {
    let store = MemoryStore::seeded();
    let adoption = store.insert_adoption(|a| {
        a.location_name = Some("Raub Valley".to_string());
        a.package_features = Some(Json(vec![]));
    });
    let inactive = store.insert_adoption(|a| a.is_active = false);

    let report = backfill(&store).repair_missing_plants().await.unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.repaired.len(), 1);
    let assignment = &report.repaired[0];
    assert_eq!(assignment.adoption_id, adoption.id);
    assert!(assignment.plant_code.starts_with(&format!("BMB-A{}-", adoption.id)));

    let plant = store.plant(assignment.plant_id);
    assert_eq!(plant.current_height, dec("0.50"));
    assert_eq!(plant.status(), PlantStatus::Growing);
    assert_eq!(plant.location_name.as_deref(), Some("Raub Valley"));
    assert_eq!(store.adoption(adoption.id).plant_id, Some(plant.id));
    assert!(store.adoption(inactive.id).plant_id.is_none());
}

#[tokio::test]
async fn plant_location_falls_back_when_adoption_has_none() {
    let store = MemoryStore::seeded();
    let adoption = store.insert_adoption(|_| {});

    let report = backfill(&store).repair_missing_plants().await.unwrap();

    let plant = store.plant(report.repaired[0].plant_id);
    assert_eq!(plant.location_name.as_deref(), Some("Bentong Forest"));
    assert_eq!(report.repaired[0].adoption_id, adoption.id);
}

#[tokio::test]
async fn plant_repair_retries_code_collisions_and_is_idempotent() {
    let store = MemoryStore::seeded();
    store.insert_adoption(|_| {});
    store.simulate_plant_code_collisions(1);
    let service = backfill(&store);

    let first = service.repair_missing_plants().await.unwrap();
    let second = service.repair_missing_plants().await.unwrap();

    assert_eq!(first.repaired.len(), 1);
    assert!(first.failed.is_empty());
    assert_eq!(second.scanned, 0);
    assert_eq!(store.plants().len(), 1);
}

#[tokio::test]
async fn orphaned_payments_are_listed_without_side_effects() {
    let store = MemoryStore::seeded();
    store.new_payment("ORPHAN1", PaymentStatus::Success);
    store.new_payment("PENDING1", PaymentStatus::Pending);
    store.new_payment("FAILED1", PaymentStatus::Failed);

    let orphans = backfill(&store).find_orphaned_payments().await.unwrap();

    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].reference_no, "ORPHAN1");
    assert_eq!(orphans[0].amount, dec("150.00"));
    assert_eq!(orphans[0].customer_name.as_deref(), Some("Alice"));
    assert!(store.adoptions().is_empty());
}

#[tokio::test]
async fn orphan_repair_continues_past_failures() {
    let store = MemoryStore::seeded();
    store.new_payment("ORPHAN1", PaymentStatus::Success);
    store.new_payment("ORPHAN2", PaymentStatus::Success);
    store.new_payment("ORPHAN3", PaymentStatus::Success);
    store.fail_adoption_writes_for("ORPHAN2");
    let service = backfill(&store);

    let report = service.reconcile_orphans().await.unwrap();

    assert_eq!(report.scanned, 3);
    let reconciled: Vec<&str> = report
        .reconciled
        .iter()
        .map(|r| r.reference_no.as_str())
        .collect();
    assert_eq!(reconciled, vec!["ORPHAN1", "ORPHAN3"]);
    assert!(report.reconciled.iter().all(|r| r.created));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "ORPHAN2");

    store.clear_adoption_write_failures();
    let retry = service.reconcile_orphans().await.unwrap();
    assert_eq!(retry.scanned, 1);
    assert_eq!(retry.reconciled[0].reference_no, "ORPHAN2");
    assert_eq!(store.adoptions().len(), 3);
}

#[tokio::test]
async fn full_sweep_leaves_nothing_to_repair() {
    let store = MemoryStore::seeded();
    let quarterly = store.package_id("quarterly");
    let bentong = store.location_id("Bentong Forest");
    store.new_payment("ORPHAN1", PaymentStatus::Success);
    store.new_payment("PENDING1", PaymentStatus::Pending);
    let legacy = store.insert_adoption(|a| {
        a.package_id = Some(quarterly);
        a.location_id = Some(bentong);
    });
    let service = backfill(&store);

    let before = service.diagnostics().await.unwrap();
    assert_eq!(before.payments.success, 1);
    assert_eq!(before.payments.pending, 1);
    assert_eq!(before.orphaned_payments, vec!["ORPHAN1".to_string()]);
    assert_eq!(before.adoptions_missing_snapshot, vec![legacy.id]);
    assert_eq!(before.active_adoptions_without_plant, vec![legacy.id]);

    let report = service.run_full_sweep().await.unwrap();
    assert_eq!(report.orphans.reconciled.len(), 1);
    assert_eq!(report.plants.repaired.len(), 1);
    assert_eq!(report.denormalized.repaired, vec![legacy.id]);

    let after = service.diagnostics().await.unwrap();
    assert!(after.orphaned_payments.is_empty());
    assert!(after.adoptions_missing_snapshot.is_empty());
    assert!(after.active_adoptions_without_plant.is_empty());

    let again = service.run_full_sweep().await.unwrap();
    assert_eq!(again.orphans.scanned, 0);
    assert_eq!(again.plants.scanned, 0);
    assert_eq!(again.denormalized.scanned, 0);
    assert_eq!(store.adoptions().len(), 2);
    assert_eq!(store.plants().len(), 2);
}

#[tokio::test]
async fn unresolvable_snapshots_do_not_hide_later_adoptions() {
    let store = MemoryStore::seeded();
    let quarterly = store.package_id("quarterly");
    let bentong = store.location_id("Bentong Forest");
    for _ in 0..3 {
        store.insert_adoption(|a| a.location_id = Some(bentong));
    }
    let fixable = store.insert_adoption(|a| {
        a.package_id = Some(quarterly);
        a.location_id = Some(bentong);
    });
    let service = paged_backfill(&store, 2);

    let report = service.repair_denormalized().await.unwrap();

    assert_eq!(report.scanned, 4);
    assert_eq!(report.unresolved.len(), 3);
    assert_eq!(report.repaired, vec![fixable.id]);
    assert_eq!(
        store.adoption(fixable.id).package_name.as_deref(),
        Some("Quarterly Bamboo")
    );
}

#[tokio::test]
async fn failing_orphans_do_not_hide_later_ones() {
    let store = MemoryStore::seeded();
    for n in 1..=3 {
        let reference_no = format!("GHOST{}", n);
        store.new_payment(&reference_no, PaymentStatus::Success);
        store.update_payment(&reference_no, |p| {
            p.user_external_id = None;
            p.customer_email = Some("nobody@example.com".to_string());
        });
    }
    store.new_payment("ORPHAN1", PaymentStatus::Success);
    let service = paged_backfill(&store, 2);

    assert_eq!(service.diagnostics().await.unwrap().orphaned_payments.len(), 4);

    let report = service.reconcile_orphans().await.unwrap();

    assert_eq!(report.scanned, 4);
    assert_eq!(report.failed.len(), 3);
    assert_eq!(report.reconciled.len(), 1);
    assert_eq!(report.reconciled[0].reference_no, "ORPHAN1");
    assert_eq!(store.adoptions_for("ORPHAN1").len(), 1);
}

#[tokio::test]
async fn plant_repair_covers_every_page() {
    let store = MemoryStore::seeded();
    for _ in 0..5 {
        store.insert_adoption(|_| {});
    }

    let report = paged_backfill(&store, 2).repair_missing_plants().await.unwrap();

    assert_eq!(report.scanned, 5);
    assert_eq!(report.repaired.len(), 5);
    assert!(store.adoptions().iter().all(|a| a.plant_id.is_some()));
}
