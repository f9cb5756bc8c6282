//! Idempotent repair sweeps over adoptions and payments.
//!
//! Every sweep works record by record; a failure on one record is logged and
//! reported, and the sweep carries on with the rest. Running any sweep a
//! second time changes nothing that the first run already fixed.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database::adoption_repository::{AdoptionRecord, SnapshotFill};
use crate::database::payment_repository::{PaymentRecord, PaymentStatusCounts};
use crate::database::repository::{collect_pages, AdoptionStore, CatalogStore, PaymentStore};
use crate::database::PLANT_CODE_CONSTRAINT;
use crate::error::AppResult;
use crate::services::reconciliation::{
    resolve_location_or_default, PlantCode, ReconcileOutcome, ReconciliationEngine,
};

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Page size for the candidate scans; a sweep walks every page.
    pub batch_size: i64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self { batch_size: 500 }
    }
}

impl BackfillConfig {
    pub fn from_env() -> Self {
        Self {
            batch_size: std::env::var("BACKFILL_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(500),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RecordFailure {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UnresolvedSnapshot {
    pub adoption_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DenormalizationReport {
    pub scanned: usize,
    pub repaired: Vec<i64>,
    pub unresolved: Vec<UnresolvedSnapshot>,
    pub failed: Vec<RecordFailure>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlantAssignment {
    pub adoption_id: i64,
    pub plant_id: i64,
    pub plant_code: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PlantRepairReport {
    pub scanned: usize,
    pub repaired: Vec<PlantAssignment>,
    /// Adoptions that got a plant from another writer while we worked
    pub skipped: Vec<i64>,
    pub failed: Vec<RecordFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrphanPayment {
    pub reference_no: String,
    pub amount: BigDecimal,
    pub customer_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OrphanReconciliation {
    pub reference_no: String,
    pub adoption_id: i64,
    pub created: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrphanRepairReport {
    pub scanned: usize,
    pub reconciled: Vec<OrphanReconciliation>,
    pub failed: Vec<RecordFailure>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub orphans: OrphanRepairReport,
    pub plants: PlantRepairReport,
    pub denormalized: DenormalizationReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub payments: PaymentStatusCounts,
    pub orphaned_payments: Vec<String>,
    pub adoptions_missing_snapshot: Vec<i64>,
    pub active_adoptions_without_plant: Vec<i64>,
}

pub struct BackfillService {
    payments: Arc<dyn PaymentStore>,
    adoptions: Arc<dyn AdoptionStore>,
    catalog: Arc<dyn CatalogStore>,
    engine: Arc<ReconciliationEngine>,
    config: BackfillConfig,
}

impl BackfillService {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        adoptions: Arc<dyn AdoptionStore>,
        catalog: Arc<dyn CatalogStore>,
        engine: Arc<ReconciliationEngine>,
        config: BackfillConfig,
    ) -> Self {
        Self {
            payments,
            adoptions,
            catalog,
            engine,
            config,
        }
    }

    /// Copies current package and location attributes into adoptions whose
    /// snapshot has gaps. Only null columns are written; adoptions whose
    /// package or location no longer exists are reported and left alone.
    pub async fn repair_denormalized(&self) -> AppResult<DenormalizationReport> {
        let candidates = self.missing_snapshot().await?;

        let mut report = DenormalizationReport {
            scanned: candidates.len(),
            ..Default::default()
        };

        for adoption in candidates {
            let adoption_id = adoption.id;
            match self.snapshot_fill(&adoption).await {
                Ok(Ok(fill)) => match self.adoptions.fill_snapshot(adoption_id, &fill).await {
                    Ok(true) => {
                        info!(adoption_id, "adoption snapshot repaired");
                        report.repaired.push(adoption_id);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        error!(adoption_id, error = %e, "failed to write adoption snapshot");
                        report.failed.push(RecordFailure {
                            id: adoption_id.to_string(),
                            error: e.to_string(),
                        });
                    }
                },
                Ok(Err(reason)) => {
                    warn!(adoption_id, reason = %reason, "adoption snapshot cannot be resolved");
                    report.unresolved.push(UnresolvedSnapshot { adoption_id, reason });
                }
                Err(e) => {
                    error!(adoption_id, error = %e, "catalog lookup failed during snapshot repair");
                    report.failed.push(RecordFailure {
                        id: adoption_id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            scanned = report.scanned,
            repaired = report.repaired.len(),
            unresolved = report.unresolved.len(),
            failed = report.failed.len(),
            "denormalization repair finished"
        );
        Ok(report)
    }

    /// Outer error is a store failure, inner error is a reason the snapshot
    /// cannot be derived.
    async fn snapshot_fill(
        &self,
        adoption: &AdoptionRecord,
    ) -> AppResult<Result<SnapshotFill, String>> {
        let Some(package_id) = adoption.package_id else {
            return Ok(Err("adoption has no package".to_string()));
        };
        let Some(location_id) = adoption.location_id else {
            return Ok(Err("adoption has no location".to_string()));
        };
        let Some(package) = self.catalog.find_package(package_id).await? else {
            return Ok(Err(format!("package {} no longer exists", package_id)));
        };
        let Some(location) = self.catalog.find_location(location_id).await? else {
            return Ok(Err(format!("location {} no longer exists", location_id)));
        };

        Ok(Ok(SnapshotFill {
            package_name: package.name,
            package_price: package.price,
            package_period_months: package.period_months,
            package_features: package.features.0,
            location_name: location.name,
        }))
    }

    /// Allocates a plant for every active adoption that has none.
    pub async fn repair_missing_plants(&self) -> AppResult<PlantRepairReport> {
        let candidates = self.active_without_plant().await?;

        let mut report = PlantRepairReport {
            scanned: candidates.len(),
            ..Default::default()
        };

        for adoption in candidates {
            let adoption_id = adoption.id;
            match self.attach_plant(&adoption).await {
                Ok(Some(assignment)) => {
                    info!(
                        adoption_id,
                        plant_id = assignment.plant_id,
                        plant_code = %assignment.plant_code,
                        "plant attached to adoption"
                    );
                    report.repaired.push(assignment);
                }
                Ok(None) => report.skipped.push(adoption_id),
                Err(e) => {
                    error!(adoption_id, error = %e, "failed to attach plant, will retry next sweep");
                    report.failed.push(RecordFailure {
                        id: adoption_id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            scanned = report.scanned,
            repaired = report.repaired.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "missing-plant repair finished"
        );
        Ok(report)
    }

    async fn attach_plant(&self, adoption: &AdoptionRecord) -> AppResult<Option<PlantAssignment>> {
        let location_name = match adoption.location_name.clone() {
            Some(name) => Some(name),
            None => resolve_location_or_default(self.catalog.as_ref(), adoption.location_id)
                .await?
                .map(|l| l.name),
        };

        let defaults = self.engine.plant_defaults();
        let mut last_error = None;
        for attempt in 0..defaults.max_code_attempts {
            let plant = defaults.seed_plant(
                PlantCode::for_adoption(adoption.id, attempt),
                location_name.clone(),
            );
            match self.adoptions.attach_new_plant(adoption.id, plant).await {
                Ok(Some(plant)) => {
                    return Ok(Some(PlantAssignment {
                        adoption_id: adoption.id,
                        plant_id: plant.id,
                        plant_code: plant.plant_code,
                    }))
                }
                Ok(None) => return Ok(None),
                Err(e) if e.is_unique_violation_of(PLANT_CODE_CONSTRAINT) => {
                    warn!(adoption_id = adoption.id, attempt, "plant code collision, regenerating");
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(match last_error {
            Some(e) => e.into(),
            None => crate::error::AppError::internal("plant code allocation exhausted"),
        })
    }

    /// Successful payments that never produced an adoption. Read only.
    pub async fn find_orphaned_payments(&self) -> AppResult<Vec<OrphanPayment>> {
        let orphans = self.orphaned_successes().await?;
        Ok(orphans
            .into_iter()
            .map(|p| OrphanPayment {
                reference_no: p.reference_no,
                amount: p.amount,
                customer_name: p.customer_name,
                created_at: p.created_at,
                paid_at: p.paid_at,
            })
            .collect())
    }

    /// Runs the reconciliation engine for every orphaned payment.
    pub async fn reconcile_orphans(&self) -> AppResult<OrphanRepairReport> {
        let orphans = self.orphaned_successes().await?;

        let mut report = OrphanRepairReport {
            scanned: orphans.len(),
            ..Default::default()
        };

        for payment in orphans {
            let reference_no = payment.reference_no.clone();
            match self.engine.reconcile_payment(&payment).await {
                Ok(ReconcileOutcome::Reconciled {
                    adoption, created, ..
                }) => report.reconciled.push(OrphanReconciliation {
                    reference_no,
                    adoption_id: adoption.id,
                    created,
                }),
                Ok(ReconcileOutcome::NotActionable { status, .. }) => {
                    warn!(reference_no = %reference_no, status = %status, "orphan no longer successful");
                }
                Err(e) => {
                    error!(reference_no = %reference_no, error = %e, "failed to reconcile orphaned payment");
                    report.failed.push(RecordFailure {
                        id: reference_no,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            scanned = report.scanned,
            reconciled = report.reconciled.len(),
            failed = report.failed.len(),
            "orphan payment repair finished"
        );
        Ok(report)
    }

    /// Orphans first, so the adoptions they produce are covered by the plant
    /// and snapshot passes of the same sweep.
    pub async fn run_full_sweep(&self) -> AppResult<SweepReport> {
        let orphans = self.reconcile_orphans().await?;
        let plants = self.repair_missing_plants().await?;
        let denormalized = self.repair_denormalized().await?;
        Ok(SweepReport {
            orphans,
            plants,
            denormalized,
        })
    }

    pub async fn diagnostics(&self) -> AppResult<Diagnostics> {
        let payments = self.payments.status_counts().await?;
        let orphaned_payments = self
            .orphaned_successes()
            .await?
            .into_iter()
            .map(|p| p.reference_no)
            .collect();
        let adoptions_missing_snapshot = self
            .missing_snapshot()
            .await?
            .into_iter()
            .map(|a| a.id)
            .collect();
        let active_adoptions_without_plant = self
            .active_without_plant()
            .await?
            .into_iter()
            .map(|a| a.id)
            .collect();

        Ok(Diagnostics {
            payments,
            orphaned_payments,
            adoptions_missing_snapshot,
            active_adoptions_without_plant,
        })
    }

    async fn missing_snapshot(&self) -> AppResult<Vec<AdoptionRecord>> {
        let adoptions = self.adoptions.as_ref();
        let page_size = self.config.batch_size;
        let rows = collect_pages(page_size, |a: &AdoptionRecord| a.id, move |after_id| {
            adoptions.find_missing_snapshot(after_id, page_size)
        })
        .await?;
        Ok(rows)
    }

    async fn active_without_plant(&self) -> AppResult<Vec<AdoptionRecord>> {
        let adoptions = self.adoptions.as_ref();
        let page_size = self.config.batch_size;
        let rows = collect_pages(page_size, |a: &AdoptionRecord| a.id, move |after_id| {
            adoptions.find_active_without_plant(after_id, page_size)
        })
        .await?;
        Ok(rows)
    }

    async fn orphaned_successes(&self) -> AppResult<Vec<PaymentRecord>> {
        let payments = self.payments.as_ref();
        let page_size = self.config.batch_size;
        let rows = collect_pages(page_size, |p: &PaymentRecord| p.id, move |after_id| {
            payments.find_orphaned_successes(after_id, page_size)
        })
        .await?;
        Ok(rows)
    }
}
