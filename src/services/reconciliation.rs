//! Turns confirmed payments into adoptions.
//!
//! [`ReconciliationEngine::reconcile`] is safe to call any number of times and
//! from any number of tasks for the same reference number. The unique key on
//! `adoptions.payment_reference_no` decides the race; the loser reads back the
//! winner's row.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database::adoption_repository::{AdoptionRecord, NewAdoption, PackageSnapshot};
use crate::database::catalog_repository::{AdoptionPackage, Location};
use crate::database::error::DatabaseError;
use crate::database::payment_repository::{PaymentRecord, PaymentStatus};
use crate::database::plant_repository::{BambooPlant, NewBambooPlant, PlantStatus};
use crate::database::repository::{
    AdoptionStore, CatalogStore, PaymentStore, PlantStore, StoreResult, UserDirectory,
};
use crate::database::{ADOPTION_REFERENCE_CONSTRAINT, PLANT_CODE_CONSTRAINT};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ValidationError};
use crate::logging::mask_email;

const PLANT_CODE_PREFIX: &str = "BMB";

pub(crate) fn decimal(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap_or_default()
}

/// Starting metrics for newly allocated plants
#[derive(Debug, Clone)]
pub struct PlantDefaults {
    pub species: String,
    pub initial_height: BigDecimal,
    pub max_code_attempts: u32,
}

impl Default for PlantDefaults {
    fn default() -> Self {
        Self {
            species: "Dendrocalamus asper".to_string(),
            initial_height: decimal("0.50"),
            max_code_attempts: 5,
        }
    }
}

impl PlantDefaults {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            species: std::env::var("PLANT_DEFAULT_SPECIES")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.species),
            initial_height: std::env::var("PLANT_INITIAL_HEIGHT")
                .ok()
                .and_then(|v| BigDecimal::from_str(v.trim()).ok())
                .filter(|v| *v > BigDecimal::from(0))
                .unwrap_or(defaults.initial_height),
            max_code_attempts: defaults.max_code_attempts,
        }
    }

    /// A plant in its starting state: default species, initial height, no
    /// CO2 absorbed yet, `growing`.
    pub fn seed_plant(&self, plant_code: String, location_name: Option<String>) -> NewBambooPlant {
        NewBambooPlant {
            plant_code,
            species: self.species.clone(),
            planted_date: Utc::now().date_naive(),
            current_height: self.initial_height.clone(),
            co2_absorbed: BigDecimal::from(0),
            growth_status: PlantStatus::Growing,
            location_name,
        }
    }
}

/// Builds plant codes of the form `BMB-<seed>-<unix millis>[-<attempt>]`.
///
/// The seed is a unique key of the owning record (payment reference or
/// adoption id), so two codes only collide for the same owner within the
/// same millisecond; the attempt suffix separates those.
pub struct PlantCode;

impl PlantCode {
    pub fn generate(seed: &str, at: DateTime<Utc>, attempt: u32) -> String {
        let seed: String = seed
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        let seed = if seed.is_empty() { "X".to_string() } else { seed };
        let base = format!("{}-{}-{}", PLANT_CODE_PREFIX, seed, at.timestamp_millis());
        if attempt == 0 {
            base
        } else {
            format!("{}-{}", base, attempt)
        }
    }

    pub fn for_payment(reference_no: &str, attempt: u32) -> String {
        Self::generate(reference_no, Utc::now(), attempt)
    }

    pub fn for_adoption(adoption_id: i64, attempt: u32) -> String {
        Self::generate(&format!("A{}", adoption_id), Utc::now(), attempt)
    }
}

/// The package the payment asked for if it is still on sale, otherwise the
/// active package with the lowest sort order.
pub async fn resolve_package_or_default(
    catalog: &dyn CatalogStore,
    package_type: Option<&str>,
) -> StoreResult<Option<AdoptionPackage>> {
    if let Some(package_type) = package_type.map(str::trim).filter(|t| !t.is_empty()) {
        if let Some(package) = catalog.find_active_package_by_type(package_type).await? {
            return Ok(Some(package));
        }
        warn!(package_type, "requested package missing or inactive, using default");
    }
    let fallback = catalog.find_default_package().await?;
    if fallback.is_none() {
        warn!("no active adoption package available");
    }
    Ok(fallback)
}

/// The requested location if it is still active, otherwise the first
/// active location.
pub async fn resolve_location_or_default(
    catalog: &dyn CatalogStore,
    location_id: Option<i64>,
) -> StoreResult<Option<Location>> {
    if let Some(location_id) = location_id {
        if let Some(location) = catalog.find_active_location(location_id).await? {
            return Ok(Some(location));
        }
        warn!(location_id, "requested location missing or inactive, using default");
    }
    let fallback = catalog.find_default_location().await?;
    if fallback.is_none() {
        warn!("no active location available");
    }
    Ok(fallback)
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// An adoption exists for the payment. `created` is true only for the
    /// call that inserted it.
    Reconciled {
        adoption: AdoptionRecord,
        plant: Option<BambooPlant>,
        created: bool,
    },
    /// The payment has not succeeded (yet); nothing was written.
    NotActionable {
        reference_no: String,
        status: PaymentStatus,
    },
}

impl ReconcileOutcome {
    pub fn adoption(&self) -> Option<&AdoptionRecord> {
        match self {
            ReconcileOutcome::Reconciled { adoption, .. } => Some(adoption),
            ReconcileOutcome::NotActionable { .. } => None,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, ReconcileOutcome::Reconciled { created: true, .. })
    }
}

/// Result of feeding an observed gateway status into the engine
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub reference_no: String,
    pub previous_status: PaymentStatus,
    pub current_status: PaymentStatus,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<ReconcileOutcome>,
}

pub struct ReconciliationEngine {
    payments: Arc<dyn PaymentStore>,
    adoptions: Arc<dyn AdoptionStore>,
    plants: Arc<dyn PlantStore>,
    catalog: Arc<dyn CatalogStore>,
    users: Arc<dyn UserDirectory>,
    plant_defaults: PlantDefaults,
}

impl ReconciliationEngine {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        adoptions: Arc<dyn AdoptionStore>,
        plants: Arc<dyn PlantStore>,
        catalog: Arc<dyn CatalogStore>,
        users: Arc<dyn UserDirectory>,
        plant_defaults: PlantDefaults,
    ) -> Self {
        Self {
            payments,
            adoptions,
            plants,
            catalog,
            users,
            plant_defaults,
        }
    }

    pub fn plant_defaults(&self) -> &PlantDefaults {
        &self.plant_defaults
    }

    pub async fn reconcile(&self, reference_no: &str) -> AppResult<ReconcileOutcome> {
        let reference_no = reference_no.trim();
        if reference_no.is_empty() {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::MissingField {
                    field: "reference_no".to_string(),
                },
            )));
        }

        let payment = self
            .payments
            .find_by_reference(reference_no)
            .await?
            .ok_or_else(|| AppError::payment_not_found(reference_no))?;

        self.reconcile_payment(&payment).await
    }

    /// Same as [`reconcile`](Self::reconcile) for a payment already loaded.
    pub async fn reconcile_payment(&self, payment: &PaymentRecord) -> AppResult<ReconcileOutcome> {
        let reference_no = payment.reference_no.as_str();
        let status = payment.payment_status();
        if status != PaymentStatus::Success {
            info!(reference_no, status = %status, "payment not successful, nothing to reconcile");
            return Ok(ReconcileOutcome::NotActionable {
                reference_no: reference_no.to_string(),
                status,
            });
        }

        if let Some(existing) = self.adoptions.find_by_payment_reference(reference_no).await? {
            return self.existing_outcome(existing).await;
        }

        let user_id = self.resolve_owner(payment).await?;

        let package =
            resolve_package_or_default(self.catalog.as_ref(), payment.package_type.as_deref())
                .await?;
        let location =
            resolve_location_or_default(self.catalog.as_ref(), payment.location_id).await?;
        if package.is_none() || location.is_none() {
            warn!(
                reference_no,
                has_package = package.is_some(),
                has_location = location.is_some(),
                "creating adoption without full catalog snapshot"
            );
        }

        let adoption = NewAdoption {
            user_id,
            package: package.as_ref().map(PackageSnapshot::from),
            location_id: location.as_ref().map(|l| l.id),
            location_name: location.as_ref().map(|l| l.name.clone()),
            adoption_date: payment.paid_at.unwrap_or_else(Utc::now).date_naive(),
            price_paid: payment.amount.clone(),
            payment_reference_no: Some(reference_no.to_string()),
        };

        for attempt in 0..self.plant_defaults.max_code_attempts {
            let plant = self.plant_defaults.seed_plant(
                PlantCode::for_payment(reference_no, attempt),
                adoption.location_name.clone(),
            );
            let plant_code = plant.plant_code.clone();

            match self.adoptions.create_with_plant(plant, adoption.clone()).await {
                Ok((adoption, plant)) => {
                    info!(
                        reference_no,
                        adoption_id = adoption.id,
                        plant_code = %plant.plant_code,
                        "adoption created from payment"
                    );
                    return Ok(ReconcileOutcome::Reconciled {
                        adoption,
                        plant: Some(plant),
                        created: true,
                    });
                }
                Err(e) if e.is_unique_violation_of(ADOPTION_REFERENCE_CONSTRAINT) => {
                    info!(reference_no, "adoption created concurrently, using existing record");
                    return self.read_back_winner(reference_no).await;
                }
                Err(e) if e.is_unique_violation_of(PLANT_CODE_CONSTRAINT) => {
                    warn!(reference_no, plant_code = %plant_code, attempt, "plant code collision, regenerating");
                }
                Err(e) => {
                    error!(reference_no, error = %e, "failed to create adoption, re-run reconciliation for this reference");
                    return Err(AppError::from(e).with_context(format!("reference_no={}", reference_no)));
                }
            }
        }

        error!(reference_no, "could not allocate a unique plant code");
        Err(AppError::internal("plant code allocation exhausted")
            .with_context(format!("reference_no={}", reference_no)))
    }

    /// Moves a payment to the status the gateway reported and reconciles it
    /// when it is (or already was) successful. Backward or repeated
    /// transitions never rewrite the stored status.
    pub async fn apply_status(
        &self,
        payment: &PaymentRecord,
        observed: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> AppResult<StatusUpdate> {
        let reference_no = payment.reference_no.as_str();
        let previous = payment.payment_status();
        let mut current = previous;
        let mut changed = false;

        if previous.can_transition_to(observed) {
            let paid_at = match observed {
                PaymentStatus::Success => Some(paid_at.unwrap_or_else(Utc::now)),
                _ => None,
            };
            match self.payments.settle(reference_no, observed, paid_at).await? {
                Some(updated) => {
                    current = updated.payment_status();
                    changed = true;
                    info!(reference_no, from = %previous, to = %current, "payment status updated");
                }
                None => {
                    // Settled by someone else since we read it.
                    current = self
                        .payments
                        .find_by_reference(reference_no)
                        .await?
                        .map(|p| p.payment_status())
                        .unwrap_or(previous);
                    info!(reference_no, status = %current, "payment already settled");
                }
            }
        } else if observed != previous && observed != PaymentStatus::Pending {
            warn!(
                reference_no,
                stored = %previous,
                observed = %observed,
                "ignoring out-of-order payment status"
            );
        }

        let reconciliation = if current == PaymentStatus::Success {
            let mut settled = payment.clone();
            settled.status = current.as_str().to_string();
            Some(self.reconcile_payment(&settled).await?)
        } else {
            None
        };

        Ok(StatusUpdate {
            reference_no: reference_no.to_string(),
            previous_status: previous,
            current_status: current,
            changed,
            reconciliation,
        })
    }

    async fn existing_outcome(&self, adoption: AdoptionRecord) -> AppResult<ReconcileOutcome> {
        let plant = match adoption.plant_id {
            Some(plant_id) => self.plants.find_by_id(plant_id).await?,
            None => None,
        };
        Ok(ReconcileOutcome::Reconciled {
            adoption,
            plant,
            created: false,
        })
    }

    async fn read_back_winner(&self, reference_no: &str) -> AppResult<ReconcileOutcome> {
        match self.adoptions.find_by_payment_reference(reference_no).await? {
            Some(existing) => self.existing_outcome(existing).await,
            None => Err(AppError::from(DatabaseError::unique_violation(
                ADOPTION_REFERENCE_CONSTRAINT,
            ))
            .with_context(format!("reference_no={}", reference_no))),
        }
    }

    async fn resolve_owner(&self, payment: &PaymentRecord) -> AppResult<i64> {
        let reference_no = payment.reference_no.as_str();
        if let Some(external_id) = payment.user_external_id.as_deref().filter(|v| !v.is_empty()) {
            if let Some(user_id) = self.users.resolve_user(external_id).await? {
                return Ok(user_id);
            }
            warn!(reference_no, external_id, "external identity unknown, trying customer email");
        }
        if let Some(email) = payment.customer_email.as_deref().filter(|v| !v.is_empty()) {
            if let Some(user_id) = self.users.resolve_user_by_email(email).await? {
                return Ok(user_id);
            }
            warn!(reference_no, email = %mask_email(email), "no user matches customer email");
        }

        let external_id = payment
            .user_external_id
            .clone()
            .or_else(|| payment.customer_email.as_deref().map(mask_email))
            .unwrap_or_else(|| reference_no.to_string());
        Err(AppError::new(AppErrorKind::Domain(DomainError::UserNotFound { external_id }))
            .with_context(format!("reference_no={}", reference_no)))
    }
}
