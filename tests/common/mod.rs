//! In-memory stores and a scripted gateway for integration tests.
//!
//! `MemoryStore` enforces the same unique keys as the Postgres schema
//! (adoption payment reference, plant code) so the idempotency paths in the
//! services run for real.

#![allow(dead_code)]

use async_trait::async_trait;
use bamboo_backend::api::{AppState, ServiceSettings, Stores};
use bamboo_backend::database::adoption_repository::{
    AdoptionOverride, AdoptionRecord, NewAdoption, SnapshotFill,
};
use bamboo_backend::database::catalog_repository::{AdoptionPackage, Location};
use bamboo_backend::database::error::{DatabaseError, DatabaseErrorKind};
use bamboo_backend::database::payment_repository::{
    PaymentRecord, PaymentStatus, PaymentStatusCounts,
};
use bamboo_backend::database::plant_repository::{
    BambooPlant, GrowthTrackingEntry, NewBambooPlant, NewGrowthEntry,
};
use bamboo_backend::database::repository::{
    AdoptionStore, CatalogStore, PaymentStore, PlantStore, StoreResult, UserDirectory,
};
use bamboo_backend::database::{ADOPTION_REFERENCE_CONSTRAINT, PLANT_CODE_CONSTRAINT};
use bamboo_backend::health::HealthChecker;
use bamboo_backend::payments::error::{PaymentError, PaymentResult};
use bamboo_backend::payments::provider::BillGateway;
use bamboo_backend::payments::providers::toyyibpay::{ToyyibPayConfig, ToyyibPayGateway};
use bamboo_backend::payments::types::{BillStatus, CallbackEvent};
use bamboo_backend::services::{PlantDefaults, ReconciliationEngine};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::types::Json;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

#[derive(Default)]
struct State {
    payments: Vec<PaymentRecord>,
    adoptions: Vec<AdoptionRecord>,
    plants: Vec<BambooPlant>,
    growth: Vec<GrowthTrackingEntry>,
    packages: Vec<AdoptionPackage>,
    locations: Vec<Location>,
    users: Vec<(i64, String, String)>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_plant(&mut self, plant: &NewBambooPlant) -> StoreResult<BambooPlant> {
        if self.plants.iter().any(|p| p.plant_code == plant.plant_code) {
            return Err(DatabaseError::unique_violation(PLANT_CODE_CONSTRAINT));
        }
        let record = BambooPlant {
            id: self.next_id(),
            plant_code: plant.plant_code.clone(),
            species: plant.species.clone(),
            planted_date: plant.planted_date,
            current_height: plant.current_height.clone(),
            co2_absorbed: plant.co2_absorbed.clone(),
            growth_status: plant.growth_status.as_str().to_string(),
            location_name: plant.location_name.clone(),
            created_at: Utc::now(),
        };
        self.plants.push(record.clone());
        Ok(record)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    /// Adoption lookups by payment reference that pretend nothing exists yet,
    /// as a reader racing another writer would see.
    stale_adoption_reads: AtomicUsize,
    /// Plant inserts that fail with a plant code collision.
    plant_code_collisions: AtomicUsize,
    /// Payment references whose adoption insert fails with a connection error.
    failing_references: Mutex<Vec<String>>,
    pub create_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Two active packages, two active locations, one retired location and
    /// one user.
    pub fn seeded() -> Arc<Self> {
        let store = Self::new();
        store.add_package("monthly", "Monthly Bamboo", "50.00", 1, 1, true);
        store.add_package("quarterly", "Quarterly Bamboo", "150.00", 3, 2, true);
        store.add_location("Bentong Forest", true);
        store.add_location("Raub Valley", true);
        store.add_location("Old Site", false);
        store.add_user("user_ext_1", "alice@example.com");
        store
    }

    pub fn stores(self: &Arc<Self>) -> Stores {
        Stores {
            payments: self.clone(),
            adoptions: self.clone(),
            plants: self.clone(),
            catalog: self.clone(),
            users: self.clone(),
        }
    }

    pub fn add_package(
        &self,
        package_type: &str,
        name: &str,
        price: &str,
        period_months: i32,
        sort_order: i32,
        is_active: bool,
    ) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.packages.push(AdoptionPackage {
            id,
            package_type: package_type.to_string(),
            name: name.to_string(),
            price: dec(price),
            period_months,
            features: Json(vec![format!("{} certificate", name)]),
            sort_order,
            is_active,
        });
        id
    }

    pub fn add_location(&self, name: &str, is_active: bool) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.locations.push(Location {
            id,
            name: name.to_string(),
            is_active,
        });
        id
    }

    pub fn add_user(&self, external_id: &str, email: &str) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state
            .users
            .push((id, external_id.to_string(), email.to_string()));
        id
    }

    pub fn package_id(&self, package_type: &str) -> i64 {
        let state = self.state.lock().unwrap();
        state
            .packages
            .iter()
            .find(|p| p.package_type == package_type)
            .map(|p| p.id)
            .unwrap()
    }

    pub fn location_id(&self, name: &str) -> i64 {
        let state = self.state.lock().unwrap();
        state
            .locations
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.id)
            .unwrap()
    }

    pub fn rename_package(&self, package_id: i64, name: &str, price: &str) {
        let mut state = self.state.lock().unwrap();
        let package = state.packages.iter_mut().find(|p| p.id == package_id).unwrap();
        package.name = name.to_string();
        package.price = dec(price);
    }

    pub fn remove_package(&self, package_id: i64) {
        self.state
            .lock()
            .unwrap()
            .packages
            .retain(|p| p.id != package_id);
    }

    pub fn deactivate_all_packages(&self) {
        for package in self.state.lock().unwrap().packages.iter_mut() {
            package.is_active = false;
        }
    }

    /// A payment as the checkout flow leaves it: quarterly package at the
    /// first location, paid by the seeded user, created ten minutes ago.
    pub fn new_payment(&self, reference_no: &str, status: PaymentStatus) -> PaymentRecord {
        let location_id = self.location_id("Bentong Forest");
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        let record = PaymentRecord {
            id,
            reference_no: reference_no.to_string(),
            bill_code: Some(format!("bill-{}", reference_no.to_lowercase())),
            status: status.as_str().to_string(),
            amount: dec("150.00"),
            package_type: Some("quarterly".to_string()),
            location_id: Some(location_id),
            customer_name: Some("Alice".to_string()),
            customer_email: Some("alice@example.com".to_string()),
            user_external_id: Some("user_ext_1".to_string()),
            created_at: Utc::now() - ChronoDuration::minutes(10),
            paid_at: match status {
                PaymentStatus::Success => Some(Utc::now() - ChronoDuration::minutes(5)),
                _ => None,
            },
        };
        state.payments.push(record.clone());
        record
    }

    pub fn update_payment(&self, reference_no: &str, edit: impl FnOnce(&mut PaymentRecord)) {
        let mut state = self.state.lock().unwrap();
        let payment = state
            .payments
            .iter_mut()
            .find(|p| p.reference_no == reference_no)
            .unwrap();
        edit(payment);
    }

    /// An adoption row written outside the reconciliation engine, for
    /// backfill scenarios.
    pub fn insert_adoption(&self, edit: impl FnOnce(&mut AdoptionRecord)) -> AdoptionRecord {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        let mut record = AdoptionRecord {
            id,
            user_id: 1,
            plant_id: None,
            package_id: None,
            package_name: None,
            package_price: None,
            package_period_months: None,
            package_features: None,
            location_id: None,
            location_name: None,
            adoption_date: Utc::now().date_naive(),
            price_paid: dec("150.00"),
            is_active: true,
            payment_reference_no: None,
            created_at: Utc::now(),
        };
        edit(&mut record);
        state.adoptions.push(record.clone());
        record
    }

    pub fn payment(&self, reference_no: &str) -> PaymentRecord {
        let state = self.state.lock().unwrap();
        state
            .payments
            .iter()
            .find(|p| p.reference_no == reference_no)
            .cloned()
            .unwrap()
    }

    pub fn adoptions(&self) -> Vec<AdoptionRecord> {
        self.state.lock().unwrap().adoptions.clone()
    }

    pub fn adoption(&self, adoption_id: i64) -> AdoptionRecord {
        self.adoptions()
            .into_iter()
            .find(|a| a.id == adoption_id)
            .unwrap()
    }

    pub fn adoptions_for(&self, reference_no: &str) -> Vec<AdoptionRecord> {
        self.adoptions()
            .into_iter()
            .filter(|a| a.payment_reference_no.as_deref() == Some(reference_no))
            .collect()
    }

    pub fn plants(&self) -> Vec<BambooPlant> {
        self.state.lock().unwrap().plants.clone()
    }

    pub fn plant(&self, plant_id: i64) -> BambooPlant {
        self.plants().into_iter().find(|p| p.id == plant_id).unwrap()
    }

    pub fn add_plant(&self, plant: NewBambooPlant) -> BambooPlant {
        self.state.lock().unwrap().insert_plant(&plant).unwrap()
    }

    pub fn simulate_stale_adoption_reads(&self, count: usize) {
        self.stale_adoption_reads.store(count, Ordering::SeqCst);
    }

    pub fn simulate_plant_code_collisions(&self, count: usize) {
        self.plant_code_collisions.store(count, Ordering::SeqCst);
    }

    pub fn fail_adoption_writes_for(&self, reference_no: &str) {
        self.failing_references
            .lock()
            .unwrap()
            .push(reference_no.to_string());
    }

    pub fn clear_adoption_write_failures(&self) {
        self.failing_references.lock().unwrap().clear();
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn find_by_reference(&self, reference_no: &str) -> StoreResult<Option<PaymentRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .payments
            .iter()
            .find(|p| p.reference_no == reference_no)
            .cloned())
    }

    async fn find_by_bill_code(&self, bill_code: &str) -> StoreResult<Option<PaymentRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .payments
            .iter()
            .rev()
            .find(|p| p.bill_code.as_deref() == Some(bill_code))
            .cloned())
    }

    async fn find_pending_for_polling(
        &self,
        created_after: DateTime<Utc>,
        created_before: DateTime<Utc>,
        after_id: i64,
        limit: i64,
    ) -> StoreResult<Vec<PaymentRecord>> {
        let state = self.state.lock().unwrap();
        let mut pending: Vec<PaymentRecord> = state
            .payments
            .iter()
            .filter(|p| {
                p.status == "pending"
                    && p.bill_code.is_some()
                    && p.created_at > created_after
                    && p.created_at < created_before
                    && p.id > after_id
            })
            .cloned()
            .collect();
        pending.sort_by_key(|p| p.id);
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn settle(
        &self,
        reference_no: &str,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<PaymentRecord>> {
        let mut state = self.state.lock().unwrap();
        let Some(payment) = state
            .payments
            .iter_mut()
            .find(|p| p.reference_no == reference_no && p.status == "pending")
        else {
            return Ok(None);
        };
        payment.status = status.as_str().to_string();
        if paid_at.is_some() {
            payment.paid_at = paid_at;
        }
        Ok(Some(payment.clone()))
    }

    async fn find_orphaned_successes(
        &self,
        after_id: i64,
        limit: i64,
    ) -> StoreResult<Vec<PaymentRecord>> {
        let state = self.state.lock().unwrap();
        let mut orphans: Vec<PaymentRecord> = state
            .payments
            .iter()
            .filter(|p| p.status == "success" && p.id > after_id)
            .filter(|p| {
                !state
                    .adoptions
                    .iter()
                    .any(|a| a.payment_reference_no.as_deref() == Some(p.reference_no.as_str()))
            })
            .cloned()
            .collect();
        orphans.sort_by_key(|p| p.id);
        orphans.truncate(limit as usize);
        Ok(orphans)
    }

    async fn status_counts(&self) -> StoreResult<PaymentStatusCounts> {
        let state = self.state.lock().unwrap();
        let mut counts = PaymentStatusCounts::default();
        for payment in &state.payments {
            match payment.payment_status() {
                PaymentStatus::Pending => counts.pending += 1,
                PaymentStatus::Success => counts.success += 1,
                PaymentStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl AdoptionStore for MemoryStore {
    async fn find_by_id(&self, adoption_id: i64) -> StoreResult<Option<AdoptionRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.adoptions.iter().find(|a| a.id == adoption_id).cloned())
    }

    async fn find_by_payment_reference(
        &self,
        reference_no: &str,
    ) -> StoreResult<Option<AdoptionRecord>> {
        if Self::take(&self.stale_adoption_reads) {
            return Ok(None);
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .adoptions
            .iter()
            .find(|a| a.payment_reference_no.as_deref() == Some(reference_no))
            .cloned())
    }

    async fn create_with_plant(
        &self,
        plant: NewBambooPlant,
        adoption: NewAdoption,
    ) -> StoreResult<(AdoptionRecord, BambooPlant)> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.plant_code_collisions) {
            return Err(DatabaseError::unique_violation(PLANT_CODE_CONSTRAINT));
        }
        if let Some(reference_no) = adoption.payment_reference_no.as_deref() {
            if self
                .failing_references
                .lock()
                .unwrap()
                .iter()
                .any(|r| r == reference_no)
            {
                return Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
                    message: "connection reset".to_string(),
                }));
            }
        }

        let mut state = self.state.lock().unwrap();
        if let Some(reference_no) = adoption.payment_reference_no.as_deref() {
            if state
                .adoptions
                .iter()
                .any(|a| a.payment_reference_no.as_deref() == Some(reference_no))
            {
                return Err(DatabaseError::unique_violation(ADOPTION_REFERENCE_CONSTRAINT));
            }
        }

        let plant = state.insert_plant(&plant)?;
        let package = adoption.package.as_ref();
        let record = AdoptionRecord {
            id: state.next_id(),
            user_id: adoption.user_id,
            plant_id: Some(plant.id),
            package_id: package.map(|p| p.package_id),
            package_name: package.map(|p| p.name.clone()),
            package_price: package.map(|p| p.price.clone()),
            package_period_months: package.map(|p| p.period_months),
            package_features: package.map(|p| Json(p.features.clone())),
            location_id: adoption.location_id,
            location_name: adoption.location_name.clone(),
            adoption_date: adoption.adoption_date,
            price_paid: adoption.price_paid.clone(),
            is_active: true,
            payment_reference_no: adoption.payment_reference_no.clone(),
            created_at: Utc::now(),
        };
        state.adoptions.push(record.clone());
        Ok((record, plant))
    }

    async fn find_missing_snapshot(
        &self,
        after_id: i64,
        limit: i64,
    ) -> StoreResult<Vec<AdoptionRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .adoptions
            .iter()
            .filter(|a| a.id > after_id && a.missing_snapshot())
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fill_snapshot(&self, adoption_id: i64, fill: &SnapshotFill) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(adoption) = state
            .adoptions
            .iter_mut()
            .find(|a| a.id == adoption_id && a.missing_snapshot())
        else {
            return Ok(false);
        };
        adoption
            .package_name
            .get_or_insert_with(|| fill.package_name.clone());
        adoption
            .package_price
            .get_or_insert_with(|| fill.package_price.clone());
        adoption
            .package_period_months
            .get_or_insert(fill.package_period_months);
        adoption
            .package_features
            .get_or_insert_with(|| Json(fill.package_features.clone()));
        adoption
            .location_name
            .get_or_insert_with(|| fill.location_name.clone());
        Ok(true)
    }

    async fn find_active_without_plant(
        &self,
        after_id: i64,
        limit: i64,
    ) -> StoreResult<Vec<AdoptionRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .adoptions
            .iter()
            .filter(|a| a.id > after_id && a.is_active && a.plant_id.is_none())
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn attach_new_plant(
        &self,
        adoption_id: i64,
        plant: NewBambooPlant,
    ) -> StoreResult<Option<BambooPlant>> {
        if Self::take(&self.plant_code_collisions) {
            return Err(DatabaseError::unique_violation(PLANT_CODE_CONSTRAINT));
        }
        let mut state = self.state.lock().unwrap();
        let linkable = state
            .adoptions
            .iter()
            .any(|a| a.id == adoption_id && a.plant_id.is_none());
        if !linkable {
            return Ok(None);
        }
        let plant = state.insert_plant(&plant)?;
        if let Some(adoption) = state.adoptions.iter_mut().find(|a| a.id == adoption_id) {
            adoption.plant_id = Some(plant.id);
        }
        Ok(Some(plant))
    }

    async fn apply_override(
        &self,
        adoption_id: i64,
        changes: &AdoptionOverride,
    ) -> StoreResult<Option<AdoptionRecord>> {
        let mut state = self.state.lock().unwrap();
        let Some(adoption) = state.adoptions.iter_mut().find(|a| a.id == adoption_id) else {
            return Ok(None);
        };
        if let Some(is_active) = changes.is_active {
            adoption.is_active = is_active;
        }
        if let Some(name) = &changes.package_name {
            adoption.package_name = Some(name.clone());
        }
        if let Some(price) = &changes.package_price {
            adoption.package_price = Some(price.clone());
        }
        if let Some(months) = changes.package_period_months {
            adoption.package_period_months = Some(months);
        }
        if let Some(features) = &changes.package_features {
            adoption.package_features = Some(Json(features.clone()));
        }
        if let Some(location) = &changes.location_name {
            adoption.location_name = Some(location.clone());
        }
        Ok(Some(adoption.clone()))
    }
}

#[async_trait]
impl PlantStore for MemoryStore {
    async fn find_by_id(&self, plant_id: i64) -> StoreResult<Option<BambooPlant>> {
        let state = self.state.lock().unwrap();
        Ok(state.plants.iter().find(|p| p.id == plant_id).cloned())
    }

    async fn record_growth(
        &self,
        plant_id: i64,
        entry: NewGrowthEntry,
        new_status: &str,
    ) -> StoreResult<GrowthTrackingEntry> {
        let mut state = self.state.lock().unwrap();
        let Some(plant) = state.plants.iter_mut().find(|p| p.id == plant_id) else {
            return Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "BambooPlant".to_string(),
                id: plant_id.to_string(),
            }));
        };
        plant.current_height = entry.height.clone();
        if let Some(co2) = &entry.co2_absorbed {
            plant.co2_absorbed = co2.clone();
        }
        plant.growth_status = new_status.to_string();

        let recorded = GrowthTrackingEntry {
            id: state.next_id(),
            plant_id,
            height: entry.height,
            diameter: entry.diameter,
            note: entry.note,
            recorded_date: entry.recorded_date,
            recorded_by: entry.recorded_by,
            created_at: Utc::now(),
        };
        state.growth.push(recorded.clone());
        Ok(recorded)
    }

    async fn growth_history(&self, plant_id: i64) -> StoreResult<Vec<GrowthTrackingEntry>> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<GrowthTrackingEntry> = state
            .growth
            .iter()
            .filter(|g| g.plant_id == plant_id)
            .cloned()
            .collect();
        entries.sort_by_key(|g| (g.recorded_date, g.id));
        Ok(entries)
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn find_active_package_by_type(
        &self,
        package_type: &str,
    ) -> StoreResult<Option<AdoptionPackage>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .packages
            .iter()
            .filter(|p| p.is_active && p.package_type == package_type)
            .min_by_key(|p| (p.sort_order, p.id))
            .cloned())
    }

    async fn find_default_package(&self) -> StoreResult<Option<AdoptionPackage>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .packages
            .iter()
            .filter(|p| p.is_active)
            .min_by_key(|p| (p.sort_order, p.id))
            .cloned())
    }

    async fn find_active_location(&self, location_id: i64) -> StoreResult<Option<Location>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .locations
            .iter()
            .find(|l| l.id == location_id && l.is_active)
            .cloned())
    }

    async fn find_default_location(&self) -> StoreResult<Option<Location>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .locations
            .iter()
            .filter(|l| l.is_active)
            .min_by_key(|l| l.id)
            .cloned())
    }

    async fn find_package(&self, package_id: i64) -> StoreResult<Option<AdoptionPackage>> {
        let state = self.state.lock().unwrap();
        Ok(state.packages.iter().find(|p| p.id == package_id).cloned())
    }

    async fn find_location(&self, location_id: i64) -> StoreResult<Option<Location>> {
        let state = self.state.lock().unwrap();
        Ok(state.locations.iter().find(|l| l.id == location_id).cloned())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn resolve_user(&self, external_id: &str) -> StoreResult<Option<i64>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .find(|(_, ext, _)| ext == external_id)
            .map(|(id, _, _)| *id))
    }

    async fn resolve_user_by_email(&self, email: &str) -> StoreResult<Option<i64>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .find(|(_, _, e)| e.eq_ignore_ascii_case(email))
            .map(|(id, _, _)| *id))
    }
}

/// What the fake gateway answers for one bill code
#[derive(Debug, Clone)]
pub enum Scripted {
    Paid,
    /// Paid, with the gateway's own payment time.
    PaidAt(DateTime<Utc>),
    /// Paid, but for a different amount than the one recorded.
    PaidAmount(&'static str),
    Failed,
    Pending,
    Error(PaymentError),
    /// Never answers within any sane timeout.
    Hang,
}

/// Gateway double: scripted bill statuses, callback parsing and
/// verification delegated to the real ToyyibPay implementation.
pub struct FakeGateway {
    scripts: Mutex<HashMap<String, Scripted>>,
    callbacks: ToyyibPayGateway,
    pub status_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Self::with_callback_secret(None)
    }

    pub fn with_callback_secret(secret: Option<&str>) -> Arc<Self> {
        let callbacks = ToyyibPayGateway::new(ToyyibPayConfig {
            callback_secret: secret.map(str::to_string),
            ..ToyyibPayConfig::default()
        })
        .unwrap();
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            callbacks,
            status_calls: AtomicUsize::new(0),
        })
    }

    pub fn script(&self, bill_code: &str, answer: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .insert(bill_code.to_string(), answer);
    }

    pub fn calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BillGateway for FakeGateway {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn bill_status(&self, bill_code: &str) -> PaymentResult<BillStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let answer = self
            .scripts
            .lock()
            .unwrap()
            .get(bill_code)
            .cloned()
            .unwrap_or(Scripted::Pending);

        let mut status = BillStatus::pending(bill_code);
        match answer {
            Scripted::Paid => {
                status.status = PaymentStatus::Success;
                status.paid_at = Some(Utc::now());
                status.gateway_reference = Some(format!("TP-{}", bill_code));
                status.amount = Some(dec("150.00"));
            }
            Scripted::PaidAt(at) => {
                status.status = PaymentStatus::Success;
                status.paid_at = Some(at);
                status.amount = Some(dec("150.00"));
            }
            Scripted::PaidAmount(amount) => {
                status.status = PaymentStatus::Success;
                status.paid_at = Some(Utc::now());
                status.amount = Some(dec(amount));
            }
            Scripted::Failed => status.status = PaymentStatus::Failed,
            Scripted::Pending => {}
            Scripted::Error(e) => return Err(e),
            Scripted::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
            }
        }
        Ok(status)
    }

    fn verify_callback(&self, payload: &[u8], signature: Option<&str>) -> PaymentResult<()> {
        self.callbacks.verify_callback(payload, signature)
    }

    fn parse_callback(
        &self,
        payload: &[u8],
        content_type: Option<&str>,
    ) -> PaymentResult<CallbackEvent> {
        self.callbacks.parse_callback(payload, content_type)
    }
}

pub fn engine(store: &Arc<MemoryStore>) -> Arc<ReconciliationEngine> {
    let stores = store.stores();
    Arc::new(ReconciliationEngine::new(
        stores.payments,
        stores.adoptions,
        stores.plants,
        stores.catalog,
        stores.users,
        PlantDefaults::default(),
    ))
}

pub fn app_state(store: &Arc<MemoryStore>, gateway: &Arc<FakeGateway>) -> AppState {
    AppState::build(
        store.stores(),
        gateway.clone(),
        ServiceSettings::default(),
        HealthChecker::default(),
    )
    .unwrap()
}
