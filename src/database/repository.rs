//! Store seams used by the reconciliation services.
//!
//! Each trait is implemented by a Postgres repository in this module tree.
//! Services hold them as `Arc<dyn ...>` so the engine, poller and sweeps can
//! be driven against any store that enforces the same unique keys.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;

use crate::database::adoption_repository::{
    AdoptionOverride, AdoptionRecord, NewAdoption, SnapshotFill,
};
use crate::database::catalog_repository::{AdoptionPackage, Location};
use crate::database::error::DatabaseError;
use crate::database::payment_repository::{PaymentRecord, PaymentStatus, PaymentStatusCounts};
use crate::database::plant_repository::{
    BambooPlant, GrowthTrackingEntry, NewBambooPlant, NewGrowthEntry,
};

pub type StoreResult<T> = Result<T, DatabaseError>;

/// Walks a keyset-paged scan to the end. `fetch` receives the id of the last
/// row seen (0 before the first page); a page shorter than `page_size` ends
/// the scan.
pub async fn collect_pages<T, F, Fut>(
    page_size: i64,
    key: impl Fn(&T) -> i64,
    mut fetch: F,
) -> StoreResult<Vec<T>>
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = StoreResult<Vec<T>>>,
{
    let mut rows = Vec::new();
    let mut after_id = 0;
    loop {
        let page = fetch(after_id).await?;
        let Some(last) = page.last() else { break };
        after_id = key(last);
        let short = (page.len() as i64) < page_size;
        rows.extend(page);
        if short {
            break;
        }
    }
    Ok(rows)
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn find_by_reference(&self, reference_no: &str) -> StoreResult<Option<PaymentRecord>>;

    async fn find_by_bill_code(&self, bill_code: &str) -> StoreResult<Option<PaymentRecord>>;

    /// Pending payments created inside `(created_after, created_before)`
    /// with an id above `after_id`, in id order.
    async fn find_pending_for_polling(
        &self,
        created_after: DateTime<Utc>,
        created_before: DateTime<Utc>,
        after_id: i64,
        limit: i64,
    ) -> StoreResult<Vec<PaymentRecord>>;

    /// Moves a payment out of `pending`. Returns `None` when the payment is
    /// not pending anymore (or does not exist), so a settled status is never
    /// rewritten.
    async fn settle(
        &self,
        reference_no: &str,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<PaymentRecord>>;

    /// Successful payments with no adoption carrying their reference number,
    /// id above `after_id`, in id order.
    async fn find_orphaned_successes(&self, after_id: i64, limit: i64) -> StoreResult<Vec<PaymentRecord>>;

    async fn status_counts(&self) -> StoreResult<PaymentStatusCounts>;
}

#[async_trait]
pub trait AdoptionStore: Send + Sync {
    async fn find_by_id(&self, adoption_id: i64) -> StoreResult<Option<AdoptionRecord>>;

    async fn find_by_payment_reference(
        &self,
        reference_no: &str,
    ) -> StoreResult<Option<AdoptionRecord>>;

    /// Inserts the plant and the adoption pointing at it in one transaction.
    /// A duplicate `payment_reference_no` or `plant_code` surfaces as a
    /// unique violation and nothing is written.
    async fn create_with_plant(
        &self,
        plant: NewBambooPlant,
        adoption: NewAdoption,
    ) -> StoreResult<(AdoptionRecord, BambooPlant)>;

    /// Adoptions where any package or location snapshot column is null,
    /// id above `after_id`, in id order.
    async fn find_missing_snapshot(&self, after_id: i64, limit: i64) -> StoreResult<Vec<AdoptionRecord>>;

    /// Fills only the snapshot columns that are still null. Returns whether
    /// any column changed.
    async fn fill_snapshot(&self, adoption_id: i64, fill: &SnapshotFill) -> StoreResult<bool>;

    async fn find_active_without_plant(&self, after_id: i64, limit: i64) -> StoreResult<Vec<AdoptionRecord>>;

    /// Inserts the plant and links it, in one transaction, only if the
    /// adoption still has no plant. Returns `None` when another writer got
    /// there first (the new plant is rolled back).
    async fn attach_new_plant(
        &self,
        adoption_id: i64,
        plant: NewBambooPlant,
    ) -> StoreResult<Option<BambooPlant>>;

    async fn apply_override(
        &self,
        adoption_id: i64,
        changes: &AdoptionOverride,
    ) -> StoreResult<Option<AdoptionRecord>>;
}

#[async_trait]
pub trait PlantStore: Send + Sync {
    async fn find_by_id(&self, plant_id: i64) -> StoreResult<Option<BambooPlant>>;

    /// Appends the entry and updates the plant's current metrics in one
    /// transaction.
    async fn record_growth(
        &self,
        plant_id: i64,
        entry: NewGrowthEntry,
        new_status: &str,
    ) -> StoreResult<GrowthTrackingEntry>;

    /// Entries ordered by recorded date, oldest first.
    async fn growth_history(&self, plant_id: i64) -> StoreResult<Vec<GrowthTrackingEntry>>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_active_package_by_type(
        &self,
        package_type: &str,
    ) -> StoreResult<Option<AdoptionPackage>>;

    /// Active package with the lowest sort order.
    async fn find_default_package(&self) -> StoreResult<Option<AdoptionPackage>>;

    async fn find_active_location(&self, location_id: i64) -> StoreResult<Option<Location>>;

    /// First active location by id.
    async fn find_default_location(&self) -> StoreResult<Option<Location>>;

    /// Lookup regardless of the active flag.
    async fn find_package(&self, package_id: i64) -> StoreResult<Option<AdoptionPackage>>;

    /// Lookup regardless of the active flag.
    async fn find_location(&self, location_id: i64) -> StoreResult<Option<Location>>;
}

/// Maps identities from the external identity provider to internal users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve_user(&self, external_id: &str) -> StoreResult<Option<i64>>;

    async fn resolve_user_by_email(&self, email: &str) -> StoreResult<Option<i64>>;
}
