use std::sync::Arc;
use tracing::info;

use crate::database::adoption_repository::{AdoptionOverride, AdoptionRecord};
use crate::database::repository::AdoptionStore;
use crate::error::{AppError, AppErrorKind, AppResult, DomainError};

/// Direct admin edits of adoptions.
///
/// Edits are taken as authoritative: they are not checked against the
/// catalog and do not trigger a snapshot repair.
pub struct AdoptionAdmin {
    adoptions: Arc<dyn AdoptionStore>,
}

impl AdoptionAdmin {
    pub fn new(adoptions: Arc<dyn AdoptionStore>) -> Self {
        Self { adoptions }
    }

    pub async fn apply_override(
        &self,
        adoption_id: i64,
        changes: AdoptionOverride,
    ) -> AppResult<AdoptionRecord> {
        if changes.is_empty() {
            return Err(AppError::invalid_field("body", "no fields to update"));
        }
        if changes.package_period_months.is_some_and(|m| m <= 0) {
            return Err(AppError::invalid_field(
                "package_period_months",
                "must be greater than zero",
            ));
        }
        if changes
            .package_price
            .as_ref()
            .is_some_and(|p| *p < bigdecimal::BigDecimal::from(0))
        {
            return Err(AppError::invalid_field("package_price", "must not be negative"));
        }
        if changes
            .package_name
            .as_deref()
            .is_some_and(|n| n.trim().is_empty())
            || changes
                .location_name
                .as_deref()
                .is_some_and(|n| n.trim().is_empty())
        {
            return Err(AppError::invalid_field("name", "must not be blank"));
        }

        let updated = self
            .adoptions
            .apply_override(adoption_id, &changes)
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::AdoptionNotFound { adoption_id }))
            })?;

        info!(
            adoption_id,
            is_active = updated.is_active,
            "adoption updated by admin"
        );
        Ok(updated)
    }
}
