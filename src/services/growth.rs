use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::database::error::DatabaseErrorKind;
use crate::database::plant_repository::{
    BambooPlant, GrowthTrackingEntry, NewGrowthEntry, PlantStatus,
};
use crate::database::repository::PlantStore;
use crate::error::{AppError, AppErrorKind, AppResult, DomainError};

/// A measurement as submitted by staff
#[derive(Debug, Clone, Deserialize)]
pub struct GrowthMeasurement {
    pub height: BigDecimal,
    #[serde(default)]
    pub diameter: Option<BigDecimal>,
    #[serde(default)]
    pub co2_absorbed: Option<BigDecimal>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub recorded_date: Option<NaiveDate>,
    #[serde(default)]
    pub recorded_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrowthHistory {
    pub plant: BambooPlant,
    pub entries: Vec<GrowthTrackingEntry>,
}

pub struct GrowthTracker {
    plants: Arc<dyn PlantStore>,
    mature_height: BigDecimal,
}

impl GrowthTracker {
    pub fn new(plants: Arc<dyn PlantStore>, mature_height: BigDecimal) -> Self {
        Self {
            plants,
            mature_height,
        }
    }

    pub fn mature_height_from_env() -> BigDecimal {
        std::env::var("PLANT_MATURE_HEIGHT")
            .ok()
            .and_then(|v| BigDecimal::from_str(v.trim()).ok())
            .filter(|v| *v > BigDecimal::from(0))
            .unwrap_or_else(|| BigDecimal::from(12))
    }

    /// Status after a measurement. Plants marked with a status other than
    /// growing/mature keep it until they cross the maturity threshold.
    pub fn next_status(&self, current: PlantStatus, height: &BigDecimal) -> PlantStatus {
        if *height >= self.mature_height {
            PlantStatus::Mature
        } else if current == PlantStatus::Other {
            PlantStatus::Other
        } else {
            PlantStatus::Growing
        }
    }

    pub async fn record(
        &self,
        plant_id: i64,
        measurement: GrowthMeasurement,
    ) -> AppResult<GrowthTrackingEntry> {
        let zero = BigDecimal::from(0);
        if measurement.height <= zero {
            return Err(AppError::invalid_field("height", "must be greater than zero"));
        }
        if measurement.diameter.as_ref().is_some_and(|d| *d <= zero) {
            return Err(AppError::invalid_field("diameter", "must be greater than zero"));
        }
        if measurement.co2_absorbed.as_ref().is_some_and(|c| *c < zero) {
            return Err(AppError::invalid_field("co2_absorbed", "must not be negative"));
        }

        let plant = self.find_plant(plant_id).await?;
        let status = self.next_status(plant.status(), &measurement.height);

        let entry = NewGrowthEntry {
            height: measurement.height,
            diameter: measurement.diameter,
            co2_absorbed: measurement.co2_absorbed,
            note: measurement
                .note
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            recorded_date: measurement
                .recorded_date
                .unwrap_or_else(|| Utc::now().date_naive()),
            recorded_by: measurement
                .recorded_by
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "admin".to_string()),
        };

        let recorded = self
            .plants
            .record_growth(plant_id, entry, status.as_str())
            .await
            .map_err(|e| match e.kind {
                DatabaseErrorKind::NotFound { .. } => plant_not_found(plant_id),
                _ => AppError::from(e),
            })?;

        info!(
            plant_id,
            plant_code = %plant.plant_code,
            height = %recorded.height,
            status = %status,
            "growth measurement recorded"
        );
        Ok(recorded)
    }

    pub async fn history(&self, plant_id: i64) -> AppResult<GrowthHistory> {
        let plant = self.find_plant(plant_id).await?;
        let entries = self.plants.growth_history(plant_id).await?;
        Ok(GrowthHistory { plant, entries })
    }

    async fn find_plant(&self, plant_id: i64) -> AppResult<BambooPlant> {
        self.plants
            .find_by_id(plant_id)
            .await?
            .ok_or_else(|| plant_not_found(plant_id))
    }
}

fn plant_not_found(plant_id: i64) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::PlantNotFound { plant_id }))
}
