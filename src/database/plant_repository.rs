use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{PlantStore, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::BigDecimal, FromRow, PgPool};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlantStatus {
    Growing,
    Mature,
    Other,
}

impl PlantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlantStatus::Growing => "growing",
            PlantStatus::Mature => "mature",
            PlantStatus::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "growing" => PlantStatus::Growing,
            "mature" => PlantStatus::Mature,
            _ => PlantStatus::Other,
        }
    }
}

impl fmt::Display for PlantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bamboo plant entity
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BambooPlant {
    pub id: i64,
    pub plant_code: String,
    pub species: String,
    pub planted_date: NaiveDate,
    pub current_height: BigDecimal,
    pub co2_absorbed: BigDecimal,
    pub growth_status: String,
    pub location_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BambooPlant {
    pub fn status(&self) -> PlantStatus {
        PlantStatus::parse(&self.growth_status)
    }
}

/// Values for a plant that has not been persisted yet
#[derive(Debug, Clone)]
pub struct NewBambooPlant {
    pub plant_code: String,
    pub species: String,
    pub planted_date: NaiveDate,
    pub current_height: BigDecimal,
    pub co2_absorbed: BigDecimal,
    pub growth_status: PlantStatus,
    pub location_name: Option<String>,
}

/// One row of a plant's growth log
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GrowthTrackingEntry {
    pub id: i64,
    pub plant_id: i64,
    pub height: BigDecimal,
    pub diameter: Option<BigDecimal>,
    pub note: Option<String>,
    pub recorded_date: NaiveDate,
    pub recorded_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewGrowthEntry {
    pub height: BigDecimal,
    pub diameter: Option<BigDecimal>,
    /// Cumulative CO2 figure to store on the plant, if the measurement has one
    pub co2_absorbed: Option<BigDecimal>,
    pub note: Option<String>,
    pub recorded_date: NaiveDate,
    pub recorded_by: String,
}

pub(crate) async fn insert_plant<'e, E>(executor: E, plant: &NewBambooPlant) -> StoreResult<BambooPlant>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, BambooPlant>(
        "INSERT INTO bamboo_plants
         (plant_code, species, planted_date, current_height, co2_absorbed, growth_status, location_name)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING id, plant_code, species, planted_date, current_height, co2_absorbed,
                   growth_status, location_name, created_at",
    )
    .bind(&plant.plant_code)
    .bind(&plant.species)
    .bind(plant.planted_date)
    .bind(&plant.current_height)
    .bind(&plant.co2_absorbed)
    .bind(plant.growth_status.as_str())
    .bind(&plant.location_name)
    .fetch_one(executor)
    .await
    .map_err(DatabaseError::from_sqlx)
}

/// Repository for bamboo plants and their growth log
pub struct PlantRepository {
    pool: PgPool,
}

impl PlantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlantStore for PlantRepository {
    async fn find_by_id(&self, plant_id: i64) -> StoreResult<Option<BambooPlant>> {
        sqlx::query_as::<_, BambooPlant>(
            "SELECT id, plant_code, species, planted_date, current_height, co2_absorbed,
                    growth_status, location_name, created_at
             FROM bamboo_plants
             WHERE id = $1",
        )
        .bind(plant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn record_growth(
        &self,
        plant_id: i64,
        entry: NewGrowthEntry,
        new_status: &str,
    ) -> StoreResult<GrowthTrackingEntry> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let updated = sqlx::query(
            "UPDATE bamboo_plants
             SET current_height = $2,
                 co2_absorbed = COALESCE($3, co2_absorbed),
                 growth_status = $4
             WHERE id = $1",
        )
        .bind(plant_id)
        .bind(&entry.height)
        .bind(&entry.co2_absorbed)
        .bind(new_status)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "BambooPlant".to_string(),
                id: plant_id.to_string(),
            }));
        }

        let inserted = sqlx::query_as::<_, GrowthTrackingEntry>(
            "INSERT INTO growth_tracking (plant_id, height, diameter, note, recorded_date, recorded_by)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, plant_id, height, diameter, note, recorded_date, recorded_by, created_at",
        )
        .bind(plant_id)
        .bind(&entry.height)
        .bind(&entry.diameter)
        .bind(&entry.note)
        .bind(entry.recorded_date)
        .bind(&entry.recorded_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(inserted)
    }

    async fn growth_history(&self, plant_id: i64) -> StoreResult<Vec<GrowthTrackingEntry>> {
        sqlx::query_as::<_, GrowthTrackingEntry>(
            "SELECT id, plant_id, height, diameter, note, recorded_date, recorded_by, created_at
             FROM growth_tracking
             WHERE plant_id = $1
             ORDER BY recorded_date ASC, id ASC",
        )
        .bind(plant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
