use crate::database::catalog_repository::AdoptionPackage;
use crate::database::error::DatabaseError;
use crate::database::plant_repository::{insert_plant, BambooPlant, NewBambooPlant};
use crate::database::repository::{AdoptionStore, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
    types::{BigDecimal, Json},
    FromRow, PgPool,
};

/// Adoption entity
///
/// The `package_*` and `location_name` columns are copies taken when the
/// adoption was written; later catalog edits do not reach them.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AdoptionRecord {
    pub id: i64,
    pub user_id: i64,
    pub plant_id: Option<i64>,
    pub package_id: Option<i64>,
    pub package_name: Option<String>,
    pub package_price: Option<BigDecimal>,
    pub package_period_months: Option<i32>,
    pub package_features: Option<Json<Vec<String>>>,
    pub location_id: Option<i64>,
    pub location_name: Option<String>,
    pub adoption_date: NaiveDate,
    pub price_paid: BigDecimal,
    pub is_active: bool,
    pub payment_reference_no: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AdoptionRecord {
    pub fn missing_snapshot(&self) -> bool {
        self.package_name.is_none()
            || self.package_price.is_none()
            || self.package_period_months.is_none()
            || self.package_features.is_none()
            || self.location_name.is_none()
    }

    pub fn features(&self) -> &[String] {
        self.package_features
            .as_ref()
            .map(|f| f.0.as_slice())
            .unwrap_or(&[])
    }
}

/// Package attributes frozen onto an adoption
#[derive(Debug, Clone, PartialEq)]
pub struct PackageSnapshot {
    pub package_id: i64,
    pub name: String,
    pub price: BigDecimal,
    pub period_months: i32,
    pub features: Vec<String>,
}

impl From<&AdoptionPackage> for PackageSnapshot {
    fn from(package: &AdoptionPackage) -> Self {
        Self {
            package_id: package.id,
            name: package.name.clone(),
            price: package.price.clone(),
            period_months: package.period_months,
            features: package.features.0.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAdoption {
    pub user_id: i64,
    pub package: Option<PackageSnapshot>,
    pub location_id: Option<i64>,
    pub location_name: Option<String>,
    pub adoption_date: NaiveDate,
    pub price_paid: BigDecimal,
    pub payment_reference_no: Option<String>,
}

/// Values used to fill null snapshot columns during backfill
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotFill {
    pub package_name: String,
    pub package_price: BigDecimal,
    pub package_period_months: i32,
    pub package_features: Vec<String>,
    pub location_name: String,
}

/// Direct admin edit of an adoption. Absent fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdoptionOverride {
    pub is_active: Option<bool>,
    pub package_name: Option<String>,
    pub package_price: Option<BigDecimal>,
    pub package_period_months: Option<i32>,
    pub package_features: Option<Vec<String>>,
    pub location_name: Option<String>,
}

impl AdoptionOverride {
    pub fn is_empty(&self) -> bool {
        self.is_active.is_none()
            && self.package_name.is_none()
            && self.package_price.is_none()
            && self.package_period_months.is_none()
            && self.package_features.is_none()
            && self.location_name.is_none()
    }
}

/// Repository for adoption records
pub struct AdoptionRepository {
    pool: PgPool,
}

impl AdoptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AdoptionStore for AdoptionRepository {
    async fn find_by_id(&self, adoption_id: i64) -> StoreResult<Option<AdoptionRecord>> {
        sqlx::query_as::<_, AdoptionRecord>(
            "SELECT id, user_id, plant_id, package_id, package_name, package_price,
                    package_period_months, package_features, location_id, location_name,
                    adoption_date, price_paid, is_active, payment_reference_no, created_at
             FROM adoptions
             WHERE id = $1",
        )
        .bind(adoption_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_payment_reference(
        &self,
        reference_no: &str,
    ) -> StoreResult<Option<AdoptionRecord>> {
        sqlx::query_as::<_, AdoptionRecord>(
            "SELECT id, user_id, plant_id, package_id, package_name, package_price,
                    package_period_months, package_features, location_id, location_name,
                    adoption_date, price_paid, is_active, payment_reference_no, created_at
             FROM adoptions
             WHERE payment_reference_no = $1",
        )
        .bind(reference_no)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn create_with_plant(
        &self,
        plant: NewBambooPlant,
        adoption: NewAdoption,
    ) -> StoreResult<(AdoptionRecord, BambooPlant)> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let plant = insert_plant(&mut *tx, &plant).await?;

        let package = adoption.package.as_ref();
        let record = sqlx::query_as::<_, AdoptionRecord>(
            "INSERT INTO adoptions
             (user_id, plant_id, package_id, package_name, package_price, package_period_months,
              package_features, location_id, location_name, adoption_date, price_paid,
              is_active, payment_reference_no)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, true, $12)
             RETURNING id, user_id, plant_id, package_id, package_name, package_price,
                       package_period_months, package_features, location_id, location_name,
                       adoption_date, price_paid, is_active, payment_reference_no, created_at",
        )
        .bind(adoption.user_id)
        .bind(plant.id)
        .bind(package.map(|p| p.package_id))
        .bind(package.map(|p| p.name.clone()))
        .bind(package.map(|p| p.price.clone()))
        .bind(package.map(|p| p.period_months))
        .bind(package.map(|p| Json(p.features.clone())))
        .bind(adoption.location_id)
        .bind(&adoption.location_name)
        .bind(adoption.adoption_date)
        .bind(&adoption.price_paid)
        .bind(&adoption.payment_reference_no)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok((record, plant))
    }

    async fn find_missing_snapshot(
        &self,
        after_id: i64,
        limit: i64,
    ) -> StoreResult<Vec<AdoptionRecord>> {
        sqlx::query_as::<_, AdoptionRecord>(
            "SELECT id, user_id, plant_id, package_id, package_name, package_price,
                    package_period_months, package_features, location_id, location_name,
                    adoption_date, price_paid, is_active, payment_reference_no, created_at
             FROM adoptions
             WHERE id > $1
               AND (package_name IS NULL
                 OR package_price IS NULL
                 OR package_period_months IS NULL
                 OR package_features IS NULL
                 OR location_name IS NULL)
             ORDER BY id ASC
             LIMIT $2",
        )
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn fill_snapshot(&self, adoption_id: i64, fill: &SnapshotFill) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE adoptions
             SET package_name = COALESCE(package_name, $2),
                 package_price = COALESCE(package_price, $3),
                 package_period_months = COALESCE(package_period_months, $4),
                 package_features = COALESCE(package_features, $5),
                 location_name = COALESCE(location_name, $6)
             WHERE id = $1
               AND (package_name IS NULL
                 OR package_price IS NULL
                 OR package_period_months IS NULL
                 OR package_features IS NULL
                 OR location_name IS NULL)",
        )
        .bind(adoption_id)
        .bind(&fill.package_name)
        .bind(&fill.package_price)
        .bind(fill.package_period_months)
        .bind(Json(&fill.package_features))
        .bind(&fill.location_name)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_active_without_plant(
        &self,
        after_id: i64,
        limit: i64,
    ) -> StoreResult<Vec<AdoptionRecord>> {
        sqlx::query_as::<_, AdoptionRecord>(
            "SELECT id, user_id, plant_id, package_id, package_name, package_price,
                    package_period_months, package_features, location_id, location_name,
                    adoption_date, price_paid, is_active, payment_reference_no, created_at
             FROM adoptions
             WHERE is_active = true AND plant_id IS NULL AND id > $1
             ORDER BY id ASC
             LIMIT $2",
        )
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn attach_new_plant(
        &self,
        adoption_id: i64,
        plant: NewBambooPlant,
    ) -> StoreResult<Option<BambooPlant>> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let plant = insert_plant(&mut *tx, &plant).await?;

        let linked = sqlx::query(
            "UPDATE adoptions SET plant_id = $2 WHERE id = $1 AND plant_id IS NULL",
        )
        .bind(adoption_id)
        .bind(plant.id)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if linked.rows_affected() == 0 {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(None);
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(Some(plant))
    }

    async fn apply_override(
        &self,
        adoption_id: i64,
        changes: &AdoptionOverride,
    ) -> StoreResult<Option<AdoptionRecord>> {
        sqlx::query_as::<_, AdoptionRecord>(
            "UPDATE adoptions
             SET is_active = COALESCE($2, is_active),
                 package_name = COALESCE($3, package_name),
                 package_price = COALESCE($4, package_price),
                 package_period_months = COALESCE($5, package_period_months),
                 package_features = COALESCE($6, package_features),
                 location_name = COALESCE($7, location_name)
             WHERE id = $1
             RETURNING id, user_id, plant_id, package_id, package_name, package_price,
                       package_period_months, package_features, location_id, location_name,
                       adoption_date, price_paid, is_active, payment_reference_no, created_at",
        )
        .bind(adoption_id)
        .bind(changes.is_active)
        .bind(&changes.package_name)
        .bind(&changes.package_price)
        .bind(changes.package_period_months)
        .bind(changes.package_features.as_ref().map(Json))
        .bind(&changes.location_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
