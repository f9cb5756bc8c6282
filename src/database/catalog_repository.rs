use crate::database::error::DatabaseError;
use crate::database::repository::{CatalogStore, StoreResult};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{
    types::{BigDecimal, Json},
    FromRow, PgPool,
};

/// Adoption package offered in the catalog
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AdoptionPackage {
    pub id: i64,
    pub package_type: String,
    pub name: String,
    pub price: BigDecimal,
    pub period_months: i32,
    pub features: Json<Vec<String>>,
    pub sort_order: i32,
    pub is_active: bool,
}

/// Planting location
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
}

/// Read-only access to packages and locations
pub struct CatalogRepository {
    pool: PgPool,
}

impl CatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for CatalogRepository {
    async fn find_active_package_by_type(
        &self,
        package_type: &str,
    ) -> StoreResult<Option<AdoptionPackage>> {
        sqlx::query_as::<_, AdoptionPackage>(
            "SELECT id, package_type, name, price, period_months, features, sort_order, is_active
             FROM adoption_packages
             WHERE package_type = $1 AND is_active = true
             ORDER BY sort_order ASC, id ASC
             LIMIT 1",
        )
        .bind(package_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_default_package(&self) -> StoreResult<Option<AdoptionPackage>> {
        sqlx::query_as::<_, AdoptionPackage>(
            "SELECT id, package_type, name, price, period_months, features, sort_order, is_active
             FROM adoption_packages
             WHERE is_active = true
             ORDER BY sort_order ASC, id ASC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_active_location(&self, location_id: i64) -> StoreResult<Option<Location>> {
        sqlx::query_as::<_, Location>(
            "SELECT id, name, is_active FROM locations WHERE id = $1 AND is_active = true",
        )
        .bind(location_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_default_location(&self) -> StoreResult<Option<Location>> {
        sqlx::query_as::<_, Location>(
            "SELECT id, name, is_active FROM locations WHERE is_active = true ORDER BY id ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_package(&self, package_id: i64) -> StoreResult<Option<AdoptionPackage>> {
        sqlx::query_as::<_, AdoptionPackage>(
            "SELECT id, package_type, name, price, period_months, features, sort_order, is_active
             FROM adoption_packages
             WHERE id = $1",
        )
        .bind(package_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_location(&self, location_id: i64) -> StoreResult<Option<Location>> {
        sqlx::query_as::<_, Location>("SELECT id, name, is_active FROM locations WHERE id = $1")
            .bind(location_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}
