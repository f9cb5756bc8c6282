//! HTTP surface
//!
//! Admin routes carry no authentication of their own; they are expected to
//! sit behind the deployment's admin gateway.

pub mod admin;
pub mod payments;
pub mod plants;

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use bigdecimal::BigDecimal;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::config::AppConfig;
use crate::database::adoption_repository::AdoptionRepository;
use crate::database::catalog_repository::CatalogRepository;
use crate::database::payment_repository::PaymentRepository;
use crate::database::plant_repository::PlantRepository;
use crate::database::repository::{
    AdoptionStore, CatalogStore, PaymentStore, PlantStore, UserDirectory,
};
use crate::database::user_repository::UserRepository;
use crate::error::{AppError, AppResult};
use crate::health::HealthChecker;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::payments::provider::BillGateway;
use crate::services::{
    AdoptionAdmin, BackfillConfig, BackfillService, CallbackProcessor, GrowthTracker,
    PlantDefaults, PollerConfig, ReconciliationEngine, StatusPoller,
};
use crate::workers::payment_scheduler::{PaymentScheduler, SchedulerConfig, SchedulerError};

/// The store seams, as trait objects
#[derive(Clone)]
pub struct Stores {
    pub payments: Arc<dyn PaymentStore>,
    pub adoptions: Arc<dyn AdoptionStore>,
    pub plants: Arc<dyn PlantStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub users: Arc<dyn UserDirectory>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            payments: Arc::new(PaymentRepository::new(pool.clone())),
            adoptions: Arc::new(AdoptionRepository::new(pool.clone())),
            plants: Arc::new(PlantRepository::new(pool.clone())),
            catalog: Arc::new(CatalogRepository::new(pool.clone())),
            users: Arc::new(UserRepository::new(pool)),
        }
    }
}

/// Tunables for the services behind the router
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub plants: PlantDefaults,
    pub poller: PollerConfig,
    pub scheduler: SchedulerConfig,
    pub backfill: BackfillConfig,
    pub mature_height: BigDecimal,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            plants: PlantDefaults::default(),
            poller: PollerConfig::default(),
            scheduler: SchedulerConfig::default(),
            backfill: BackfillConfig::default(),
            mature_height: BigDecimal::from(12),
        }
    }
}

impl From<&AppConfig> for ServiceSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            plants: config.plants.clone(),
            poller: config.poller.clone(),
            scheduler: config.scheduler.clone(),
            backfill: config.backfill.clone(),
            mature_height: config.mature_height.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub poller: Arc<StatusPoller>,
    pub callbacks: Arc<CallbackProcessor>,
    pub backfill: Arc<BackfillService>,
    pub growth: Arc<GrowthTracker>,
    pub adoption_admin: Arc<AdoptionAdmin>,
    pub scheduler: Arc<PaymentScheduler>,
    pub health: HealthChecker,
}

impl AppState {
    pub fn build(
        stores: Stores,
        gateway: Arc<dyn BillGateway>,
        settings: ServiceSettings,
        health: HealthChecker,
    ) -> Result<Self, SchedulerError> {
        let engine = Arc::new(ReconciliationEngine::new(
            stores.payments.clone(),
            stores.adoptions.clone(),
            stores.plants.clone(),
            stores.catalog.clone(),
            stores.users.clone(),
            settings.plants,
        ));
        let request_timeout = settings.poller.request_timeout;
        let poller = Arc::new(StatusPoller::new(
            stores.payments.clone(),
            gateway.clone(),
            engine.clone(),
            settings.poller,
        ));
        let scheduler = Arc::new(PaymentScheduler::new(poller.clone(), &settings.scheduler)?);

        Ok(Self {
            callbacks: Arc::new(
                CallbackProcessor::new(stores.payments.clone(), gateway, engine.clone())
                    .with_request_timeout(request_timeout),
            ),
            backfill: Arc::new(BackfillService::new(
                stores.payments,
                stores.adoptions.clone(),
                stores.catalog,
                engine.clone(),
                settings.backfill,
            )),
            growth: Arc::new(GrowthTracker::new(stores.plants, settings.mature_height)),
            adoption_admin: Arc::new(AdoptionAdmin::new(stores.adoptions)),
            engine,
            poller,
            scheduler,
            health,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/payments/callback", post(payments::callback))
        .route("/api/payments/{reference_no}/poll", post(payments::poll))
        .route(
            "/api/payments/{reference_no}/reconcile",
            post(payments::reconcile),
        )
        .route("/api/plants/{id}/growth", get(plants::growth_history))
        .route("/api/admin/payments/poll", post(admin::poll_now))
        .route("/api/admin/scheduler", get(admin::scheduler_status))
        .route("/api/admin/scheduler/start", post(admin::scheduler_start))
        .route("/api/admin/scheduler/stop", post(admin::scheduler_stop))
        .route(
            "/api/admin/scheduler/interval",
            put(admin::scheduler_interval),
        )
        .route(
            "/api/admin/backfill/denormalized",
            post(admin::backfill_denormalized),
        )
        .route("/api/admin/backfill/plants", post(admin::backfill_plants))
        .route(
            "/api/admin/backfill/orphans",
            get(admin::list_orphans).post(admin::reconcile_orphans),
        )
        .route("/api/admin/backfill/sweep", post(admin::full_sweep))
        .route("/api/admin/diagnostics", get(admin::diagnostics))
        .route("/api/admin/adoptions/{id}", patch(admin::update_adoption))
        .route("/api/admin/plants/{id}/growth", post(admin::record_growth))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

/// GET /health
async fn health(State(state): State<AppState>) -> Response {
    let status = state.health.check_health().await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(serde_json::json!({
            "success": status.is_healthy(),
            "data": status,
        })),
    )
        .into_response()
}

/// Turns an extractor rejection into a 400 with the usual envelope.
pub(crate) fn json_body<T: DeserializeOwned>(
    body: Result<Json<T>, JsonRejection>,
) -> AppResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::invalid_field("body", rejection.body_text()))
}

pub(crate) fn path_id(path: Result<Path<i64>, PathRejection>) -> AppResult<i64> {
    let Path(id) = path.map_err(|rejection| AppError::invalid_field("id", rejection.body_text()))?;
    if id <= 0 {
        return Err(AppError::invalid_field("id", "must be a positive integer"));
    }
    Ok(id)
}

const MAX_REFERENCE_LEN: usize = 64;

/// Payment references are opaque but never contain whitespace or slashes.
pub(crate) fn reference_no(raw: &str) -> AppResult<&str> {
    let well_formed = !raw.is_empty()
        && raw.len() <= MAX_REFERENCE_LEN
        && raw.starts_with(|c: char| c.is_ascii_alphanumeric())
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if well_formed {
        Ok(raw)
    } else {
        Err(AppError::invalid_field(
            "reference_no",
            "must be 1-64 letters, digits, '-' or '_'",
        ))
    }
}
