//! Health check module
//! Provides health status for the application and its dependencies

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }
}

/// A dependency that can be pinged
#[async_trait]
pub trait ComponentProbe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn ping(&self) -> Result<(), String>;
}

pub struct DatabaseProbe {
    pool: sqlx::PgPool,
}

impl DatabaseProbe {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ComponentProbe for DatabaseProbe {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn ping(&self) -> Result<(), String> {
        crate::database::health_check(&self.pool)
            .await
            .map_err(|e| e.to_string())
    }
}

/// Health checker for the application
#[derive(Clone, Default)]
pub struct HealthChecker {
    probes: Vec<Arc<dyn ComponentProbe>>,
}

impl HealthChecker {
    pub fn new(probes: Vec<Arc<dyn ComponentProbe>>) -> Self {
        Self { probes }
    }

    /// Pings every probe, each bounded by a timeout.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let mut overall_healthy = true;

        for probe in &self.probes {
            let name = probe.name();
            let start = Instant::now();
            let component = match timeout(PROBE_TIMEOUT, probe.ping()).await {
                Ok(Ok(())) => {
                    let elapsed = start.elapsed().as_millis();
                    info!(component = name, response_time_ms = elapsed as u64, "health check ok");
                    ComponentHealth::up(Some(elapsed))
                }
                Ok(Err(e)) => {
                    overall_healthy = false;
                    error!(component = name, error = %e, "health check failed");
                    ComponentHealth::down(Some(e))
                }
                Err(_) => {
                    overall_healthy = false;
                    error!(component = name, "health check timed out");
                    ComponentHealth::down(Some("Timeout".to_string()))
                }
            };
            health_status.checks.insert(name.to_string(), component);
        }

        health_status.status = if overall_healthy {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };

        health_status
    }
}
