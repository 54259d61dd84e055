//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone)]
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
#[derive(Debug, Serialize, Clone)]
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

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    db_pool: sqlx::PgPool,
}

impl HealthChecker {
    pub fn new(db_pool: sqlx::PgPool) -> Self {
        Self { db_pool }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        match timeout(Duration::from_secs(5), check_database_health(&self.db_pool)).await {
            Ok(Ok(response_time)) => {
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::up(Some(response_time)),
                );
                info!("Database health check: OK ({}ms)", response_time);
            }
            Ok(Err(e)) => {
                health_status.status = HealthState::Unhealthy;
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::down(Some(e.to_string())),
                );
                error!("Database health check failed: {}", e);
            }
            Err(_) => {
                health_status.status = HealthState::Unhealthy;
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
                error!("Database health check timed out");
            }
        }

        health_status
    }
}

async fn check_database_health(pool: &sqlx::PgPool) -> Result<u128, sqlx::Error> {
    let start = Instant::now();
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(start.elapsed().as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_status_is_healthy_with_no_checks() {
        let status = HealthStatus::new();
        assert!(status.is_healthy());
        assert!(status.checks.is_empty());
    }

    #[test]
    fn component_health_constructors() {
        let up = ComponentHealth::up(Some(12));
        assert!(matches!(up.status, ComponentState::Up));
        assert_eq!(up.response_time_ms, Some(12));

        let down = ComponentHealth::down(Some("connection refused".to_string()));
        assert!(matches!(down.status, ComponentState::Down));
        assert!(down.details.is_some());
    }
}
