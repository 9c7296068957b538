use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct StoreHealth {
    pub backend: &'static str,
    pub status: HealthStatus,
    pub response_time_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealthDetails {
    pub binding_store: StoreHealth,
    pub configured_sites: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub version: String,
    pub environment: String,
    pub services: ServiceHealthDetails,
}
