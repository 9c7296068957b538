use axum::Extension;
use axum::Json;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::error;

use crate::server::dtos::health_dto::{HealthResponse, HealthStatus, ServiceHealthDetails, StoreHealth};
use crate::server::services::ResolverServices;
use crate::server::{get_app_version, get_uptime_seconds};

/// health endpoint, the binding store is the only dependency worth checking. the resolvers
/// themselves only touch third party sites which are down half the time anyway
pub async fn health_endpoint(
    Extension(services): Extension<ResolverServices>,
) -> (StatusCode, Json<HealthResponse>) {
    let store_health = check_store_health(&services).await;

    // a dead store only costs persistence, resolution still works off configured defaults
    let overall_status = match store_health.status {
        HealthStatus::Unhealthy => HealthStatus::Degraded,
        status => status,
    };

    let response = HealthResponse {
        status: overall_status,
        timestamp: Utc::now(),
        uptime_seconds: get_uptime_seconds(),
        version: get_app_version().to_string(),
        environment: format!("{:?}", services.config.cargo_env).to_lowercase(),
        services: ServiceHealthDetails {
            binding_store: store_health,
            configured_sites: services.catalog.len(),
        },
    };

    let http_status = match overall_status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(response))
}

async fn check_store_health(services: &ResolverServices) -> StoreHealth {
    let backend = services.bindings.backend_name();
    match services.bindings.health_check().await {
        Ok(response_time) => StoreHealth {
            backend,
            status: HealthStatus::Healthy,
            response_time_ms: response_time,
        },
        Err(e) => {
            error!("{} binding store health check failed: {:#}", backend, e);
            StoreHealth {
                backend,
                status: HealthStatus::Unhealthy,
                response_time_ms: 0.0,
            }
        }
    }
}
