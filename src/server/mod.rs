pub mod api;
pub mod dtos;
pub mod error;
pub mod extractors;
pub mod services;
pub mod utils;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    Extension, Router, ServiceExt,
    extract::Request,
    http::{HeaderValue, Method},
    routing::get,
};
use once_cell::sync::Lazy;
use tokio::net::TcpListener;
use tower::Layer;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    normalize_path::NormalizePathLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::database::binding::DynDomainBindingRepository;
use api::{
    domain_controller::DomainController, health_controller::health_endpoint,
    manifest_controller::ManifestController,
};
use services::ResolverServices;

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn get_uptime_seconds() -> u64 {
    START_TIME.elapsed().as_secs()
}

pub struct ResolverApplicationServer;

impl ResolverApplicationServer {
    /// every route with its layers, no listener attached. handy for driving requests in tests
    pub fn router(services: ResolverServices) -> Router {
        let cors = Self::cors_layer(&services.config.cors_origin);

        Router::new()
            .route("/health", get(health_endpoint))
            .nest("/domains", DomainController::app())
            .nest("/manifest", ManifestController::app())
            .layer(Extension(services))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }

    fn cors_layer(origin: &str) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);

        if origin.trim() == "*" {
            return layer.allow_origin(Any);
        }

        let origins: Vec<HeaderValue> = origin
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("skipping invalid cors origin {:?}", o);
                    None
                }
            })
            .collect();

        if origins.is_empty() {
            warn!("no usable cors origin in {:?}, allowing any", origin);
            return layer.allow_origin(Any);
        }
        layer.allow_origin(AllowOrigin::list(origins))
    }

    pub async fn serve(config: Arc<AppConfig>, bindings: DynDomainBindingRepository) -> anyhow::Result<()> {
        Lazy::force(&START_TIME);

        let services = ResolverServices::new(bindings, config.clone())?;
        let max_sessions = config.max_concurrent_sessions.max(1);
        let app = ConcurrencyLimitLayer::new(max_sessions)
            .layer(NormalizePathLayer::trim_trailing_slash().layer(Self::router(services)));

        let address = format!("0.0.0.0:{}", config.port);
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("could not bind {}", address))?;

        info!("resolver listening on {}", address);

        axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("error while serving")?;

        info!("resolver stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received, draining requests...");
}
