use axum::{
    Extension, Json, Router,
    extract::{Path, Query},
    routing::{get, post},
};
use std::collections::HashMap;

use tracing::{error, info};

use crate::database::binding::DomainBinding;
use crate::server::{
    dtos::resolve_dto::{ResolveDomainQuery, SiteBindingResponse},
    error::{AppResult, Error},
    services::{ResolverServices, domain_services::DomainResolution},
};

pub struct DomainController;

impl DomainController {
    pub fn app() -> Router {
        Router::new()
            .route("/", get(Self::list_bindings))
            .route("/{site}/resolve", post(Self::resolve_domain))
    }

    /// the binding every configured site currently has, no validation happens here. one read
    /// of the store, sites it has nothing for show their configured default
    async fn list_bindings(
        Extension(services): Extension<ResolverServices>,
    ) -> AppResult<Json<Vec<SiteBindingResponse>>> {
        let stored = services.bindings.list_bindings().await.map_err(|e| {
            error!("failed to list bindings: {:#}", e);
            Error::InternalServerErrorWithContext(format!("failed to list bindings: {}", e))
        })?;
        let mut stored: HashMap<String, DomainBinding> = stored
            .into_iter()
            .map(|binding| (binding.site.name.clone(), binding))
            .collect();

        let bindings = services
            .catalog
            .sites()
            .map(|site| {
                let binding = match stored.remove(&site.name) {
                    // the configured identity wins over whatever the store recorded
                    Some(binding) => DomainBinding {
                        site: site.clone(),
                        ..binding
                    },
                    None => DomainBinding::configured_default(site),
                };
                SiteBindingResponse::from(binding)
            })
            .collect();

        Ok(Json(bindings))
    }

    async fn resolve_domain(
        Extension(services): Extension<ResolverServices>,
        Path(site): Path<String>,
        Query(params): Query<ResolveDomainQuery>,
    ) -> AppResult<Json<DomainResolution>> {
        let identity = services
            .catalog
            .get(&site)
            .ok_or_else(|| Error::NotFound(format!("site {} is not configured", site)))?;

        let force = params.force.unwrap_or(false);
        info!("resolving domain for {} (force: {})", site, force);

        let resolution = services.domains.resolve_domain(identity, force).await?;
        Ok(Json(resolution))
    }
}
