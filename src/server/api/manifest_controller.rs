use axum::{
    Extension, Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use tracing::{debug, info};
use url::Url;

use crate::server::{
    dtos::resolve_dto::{BatchManifestRequest, ManifestQuery, ManifestResponse},
    error::{AppResult, Error},
    extractors::{ValidatedJson, ValidatedQuery},
    services::{
        ResolverServices, chain_services::ChainReport, domain_services::DomainResolution,
    },
    utils::domain_utils::align_to_base,
};

pub struct ManifestController;

impl ManifestController {
    pub fn app() -> Router {
        Router::new()
            .route("/", get(Self::resolve_manifest))
            .route("/batch", post(Self::resolve_batch))
    }

    /// puts the url on the site's working domain when it belongs to a configured site. the
    /// content links scraped last week still carry whatever tld the site had back then
    async fn align_content_url(
        services: &ResolverServices,
        content_url: &str,
        site: Option<&str>,
    ) -> AppResult<(String, Option<DomainResolution>)> {
        let identity = match site {
            Some(name) => Some(
                services
                    .catalog
                    .get(name)
                    .ok_or_else(|| Error::NotFound(format!("site {} is not configured", name)))?,
            ),
            None => services.catalog.find_for_url(content_url),
        };

        let Some(identity) = identity else {
            debug!("{} belongs to no configured site, resolving as is", content_url);
            return Ok((content_url.to_string(), None));
        };

        let resolution = services.domains.resolve_domain(identity, false).await?;
        let aligned = align_to_base(content_url, &resolution.base_url);
        if aligned != content_url {
            info!("content url moved to {}", aligned);
        }
        Ok((aligned, Some(resolution)))
    }

    async fn resolve_manifest(
        Extension(services): Extension<ResolverServices>,
        ValidatedQuery(params): ValidatedQuery<ManifestQuery>,
    ) -> AppResult<(StatusCode, Json<ManifestResponse>)> {
        let (content_url, domain) =
            Self::align_content_url(&services, &params.url, params.site.as_deref()).await?;

        let report = services.chains.resolve(&content_url).await;

        // an empty manifest is reported, never papered over
        let status = if report.manifest_url.is_some() {
            StatusCode::OK
        } else {
            StatusCode::UNPROCESSABLE_ENTITY
        };

        Ok((status, Json(ManifestResponse { domain, report })))
    }

    async fn resolve_batch(
        Extension(services): Extension<ResolverServices>,
        ValidatedJson(body): ValidatedJson<BatchManifestRequest>,
    ) -> AppResult<Json<Vec<ChainReport>>> {
        if let Some(bad) = body.urls.iter().find(|u| Url::parse(u).is_err()) {
            return Err(Error::BadRequest(format!("invalid url {}", bad)));
        }

        let mut content_urls = Vec::with_capacity(body.urls.len());
        for url in &body.urls {
            let (aligned, _) = Self::align_content_url(&services, url, None).await?;
            content_urls.push(aligned);
        }

        info!("resolving {} manifests", content_urls.len());
        Ok(Json(services.chains.resolve_many(content_urls).await))
    }
}
