use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::database::binding::DomainBinding;
use crate::server::services::chain_services::ChainReport;
use crate::server::services::domain_services::DomainResolution;

#[derive(Debug, Default, Deserialize)]
pub struct ResolveDomainQuery {
    // skip the freshness check and validate right now
    pub force: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ManifestQuery {
    #[validate(url)]
    pub url: String,
    // pins the site the url belongs to, otherwise it's matched by base label
    #[validate(length(min = 1, max = 64))]
    pub site: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BatchManifestRequest {
    #[validate(length(min = 1, max = 100))]
    pub urls: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SiteBindingResponse {
    pub site: String,
    pub declared_base_url: String,
    pub domain_suffix: String,
    pub base_url: String,
    pub last_validated_at: Option<DateTime<Utc>>,
}

impl From<DomainBinding> for SiteBindingResponse {
    fn from(binding: DomainBinding) -> Self {
        Self {
            base_url: binding.base_url(),
            site: binding.site.name,
            declared_base_url: binding.site.declared_base_url,
            domain_suffix: binding.current_domain_suffix,
            last_validated_at: binding.last_validated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ManifestResponse {
    // set when the content url was aligned to a resolved site domain first
    pub domain: Option<DomainResolution>,
    #[serde(flatten)]
    pub report: ChainReport,
}
