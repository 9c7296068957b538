use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::server::utils::domain_utils;

/// a site as it was configured, never changes after startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteIdentity {
    pub name: String,
    pub declared_base_url: String,
}

impl SiteIdentity {
    pub fn new(name: impl Into<String>, declared_base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_base_url: declared_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// parses `name=https://site.tld`
    pub fn parse(entry: &str) -> Option<Self> {
        let (name, url) = entry.split_once('=')?;
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || domain_utils::top_level_domain(url).is_none() {
            return None;
        }
        Some(Self::new(name, url))
    }

    pub fn declared_suffix(&self) -> Option<String> {
        domain_utils::top_level_domain(&self.declared_base_url)
    }

    /// declared url moved onto `suffix`
    pub fn base_url_for(&self, suffix: &str) -> String {
        domain_utils::with_suffix(&self.declared_base_url, suffix)
            .unwrap_or_else(|| self.declared_base_url.clone())
    }
}

/// every configured site by name
#[derive(Debug, Clone, Default)]
pub struct SiteCatalog {
    sites: BTreeMap<String, SiteIdentity>,
}

impl SiteCatalog {
    pub fn from_entries(entries: &[String]) -> Result<Self> {
        let mut sites = BTreeMap::new();
        for entry in entries.iter().filter(|e| !e.trim().is_empty()) {
            let site = SiteIdentity::parse(entry)
                .ok_or_else(|| anyhow!("invalid site entry {:?}, expected name=https://host.tld", entry))?;
            sites.insert(site.name.clone(), site);
        }
        Ok(Self { sites })
    }

    pub fn get(&self, name: &str) -> Option<&SiteIdentity> {
        self.sites.get(name)
    }

    pub fn sites(&self) -> impl Iterator<Item = &SiteIdentity> {
        self.sites.values()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// the site whose base label the url carries, whatever tld it is on
    pub fn find_for_url(&self, url: &str) -> Option<&SiteIdentity> {
        let label = domain_utils::base_domain(url)?;
        self.sites
            .values()
            .find(|s| domain_utils::base_domain(&s.declared_base_url).as_deref() == Some(label.as_str()))
    }
}

/// what the resolver currently believes the site's address is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainBinding {
    pub site: SiteIdentity,
    pub current_domain_suffix: String,
    // none until the first successful validation
    pub last_validated_at: Option<DateTime<Utc>>,
}

impl DomainBinding {
    /// the binding a site starts with, straight from its declared url
    pub fn configured_default(site: &SiteIdentity) -> Self {
        Self {
            current_domain_suffix: site.declared_suffix().unwrap_or_default(),
            site: site.clone(),
            last_validated_at: None,
        }
    }

    pub fn validated(site: &SiteIdentity, suffix: impl Into<String>) -> Self {
        Self {
            site: site.clone(),
            current_domain_suffix: suffix.into(),
            last_validated_at: Some(Utc::now()),
        }
    }

    pub fn base_url(&self) -> String {
        self.site.base_url_for(&self.current_domain_suffix)
    }

    pub fn is_fresh(&self, max_age: std::time::Duration, now: DateTime<Utc>) -> bool {
        let Some(validated_at) = self.last_validated_at else {
            return false;
        };
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return true;
        };
        now - validated_at < max_age
    }
}

pub type DynDomainBindingRepository = Arc<dyn DomainBindingRepository + Send + Sync>;

/// keyed by site name, last writer wins. bindings are advisory and get revalidated so
/// nothing here needs to be transactional
#[automock]
#[async_trait::async_trait]
pub trait DomainBindingRepository {
    async fn get_binding(&self, site: &str) -> Result<Option<DomainBinding>>;
    async fn set_binding(&self, binding: &DomainBinding) -> Result<()>;
    async fn list_bindings(&self) -> Result<Vec<DomainBinding>>;
    // round trip time in ms, used by the health endpoint
    async fn health_check(&self) -> Result<f64>;
    fn backend_name(&self) -> &'static str;
}
