// keeps every site pointed at an address that still answers as that site. the sites move tld
// every few weeks after a seizure so the stored suffix is only ever a hint
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    database::binding::{DomainBinding, DynDomainBindingRepository, SiteIdentity},
    server::{
        error::{AppResult, Error},
        services::{
            fetch_services::{DynHttpFetcher, FetchRequest, FetchResponse, browser_headers},
            search_services::DynSearchService,
        },
        utils::domain_utils::{base_domain, search_token, top_level_domain},
    },
};

pub type DynDomainService = Arc<dyn DomainServiceTrait + Send + Sync>;
pub type DynCandidateApproval = Arc<dyn CandidateApprovalTrait + Send + Sync>;

const FORBIDDEN: u16 = 403;

#[derive(Debug, Clone)]
pub struct DomainSettings {
    /// 403s are retried until this many attempts have been made
    pub max_attempts: u32,
    /// multiplied by the attempt number before each retry
    pub retry_delay: Duration,
    pub revalidate_after: Duration,
    pub discovery_enabled: bool,
    pub accept_first_match: bool,
    pub search_results: usize,
    /// a site that just came back stale is served stale for this long without new requests
    pub failure_cooldown: Duration,
}

impl Default for DomainSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_millis(750),
            revalidate_after: Duration::from_secs(1800),
            discovery_enabled: true,
            accept_first_match: true,
            search_results: 20,
            failure_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub ok: bool,
    // set when the address answered from a sibling tld
    pub observed_top_level_domain: Option<String>,
}

impl ValidationOutcome {
    pub fn passed(observed_top_level_domain: Option<String>) -> Self {
        Self {
            ok: true,
            observed_top_level_domain,
        }
    }

    pub fn failed() -> Self {
        Self {
            ok: false,
            observed_top_level_domain: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempts: u32,
    pub max_attempts: u32,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// what a single pass of the two checks came back with
#[derive(Debug)]
enum AttemptOutcome {
    Accepted { moved_to: Option<String> },
    Blocked { status: u16 },
    Rejected(Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    // recent enough, no request made
    Cached,
    // current address validated as is
    Validated,
    // current address redirected to a sibling tld
    Moved,
    // found through search
    Discovered,
    // nothing validated, last known value handed back
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainResolution {
    pub site: String,
    pub domain_suffix: String,
    pub base_url: String,
    pub source: ResolutionSource,
}

/// decides whether a search result may replace the current domain when the first match
/// isn't taken blindly
#[automock]
#[async_trait]
pub trait CandidateApprovalTrait {
    async fn approve(&self, site: &SiteIdentity, candidate_url: &str, suffix: &str) -> bool;
}

pub struct AutoApprove;

#[async_trait]
impl CandidateApprovalTrait for AutoApprove {
    async fn approve(&self, _site: &SiteIdentity, _candidate_url: &str, _suffix: &str) -> bool {
        true
    }
}

/// only lets discovery move a site onto suffixes somebody has vetted
pub struct SuffixAllowList {
    suffixes: Vec<String>,
}

impl SuffixAllowList {
    pub fn new(suffixes: Vec<String>) -> Self {
        Self {
            suffixes: suffixes
                .into_iter()
                .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl CandidateApprovalTrait for SuffixAllowList {
    async fn approve(&self, site: &SiteIdentity, candidate_url: &str, suffix: &str) -> bool {
        let approved = self.suffixes.iter().any(|s| s == &suffix.to_ascii_lowercase());
        if !approved {
            info!(
                "not moving {} to {}, .{} is not an approved suffix",
                site.name, candidate_url, suffix
            );
        }
        approved
    }
}

#[automock]
#[async_trait]
pub trait DomainServiceTrait {
    /// working suffix and base url for `site`, never fails on network trouble, a stale
    /// binding comes back instead
    async fn resolve_domain(&self, site: &SiteIdentity, force: bool) -> AppResult<DomainResolution>;

    /// checks `url` still serves the site `base_url` belongs to. `check_tld` reports a move to
    /// a sibling tld instead of treating it as the same address
    async fn validate(&self, url: &str, base_url: &str, check_tld: bool) -> ValidationOutcome;

    async fn current_binding(&self, site: &SiteIdentity) -> DomainBinding;
}

pub struct DomainService {
    repository: DynDomainBindingRepository,
    fetcher: DynHttpFetcher,
    search: DynSearchService,
    approval: DynCandidateApproval,
    settings: DomainSettings,
    user_agent: String,
    // process local, a failed resolve never reaches the store
    last_failures: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl DomainService {
    pub fn new(
        repository: DynDomainBindingRepository,
        fetcher: DynHttpFetcher,
        search: DynSearchService,
        approval: DynCandidateApproval,
        settings: DomainSettings,
        user_agent: String,
    ) -> Self {
        Self {
            repository,
            fetcher,
            search,
            approval,
            settings,
            user_agent,
            last_failures: Mutex::new(HashMap::new()),
        }
    }

    fn cooling_down(&self, site: &str, now: DateTime<Utc>) -> bool {
        let Ok(cooldown) = chrono::Duration::from_std(self.settings.failure_cooldown) else {
            return false;
        };
        self.last_failures
            .lock()
            .map(|failures| failures.get(site).is_some_and(|at| now - *at < cooldown))
            .unwrap_or(false)
    }

    fn record_failure(&self, site: &str) {
        if let Ok(mut failures) = self.last_failures.lock() {
            failures.insert(site.to_string(), Utc::now());
        }
    }

    fn clear_failure(&self, site: &str) {
        if let Ok(mut failures) = self.last_failures.lock() {
            failures.remove(site);
        }
    }

    /// the binding handed back unchanged, no validation behind it in this call
    fn unchanged(site: &SiteIdentity, binding: &DomainBinding, source: ResolutionSource) -> DomainResolution {
        DomainResolution {
            site: site.name.clone(),
            domain_suffix: binding.current_domain_suffix.clone(),
            base_url: binding.base_url(),
            source,
        }
    }

    async fn fetch_for_validation(&self, url: &str, follow: bool) -> AppResult<FetchResponse> {
        let request = FetchRequest::get(url, &browser_headers(&self.user_agent)).follow_redirects(follow);
        self.fetcher.fetch(request).await
    }

    async fn validate_once(&self, url: &str, base_url: &str, check_tld: bool) -> AttemptOutcome {
        // check 1, reachable at all without being bounced
        let direct = match self.fetch_for_validation(url, false).await {
            Ok(response) => response,
            Err(e) => return AttemptOutcome::Rejected(e),
        };
        if direct.status == FORBIDDEN {
            return AttemptOutcome::Blocked {
                status: direct.status,
            };
        }
        if direct.is_error() {
            return AttemptOutcome::Rejected(Error::ValidationFailed {
                url: url.to_string(),
                reason: format!("check 1 failed with HTTP {}", direct.status),
            });
        }
        debug!("check 1 passed for {} with HTTP {}", url, direct.status);

        // check 2, where the redirects end up
        let followed = match self.fetch_for_validation(url, true).await {
            Ok(response) => response,
            Err(e) => return AttemptOutcome::Rejected(e),
        };
        if followed.is_error() {
            return AttemptOutcome::Rejected(Error::ValidationFailed {
                url: url.to_string(),
                reason: format!("check 2 failed with HTTP {}", followed.status),
            });
        }

        let original_base = base_domain(url);
        let final_base = base_domain(&followed.final_url);
        if original_base.is_none() || original_base != final_base {
            return AttemptOutcome::Rejected(Error::ValidationFailed {
                url: url.to_string(),
                reason: format!("redirected off site to {}", followed.final_url),
            });
        }

        let expected_base = base_domain(base_url);
        if final_base != expected_base {
            return AttemptOutcome::Rejected(Error::ValidationFailed {
                url: url.to_string(),
                reason: format!(
                    "answers as {:?}, expected {:?}",
                    final_base.unwrap_or_default(),
                    expected_base.unwrap_or_default()
                ),
            });
        }

        if check_tld {
            let original_tld = top_level_domain(url);
            let final_tld = top_level_domain(&followed.final_url);
            if final_tld.is_some() && original_tld != final_tld {
                // only the base label vouches for the new address here, an impostor on the same
                // label under another tld would pass as well
                warn!(
                    "{} moved to {}, accepting on base label match",
                    url, followed.final_url
                );
                return AttemptOutcome::Accepted {
                    moved_to: final_tld,
                };
            }
        }

        AttemptOutcome::Accepted { moved_to: None }
    }

    async fn persist(&self, site: &SiteIdentity, suffix: &str) {
        let binding = DomainBinding::validated(site, suffix);
        if let Err(e) = self.repository.set_binding(&binding).await {
            // the resolved value is still good to hand out, next resolve just validates again
            error!("failed to persist binding for {}: {:#}", site.name, e);
        }
    }

    /// first search result that validates as the site and gets approved
    async fn discover(&self, site: &SiteIdentity, expected_url: &str) -> Option<(String, String)> {
        let query = search_token(expected_url);
        let results = match self.search.search(query, self.settings.search_results).await {
            Ok(results) => results,
            Err(e) => {
                warn!("search for {} failed: {}", query, e);
                return None;
            }
        };

        let expected_base = base_domain(expected_url)?;
        let total = results.len();

        for (idx, result_url) in results.iter().enumerate() {
            if base_domain(result_url).as_deref() != Some(expected_base.as_str()) {
                continue;
            }
            info!("checking search result {}/{}: {}", idx + 1, total, result_url);

            if !self.validate(result_url, expected_url, false).await.ok {
                continue;
            }
            let Some(suffix) = top_level_domain(result_url) else {
                continue;
            };
            if !self.settings.accept_first_match
                && !self.approval.approve(site, result_url, &suffix).await
            {
                continue;
            }

            return Some((suffix.clone(), site.base_url_for(&suffix)));
        }

        None
    }
}

#[async_trait]
impl DomainServiceTrait for DomainService {
    async fn resolve_domain(&self, site: &SiteIdentity, force: bool) -> AppResult<DomainResolution> {
        let binding = self.current_binding(site).await;

        if !force && binding.is_fresh(self.settings.revalidate_after, Utc::now()) {
            debug!("binding for {} is fresh, skipping validation", site.name);
            return Ok(Self::unchanged(site, &binding, ResolutionSource::Cached));
        }

        if !force && self.cooling_down(&site.name, Utc::now()) {
            debug!("{} failed to resolve recently, serving .{} as is", site.name, binding.current_domain_suffix);
            return Ok(Self::unchanged(site, &binding, ResolutionSource::Stale));
        }

        let candidate = binding.base_url();
        let outcome = self.validate(&candidate, &candidate, true).await;

        if outcome.ok {
            let (suffix, source) = match outcome.observed_top_level_domain {
                Some(moved) => (moved, ResolutionSource::Moved),
                None => (
                    top_level_domain(&candidate)
                        .unwrap_or_else(|| binding.current_domain_suffix.clone()),
                    ResolutionSource::Validated,
                ),
            };
            self.persist(site, &suffix).await;
            self.clear_failure(&site.name);
            info!("{} validated on .{}", site.name, suffix);

            return Ok(DomainResolution {
                site: site.name.clone(),
                base_url: site.base_url_for(&suffix),
                domain_suffix: suffix,
                source,
            });
        }

        if self.settings.discovery_enabled {
            if let Some((suffix, base_url)) = self.discover(site, &candidate).await {
                self.persist(site, &suffix).await;
                self.clear_failure(&site.name);
                info!("{} discovered on {}", site.name, base_url);

                return Ok(DomainResolution {
                    site: site.name.clone(),
                    domain_suffix: suffix,
                    base_url,
                    source: ResolutionSource::Discovered,
                });
            }
            warn!("{}", Error::DiscoveryExhausted(site.name.clone()));
        }

        warn!(
            "no working address for {}, keeping .{}",
            site.name, binding.current_domain_suffix
        );
        self.record_failure(&site.name);
        Ok(Self::unchanged(site, &binding, ResolutionSource::Stale))
    }

    async fn validate(&self, url: &str, base_url: &str, check_tld: bool) -> ValidationOutcome {
        info!("validating {}", url);
        let mut retry = RetryState::new(self.settings.max_attempts);

        loop {
            retry.attempts += 1;
            match self.validate_once(url, base_url, check_tld).await {
                AttemptOutcome::Accepted { moved_to } => {
                    info!("{} passed validation", url);
                    return ValidationOutcome::passed(moved_to);
                }
                AttemptOutcome::Rejected(e) => {
                    warn!("{}", e);
                    return ValidationOutcome::failed();
                }
                AttemptOutcome::Blocked { status } => {
                    let blocked = Error::TransientBlocked {
                        url: url.to_string(),
                        status,
                    };
                    if retry.exhausted() {
                        warn!("{}, giving up after {} attempts", blocked, retry.attempts);
                        return ValidationOutcome::failed();
                    }
                    warn!(
                        "{}, retrying (attempt {}/{})",
                        blocked, retry.attempts, retry.max_attempts
                    );
                    tokio::time::sleep(self.settings.retry_delay * retry.attempts).await;
                }
            }
        }
    }

    async fn current_binding(&self, site: &SiteIdentity) -> DomainBinding {
        match self.repository.get_binding(&site.name).await {
            // the stored identity may predate a config change, the configured one wins
            Ok(Some(binding)) => DomainBinding {
                site: site.clone(),
                ..binding
            },
            Ok(None) => DomainBinding::configured_default(site),
            Err(e) => {
                error!("failed to load binding for {}: {:#}", site.name, e);
                DomainBinding::configured_default(site)
            }
        }
    }
}
