// content page -> redirect page -> embed provider -> packed player script -> m3u8
use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderMap;
use scraper::{Html, Selector};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::server::{
    error::{AppResult, ChainStage, Error},
    services::{
        evaluator_services::{DynScriptEvaluator, PACKED_SIGNATURE},
        fetch_services::{
            DEFAULT_USER_AGENT, DynHttpFetcher, FetchRequest, FetchResponse, insert_header,
            session_headers,
        },
    },
    utils::domain_utils::trailing_segment,
};

pub type DynChainService = Arc<dyn ChainServiceTrait + Send + Sync>;

static MANIFEST_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"src:"(https://.*?\.m3u8)""#).expect("manifest regex is valid"));

#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub user_agent: String,
    /// element on the content page carrying the redirect link
    pub marker_selector: String,
    pub marker_attribute: String,
    pub helper_endpoint: String,
    pub helper_origin: String,
    // the helper 403s our normal agent
    pub helper_user_agent: String,
    /// json pointer to the intermediate url in the helper response
    pub helper_value_pointer: String,
    pub max_concurrent_sessions: usize,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            marker_selector: "div#iframen1".to_string(),
            marker_attribute: "data-src".to_string(),
            helper_endpoint: "https://stayonline.pro/ajax/linkEmbedView.php".to_string(),
            helper_origin: "https://stayonline.pro".to_string(),
            helper_user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36 OPR/111.0.0.0".to_string(),
            helper_value_pointer: "/data/value".to_string(),
            max_concurrent_sessions: 8,
        }
    }
}

/// which way the provider url was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderPath {
    DirectLink,
    HelperEndpoint,
}

/// state of one resolve call, only the resolver moves it forward
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionSession {
    content_url: String,
    redirect_url: Option<String>,
    embed_provider_url: Option<String>,
    manifest_url: Option<String>,
    provider_path: Option<ProviderPath>,
    stage: ChainStage,
    #[serde(skip)]
    headers: HeaderMap,
}

impl ResolutionSession {
    pub fn new(content_url: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            content_url: content_url.into(),
            redirect_url: None,
            embed_provider_url: None,
            manifest_url: None,
            provider_path: None,
            stage: ChainStage::Initial,
            headers,
        }
    }

    pub fn content_url(&self) -> &str {
        &self.content_url
    }

    pub fn redirect_url(&self) -> Option<&str> {
        self.redirect_url.as_deref()
    }

    pub fn embed_provider_url(&self) -> Option<&str> {
        self.embed_provider_url.as_deref()
    }

    pub fn manifest_url(&self) -> Option<&str> {
        self.manifest_url.as_deref()
    }

    pub fn provider_path(&self) -> Option<ProviderPath> {
        self.provider_path
    }

    pub fn stage(&self) -> ChainStage {
        self.stage
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// outcome of a whole chain, `manifest_url` is none whenever `error` is set
#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub content_url: String,
    pub manifest_url: Option<String>,
    pub failed_stage: Option<ChainStage>,
    pub error: Option<String>,
    pub redirect_url: Option<String>,
    pub embed_provider_url: Option<String>,
    pub provider_path: Option<ProviderPath>,
}

impl ChainReport {
    fn from_session(session: ResolutionSession, result: AppResult<String>) -> Self {
        let (manifest_url, failed_stage, error) = match result {
            Ok(manifest) => (Some(manifest), None, None),
            Err(e) => (None, Some(session.stage), Some(e.to_string())),
        };

        Self {
            content_url: session.content_url,
            manifest_url,
            failed_stage,
            error,
            redirect_url: session.redirect_url,
            embed_provider_url: session.embed_provider_url,
            provider_path: session.provider_path,
        }
    }

    fn aborted(content_url: String, reason: String) -> Self {
        Self {
            content_url,
            manifest_url: None,
            failed_stage: Some(ChainStage::Initial),
            error: Some(reason),
            redirect_url: None,
            embed_provider_url: None,
            provider_path: None,
        }
    }
}

#[automock]
#[async_trait]
pub trait ChainServiceTrait {
    /// Initial -> RedirectResolved
    async fn resolve_redirect(&self, session: &mut ResolutionSession) -> AppResult<String>;
    /// RedirectResolved -> ProviderResolved
    async fn resolve_provider(&self, session: &mut ResolutionSession) -> AppResult<String>;
    /// ProviderResolved -> ManifestResolved
    async fn resolve_manifest(&self, session: &mut ResolutionSession) -> AppResult<String>;

    /// all three stages in order on a fresh session
    async fn resolve(&self, content_url: &str) -> ChainReport;

    /// independent sessions in parallel, reports come back in input order
    async fn resolve_many(&self, content_urls: Vec<String>) -> Vec<ChainReport>;
}

#[derive(Clone)]
pub struct ChainService {
    fetcher: DynHttpFetcher,
    evaluator: DynScriptEvaluator,
    settings: Arc<ChainSettings>,
}

/// relative links are taken against the page they came from
fn absolutize(link: &str, page_url: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty() {
        return None;
    }
    if Url::parse(link).is_ok() {
        return Some(link.to_string());
    }
    Url::parse(page_url)
        .and_then(|base| base.join(link))
        .map(|u| u.to_string())
        .ok()
}

/// attribute of the first element matching `selector`
pub fn extract_attribute(html: &str, selector: &str, attribute: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr(attribute))
        .map(str::to_string)
}

/// href of the first hyperlink on the page
pub fn first_link(html: &str, page_url: &str) -> Option<String> {
    extract_attribute(html, "a[href]", "href").and_then(|href| absolutize(&href, page_url))
}

/// full text of every inline script carrying the packer bootstrap, in page order
pub fn packed_scripts(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("script") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(|script| script.text().collect::<String>())
        .filter(|text| text.contains(PACKED_SIGNATURE))
        .collect()
}

pub fn manifest_in(expanded: &str) -> Option<String> {
    MANIFEST_SRC
        .captures(expanded)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

impl ChainService {
    pub fn new(fetcher: DynHttpFetcher, evaluator: DynScriptEvaluator, settings: ChainSettings) -> Self {
        Self {
            fetcher,
            evaluator,
            settings: Arc::new(settings),
        }
    }

    pub fn new_session(&self, content_url: &str) -> ResolutionSession {
        ResolutionSession::new(content_url, session_headers(&self.settings.user_agent))
    }

    async fn fetch_page(&self, url: &str, headers: &HeaderMap) -> AppResult<FetchResponse> {
        let page = self.fetcher.fetch(FetchRequest::get(url, headers)).await?;
        if page.is_error() {
            error!("{} answered HTTP {}", url, page.status);
            return Err(Error::TransportFailed(format!(
                "{} answered HTTP {}",
                url, page.status
            )));
        }
        Ok(page)
    }

    fn helper_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "origin", &self.settings.helper_origin);
        insert_header(&mut headers, "user-agent", &self.settings.helper_user_agent);
        insert_header(&mut headers, "x-requested-with", "XMLHttpRequest");
        headers
    }

    /// the anti bot variant of the redirect page has no anchor, the link shortener api still
    /// hands out the intermediate page for the id in the url
    async fn provider_via_helper(&self, redirect_url: &str, headers: &HeaderMap) -> AppResult<String> {
        let stage = ChainStage::RedirectResolved;
        let id = trailing_segment(redirect_url).ok_or_else(|| Error::ExtractionFailed {
            stage,
            reason: format!("no id segment in {}", redirect_url),
        })?;
        info!("posting id {} to {}", id, self.settings.helper_endpoint);

        let form = vec![
            ("id".to_string(), id.to_string()),
            ("ref".to_string(), String::new()),
        ];
        let request =
            FetchRequest::post_form(&self.settings.helper_endpoint, &self.helper_headers(), form)
                .follow_redirects(false);
        let response = self.fetcher.fetch(request).await?;
        if response.is_error() {
            error!("helper endpoint answered HTTP {}", response.status);
            return Err(Error::TransportFailed(format!(
                "helper endpoint answered HTTP {}",
                response.status
            )));
        }

        let intermediate = response
            .json_string(&self.settings.helper_value_pointer)
            .ok_or_else(|| Error::ExtractionFailed {
                stage,
                reason: format!(
                    "helper response has no string at {}",
                    self.settings.helper_value_pointer
                ),
            })?;
        debug!("helper intermediate url: {}", intermediate);

        let page = self.fetch_page(&intermediate, headers).await?;
        first_link(&page.body, &page.final_url).ok_or_else(|| Error::ExtractionFailed {
            stage,
            reason: format!("no hyperlink on intermediate page {}", intermediate),
        })
    }

    async fn run(&self, session: &mut ResolutionSession) -> AppResult<String> {
        self.resolve_redirect(session).await?;
        self.resolve_provider(session).await?;
        self.resolve_manifest(session).await
    }
}

#[async_trait]
impl ChainServiceTrait for ChainService {
    async fn resolve_redirect(&self, session: &mut ResolutionSession) -> AppResult<String> {
        let stage = ChainStage::Initial;
        let page = self.fetch_page(&session.content_url, &session.headers).await?;

        let redirect = extract_attribute(
            &page.body,
            &self.settings.marker_selector,
            &self.settings.marker_attribute,
        )
        .and_then(|value| absolutize(&value, &page.final_url))
        .ok_or_else(|| Error::ExtractionFailed {
            stage,
            reason: format!(
                "no {} with {} on {}",
                self.settings.marker_selector, self.settings.marker_attribute, session.content_url
            ),
        })?;

        info!("redirect url: {}", redirect);
        session.redirect_url = Some(redirect.clone());
        session.stage = ChainStage::RedirectResolved;
        Ok(redirect)
    }

    async fn resolve_provider(&self, session: &mut ResolutionSession) -> AppResult<String> {
        let redirect_url = session.redirect_url.clone().ok_or(Error::StageOutOfOrder {
            attempted: ChainStage::ProviderResolved,
            missing: "redirect_url",
        })?;

        let page = self.fetch_page(&redirect_url, &session.headers).await?;
        let (provider, path) = match first_link(&page.body, &page.final_url) {
            Some(link) => (link, ProviderPath::DirectLink),
            None => {
                warn!("no hyperlink on {}, trying the helper endpoint", redirect_url);
                let link = self.provider_via_helper(&redirect_url, &session.headers).await?;
                (link, ProviderPath::HelperEndpoint)
            }
        };

        info!("embed provider url ({:?}): {}", path, provider);
        session.embed_provider_url = Some(provider.clone());
        session.provider_path = Some(path);
        session.stage = ChainStage::ProviderResolved;
        Ok(provider)
    }

    async fn resolve_manifest(&self, session: &mut ResolutionSession) -> AppResult<String> {
        let provider_url = session.embed_provider_url.clone().ok_or(Error::StageOutOfOrder {
            attempted: ChainStage::ManifestResolved,
            missing: "embed_provider_url",
        })?;

        let page = self.fetch_page(&provider_url, &session.headers).await?;
        let scripts = packed_scripts(&page.body);
        if scripts.is_empty() {
            return Err(Error::EvaluationFailed(format!(
                "no packed script on {}",
                provider_url
            )));
        }

        // ad and tracker scripts use the same packer, one that fails to evaluate doesn't mean
        // the player script will
        let mut last_error = None;
        for script in &scripts {
            let expanded = match self.evaluator.evaluate(script).await {
                Ok(expanded) => expanded,
                Err(e) => {
                    warn!("packed script on {} failed to evaluate: {}", provider_url, e);
                    last_error = Some(e);
                    continue;
                }
            };
            if let Some(manifest) = manifest_in(&expanded) {
                info!("manifest url: {}", manifest);
                session.manifest_url = Some(manifest.clone());
                session.stage = ChainStage::ManifestResolved;
                return Ok(manifest);
            }
            debug!("packed script on {} expanded without a manifest", provider_url);
        }

        let reason = format!(
            "{} packed scripts on {} gave no manifest url",
            scripts.len(),
            provider_url
        );
        Err(Error::EvaluationFailed(match last_error {
            Some(e) => format!("{}, last error: {}", reason, e),
            None => reason,
        }))
    }

    async fn resolve(&self, content_url: &str) -> ChainReport {
        let mut session = self.new_session(content_url);
        let result = self.run(&mut session).await;

        if let Err(e) = &result {
            warn!("chain for {} stopped at {}: {}", content_url, session.stage, e);
        }
        ChainReport::from_session(session, result)
    }

    async fn resolve_many(&self, content_urls: Vec<String>) -> Vec<ChainReport> {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_sessions.max(1)));
        let mut join_set = JoinSet::new();

        for (idx, url) in content_urls.iter().cloned().enumerate() {
            let service = self.clone();
            let sem = semaphore.clone();
            join_set.spawn(async move {
                let report = match sem.acquire_owned().await {
                    Ok(_permit) => service.resolve(&url).await,
                    Err(_) => ChainReport::aborted(url, "session limiter closed".to_string()),
                };
                (idx, report)
            });
        }

        let mut reports: Vec<Option<ChainReport>> = vec![None; content_urls.len()];
        while let Some(completed) = join_set.join_next().await {
            match completed {
                Ok((idx, report)) => reports[idx] = Some(report),
                Err(e) => error!("resolution task panicked: {}", e),
            }
        }

        reports
            .into_iter()
            .zip(content_urls)
            .map(|(report, url)| {
                report.unwrap_or_else(|| ChainReport::aborted(url, "session task panicked".to_string()))
            })
            .collect()
    }
}
