use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::server::{
    error::{AppResult, Error},
    services::fetch_services::{DynHttpFetcher, FetchRequest, browser_headers},
};

pub type DynSearchService = Arc<dyn SearchServiceTrait + Send + Sync>;

#[automock]
#[async_trait]
pub trait SearchServiceTrait {
    /// result urls in the order the engine ranked them, at most `limit`
    async fn search(&self, query: &str, limit: usize) -> AppResult<Vec<String>>;
}

const DUCKDUCKGO_HTML: &str = "https://html.duckduckgo.com/html/";

/// scrapes the no-js duckduckgo page, it doesn't need a key and rarely captchas
pub struct DuckDuckGoSearch {
    fetcher: DynHttpFetcher,
    region: String,
    user_agent: String,
}

impl DuckDuckGoSearch {
    pub fn new(fetcher: DynHttpFetcher, region: String, user_agent: String) -> Self {
        Self {
            fetcher,
            region,
            user_agent,
        }
    }

    fn search_url(&self, query: &str) -> String {
        format!(
            "{}?q={}&kl={}",
            DUCKDUCKGO_HTML,
            urlencoding::encode(query),
            urlencoding::encode(&self.region)
        )
    }
}

/// duckduckgo wraps results as `//duckduckgo.com/l/?uddg=<target>`, everything else is
/// taken as is
pub fn unwrap_result_link(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };
    let parsed = Url::parse(&absolute).ok()?;

    let is_redirect = parsed
        .host_str()
        .is_some_and(|h| h.ends_with("duckduckgo.com"))
        && parsed.path().starts_with("/l/");
    if !is_redirect {
        return matches!(parsed.scheme(), "http" | "https").then_some(absolute);
    }

    parsed
        .query_pairs()
        .find(|(k, _)| k == "uddg")
        .map(|(_, v)| v.into_owned())
}

/// `a.result__a` hrefs in page order, deduplicated
pub fn parse_result_links(html: &str, limit: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a.result__a") else {
        return Vec::new();
    };

    let mut links: Vec<String> = Vec::new();
    for anchor in document.select(&selector) {
        let Some(target) = anchor.value().attr("href").and_then(unwrap_result_link) else {
            continue;
        };
        if !links.contains(&target) {
            links.push(target);
        }
        if links.len() >= limit {
            break;
        }
    }
    links
}

#[async_trait]
impl SearchServiceTrait for DuckDuckGoSearch {
    async fn search(&self, query: &str, limit: usize) -> AppResult<Vec<String>> {
        info!("searching for {}", query);

        let request = FetchRequest::get(self.search_url(query), &browser_headers(&self.user_agent));
        let response = self.fetcher.fetch(request).await?;

        if response.is_error() {
            warn!("search for {} answered HTTP {}", query, response.status);
            return Err(Error::TransportFailed(format!(
                "search engine returned HTTP {}",
                response.status
            )));
        }

        let links = parse_result_links(&response.body, limit);
        debug!("search for {} returned {} results", query, links.len());
        Ok(links)
    }
}
