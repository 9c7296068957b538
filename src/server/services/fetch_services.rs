use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, error};

use crate::server::error::{AppResult, Error};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

pub type DynHttpFetcher = Arc<dyn HttpFetcherTrait + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMethod {
    Get,
    // urlencoded form body
    PostForm(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: FetchMethod,
    pub url: String,
    pub headers: HeaderMap,
    pub follow_redirects: bool,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>, headers: &HeaderMap) -> Self {
        Self {
            method: FetchMethod::Get,
            url: url.into(),
            headers: headers.clone(),
            follow_redirects: true,
        }
    }

    pub fn post_form(url: impl Into<String>, headers: &HeaderMap, form: Vec<(String, String)>) -> Self {
        Self {
            method: FetchMethod::PostForm(form),
            url: url.into(),
            headers: headers.clone(),
            follow_redirects: true,
        }
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    // where the request ended up after redirects, same as the request url when not following
    pub final_url: String,
    pub body: String,
}

impl FetchResponse {
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    /// nested string out of a json body, `pointer` is a json pointer like `/data/value`
    pub fn json_string(&self, pointer: &str) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(&self.body).ok()?;
        value.pointer(pointer)?.as_str().map(str::to_string)
    }
}

/// single seam for every outbound request so the resolvers can be driven by scripted responses
#[automock]
#[async_trait]
pub trait HttpFetcherTrait {
    async fn fetch(&self, request: FetchRequest) -> AppResult<FetchResponse>;
}

pub struct ReqwestFetcher {
    following: reqwest::Client,
    direct: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let build = |policy: reqwest::redirect::Policy| {
            reqwest::Client::builder()
                .timeout(timeout)
                .redirect(policy)
                .build()
                .map_err(|e| {
                    Error::InternalServerErrorWithContext(format!("failed to build http client: {}", e))
                })
        };

        Ok(Self {
            following: build(reqwest::redirect::Policy::limited(10))?,
            direct: build(reqwest::redirect::Policy::none())?,
        })
    }
}

#[async_trait]
impl HttpFetcherTrait for ReqwestFetcher {
    async fn fetch(&self, request: FetchRequest) -> AppResult<FetchResponse> {
        let client = if request.follow_redirects {
            &self.following
        } else {
            &self.direct
        };

        let builder = match &request.method {
            FetchMethod::Get => client.get(&request.url),
            FetchMethod::PostForm(form) => client.post(&request.url).form(form),
        };

        debug!(
            "{} {} (follow redirects: {})",
            if request.method == FetchMethod::Get { "GET" } else { "POST" },
            request.url,
            request.follow_redirects
        );

        let response = builder.headers(request.headers).send().await.map_err(|e| {
            error!("request to {} failed: {}", request.url, e);
            Error::TransportFailed(format!("request to {} failed: {}", request.url, e))
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| {
            error!("failed to read body from {}: {}", final_url, e);
            Error::TransportFailed(format!("failed to read body from {}: {}", final_url, e))
        })?;

        Ok(FetchResponse {
            status,
            final_url,
            body,
        })
    }
}

/// the header set a chrome tab sends on a top level navigation, some of these sites 403
/// anything that doesn't look like one
pub fn browser_headers(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let pairs = [
        (
            "accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
        ),
        ("accept-language", "it-IT,it;q=0.9,en-US;q=0.8,en;q=0.7"),
        ("priority", "u=0, i"),
        (
            "sec-ch-ua",
            "\"Google Chrome\";v=\"131\", \"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\"",
        ),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", "\"Windows\""),
        ("sec-fetch-dest", "document"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-site", "none"),
        ("sec-fetch-user", "?1"),
        ("upgrade-insecure-requests", "1"),
    ];

    for (name, value) in pairs {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    insert_header(&mut headers, "user-agent", user_agent);
    headers
}

/// just the user agent, what every chain stage sends
pub fn session_headers(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "user-agent", user_agent);
    headers
}

/// invalid values are dropped, a missing header is better than a failed session
pub fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(name), value);
        }
        Err(e) => error!("dropping invalid {} header value: {}", name, e),
    }
}
