#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use resolver::server::error::{AppResult, Error};
use resolver::server::services::fetch_services::{
    FetchMethod, FetchRequest, FetchResponse, HttpFetcherTrait,
};

/// answers from a script keyed by method, url and redirect mode. the last queued reply for a
/// route keeps being served, anything unrouted is a transport failure
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, VecDeque<Option<FetchResponse>>>>,
    calls: Mutex<Vec<FetchRequest>>,
}

fn route_key(method: &str, url: &str, follow: bool) -> String {
    format!("{} {} {}", method, url, follow)
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, key: String, reply: Option<FetchResponse>) {
        self.routes
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(reply);
    }

    pub fn get(&self, url: &str, follow: bool, status: u16, final_url: &str, body: &str) -> &Self {
        self.push(
            route_key("GET", url, follow),
            Some(FetchResponse {
                status,
                final_url: final_url.to_string(),
                body: body.to_string(),
            }),
        );
        self
    }

    /// page served in place, same reply with and without redirects
    pub fn page(&self, url: &str, body: &str) -> &Self {
        self.get(url, true, 200, url, body);
        self.get(url, false, 200, url, body)
    }

    pub fn fail(&self, url: &str, follow: bool) -> &Self {
        self.push(route_key("GET", url, follow), None);
        self
    }

    pub fn post(&self, url: &str, status: u16, body: &str) -> &Self {
        self.push(
            route_key("POST", url, false),
            Some(FetchResponse {
                status,
                final_url: url.to_string(),
                body: body.to_string(),
            }),
        );
        self
    }

    pub fn calls(&self) -> Vec<FetchRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str, follow: bool) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url && r.follow_redirects == follow)
            .count()
    }
}

#[async_trait]
impl HttpFetcherTrait for ScriptedFetcher {
    async fn fetch(&self, request: FetchRequest) -> AppResult<FetchResponse> {
        let method = match request.method {
            FetchMethod::Get => "GET",
            FetchMethod::PostForm(_) => "POST",
        };
        let key = route_key(method, &request.url, request.follow_redirects);
        self.calls.lock().unwrap().push(request);

        let mut routes = self.routes.lock().unwrap();
        let reply = match routes.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().flatten(),
            Some(queue) => queue.front().cloned().flatten(),
            None => None,
        };

        reply.ok_or_else(|| Error::TransportFailed(format!("unrouted request {}", key)))
    }
}

/// packs `var cfg={src:"https://cdn.example/stream/master.m3u8"}` the way the providers do
pub const PACKED_PLAYER: &str = r#"eval(function(p,a,c,k,e,d){while(c--)if(k[c])p=p.replace(new RegExp('\\b'+c.toString(a)+'\\b','g'),k[c]);return p}('0 1={2:"3://4.5/6/7.8"}',36,9,'var|cfg|src|https|cdn|example|stream|master|m3u8'.split('|'),0,{}))"#;

pub const PLAYER_MANIFEST: &str = "https://cdn.example/stream/master.m3u8";

pub fn provider_page(script: &str) -> String {
    format!(
        "<html><body><div id=\"player\"></div><script>{}</script></body></html>",
        script
    )
}
