use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use resolver::AppConfig;
use resolver::database::binding::{
    DomainBinding, DomainBindingRepository, MemoryBindingStore, SiteCatalog,
};
use resolver::server::ResolverApplicationServer;
use resolver::server::services::ResolverServices;
use resolver::server::services::chain_services::{ChainReport, MockChainServiceTrait};
use resolver::server::services::domain_services::{
    DomainResolution, MockDomainServiceTrait, ResolutionSource,
};

const MANIFEST: &str = "https://cdn.example/stream/master.m3u8";

fn catalog() -> Arc<SiteCatalog> {
    Arc::new(SiteCatalog::from_entries(&["example=https://example.to".to_string()]).unwrap())
}

fn moved_resolution() -> DomainResolution {
    DomainResolution {
        site: "example".to_string(),
        domain_suffix: "com".to_string(),
        base_url: "https://example.com".to_string(),
        source: ResolutionSource::Moved,
    }
}

fn report(content_url: &str, manifest_url: Option<&str>) -> ChainReport {
    ChainReport {
        content_url: content_url.to_string(),
        manifest_url: manifest_url.map(str::to_string),
        failed_stage: None,
        error: None,
        redirect_url: None,
        embed_provider_url: None,
        provider_path: None,
    }
}

fn app(domains: MockDomainServiceTrait, chains: MockChainServiceTrait) -> axum::Router {
    app_with_store(domains, chains, Arc::new(MemoryBindingStore::new()))
}

fn app_with_store(
    domains: MockDomainServiceTrait,
    chains: MockChainServiceTrait,
    store: Arc<MemoryBindingStore>,
) -> axum::Router {
    let services = ResolverServices::from_parts(
        Arc::new(domains),
        Arc::new(chains),
        store,
        catalog(),
        Arc::new(AppConfig::default()),
    );
    ResolverApplicationServer::router(services)
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn report_health_with_the_store_backend() {
    let (status, body) = send(
        app(MockDomainServiceTrait::new(), MockChainServiceTrait::new()),
        get("/health"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["services"]["binding_store"]["backend"], "memory");
    assert_eq!(body["services"]["configured_sites"], 1);
}

#[tokio::test]
async fn list_the_stored_binding_of_every_configured_site() {
    let store = Arc::new(MemoryBindingStore::new());
    let example = catalog().get("example").unwrap().clone();
    store
        .set_binding(&DomainBinding::validated(&example, "cc"))
        .await
        .unwrap();

    let (status, body) = send(
        app_with_store(MockDomainServiceTrait::new(), MockChainServiceTrait::new(), store),
        get("/domains"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["site"], "example");
    assert_eq!(body[0]["domain_suffix"], "cc");
    assert_eq!(body[0]["base_url"], "https://example.cc");
    assert!(body[0]["last_validated_at"].is_string());
}

#[tokio::test]
async fn list_the_configured_default_for_sites_never_stored() {
    let (status, body) = send(
        app(MockDomainServiceTrait::new(), MockChainServiceTrait::new()),
        get("/domains"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    assert_eq!(body[0]["domain_suffix"], "to");
    assert_eq!(body[0]["base_url"], "https://example.to");
    assert_eq!(body[0]["last_validated_at"], Value::Null);
}

#[tokio::test]
async fn refuse_to_resolve_an_unknown_site() {
    let request = Request::builder()
        .method("POST")
        .uri("/domains/nowhere/resolve")
        .body(Body::empty())
        .unwrap();

    let (status, _) = send(
        app(MockDomainServiceTrait::new(), MockChainServiceTrait::new()),
        request,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn force_revalidation_from_the_query() {
    let mut domains = MockDomainServiceTrait::new();
    domains
        .expect_resolve_domain()
        .withf(|site, force| site.name == "example" && *force)
        .times(1)
        .returning(|_, _| Ok(moved_resolution()));

    let request = Request::builder()
        .method("POST")
        .uri("/domains/example/resolve?force=true")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app(domains, MockChainServiceTrait::new()), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["domain_suffix"], "com");
    assert_eq!(body["source"], "moved");
}

#[tokio::test]
async fn resolve_a_manifest_on_the_working_domain() {
    let mut domains = MockDomainServiceTrait::new();
    domains
        .expect_resolve_domain()
        .returning(|_, _| Ok(moved_resolution()));

    let mut chains = MockChainServiceTrait::new();
    chains
        .expect_resolve()
        .withf(|url| url.to_string() == "https://example.com/film/x/")
        .times(1)
        .returning(|url| report(url, Some(MANIFEST)));

    let (status, body) = send(
        app(domains, chains),
        get("/manifest?url=https%3A%2F%2Fexample.to%2Ffilm%2Fx%2F"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["manifest_url"], MANIFEST);
    assert_eq!(body["content_url"], "https://example.com/film/x/");
    assert_eq!(body["domain"]["source"], "moved");
}

#[tokio::test]
async fn answer_unprocessable_when_no_manifest_was_found() {
    let mut chains = MockChainServiceTrait::new();
    chains
        .expect_resolve()
        .returning(|url| report(url, None));

    let (status, body) = send(
        app(MockDomainServiceTrait::new(), chains),
        get("/manifest?url=https%3A%2F%2Fother.org%2Fwatch%2F1"),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["manifest_url"], Value::Null);
    assert_eq!(body["domain"], Value::Null);
}

#[tokio::test]
async fn reject_an_invalid_content_url() {
    let (status, body) = send(
        app(MockDomainServiceTrait::new(), MockChainServiceTrait::new()),
        get("/manifest?url=not-a-url"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn resolve_batches_in_order() {
    let mut chains = MockChainServiceTrait::new();
    chains.expect_resolve_many().times(1).returning(|urls| {
        urls.iter()
            .map(|u| report(u, Some(MANIFEST)))
            .collect()
    });

    let request = Request::builder()
        .method("POST")
        .uri("/manifest/batch")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"urls":["https://other.org/a","https://other.org/b"]}"#,
        ))
        .unwrap();
    let (status, body) = send(app(MockDomainServiceTrait::new(), chains), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["content_url"], "https://other.org/a");
    assert_eq!(body[1]["content_url"], "https://other.org/b");
}

#[tokio::test]
async fn reject_an_empty_batch() {
    let request = Request::builder()
        .method("POST")
        .uri("/manifest/batch")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"urls":[]}"#))
        .unwrap();

    let (status, _) = send(
        app(MockDomainServiceTrait::new(), MockChainServiceTrait::new()),
        request,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
