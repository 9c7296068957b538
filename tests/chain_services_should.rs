mod common;

use std::sync::Arc;

use common::{PACKED_PLAYER, PLAYER_MANIFEST, ScriptedFetcher, provider_page};
use resolver::server::error::{ChainStage, Error};
use resolver::server::services::chain_services::{
    ChainService, ChainServiceTrait, ChainSettings, ProviderPath,
};
use resolver::server::services::evaluator_services::{
    DynScriptEvaluator, MockScriptEvaluatorTrait, PackerEvaluator, unpack,
};
use resolver::server::services::fetch_services::{DynHttpFetcher, FetchMethod};

const CONTENT: &str = "https://cb01.example/film/some-movie/";
const REDIRECT: &str = "https://links.example/l/abc123/";
const PROVIDER: &str = "https://provider.example/e/xyz";
const HELPER: &str = "https://helper.example/ajax/linkEmbedView.php";
const INTERMEDIATE: &str = "https://helper.example/e/abc123";

fn settings() -> ChainSettings {
    ChainSettings {
        helper_endpoint: HELPER.to_string(),
        helper_origin: "https://helper.example".to_string(),
        max_concurrent_sessions: 2,
        ..ChainSettings::default()
    }
}

fn service_with(fetcher: Arc<ScriptedFetcher>, evaluator: DynScriptEvaluator) -> ChainService {
    ChainService::new(fetcher as DynHttpFetcher, evaluator, settings())
}

fn service(fetcher: Arc<ScriptedFetcher>) -> ChainService {
    service_with(fetcher, Arc::new(PackerEvaluator::new()))
}

fn content_page(redirect: &str) -> String {
    format!(
        "<html><body><h1>Some Movie</h1><div id=\"iframen1\" data-src=\"{}\"></div></body></html>",
        redirect
    )
}

fn direct_redirect_page() -> String {
    format!("<html><body><a href=\"{}\">Watch</a></body></html>", PROVIDER)
}

#[tokio::test]
async fn resolve_a_chain_with_a_direct_link() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher
        .page(CONTENT, &content_page(REDIRECT))
        .page(REDIRECT, &direct_redirect_page())
        .page(PROVIDER, &provider_page(PACKED_PLAYER));

    let report = service(fetcher.clone()).resolve(CONTENT).await;

    assert_eq!(report.manifest_url.as_deref(), Some(PLAYER_MANIFEST));
    assert_eq!(report.redirect_url.as_deref(), Some(REDIRECT));
    assert_eq!(report.embed_provider_url.as_deref(), Some(PROVIDER));
    assert_eq!(report.provider_path, Some(ProviderPath::DirectLink));
    assert_eq!(report.failed_stage, None);
    assert_eq!(report.error, None);
    // the helper is never involved when the page has a link
    assert!(fetcher.calls().iter().all(|c| c.url != HELPER));
}

#[tokio::test]
async fn fall_back_to_the_helper_endpoint_without_a_link() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher
        .page(CONTENT, &content_page(REDIRECT))
        .page(REDIRECT, "<html><body><p>checking your browser</p></body></html>")
        .post(
            HELPER,
            200,
            &format!("{{\"status\":\"success\",\"data\":{{\"value\":\"{}\"}}}}", INTERMEDIATE),
        )
        .page(
            INTERMEDIATE,
            &format!("<html><body><a href=\"{}\">go</a></body></html>", PROVIDER),
        )
        .page(PROVIDER, &provider_page(PACKED_PLAYER));

    let report = service(fetcher.clone()).resolve(CONTENT).await;

    assert_eq!(report.manifest_url.as_deref(), Some(PLAYER_MANIFEST));
    assert_eq!(report.provider_path, Some(ProviderPath::HelperEndpoint));

    let posted = fetcher
        .calls()
        .into_iter()
        .find(|c| c.url == HELPER)
        .expect("helper was called");
    assert_eq!(
        posted.method,
        FetchMethod::PostForm(vec![
            ("id".to_string(), "abc123".to_string()),
            ("ref".to_string(), String::new()),
        ])
    );
    assert_eq!(posted.headers["x-requested-with"], "XMLHttpRequest");
    assert_eq!(posted.headers["origin"], "https://helper.example");
    assert_eq!(fetcher.calls_to(INTERMEDIATE, true), 1);
}

#[tokio::test]
async fn report_a_provider_page_without_packed_scripts() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher
        .page(CONTENT, &content_page(REDIRECT))
        .page(REDIRECT, &direct_redirect_page())
        .page(PROVIDER, "<html><body><script>var player = {};</script></body></html>");

    let report = service(fetcher).resolve(CONTENT).await;

    assert_eq!(report.manifest_url, None);
    assert_eq!(report.failed_stage, Some(ChainStage::ProviderResolved));
    assert!(report.error.unwrap().contains("no packed script"));
    assert_eq!(report.embed_provider_url.as_deref(), Some(PROVIDER));
}

#[tokio::test]
async fn report_a_content_page_without_the_marker() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.page(CONTENT, "<html><body><div id=\"iframen2\"></div></body></html>");

    let report = service(fetcher).resolve(CONTENT).await;

    assert_eq!(report.manifest_url, None);
    assert_eq!(report.failed_stage, Some(ChainStage::Initial));
    assert_eq!(report.redirect_url, None);
}

#[tokio::test]
async fn report_an_error_status_as_a_failed_stage() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher
        .page(CONTENT, &content_page(REDIRECT))
        .get(REDIRECT, true, 500, REDIRECT, "oops");

    let report = service(fetcher).resolve(CONTENT).await;

    assert_eq!(report.failed_stage, Some(ChainStage::RedirectResolved));
    assert_eq!(report.redirect_url.as_deref(), Some(REDIRECT));
}

#[tokio::test]
async fn keep_scanning_scripts_until_one_carries_a_manifest() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let page = format!(
        "<html><script>eval(function(p,a,c,k,e,d){{}}('0',10,1,'ads'.split('|'),0,{{}}))</script><script>{}</script></html>",
        PACKED_PLAYER
    );
    fetcher
        .page(CONTENT, &content_page(REDIRECT))
        .page(REDIRECT, &direct_redirect_page())
        .page(PROVIDER, &page);

    let report = service(fetcher).resolve(CONTENT).await;

    assert_eq!(report.manifest_url.as_deref(), Some(PLAYER_MANIFEST));
}

#[tokio::test]
async fn absolutize_relative_links() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher
        .page(CONTENT, &content_page("/l/abc123/"))
        .page("https://cb01.example/l/abc123/", "<a href=\"e/xyz\">x</a>");
    let service = service(fetcher);

    let mut session = service.new_session(CONTENT);
    let redirect = service.resolve_redirect(&mut session).await.unwrap();
    let provider = service.resolve_provider(&mut session).await.unwrap();

    assert_eq!(redirect, "https://cb01.example/l/abc123/");
    assert_eq!(provider, "https://cb01.example/l/abc123/e/xyz");
    assert_eq!(session.stage(), ChainStage::ProviderResolved);
}

#[tokio::test]
async fn refuse_to_skip_a_stage() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let service = service(fetcher.clone());

    let mut session = service.new_session(CONTENT);
    let provider = service.resolve_provider(&mut session).await;
    let manifest = service.resolve_manifest(&mut session).await;

    assert!(matches!(
        provider,
        Err(Error::StageOutOfOrder {
            attempted: ChainStage::ProviderResolved,
            missing: "redirect_url",
        })
    ));
    assert!(matches!(
        manifest,
        Err(Error::StageOutOfOrder {
            attempted: ChainStage::ManifestResolved,
            ..
        })
    ));
    assert_eq!(session.stage(), ChainStage::Initial);
    assert!(fetcher.calls().is_empty());
}

#[tokio::test]
async fn propagate_evaluator_failures() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher
        .page(CONTENT, &content_page(REDIRECT))
        .page(REDIRECT, &direct_redirect_page())
        .page(PROVIDER, &provider_page(PACKED_PLAYER));

    let mut evaluator = MockScriptEvaluatorTrait::new();
    evaluator
        .expect_evaluate()
        .times(1)
        .returning(|_| Err(Error::EvaluationFailed("node exited with 1".to_string())));

    let report = service_with(fetcher, Arc::new(evaluator)).resolve(CONTENT).await;

    assert_eq!(report.manifest_url, None);
    assert_eq!(report.failed_stage, Some(ChainStage::ProviderResolved));
    assert!(report.error.unwrap().contains("node exited"));
}

#[tokio::test]
async fn try_the_next_script_when_one_fails_to_evaluate() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let page = format!(
        "<html><script>eval(function(p,a,c,k,e,d){{}}('0',10,1,'tracker'.split('|'),0,{{}}))</script><script>{}</script></html>",
        PACKED_PLAYER
    );
    fetcher
        .page(CONTENT, &content_page(REDIRECT))
        .page(REDIRECT, &direct_redirect_page())
        .page(PROVIDER, &page);

    let mut evaluator = MockScriptEvaluatorTrait::new();
    evaluator.expect_evaluate().times(2).returning(|script| {
        if script.contains("tracker") {
            Err(Error::EvaluationFailed("node exited with 1".to_string()))
        } else {
            unpack(script)
        }
    });

    let report = service_with(fetcher, Arc::new(evaluator)).resolve(CONTENT).await;

    assert_eq!(report.manifest_url.as_deref(), Some(PLAYER_MANIFEST));
    assert_eq!(report.error, None);
}

#[tokio::test]
async fn resolve_the_same_content_url_to_the_same_manifest() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher
        .page(CONTENT, &content_page(REDIRECT))
        .page(REDIRECT, &direct_redirect_page())
        .page(PROVIDER, &provider_page(PACKED_PLAYER));
    let service = service(fetcher);

    let first = service.resolve(CONTENT).await;
    let second = service.resolve(CONTENT).await;

    assert_eq!(first.manifest_url, second.manifest_url);
    assert_eq!(first.redirect_url, second.redirect_url);
}

#[tokio::test]
async fn return_batch_reports_in_input_order() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher
        .page(CONTENT, &content_page(REDIRECT))
        .page(REDIRECT, &direct_redirect_page())
        .page(PROVIDER, &provider_page(PACKED_PLAYER));
    let broken = "https://cb01.example/film/missing/";

    let reports = service(fetcher)
        .resolve_many(vec![
            CONTENT.to_string(),
            broken.to_string(),
            CONTENT.to_string(),
        ])
        .await;

    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].manifest_url.as_deref(), Some(PLAYER_MANIFEST));
    assert_eq!(reports[1].content_url, broken);
    assert_eq!(reports[1].failed_stage, Some(ChainStage::Initial));
    assert_eq!(reports[2].manifest_url.as_deref(), Some(PLAYER_MANIFEST));
}
