use std::time::Duration;

use crate::server::services::chain_services::ChainSettings;
use crate::server::services::domain_services::DomainSettings;

#[derive(clap::ValueEnum, Clone, Debug, Copy)]
pub enum CargoEnv {
    Development,
    Production,
}

#[derive(clap::ValueEnum, Clone, Debug, Copy, PartialEq, Eq)]
pub enum EvaluatorKind {
    // pure rust p,a,c,k,e,d unpacker, no external runtime needed
    Packer,
    // hands the script to a node subprocess
    Node,
}

#[derive(clap::Parser, Clone, Debug)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum)]
    pub cargo_env: CargoEnv,

    // port that the app will bind to
    #[clap(long, env, default_value = "5000")]
    pub port: u16,

    // the sites this instance keeps bindings for, as name=url pairs
    // like 'guardaserie=https://guardaserie.to,cb01new=https://cb01new.skin'
    #[clap(long, env, value_delimiter = ',')]
    pub sites: Vec<String>,

    // redis url for the binding store, takes priority over the bindings file
    #[clap(long, env)]
    pub redis_url: Option<String>,

    // json file for the binding store when there is no redis, bindings live in memory if
    // neither is set
    #[clap(long, env)]
    pub bindings_file: Option<String>,

    // timeout for every outbound request
    #[clap(long, env, default_value = "15")]
    pub request_timeout_secs: u64,

    // 403s are treated as rate limiting and retried up to this many times
    #[clap(long, env, default_value = "5")]
    pub max_validation_attempts: u32,

    // base delay between 403 retries, multiplied by the attempt number
    #[clap(long, env, default_value = "750")]
    pub retry_delay_ms: u64,

    // bindings validated more recently than this are served without touching the network
    #[clap(long, env, default_value = "1800")]
    pub revalidate_after_secs: u64,

    // search for a new domain when the current one stops validating
    #[clap(long, env, default_value = "true", action = clap::ArgAction::Set)]
    pub discovery_enabled: bool,

    // take the first search result that validates, otherwise it has to be in approved_suffixes
    #[clap(long, env, default_value = "true", action = clap::ArgAction::Set)]
    pub accept_first_match: bool,

    // suffixes discovery may switch to when accept_first_match is off, e.g. 'com,to,skin'
    #[clap(long, env, value_delimiter = ',')]
    pub approved_suffixes: Vec<String>,

    #[clap(long, env, default_value = "20")]
    pub search_results: usize,

    // a site that just failed to resolve is served stale this long before trying again
    #[clap(long, env, default_value = "60")]
    pub failure_cooldown_secs: u64,

    // duckduckgo region, the sites are italian so results are better with it-it
    #[clap(long, env, default_value = "it-it")]
    pub search_region: String,

    #[clap(
        long,
        env,
        default_value = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
    )]
    pub user_agent: String,

    #[clap(long, env, value_enum, default_value = "packer")]
    pub script_evaluator: EvaluatorKind,

    #[clap(long, env, default_value = "node")]
    pub node_binary: String,

    #[clap(long, env, default_value = "10")]
    pub evaluator_timeout_secs: u64,

    // the link shortener api used when the redirect page hides its anchor
    #[clap(long, env, default_value = "https://stayonline.pro/ajax/linkEmbedView.php")]
    pub helper_endpoint: String,

    #[clap(long, env, default_value = "https://stayonline.pro")]
    pub helper_origin: String,

    // cap on sessions resolving at once, applies to the whole server and to batches
    #[clap(long, env, default_value = "8")]
    pub max_concurrent_sessions: usize,

    // this should be either * for allowing everything, or a comma seperated list of domains like
    // example.com,something.com
    #[clap(long, env, default_value = "*")]
    pub cors_origin: String,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl AppConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn domain_settings(&self) -> DomainSettings {
        DomainSettings {
            max_attempts: self.max_validation_attempts.max(1),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            revalidate_after: Duration::from_secs(self.revalidate_after_secs),
            discovery_enabled: self.discovery_enabled,
            accept_first_match: self.accept_first_match,
            search_results: self.search_results,
            failure_cooldown: Duration::from_secs(self.failure_cooldown_secs),
        }
    }

    pub fn chain_settings(&self) -> ChainSettings {
        ChainSettings {
            user_agent: self.user_agent.clone(),
            helper_endpoint: self.helper_endpoint.clone(),
            helper_origin: self.helper_origin.clone(),
            max_concurrent_sessions: self.max_concurrent_sessions.max(1),
            ..ChainSettings::default()
        }
    }
}

impl Default for AppConfig {
    // defaults aren't really needed here but it's here as a bad fallback
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            port: 5000,
            sites: Vec::new(),
            redis_url: None,
            bindings_file: None,
            request_timeout_secs: 15,
            max_validation_attempts: 5,
            retry_delay_ms: 750,
            revalidate_after_secs: 1800,
            discovery_enabled: true,
            accept_first_match: true,
            approved_suffixes: Vec::new(),
            search_results: 20,
            failure_cooldown_secs: 60,
            search_region: "it-it".to_string(),
            user_agent: crate::server::services::fetch_services::DEFAULT_USER_AGENT.to_string(),
            script_evaluator: EvaluatorKind::Packer,
            node_binary: "node".to_string(),
            evaluator_timeout_secs: 10,
            helper_endpoint: "https://stayonline.pro/ajax/linkEmbedView.php".to_string(),
            helper_origin: "https://stayonline.pro".to_string(),
            max_concurrent_sessions: 8,
            cors_origin: "*".to_string(),
            sentry_dsn: None,
        }
    }
}
