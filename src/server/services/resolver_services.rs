use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::{
    config::{AppConfig, EvaluatorKind},
    database::binding::{DynDomainBindingRepository, SiteCatalog},
    server::error::{AppResult, Error},
};

use super::{
    chain_services::{ChainService, DynChainService},
    domain_services::{AutoApprove, DomainService, DynCandidateApproval, DynDomainService, SuffixAllowList},
    evaluator_services::{DynScriptEvaluator, NodeEvaluator, PackerEvaluator},
    fetch_services::{DynHttpFetcher, ReqwestFetcher},
    search_services::{DuckDuckGoSearch, DynSearchService},
};

/// everything the controllers reach for, cloned into every request
#[derive(Clone)]
pub struct ResolverServices {
    pub domains: DynDomainService,
    pub chains: DynChainService,
    pub bindings: DynDomainBindingRepository,
    pub catalog: Arc<SiteCatalog>,
    pub config: Arc<AppConfig>,
}

impl ResolverServices {
    pub fn new(bindings: DynDomainBindingRepository, config: Arc<AppConfig>) -> AppResult<Self> {
        info!("starting resolver services ({} binding store)...", bindings.backend_name());

        let catalog = Arc::new(
            SiteCatalog::from_entries(&config.sites)
                .map_err(|e| Error::InternalServerErrorWithContext(format!("invalid site configuration: {:#}", e)))?,
        );
        info!("{} sites configured", catalog.len());

        let fetcher = Arc::new(ReqwestFetcher::new(config.request_timeout())?) as DynHttpFetcher;

        let search = Arc::new(DuckDuckGoSearch::new(
            fetcher.clone(),
            config.search_region.clone(),
            config.user_agent.clone(),
        )) as DynSearchService;

        let approval = if config.accept_first_match {
            Arc::new(AutoApprove) as DynCandidateApproval
        } else {
            Arc::new(SuffixAllowList::new(config.approved_suffixes.clone())) as DynCandidateApproval
        };

        let evaluator = match config.script_evaluator {
            EvaluatorKind::Packer => Arc::new(PackerEvaluator::new()) as DynScriptEvaluator,
            EvaluatorKind::Node => Arc::new(NodeEvaluator::new(
                config.node_binary.clone(),
                Duration::from_secs(config.evaluator_timeout_secs),
            )) as DynScriptEvaluator,
        };
        info!("script evaluator: {:?}", config.script_evaluator);

        let domains = Arc::new(DomainService::new(
            bindings.clone(),
            fetcher.clone(),
            search,
            approval,
            config.domain_settings(),
            config.user_agent.clone(),
        )) as DynDomainService;

        let chains = Arc::new(ChainService::new(fetcher, evaluator, config.chain_settings()))
            as DynChainService;

        Ok(Self::from_parts(domains, chains, bindings, catalog, config))
    }

    /// assembles the container from ready made services, what tests use to swap in mocks
    pub fn from_parts(
        domains: DynDomainService,
        chains: DynChainService,
        bindings: DynDomainBindingRepository,
        catalog: Arc<SiteCatalog>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            domains,
            chains,
            bindings,
            catalog,
            config,
        }
    }
}
