pub mod chain_services;
pub mod domain_services;
pub mod evaluator_services;
pub mod fetch_services;
pub mod resolver_services;
pub mod search_services;

pub use chain_services::DynChainService;
pub use domain_services::DynDomainService;
pub use evaluator_services::DynScriptEvaluator;
pub use fetch_services::DynHttpFetcher;
pub use resolver_services::ResolverServices;
pub use search_services::DynSearchService;
