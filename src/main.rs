use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;

use tracing::info;

use resolver::{
    AppConfig, Logger, RedisDatabase, ResolverApplicationServer,
    database::binding::{DynDomainBindingRepository, FileBindingStore, MemoryBindingStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(AppConfig::parse());

    // guards have to outlive the server or buffered logs and sentry events get dropped
    let _guards = Logger::init(config.cargo_env, config.sentry_dsn.clone());

    info!("logger and env prepped...");

    let bindings = open_binding_store(&config).await?;

    info!("{} binding store ready, starting resolver...", bindings.backend_name());

    ResolverApplicationServer::serve(config, bindings)
        .await
        .context("resolver server failed")?;

    Ok(())
}

async fn open_binding_store(config: &AppConfig) -> anyhow::Result<DynDomainBindingRepository> {
    if let Some(redis_url) = &config.redis_url {
        info!("connecting to redis...");
        let redis = RedisDatabase::connect(redis_url)
            .await
            .context("where is the redis connection")?;
        return Ok(Arc::new(redis) as DynDomainBindingRepository);
    }

    if let Some(path) = &config.bindings_file {
        info!("keeping bindings in {}", path);
        return Ok(Arc::new(FileBindingStore::new(path)) as DynDomainBindingRepository);
    }

    info!("no store configured, bindings live in memory until restart");
    Ok(Arc::new(MemoryBindingStore::new()) as DynDomainBindingRepository)
}
