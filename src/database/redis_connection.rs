use anyhow::Context;
use redis::AsyncCommands;
use redis::Client;
use redis::aio::MultiplexedConnection;
use std::time::Instant;
use tracing::{debug, info};

use crate::database::binding::{DomainBinding, DomainBindingRepository};

const BINDING_SITES_KEY: &str = "domain_binding:sites";

#[derive(Debug, Clone)]
pub struct RedisDatabase {
    pub connection: MultiplexedConnection,
}

impl RedisDatabase {
    pub async fn connect(connection_string: &str) -> anyhow::Result<Self> {
        let client = Client::open(connection_string).context("Failed to create Redis client")?;

        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .context("Failed to connect to Redis database")?;

        info!("Redis connection established");

        Ok(Self { connection })
    }

    fn binding_key(site: &str) -> String {
        format!("domain_binding:{}", site)
    }
}

#[async_trait::async_trait]
impl DomainBindingRepository for RedisDatabase {
    async fn get_binding(&self, site: &str) -> anyhow::Result<Option<DomainBinding>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .get(Self::binding_key(site))
            .await
            .context("Failed to read domain binding")?;

        raw.map(|json| serde_json::from_str(&json).context("Failed to decode domain binding"))
            .transpose()
    }

    async fn set_binding(&self, binding: &DomainBinding) -> anyhow::Result<()> {
        let json = serde_json::to_string(binding).context("Failed to encode domain binding")?;
        let mut conn = self.connection.clone();

        // value and index go in one round trip so a reader never sees a site in the set
        // without its binding
        let _: () = redis::pipe()
            .atomic()
            .set(Self::binding_key(&binding.site.name), json)
            .ignore()
            .sadd(BINDING_SITES_KEY, &binding.site.name)
            .ignore()
            .query_async(&mut conn)
            .await
            .context("Failed to store domain binding")?;

        debug!(
            "stored binding {} -> {}",
            binding.site.name, binding.current_domain_suffix
        );
        Ok(())
    }

    async fn list_bindings(&self) -> anyhow::Result<Vec<DomainBinding>> {
        let mut conn = self.connection.clone();
        let mut sites: Vec<String> = conn
            .smembers(BINDING_SITES_KEY)
            .await
            .context("Failed to list bound sites")?;
        sites.sort();

        let mut bindings = Vec::with_capacity(sites.len());
        for site in sites {
            if let Some(binding) = self.get_binding(&site).await? {
                bindings.push(binding);
            }
        }
        Ok(bindings)
    }

    /// does a ping health check, not needed but it's here and is nice
    async fn health_check(&self) -> anyhow::Result<f64> {
        let start = Instant::now();

        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis health check failed")?;

        let elapsed = start.elapsed();
        Ok(elapsed.as_secs_f64() * 1000.0) // milliseconds
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
