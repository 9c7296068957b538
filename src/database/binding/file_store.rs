use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::model::{DomainBinding, DomainBindingRepository};

/// bindings kept in a json file, the whole map is rewritten on every set. writes go to a
/// sibling temp file and get renamed over the old one so a crash never leaves half a file
pub struct FileBindingStore {
    path: PathBuf,
    // loaded on first use, None until then
    cache: Mutex<Option<BTreeMap<String, DomainBinding>>>,
}

impl FileBindingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(path: &Path) -> Result<BTreeMap<String, DomainBinding>> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("failed to parse bindings file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no bindings file at {}, starting empty", path.display());
                Ok(BTreeMap::new())
            }
            Err(e) => Err(e)
                .with_context(|| format!("failed to read bindings file {}", path.display())),
        }
    }

    async fn flush(&self, bindings: &BTreeMap<String, DomainBinding>) -> Result<()> {
        let text = serde_json::to_string_pretty(bindings).context("failed to encode bindings")?;
        let tmp = self.path.with_extension("json.tmp");

        tokio::fs::write(&tmp, text)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to move bindings into {}", self.path.display()))?;

        debug!("flushed {} bindings to {}", bindings.len(), self.path.display());
        Ok(())
    }
}

#[async_trait::async_trait]
impl DomainBindingRepository for FileBindingStore {
    async fn get_binding(&self, site: &str) -> Result<Option<DomainBinding>> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(Self::load(&self.path).await?);
        }
        Ok(cache.as_ref().and_then(|c| c.get(site).cloned()))
    }

    async fn set_binding(&self, binding: &DomainBinding) -> Result<()> {
        // the lock is held through the flush, concurrent sets queue up instead of racing on
        // the temp file
        let mut cache = self.cache.lock().await;
        let mut bindings = match cache.take() {
            Some(bindings) => bindings,
            None => Self::load(&self.path).await?,
        };
        bindings.insert(binding.site.name.clone(), binding.clone());

        let flushed = self.flush(&bindings).await;
        *cache = Some(bindings);
        flushed
    }

    async fn list_bindings(&self) -> Result<Vec<DomainBinding>> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(Self::load(&self.path).await?);
        }
        Ok(cache
            .as_ref()
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<f64> {
        let start = std::time::Instant::now();
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::metadata(dir)
            .await
            .with_context(|| format!("bindings directory {} unavailable", dir.display()))?;
        Ok(start.elapsed().as_secs_f64() * 1000.0)
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
