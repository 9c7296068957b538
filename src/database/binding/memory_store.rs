use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{Result, anyhow};

use super::model::{DomainBinding, DomainBindingRepository};

/// process local store, bindings are lost on restart
#[derive(Default)]
pub struct MemoryBindingStore {
    bindings: RwLock<HashMap<String, DomainBinding>>,
}

impl MemoryBindingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl DomainBindingRepository for MemoryBindingStore {
    async fn get_binding(&self, site: &str) -> Result<Option<DomainBinding>> {
        let lock = self
            .bindings
            .read()
            .map_err(|_| anyhow!("binding store lock poisoned"))?;
        Ok(lock.get(site).cloned())
    }

    async fn set_binding(&self, binding: &DomainBinding) -> Result<()> {
        let mut lock = self
            .bindings
            .write()
            .map_err(|_| anyhow!("binding store lock poisoned"))?;
        lock.insert(binding.site.name.clone(), binding.clone());
        Ok(())
    }

    async fn list_bindings(&self) -> Result<Vec<DomainBinding>> {
        let lock = self
            .bindings
            .read()
            .map_err(|_| anyhow!("binding store lock poisoned"))?;
        let mut bindings: Vec<DomainBinding> = lock.values().cloned().collect();
        bindings.sort_by(|a, b| a.site.name.cmp(&b.site.name));
        Ok(bindings)
    }

    async fn health_check(&self) -> Result<f64> {
        Ok(0.0)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
