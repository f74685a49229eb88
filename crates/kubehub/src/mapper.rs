//! Cached GVK -> mapping resolution over a discovery backend.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use kube::core::GroupVersionKind;
use kubedyn_core::{gvk_key, DiscoveryError, ResourceMapping};
use metrics::counter;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::discovery::{DiscoveredResource, DiscoveryBackend};

type Cache = FxHashMap<GroupVersionKind, ResourceMapping>;

/// Resolves GVKs through discovery and remembers the answers.
///
/// Readers never block. Concurrent misses for the same GVK may each query the
/// backend; whichever insert lands last wins, and both carry the same mapping.
pub struct ResourceMapper {
    backend: Arc<dyn DiscoveryBackend>,
    cache: ArcSwap<Cache>,
    timeout: Duration,
}

impl ResourceMapper {
    pub fn new(backend: Arc<dyn DiscoveryBackend>, timeout: Duration) -> Self {
        Self { backend, cache: ArcSwap::from_pointee(Cache::default()), timeout }
    }

    /// Mapping for `gvk`, from cache when present.
    pub async fn resolve(&self, gvk: &GroupVersionKind) -> Result<ResourceMapping, DiscoveryError> {
        if let Some(m) = self.cached(gvk) {
            counter!("discovery_cache_hits", 1u64);
            return Ok(m);
        }
        self.resolve_fresh(gvk).await
    }

    /// Query discovery even if cached, then refresh the cache entry.
    pub async fn resolve_fresh(&self, gvk: &GroupVersionKind) -> Result<ResourceMapping, DiscoveryError> {
        let key = gvk_key(gvk);
        let mapping = match tokio::time::timeout(self.timeout, self.backend.lookup(gvk)).await {
            Ok(res) => res?,
            Err(_) => return Err(DiscoveryError::Timeout(self.timeout)),
        };
        validate(gvk, &mapping)?;
        self.cache.rcu(|cur| {
            let mut next = Cache::clone(cur);
            next.insert(gvk.clone(), mapping.clone());
            next
        });
        debug!(gvk = %key, plural = %mapping.plural(), scope = ?mapping.scope, "mapping cached");
        Ok(mapping)
    }

    pub fn cached(&self, gvk: &GroupVersionKind) -> Option<ResourceMapping> {
        self.cache.load().get(gvk).cloned()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.load().len()
    }

    /// Drop every cached mapping, e.g. after CRDs were installed or removed.
    pub fn invalidate(&self) {
        let n = self.cache.load().len();
        self.cache.store(Arc::new(Cache::default()));
        info!(dropped = n, "mapping cache invalidated");
    }

    /// List served resources. Not cached; each call hits discovery.
    pub async fn served_resources(&self) -> Result<Vec<DiscoveredResource>, DiscoveryError> {
        match tokio::time::timeout(self.timeout, self.backend.served_resources()).await {
            Ok(res) => res,
            Err(_) => Err(DiscoveryError::Timeout(self.timeout)),
        }
    }
}

fn validate(gvk: &GroupVersionKind, m: &ResourceMapping) -> Result<(), DiscoveryError> {
    let inconsistent = |reason: &str| DiscoveryError::Inconsistent { gvk: gvk_key(gvk), reason: reason.to_string() };
    if m.plural().is_empty() {
        return Err(inconsistent("empty resource name"));
    }
    if m.gvk != *gvk {
        return Err(inconsistent(&format!("answered for {}", gvk_key(&m.gvk))));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticDiscovery;
    use kubedyn_core::Scope;

    #[tokio::test]
    async fn mismatched_answer_is_inconsistent_and_not_cached() {
        let asked = GroupVersionKind::gvk("apps", "v1", "Deployment");
        let wrong = ResourceMapping::new(GroupVersionKind::gvk("apps", "v1", "StatefulSet"), "statefulsets", Scope::Namespaced);
        // answers every lookup with the same mapping
        struct Liar(ResourceMapping);
        #[async_trait::async_trait]
        impl DiscoveryBackend for Liar {
            async fn lookup(&self, _: &GroupVersionKind) -> Result<ResourceMapping, DiscoveryError> {
                Ok(self.0.clone())
            }
            async fn served_resources(&self) -> Result<Vec<DiscoveredResource>, DiscoveryError> {
                Ok(vec![])
            }
        }
        let mapper = ResourceMapper::new(Arc::new(Liar(wrong)), Duration::from_secs(1));
        let err = mapper.resolve(&asked).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Inconsistent { .. }), "{err}");
        assert_eq!(mapper.cached_len(), 0);
    }

    #[tokio::test]
    async fn invalidate_forces_new_lookup() {
        let backend = Arc::new(StaticDiscovery::builtin());
        let mapper = ResourceMapper::new(backend.clone(), Duration::from_secs(1));
        let gvk = GroupVersionKind::gvk("", "v1", "Secret");
        mapper.resolve(&gvk).await.unwrap();
        mapper.resolve(&gvk).await.unwrap();
        assert_eq!(backend.calls(), 1);
        mapper.invalidate();
        assert!(mapper.cached(&gvk).is_none());
        mapper.resolve(&gvk).await.unwrap();
        assert_eq!(backend.calls(), 2);
    }
}
