#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::core::GroupVersionKind;
use kubedyn_core::{DiscoveryError, ResourceMapping, Scope};
use kubedyn_kubehub::{DiscoveredResource, DiscoveryBackend, ResourceMapper, StaticDiscovery};

fn mapper_over(backend: Arc<StaticDiscovery>) -> ResourceMapper {
    ResourceMapper::new(backend, Duration::from_secs(5))
}

#[tokio::test]
async fn second_resolve_is_served_from_cache() {
    let backend = Arc::new(StaticDiscovery::builtin());
    let mapper = mapper_over(backend.clone());
    let gvk = GroupVersionKind::gvk("apps", "v1", "Deployment");

    let first = mapper.resolve(&gvk).await.unwrap();
    let second = mapper.resolve(&gvk).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(backend.calls(), 1);
    assert_eq!(first.plural(), "deployments");
    assert_eq!(first.scope, Scope::Namespaced);
}

#[tokio::test]
async fn cached_entry_survives_backend_outage() {
    let backend = Arc::new(StaticDiscovery::builtin());
    let mapper = mapper_over(backend.clone());
    let gvk = GroupVersionKind::gvk("", "v1", "Namespace");
    mapper.resolve(&gvk).await.unwrap();

    backend.set_failure(Some("connection refused"));
    let m = mapper.resolve(&gvk).await.unwrap();
    assert_eq!(m.scope, Scope::Cluster);

    // bypassing the cache surfaces the outage
    let err = mapper.resolve_fresh(&gvk).await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Unreachable(_)));
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn unserved_kind_is_not_found_and_not_cached() {
    let backend = Arc::new(StaticDiscovery::builtin());
    let mapper = mapper_over(backend.clone());
    let gvk = GroupVersionKind::gvk("example.com", "v1", "Frobnicator");

    for _ in 0..2 {
        let err = mapper.resolve(&gvk).await.unwrap_err();
        assert!(err.is_not_found(), "{err}");
    }
    assert_eq!(backend.calls(), 2);
    assert_eq!(mapper.cached_len(), 0);
}

#[tokio::test]
async fn concurrent_resolves_agree() {
    let backend = Arc::new(StaticDiscovery::builtin());
    let mapper = Arc::new(mapper_over(backend.clone()));
    let gvk = GroupVersionKind::gvk("apps", "v1", "StatefulSet");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let mapper = mapper.clone();
            let gvk = gvk.clone();
            tokio::spawn(async move { mapper.resolve(&gvk).await })
        })
        .collect();
    for t in tasks {
        let m = t.await.unwrap().unwrap();
        assert_eq!(m.plural(), "statefulsets");
    }
    // racing misses may each query, but never more than once per caller
    assert!((1..=8).contains(&backend.calls()));
    assert_eq!(mapper.cached_len(), 1);
    mapper.resolve(&gvk).await.unwrap();
    assert!(backend.calls() <= 8);
}

struct Stalled;

#[async_trait]
impl DiscoveryBackend for Stalled {
    async fn lookup(&self, _: &GroupVersionKind) -> Result<ResourceMapping, DiscoveryError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(DiscoveryError::NotServed("never".into()))
    }

    async fn served_resources(&self) -> Result<Vec<DiscoveredResource>, DiscoveryError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(vec![])
    }
}

#[tokio::test]
async fn discovery_deadline_is_enforced() {
    let mapper = ResourceMapper::new(Arc::new(Stalled), Duration::from_millis(20));
    let err = mapper.resolve(&GroupVersionKind::gvk("", "v1", "Pod")).await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Timeout(d) if d == Duration::from_millis(20)));
    assert!(!err.is_not_found());
    assert!(matches!(mapper.served_resources().await, Err(DiscoveryError::Timeout(_))));
}
