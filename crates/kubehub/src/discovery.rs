//! Discovery backends: GVK -> REST resource and scope.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::{
    core::GroupVersionKind,
    discovery::{self, Discovery},
    Client,
};
use kubedyn_core::{gvk_key, DiscoveryError, ResourceMapping, Scope};
use metrics::counter;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl DiscoveredResource {
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    pub fn gvk_key(&self) -> String {
        gvk_key(&self.gvk())
    }
}

impl From<&ResourceMapping> for DiscoveredResource {
    fn from(m: &ResourceMapping) -> Self {
        Self {
            group: m.gvk.group.clone(),
            version: m.gvk.version.clone(),
            kind: m.gvk.kind.clone(),
            plural: m.plural().to_string(),
            namespaced: m.namespaced(),
        }
    }
}

/// Source of resource mappings.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// Resolve one GVK. A type the cluster does not serve is `DiscoveryError::NotServed`.
    async fn lookup(&self, gvk: &GroupVersionKind) -> Result<ResourceMapping, DiscoveryError>;

    /// Every resource type the cluster serves, in preferred versions.
    async fn served_resources(&self) -> Result<Vec<DiscoveredResource>, DiscoveryError>;
}

/// Discovery against a live API server.
#[derive(Clone)]
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn classify(err: kube::Error, gvk: &GroupVersionKind) -> DiscoveryError {
    match err {
        kube::Error::Discovery(e) => {
            debug!(gvk = %gvk_key(gvk), error = %e, "kind not listed by group");
            DiscoveryError::NotServed(gvk_key(gvk))
        }
        kube::Error::Api(ae) if ae.code == 404 => DiscoveryError::NotServed(gvk_key(gvk)),
        other => DiscoveryError::Unreachable(other),
    }
}

#[async_trait]
impl DiscoveryBackend for KubeDiscovery {
    async fn lookup(&self, gvk: &GroupVersionKind) -> Result<ResourceMapping, DiscoveryError> {
        counter!("discovery_requests", 1u64);
        let (ar, caps) = discovery::pinned_kind(&self.client, gvk).await.map_err(|e| classify(e, gvk))?;
        Ok(ResourceMapping { gvk: gvk.clone(), resource: ar, scope: Scope::from(&caps.scope) })
    }

    async fn served_resources(&self) -> Result<Vec<DiscoveredResource>, DiscoveryError> {
        counter!("discovery_requests", 1u64);
        let discovery = Discovery::new(self.client.clone()).run().await.map_err(DiscoveryError::Unreachable)?;
        let mut out = Vec::new();
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                out.push(DiscoveredResource {
                    group: ar.group.clone(),
                    version: ar.version.clone(),
                    kind: ar.kind.clone(),
                    plural: ar.plural.clone(),
                    namespaced: matches!(caps.scope, discovery::Scope::Namespaced),
                });
            }
        }
        out.sort_by(|a, b| a.group.cmp(&b.group).then(a.version.cmp(&b.version)).then(a.kind.cmp(&b.kind)));
        Ok(out)
    }
}

/// Fixed table of mappings. Counts lookups so callers can assert cache behaviour.
#[derive(Default)]
pub struct StaticDiscovery {
    table: FxHashMap<GroupVersionKind, ResourceMapping>,
    calls: AtomicUsize,
    fail_with: Mutex<Option<String>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table of the built-in kinds a stock cluster serves.
    pub fn builtin() -> Self {
        let entries: &[(&str, &str, &str, &str, Scope)] = &[
            ("", "v1", "ConfigMap", "configmaps", Scope::Namespaced),
            ("", "v1", "Namespace", "namespaces", Scope::Cluster),
            ("", "v1", "PersistentVolume", "persistentvolumes", Scope::Cluster),
            ("", "v1", "PersistentVolumeClaim", "persistentvolumeclaims", Scope::Namespaced),
            ("", "v1", "Pod", "pods", Scope::Namespaced),
            ("", "v1", "Secret", "secrets", Scope::Namespaced),
            ("", "v1", "Service", "services", Scope::Namespaced),
            ("", "v1", "ServiceAccount", "serviceaccounts", Scope::Namespaced),
            ("apps", "v1", "DaemonSet", "daemonsets", Scope::Namespaced),
            ("apps", "v1", "Deployment", "deployments", Scope::Namespaced),
            ("apps", "v1", "StatefulSet", "statefulsets", Scope::Namespaced),
            ("batch", "v1", "Job", "jobs", Scope::Namespaced),
            ("networking.k8s.io", "v1", "Ingress", "ingresses", Scope::Namespaced),
            ("rbac.authorization.k8s.io", "v1", "ClusterRole", "clusterroles", Scope::Cluster),
            ("rbac.authorization.k8s.io", "v1", "ClusterRoleBinding", "clusterrolebindings", Scope::Cluster),
            ("rbac.authorization.k8s.io", "v1", "Role", "roles", Scope::Namespaced),
            ("rbac.authorization.k8s.io", "v1", "RoleBinding", "rolebindings", Scope::Namespaced),
        ];
        entries.iter().fold(Self::new(), |d, (g, v, k, plural, scope)| {
            d.with(ResourceMapping::new(GroupVersionKind::gvk(g, v, k), plural, *scope))
        })
    }

    pub fn with(mut self, mapping: ResourceMapping) -> Self {
        self.table.insert(mapping.gvk.clone(), mapping);
        self
    }

    /// Number of `lookup` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every following call fail as unreachable with `msg`; `None` restores service.
    pub fn set_failure(&self, msg: Option<&str>) {
        if let Ok(mut g) = self.fail_with.lock() {
            *g = msg.map(|s| s.to_string());
        }
    }

    fn failure(&self) -> Option<DiscoveryError> {
        let msg = self.fail_with.lock().ok()?.clone()?;
        Some(DiscoveryError::Unreachable(kube::Error::Service(msg.into())))
    }
}

#[async_trait]
impl DiscoveryBackend for StaticDiscovery {
    async fn lookup(&self, gvk: &GroupVersionKind) -> Result<ResourceMapping, DiscoveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failure() {
            warn!(gvk = %gvk_key(gvk), "static discovery failing on request");
            return Err(err);
        }
        self.table.get(gvk).cloned().ok_or_else(|| DiscoveryError::NotServed(gvk_key(gvk)))
    }

    async fn served_resources(&self) -> Result<Vec<DiscoveredResource>, DiscoveryError> {
        if let Some(err) = self.failure() {
            return Err(err);
        }
        let mut out: Vec<_> = self.table.values().map(DiscoveredResource::from).collect();
        out.sort_by(|a, b| a.group.cmp(&b.group).then(a.version.cmp(&b.version)).then(a.kind.cmp(&b.kind)));
        Ok(out)
    }
}
