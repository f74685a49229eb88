//! Resource mappings (discovery results) and scope-checked handles.

use std::fmt;

use kube::core::{ApiResource, GroupVersionKind};
use serde::{Deserialize, Serialize};

use crate::error::ScopeError;
use crate::manifest::{gvk_key, Manifest};

/// Whether a resource type is one cluster-wide collection or partitioned per namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Cluster,
    Namespaced,
}

impl From<&kube::discovery::Scope> for Scope {
    fn from(s: &kube::discovery::Scope) -> Self {
        match s {
            kube::discovery::Scope::Cluster => Scope::Cluster,
            kube::discovery::Scope::Namespaced => Scope::Namespaced,
        }
    }
}

/// A GVK resolved through discovery: the REST resource and its scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMapping {
    pub gvk: GroupVersionKind,
    pub resource: ApiResource,
    pub scope: Scope,
}

impl ResourceMapping {
    pub fn new(gvk: GroupVersionKind, plural: &str, scope: Scope) -> Self {
        let resource = ApiResource::from_gvk_with_plural(&gvk, plural);
        Self { gvk, resource, scope }
    }

    pub fn plural(&self) -> &str {
        &self.resource.plural
    }

    pub fn namespaced(&self) -> bool {
        self.scope == Scope::Namespaced
    }

    pub fn gvk_key(&self) -> String {
        gvk_key(&self.gvk)
    }
}

/// Where a handle points inside its resource collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Cluster-scoped collection.
    Cluster,
    /// One namespace of a namespaced collection.
    Namespace(String),
    /// Every namespace of a namespaced collection. Only valid for list and watch.
    AllNamespaces,
}

/// A mapping bound to a concrete target. Built only through the scope checks below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    mapping: ResourceMapping,
    target: Target,
}

impl ResourceHandle {
    /// Bind `mapping` to `namespace`.
    ///
    /// Namespaced mappings require a non-empty namespace. Cluster-scoped mappings
    /// ignore whatever namespace is given.
    pub fn bind(mapping: &ResourceMapping, namespace: Option<&str>, name: &str) -> Result<Self, ScopeError> {
        let target = match mapping.scope {
            Scope::Cluster => Target::Cluster,
            Scope::Namespaced => match namespace.filter(|ns| !ns.is_empty()) {
                Some(ns) => Target::Namespace(ns.to_string()),
                None => {
                    return Err(ScopeError::NamespaceRequired {
                        kind: mapping.gvk.kind.clone(),
                        name: name.to_string(),
                    })
                }
            },
        };
        Ok(Self { mapping: mapping.clone(), target })
    }

    /// Bind using the manifest's declared namespace, falling back to `ns_override`.
    pub fn for_manifest(
        mapping: &ResourceMapping,
        manifest: &Manifest,
        ns_override: Option<&str>,
    ) -> Result<Self, ScopeError> {
        let ns = manifest.namespace().or(ns_override);
        Self::bind(mapping, ns, manifest.name().unwrap_or_default())
    }

    /// Handle over the whole collection: every namespace for namespaced kinds.
    pub fn all_namespaces(mapping: &ResourceMapping) -> Self {
        let target = match mapping.scope {
            Scope::Cluster => Target::Cluster,
            Scope::Namespaced => Target::AllNamespaces,
        };
        Self { mapping: mapping.clone(), target }
    }

    pub fn mapping(&self) -> &ResourceMapping {
        &self.mapping
    }

    pub fn resource(&self) -> &ApiResource {
        &self.mapping.resource
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Namespace carried by the handle. Always `None` for cluster-scoped kinds.
    pub fn namespace(&self) -> Option<&str> {
        match &self.target {
            Target::Namespace(ns) => Some(ns),
            _ => None,
        }
    }

    /// Whether single objects can be addressed (apply, delete, get).
    pub fn addresses_objects(&self) -> bool {
        !matches!(self.target, Target::AllNamespaces)
    }

    /// Collection path relative to the API server root.
    pub fn collection_path(&self) -> String {
        let ar = &self.mapping.resource;
        let base = if ar.group.is_empty() {
            format!("/api/{}", ar.version)
        } else {
            format!("/apis/{}/{}", ar.group, ar.version)
        };
        match &self.target {
            Target::Namespace(ns) => format!("{}/namespaces/{}/{}", base, ns, ar.plural),
            _ => format!("{}/{}", base, ar.plural),
        }
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Cluster => write!(f, "{}", self.mapping.gvk_key()),
            Target::Namespace(ns) => write!(f, "{} in {}", self.mapping.gvk_key(), ns),
            Target::AllNamespaces => write!(f, "{} in all namespaces", self.mapping.gvk_key()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace_mapping() -> ResourceMapping {
        ResourceMapping::new(GroupVersionKind::gvk("", "v1", "Namespace"), "namespaces", Scope::Cluster)
    }

    fn configmap_mapping() -> ResourceMapping {
        ResourceMapping::new(GroupVersionKind::gvk("", "v1", "ConfigMap"), "configmaps", Scope::Namespaced)
    }

    #[test]
    fn cluster_scoped_handle_drops_manifest_namespace() {
        let m = Manifest::parse("apiVersion: v1\nkind: Namespace\nmetadata:\n  name: demo\n  namespace: speculative\n")
            .unwrap();
        let h = ResourceHandle::for_manifest(&namespace_mapping(), &m, None).unwrap();
        assert_eq!(h.namespace(), None);
        assert_eq!(h.target(), &Target::Cluster);
        assert_eq!(h.collection_path(), "/api/v1/namespaces");
    }

    #[test]
    fn namespaced_handle_carries_manifest_namespace() {
        let m = Manifest::parse("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  namespace: demo\n").unwrap();
        let h = ResourceHandle::for_manifest(&configmap_mapping(), &m, Some("other")).unwrap();
        assert_eq!(h.namespace(), Some("demo"));
        assert_eq!(h.collection_path(), "/api/v1/namespaces/demo/configmaps");
        assert_eq!(h.to_string(), "v1/ConfigMap in demo");
    }

    #[test]
    fn namespaced_handle_without_namespace_is_rejected() {
        let m = Manifest::parse("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  namespace: \"\"\n").unwrap();
        let err = ResourceHandle::for_manifest(&configmap_mapping(), &m, None).unwrap_err();
        assert_eq!(err, ScopeError::NamespaceRequired { kind: "ConfigMap".into(), name: "cfg".into() });
        // override fills the gap
        let h = ResourceHandle::for_manifest(&configmap_mapping(), &m, Some("fallback")).unwrap();
        assert_eq!(h.namespace(), Some("fallback"));
    }

    #[test]
    fn all_namespaces_is_not_object_addressable() {
        let h = ResourceHandle::all_namespaces(&configmap_mapping());
        assert!(!h.addresses_objects());
        assert_eq!(h.namespace(), None);
        assert_eq!(h.collection_path(), "/api/v1/configmaps");
        assert!(ResourceHandle::all_namespaces(&namespace_mapping()).addresses_objects());
    }

    #[test]
    fn grouped_collection_path() {
        let m = ResourceMapping::new(GroupVersionKind::gvk("apps", "v1", "Deployment"), "deployments", Scope::Namespaced);
        let h = ResourceHandle::bind(&m, Some("web"), "api").unwrap();
        assert_eq!(h.collection_path(), "/apis/apps/v1/namespaces/web/deployments");
    }
}
