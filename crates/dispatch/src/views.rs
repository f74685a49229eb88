//! Concrete representations for the kinds that get bespoke handling.
//!
//! Decoding is two-phase: read only the `kind` tag, then decode the full payload
//! into the type registered for that tag. Tags without a registered decoder are
//! not decoded at all.

use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{ConfigMap, Secret, Service, ServiceAccount},
    networking::v1::Ingress,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kubedyn_core::kinds::{self, Kind};
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

// handled here even though manifests of this kind are outside the registry
const SERVICE_ACCOUNT: Kind = "ServiceAccount";

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceView {
    Deployment(Box<Deployment>),
    StatefulSet(Box<StatefulSet>),
    Service(Box<Service>),
    ConfigMap(Box<ConfigMap>),
    Secret(Box<Secret>),
    ServiceAccount(Box<ServiceAccount>),
    Ingress(Box<Ingress>),
}

/// Presentation-friendly digest of a view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSummary {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    /// Desired replicas from the spec, for workload kinds.
    pub replicas: Option<i32>,
    pub status_replicas: Option<i32>,
    pub ready_replicas: Option<i32>,
}

impl ResourceView {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Deployment(_) => kinds::DEPLOYMENT,
            Self::StatefulSet(_) => kinds::STATEFUL_SET,
            Self::Service(_) => kinds::SERVICE,
            Self::ConfigMap(_) => kinds::CONFIG_MAP,
            Self::Secret(_) => kinds::SECRET,
            Self::ServiceAccount(_) => SERVICE_ACCOUNT,
            Self::Ingress(_) => kinds::INGRESS,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Deployment(o) => &o.metadata,
            Self::StatefulSet(o) => &o.metadata,
            Self::Service(o) => &o.metadata,
            Self::ConfigMap(o) => &o.metadata,
            Self::Secret(o) => &o.metadata,
            Self::ServiceAccount(o) => &o.metadata,
            Self::Ingress(o) => &o.metadata,
        }
    }

    pub fn summary(&self) -> ViewSummary {
        let meta = self.metadata();
        let (replicas, status_replicas, ready_replicas) = match self {
            Self::Deployment(d) => (
                d.spec.as_ref().and_then(|s| s.replicas),
                d.status.as_ref().and_then(|s| s.replicas),
                d.status.as_ref().and_then(|s| s.ready_replicas),
            ),
            Self::StatefulSet(s) => (
                s.spec.as_ref().and_then(|s| s.replicas),
                s.status.as_ref().map(|st| st.replicas),
                s.status.as_ref().and_then(|st| st.ready_replicas),
            ),
            _ => (None, None, None),
        };
        ViewSummary {
            kind: self.kind().to_string(),
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone(),
            replicas,
            status_replicas,
            ready_replicas,
        }
    }
}

#[derive(Deserialize)]
struct TypeTag {
    #[serde(default)]
    kind: Option<String>,
}

/// Phase one: the `kind` tag alone, without committing to a schema.
pub fn type_tag(payload: &Json) -> Result<Option<String>, serde_json::Error> {
    Ok(TypeTag::deserialize(payload)?.kind.filter(|k| !k.is_empty()))
}

type Decoder = fn(Json) -> Result<ResourceView, serde_json::Error>;

static DECODERS: Lazy<FxHashMap<Kind, Decoder>> = Lazy::new(|| {
    let table: [(Kind, Decoder); 7] = [
        (kinds::DEPLOYMENT, |v| Ok(ResourceView::Deployment(serde_json::from_value(v)?))),
        (kinds::STATEFUL_SET, |v| Ok(ResourceView::StatefulSet(serde_json::from_value(v)?))),
        (kinds::SERVICE, |v| Ok(ResourceView::Service(serde_json::from_value(v)?))),
        (kinds::CONFIG_MAP, |v| Ok(ResourceView::ConfigMap(serde_json::from_value(v)?))),
        (kinds::SECRET, |v| Ok(ResourceView::Secret(serde_json::from_value(v)?))),
        (SERVICE_ACCOUNT, |v| Ok(ResourceView::ServiceAccount(serde_json::from_value(v)?))),
        (kinds::INGRESS, |v| Ok(ResourceView::Ingress(serde_json::from_value(v)?))),
    ];
    table.into_iter().collect()
});

/// Whether `tag` has a concrete representation.
pub fn is_handled(tag: &str) -> bool {
    DECODERS.contains_key(tag)
}

pub fn handled_kinds() -> Vec<Kind> {
    let mut v: Vec<_> = DECODERS.keys().copied().collect();
    v.sort_unstable();
    v
}

/// Phase two: decode `payload` as the type registered for `tag`.
///
/// `Ok(None)` for tags without a registered type.
pub fn decode_view(tag: &str, payload: Json) -> Result<Option<ResourceView>, serde_json::Error> {
    match DECODERS.get(tag) {
        Some(decode) => decode(payload).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tag_is_read_without_schema() {
        assert_eq!(type_tag(&json!({"kind": "Deployment", "spec": 12})).unwrap().as_deref(), Some("Deployment"));
        assert_eq!(type_tag(&json!({"metadata": {}})).unwrap(), None);
        assert_eq!(type_tag(&json!({"kind": ""})).unwrap(), None);
        assert!(type_tag(&json!({"kind": 7})).is_err());
    }

    #[test]
    fn handled_set_is_fixed() {
        assert_eq!(
            handled_kinds(),
            ["ConfigMap", "Deployment", "Ingress", "Secret", "Service", "ServiceAccount", "StatefulSet"]
        );
        assert!(!is_handled("DaemonSet"));
        assert!(!is_handled("Frobnicator"));
    }

    #[test]
    fn unhandled_tag_is_not_decoded() {
        // payload would not decode as anything
        assert!(decode_view("Pod", json!({"spec": "garbage"})).unwrap().is_none());
    }

    #[test]
    fn statefulset_summary() {
        let v = decode_view(
            "StatefulSet",
            json!({
                "apiVersion": "apps/v1",
                "kind": "StatefulSet",
                "metadata": {"name": "db", "namespace": "data"},
                "spec": {"replicas": 2, "serviceName": "db", "selector": {"matchLabels": {"app": "db"}},
                         "template": {"metadata": {"labels": {"app": "db"}}}},
                "status": {"replicas": 2, "readyReplicas": 1}
            }),
        )
        .unwrap()
        .unwrap();
        let s = v.summary();
        assert_eq!(s.kind, "StatefulSet");
        assert_eq!((s.replicas, s.status_replicas, s.ready_replicas), (Some(2), Some(2), Some(1)));
    }

    #[test]
    fn service_summary_has_no_replicas() {
        let v = decode_view(
            "Service",
            json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": "web", "namespace": "demo"},
                   "spec": {"ports": [{"port": 80}]}}),
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            v.summary(),
            ViewSummary { kind: "Service".into(), name: "web".into(), namespace: Some("demo".into()), ..Default::default() }
        );
    }
}
