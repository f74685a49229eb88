//! Static catalog of recognized kind names.
//!
//! The catalog is fixed at compile time. Adding a kind is a code change.

use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

/// A recognized kind name, borrowed from the static catalog.
pub type Kind = &'static str;

pub const CONFIG_MAP: Kind = "ConfigMap";
pub const CLUSTER_ROLE: Kind = "ClusterRole";
pub const CLUSTER_ROLE_BINDING: Kind = "ClusterRoleBinding";
pub const DEPLOYMENT: Kind = "Deployment";
pub const INGRESS: Kind = "Ingress";
pub const JOB: Kind = "Job";
pub const NAMESPACE: Kind = "Namespace";
pub const POD: Kind = "Pod";
pub const ROLE: Kind = "Role";
pub const ROLE_BINDING: Kind = "RoleBinding";
pub const SECRET: Kind = "Secret";
pub const SERVICE: Kind = "Service";
pub const SERVICE_MONITOR: Kind = "ServiceMonitor";
pub const STATEFUL_SET: Kind = "StatefulSet";

/// Every kind in the catalog, in declaration order.
pub const KINDS: [Kind; 14] = [
    CONFIG_MAP,
    CLUSTER_ROLE,
    CLUSTER_ROLE_BINDING,
    DEPLOYMENT,
    INGRESS,
    JOB,
    NAMESPACE,
    POD,
    ROLE,
    ROLE_BINDING,
    SECRET,
    SERVICE,
    SERVICE_MONITOR,
    STATEFUL_SET,
];

static CATALOG: Lazy<FxHashSet<Kind>> = Lazy::new(|| KINDS.iter().copied().collect());

/// Membership test against the catalog. Matching is exact and case-sensitive.
pub fn is_recognized(kind: &str) -> bool {
    CATALOG.contains(kind)
}

/// Canonical `'static` name for a recognized kind.
pub fn lookup(kind: &str) -> Option<Kind> {
    CATALOG.get(kind).copied()
}
