//! Manifest-level helpers: decode, resolve, bind, then operate.

use kubedyn_core::{gvk_key, DeleteError, Manifest, ResourceHandle};
use kubedyn_kubehub::{ClusterContext, WatchOptions};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{ApplyOutcome, ChangeEventStream, OperatorError};

/// Resolve the manifest's GVK and bind a handle using its namespace, then `ns_override`.
pub async fn resolve_handle(
    ctx: &ClusterContext,
    manifest: &Manifest,
    ns_override: Option<&str>,
) -> Result<ResourceHandle, OperatorError> {
    let mapping = ctx.mapper().resolve(manifest.gvk()).await?;
    Ok(ResourceHandle::for_manifest(&mapping, manifest, ns_override)?)
}

pub async fn apply_manifest(
    ctx: &ClusterContext,
    manifest: &Manifest,
    ns_override: Option<&str>,
) -> Result<ApplyOutcome, OperatorError> {
    let handle = resolve_handle(ctx, manifest, ns_override).await?;
    let obj = manifest.to_dynamic_object()?;
    Ok(crate::apply(ctx, &handle, &obj).await?)
}

pub async fn delete_manifest(
    ctx: &ClusterContext,
    manifest: &Manifest,
    ns_override: Option<&str>,
) -> Result<(), OperatorError> {
    let name = manifest.name().ok_or_else(|| OperatorError::MissingName { kind: manifest.kind().to_string() })?;
    let handle = resolve_handle(ctx, manifest, ns_override).await?;
    Ok(crate::delete(ctx, &handle, name).await?)
}

/// Watch the manifest's collection, in its namespace when namespaced.
pub async fn watch_manifest(
    ctx: &ClusterContext,
    manifest: &Manifest,
    ns_override: Option<&str>,
    opts: &WatchOptions,
) -> Result<ChangeEventStream, OperatorError> {
    let handle = resolve_handle(ctx, manifest, ns_override).await?;
    Ok(crate::watch(ctx, &handle, opts).await?)
}

/// Apply every document of a `---` separated stream, in order.
///
/// Stops at the first failure; documents applied before it stay applied.
pub async fn apply_all(
    ctx: &ClusterContext,
    text: &str,
    ns_override: Option<&str>,
) -> Result<Vec<ApplyOutcome>, OperatorError> {
    let docs = Manifest::parse_all(text, &ctx.config().limits)?;
    let mut out = Vec::with_capacity(docs.len());
    for m in &docs {
        out.push(apply_manifest(ctx, m, ns_override).await?);
    }
    info!(count = out.len(), "manifests applied");
    Ok(out)
}

/// Result of one document in [`delete_all`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub gvk: String,
    pub name: String,
    pub namespace: Option<String>,
    /// False when the object was already gone.
    pub deleted: bool,
}

/// Delete every document of a stream in reverse order. Already-absent objects are
/// reported, not treated as failures.
pub async fn delete_all(
    ctx: &ClusterContext,
    text: &str,
    ns_override: Option<&str>,
) -> Result<Vec<DeleteOutcome>, OperatorError> {
    let docs = Manifest::parse_all(text, &ctx.config().limits)?;
    let mut out = Vec::with_capacity(docs.len());
    for m in docs.iter().rev() {
        let name = m.name().ok_or_else(|| OperatorError::MissingName { kind: m.kind().to_string() })?;
        let handle = resolve_handle(ctx, m, ns_override).await?;
        let deleted = match crate::delete(ctx, &handle, name).await {
            Ok(()) => true,
            Err(DeleteError::NotFound { .. }) => false,
            Err(e) => return Err(e.into()),
        };
        out.push(DeleteOutcome {
            gvk: gvk_key(m.gvk()),
            name: name.to_string(),
            namespace: handle.namespace().map(|s| s.to_string()),
            deleted,
        });
    }
    Ok(out)
}
