//! kubedyn apply: the resource operator.
//!
//! Apply (server-side apply upsert), delete (foreground propagation), get, list
//! and watch against a [`ResourceHandle`]. Every call runs under the deadline
//! configured in the context's [`OperatorConfig`](kubedyn_core::OperatorConfig)
//! and reports failures through the typed errors of `kubedyn_core`. Nothing here
//! retries; retry and reconnect policy belong to the caller.

#![forbid(unsafe_code)]

use std::future::Future;
use std::time::{Duration, Instant};

use kube::{
    api::{DeleteParams, ListParams, PatchParams},
    core::{DynamicObject, TypeMeta},
};
use kubedyn_core::{ApplyError, DeleteError, ReadError, ResourceHandle, ScopeError, WatchError};
use kubedyn_kubehub::{ClusterContext, WatchOptions};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

mod error;
mod manifest;
mod stream;

pub use error::OperatorError;
pub use manifest::{apply_all, apply_manifest, delete_all, delete_manifest, resolve_handle, watch_manifest, DeleteOutcome};
pub use stream::ChangeEventStream;

/// What the server answered to a successful apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub name: String,
    pub namespace: Option<String>,
    pub resource_version: Option<String>,
    pub uid: Option<String>,
    pub generation: Option<i64>,
    pub object: DynamicObject,
}

impl ApplyOutcome {
    fn from_object(object: DynamicObject) -> Self {
        let meta = &object.metadata;
        Self {
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone(),
            resource_version: meta.resource_version.clone(),
            uid: meta.uid.clone(),
            generation: meta.generation,
            object,
        }
    }
}

async fn with_deadline<T, E>(
    limit: Duration,
    fut: impl Future<Output = Result<T, E>>,
    on_timeout: impl FnOnce(Duration) -> E,
) -> Result<T, E> {
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(on_timeout(limit)),
    }
}

fn require_addressable(handle: &ResourceHandle) -> Result<(), ScopeError> {
    if handle.addresses_objects() {
        Ok(())
    } else {
        Err(ScopeError::NotAddressable(handle.to_string()))
    }
}

/// Align the body with the handle: identity from the mapping, namespace from the target.
fn prepare_body(handle: &ResourceHandle, doc: &DynamicObject) -> DynamicObject {
    let mut obj = doc.clone();
    let ar = handle.resource();
    obj.types = Some(TypeMeta { api_version: ar.api_version.clone(), kind: ar.kind.clone() });
    obj.metadata.namespace = handle.namespace().map(|s| s.to_string());
    obj.metadata.managed_fields = None;
    obj
}

/// Create-or-update `doc` at `handle` with server-side apply.
///
/// Applying the same document twice converges to one object and succeeds both times.
pub async fn apply(ctx: &ClusterContext, handle: &ResourceHandle, doc: &DynamicObject) -> Result<ApplyOutcome, ApplyError> {
    require_addressable(handle)?;
    let name = doc.metadata.name.clone().filter(|n| !n.is_empty()).ok_or(ApplyError::MissingName)?;
    let cfg = ctx.config();
    let body = prepare_body(handle, doc);
    let mut pp = PatchParams::apply(&cfg.field_manager);
    if cfg.force_conflicts {
        pp = pp.force();
    }

    let t0 = Instant::now();
    let res = with_deadline(
        cfg.apply_timeout,
        async { ctx.resources().apply(handle, &name, &body, &pp).await.map_err(ApplyError::from) },
        ApplyError::Timeout,
    )
    .await;
    match res {
        Ok(obj) => {
            histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
            counter!("apply_ok", 1u64);
            let out = ApplyOutcome::from_object(obj);
            info!(target_ref = %handle, name = %name, rv = ?out.resource_version, "applied");
            Ok(out)
        }
        Err(e) => {
            counter!("apply_err", 1u64);
            warn!(target_ref = %handle, name = %name, error = %e, "apply failed");
            Err(e)
        }
    }
}

/// Delete `name` with foreground propagation.
///
/// A missing object is `DeleteError::NotFound`, never a transport error.
pub async fn delete(ctx: &ClusterContext, handle: &ResourceHandle, name: &str) -> Result<(), DeleteError> {
    require_addressable(handle)?;
    let dp = DeleteParams::foreground();
    let res = with_deadline(
        ctx.config().delete_timeout,
        async { ctx.resources().delete(handle, name, &dp).await.map_err(|e| DeleteError::from_kube(e, name)) },
        DeleteError::Timeout,
    )
    .await;
    match &res {
        Ok(()) => {
            counter!("delete_ok", 1u64);
            info!(target_ref = %handle, name, "deleted");
        }
        Err(DeleteError::NotFound { .. }) => {
            counter!("delete_not_found", 1u64);
            debug!(target_ref = %handle, name, "delete: not found");
        }
        Err(e) => warn!(target_ref = %handle, name, error = %e, "delete failed"),
    }
    res
}

/// Fetch `name`, `ReadError::NotFound` if absent.
pub async fn get(ctx: &ClusterContext, handle: &ResourceHandle, name: &str) -> Result<DynamicObject, ReadError> {
    get_opt(ctx, handle, name).await?.ok_or_else(|| ReadError::NotFound { name: name.to_string() })
}

pub async fn get_opt(ctx: &ClusterContext, handle: &ResourceHandle, name: &str) -> Result<Option<DynamicObject>, ReadError> {
    require_addressable(handle)?;
    with_deadline(
        ctx.config().read_timeout,
        async { ctx.resources().get_opt(handle, name).await.map_err(|e| ReadError::from_kube(e, name)) },
        ReadError::Timeout,
    )
    .await
}

/// Every object under the handle's target; all namespaces for an all-namespaces handle.
pub async fn list(ctx: &ClusterContext, handle: &ResourceHandle, lp: &ListParams) -> Result<Vec<DynamicObject>, ReadError> {
    let items = with_deadline(
        ctx.config().read_timeout,
        async { ctx.resources().list(handle, lp).await.map_err(|e| ReadError::from_kube(e, "")) },
        ReadError::Timeout,
    )
    .await?;
    debug!(target_ref = %handle, count = items.len(), "listed");
    Ok(items)
}

/// Open a change-notification subscription. The stream ends when the server closes it
/// and is never reopened here.
pub async fn watch(ctx: &ClusterContext, handle: &ResourceHandle, opts: &WatchOptions) -> Result<ChangeEventStream, WatchError> {
    let wp = opts.to_params();
    let inner = with_deadline(
        ctx.config().read_timeout,
        async { ctx.resources().watch(handle, &wp, &opts.resource_version).await.map_err(WatchError::opening) },
        WatchError::Timeout,
    )
    .await?;
    counter!("watch_opened", 1u64);
    info!(target_ref = %handle, labels = ?opts.label_selector, fields = ?opts.field_selector, "watch opened");
    Ok(ChangeEventStream::new(inner))
}
