//! Resource endpoint seam and its kube-backed implementation.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, WatchParams},
    core::{DynamicObject, WatchEvent},
    Client,
};
use kubedyn_core::{ResourceHandle, Target};
use tracing::debug;

/// Raw watch notifications, bookmarks included.
pub type EventStream = BoxStream<'static, kube::Result<WatchEvent<DynamicObject>>>;

/// Single-object and collection calls against one mapped endpoint.
///
/// Implementations report server rejections as `kube::Error::Api` so callers can
/// classify them by status code.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn apply(
        &self,
        handle: &ResourceHandle,
        name: &str,
        obj: &DynamicObject,
        pp: &PatchParams,
    ) -> kube::Result<DynamicObject>;

    async fn delete(&self, handle: &ResourceHandle, name: &str, dp: &DeleteParams) -> kube::Result<()>;

    async fn get_opt(&self, handle: &ResourceHandle, name: &str) -> kube::Result<Option<DynamicObject>>;

    async fn list(&self, handle: &ResourceHandle, lp: &ListParams) -> kube::Result<Vec<DynamicObject>>;

    async fn watch(&self, handle: &ResourceHandle, wp: &WatchParams, version: &str) -> kube::Result<EventStream>;
}

/// Knobs for opening a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    /// Server-side timeout in seconds; the server closes the stream when it elapses.
    pub timeout_secs: Option<u32>,
    pub bookmarks: bool,
    /// "0" starts from any cached state and replays existing objects as Added.
    pub resource_version: String,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            label_selector: None,
            field_selector: None,
            timeout_secs: None,
            bookmarks: true,
            resource_version: "0".to_string(),
        }
    }
}

impl WatchOptions {
    pub fn with_labels(mut self, selector: &str) -> Self {
        self.label_selector = Some(selector.to_string());
        self
    }

    pub fn with_fields(mut self, selector: &str) -> Self {
        self.field_selector = Some(selector.to_string());
        self
    }

    pub fn with_timeout(mut self, secs: u32) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn without_bookmarks(mut self) -> Self {
        self.bookmarks = false;
        self
    }

    pub fn to_params(&self) -> WatchParams {
        let mut wp = WatchParams::default();
        if let Some(l) = &self.label_selector {
            wp = wp.labels(l);
        }
        if let Some(f) = &self.field_selector {
            wp = wp.fields(f);
        }
        if let Some(t) = self.timeout_secs {
            wp = wp.timeout(t);
        }
        if !self.bookmarks {
            wp = wp.disable_bookmarks();
        }
        wp
    }
}

/// Dynamic API calls through a kube client.
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, handle: &ResourceHandle) -> Api<DynamicObject> {
        match handle.target() {
            Target::Namespace(ns) => Api::namespaced_with(self.client.clone(), ns, handle.resource()),
            Target::Cluster | Target::AllNamespaces => Api::all_with(self.client.clone(), handle.resource()),
        }
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn apply(
        &self,
        handle: &ResourceHandle,
        name: &str,
        obj: &DynamicObject,
        pp: &PatchParams,
    ) -> kube::Result<DynamicObject> {
        debug!(target_ref = %handle, name, "server-side apply");
        self.api(handle).patch(name, pp, &Patch::Apply(obj)).await
    }

    async fn delete(&self, handle: &ResourceHandle, name: &str, dp: &DeleteParams) -> kube::Result<()> {
        debug!(target_ref = %handle, name, "delete");
        self.api(handle).delete(name, dp).await.map(|_| ())
    }

    async fn get_opt(&self, handle: &ResourceHandle, name: &str) -> kube::Result<Option<DynamicObject>> {
        self.api(handle).get_opt(name).await
    }

    async fn list(&self, handle: &ResourceHandle, lp: &ListParams) -> kube::Result<Vec<DynamicObject>> {
        Ok(self.api(handle).list(lp).await?.items)
    }

    async fn watch(&self, handle: &ResourceHandle, wp: &WatchParams, version: &str) -> kube::Result<EventStream> {
        debug!(target_ref = %handle, version, "opening watch");
        Ok(self.api(handle).watch(wp, version).await?.boxed())
    }
}
