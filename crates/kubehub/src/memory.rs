//! In-memory resource endpoint for tests.
//!
//! Models the parts of the API server the operator relies on: server-side apply
//! that converges (re-applying identical content leaves the object untouched),
//! field-manager conflicts, 404 on missing objects and watch fan-out.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use kube::{
    api::{DeleteParams, ListParams, PatchParams, WatchParams},
    core::{DynamicObject, ErrorResponse, WatchEvent},
};
use kubedyn_core::{ResourceHandle, Target};
use tracing::debug;

use crate::resources::{EventStream, ResourceClient};

type WatchTx = mpsc::UnboundedSender<kube::Result<WatchEvent<DynamicObject>>>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    collection: String,
    namespace: Option<String>,
    name: String,
}

struct Stored {
    obj: DynamicObject,
    manager: String,
}

struct Subscriber {
    collection: String,
    target: Target,
    tx: WatchTx,
}

impl Subscriber {
    fn wants(&self, key: &ObjectKey) -> bool {
        self.collection == key.collection
            && match &self.target {
                Target::Namespace(ns) => key.namespace.as_deref() == Some(ns.as_str()),
                Target::Cluster | Target::AllNamespaces => true,
            }
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Stored>,
    revision: u64,
    uid_seq: u64,
    subscribers: Vec<Subscriber>,
    patches: Vec<PatchParams>,
    deletes: Vec<(String, DeleteParams)>,
    watch_opens: usize,
    watch_failure: Option<ErrorResponse>,
    latency: Option<Duration>,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn publish(&mut self, key: &ObjectKey, ev: impl Fn() -> WatchEvent<DynamicObject>) {
        self.subscribers.retain(|s| !s.wants(key) || s.tx.unbounded_send(Ok(ev())).is_ok());
    }
}

pub fn api_error(code: u16, reason: &str, message: impl Into<String>) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    })
}

#[derive(Default)]
pub struct MemoryResources {
    state: Mutex<State>,
}

impl MemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn simulate_latency(&self) {
        let latency = self.state().latency;
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }
    }

    /// Delay every call by `d` before it is served.
    pub fn set_latency(&self, d: Option<Duration>) {
        self.state().latency = d;
    }

    /// Reject subsequent watch opens with the given status; `None` accepts them again.
    pub fn set_watch_failure(&self, failure: Option<(u16, &str)>) {
        self.state().watch_failure = failure.map(|(code, reason)| ErrorResponse {
            status: "Failure".to_string(),
            message: format!("watch rejected: {reason}"),
            reason: reason.to_string(),
            code,
        });
    }

    /// Push an event to every open watch, regardless of collection.
    pub fn broadcast(&self, ev: WatchEvent<DynamicObject>) {
        self.state().subscribers.retain(|s| s.tx.unbounded_send(Ok(ev.clone())).is_ok());
    }

    /// Fail the open watch streams on `handle`'s collection and target with a transport
    /// error. Other watches are untouched and every stream stays open.
    pub fn break_watches(&self, handle: &ResourceHandle, msg: &str) {
        let collection = handle.mapping().gvk_key();
        for s in self.state().subscribers.iter() {
            if s.collection == collection && &s.target == handle.target() {
                let _ = s.tx.unbounded_send(Err(kube::Error::Service(msg.to_string().into())));
            }
        }
    }

    /// End every open watch stream.
    pub fn close_watches(&self) {
        self.state().subscribers.clear();
    }

    pub fn open_watches(&self) -> usize {
        self.state().subscribers.iter().filter(|s| !s.tx.is_closed()).count()
    }

    /// Watch opens attempted, including rejected ones.
    pub fn watch_opens(&self) -> usize {
        self.state().watch_opens
    }

    pub fn len(&self) -> usize {
        self.state().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parameters of every delete served, in order, keyed by object name.
    pub fn deletes(&self) -> Vec<(String, DeleteParams)> {
        self.state().deletes.clone()
    }

    /// Parameters of every apply served, in order.
    pub fn patches(&self) -> Vec<PatchParams> {
        self.state().patches.clone()
    }

    fn key(handle: &ResourceHandle, name: &str) -> ObjectKey {
        ObjectKey {
            collection: handle.mapping().gvk_key(),
            namespace: handle.namespace().map(|s| s.to_string()),
            name: name.to_string(),
        }
    }
}

// labels, annotations and everything outside metadata
fn same_content(a: &DynamicObject, b: &DynamicObject) -> bool {
    a.data == b.data && a.metadata.labels == b.metadata.labels && a.metadata.annotations == b.metadata.annotations
}

fn same_spec(a: &DynamicObject, b: &DynamicObject) -> bool {
    a.data.get("spec") == b.data.get("spec")
}

#[async_trait]
impl ResourceClient for MemoryResources {
    async fn apply(
        &self,
        handle: &ResourceHandle,
        name: &str,
        obj: &DynamicObject,
        pp: &PatchParams,
    ) -> kube::Result<DynamicObject> {
        self.simulate_latency().await;
        let manager = match pp.field_manager.as_deref() {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => return Err(api_error(400, "BadRequest", "fieldManager is required for apply requests")),
        };
        if obj.metadata.name.as_deref() != Some(name) {
            return Err(api_error(400, "BadRequest", "the name of the object does not match the name on the URL"));
        }
        let key = Self::key(handle, name);
        let mut st = self.state();
        st.patches.push(pp.clone());

        let mut desired = obj.clone();
        desired.metadata.namespace = key.namespace.clone();
        desired.metadata.managed_fields = None;
        if let Some(o) = desired.data.as_object_mut() {
            o.remove("status");
        }

        let existing = st.objects.get(&key).map(|s| (s.obj.clone(), s.manager.clone()));
        let (stored, event_added) = match existing {
            Some((cur, _)) if same_content(&cur, &desired) => {
                debug!(name, "apply converged, no change");
                return Ok(cur);
            }
            Some((_, owner)) if owner != manager && !pp.force => {
                return Err(api_error(
                    409,
                    "Conflict",
                    format!("Apply failed with 1 conflict: conflict with \"{owner}\""),
                ));
            }
            Some((cur, _)) => {
                let gen = cur.metadata.generation.unwrap_or(1);
                desired.metadata.uid = cur.metadata.uid.clone();
                desired.metadata.creation_timestamp = cur.metadata.creation_timestamp.clone();
                desired.metadata.generation = Some(if same_spec(&cur, &desired) { gen } else { gen + 1 });
                desired.metadata.resource_version = Some(st.next_revision());
                (desired, false)
            }
            None => {
                st.uid_seq += 1;
                desired.metadata.uid = Some(format!("00000000-0000-0000-0000-{:012}", st.uid_seq));
                desired.metadata.generation = Some(1);
                desired.metadata.resource_version = Some(st.next_revision());
                (desired, true)
            }
        };
        st.objects.insert(key.clone(), Stored { obj: stored.clone(), manager });
        st.publish(&key, || {
            if event_added {
                WatchEvent::Added(stored.clone())
            } else {
                WatchEvent::Modified(stored.clone())
            }
        });
        Ok(stored)
    }

    async fn delete(&self, handle: &ResourceHandle, name: &str, dp: &DeleteParams) -> kube::Result<()> {
        self.simulate_latency().await;
        let key = Self::key(handle, name);
        let mut st = self.state();
        st.deletes.push((name.to_string(), dp.clone()));
        let Some(removed) = st.objects.remove(&key) else {
            return Err(api_error(
                404,
                "NotFound",
                format!("{} \"{}\" not found", handle.resource().plural, name),
            ));
        };
        let mut gone = removed.obj;
        gone.metadata.resource_version = Some(st.next_revision());
        st.publish(&key, || WatchEvent::Deleted(gone.clone()));
        Ok(())
    }

    async fn get_opt(&self, handle: &ResourceHandle, name: &str) -> kube::Result<Option<DynamicObject>> {
        self.simulate_latency().await;
        let key = Self::key(handle, name);
        Ok(self.state().objects.get(&key).map(|s| s.obj.clone()))
    }

    async fn list(&self, handle: &ResourceHandle, _lp: &ListParams) -> kube::Result<Vec<DynamicObject>> {
        self.simulate_latency().await;
        let collection = handle.mapping().gvk_key();
        let ns = handle.namespace();
        Ok(self
            .state()
            .objects
            .iter()
            .filter(|(k, _)| k.collection == collection && (ns.is_none() || k.namespace.as_deref() == ns))
            .map(|(_, s)| s.obj.clone())
            .collect())
    }

    async fn watch(&self, handle: &ResourceHandle, _wp: &WatchParams, version: &str) -> kube::Result<EventStream> {
        self.simulate_latency().await;
        let mut st = self.state();
        st.watch_opens += 1;
        if let Some(e) = st.watch_failure.clone() {
            return Err(kube::Error::Api(e));
        }
        let (tx, rx) = mpsc::unbounded();
        let sub = Subscriber { collection: handle.mapping().gvk_key(), target: handle.target().clone(), tx };
        if version == "0" || version.is_empty() {
            for (k, s) in st.objects.iter() {
                if sub.wants(k) {
                    let _ = sub.tx.unbounded_send(Ok(WatchEvent::Added(s.obj.clone())));
                }
            }
        }
        debug!(target_ref = %handle, version, "memory watch opened");
        st.subscribers.push(sub);
        Ok(rx.boxed())
    }
}
