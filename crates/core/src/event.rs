//! Change notifications produced by a watch subscription.

use kube::core::{DynamicObject, ErrorResponse, WatchEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::ApiStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Error,
}

/// One change notification. The payload stays generic until its kind tag is resolved.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Added(DynamicObject),
    Modified(DynamicObject),
    Deleted(DynamicObject),
    Error(ApiStatus),
}

impl ChangeEvent {
    /// Map a raw watch event. Bookmarks carry no change and map to `None`.
    pub fn from_watch_event(ev: WatchEvent<DynamicObject>) -> Option<Self> {
        match ev {
            WatchEvent::Added(o) => Some(Self::Added(o)),
            WatchEvent::Modified(o) => Some(Self::Modified(o)),
            WatchEvent::Deleted(o) => Some(Self::Deleted(o)),
            WatchEvent::Bookmark(_) => None,
            WatchEvent::Error(e) => Some(Self::Error(ApiStatus::from(e))),
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Self::Added(_) => EventType::Added,
            Self::Modified(_) => EventType::Modified,
            Self::Deleted(_) => EventType::Deleted,
            Self::Error(_) => EventType::Error,
        }
    }

    pub fn object(&self) -> Option<&DynamicObject> {
        match self {
            Self::Added(o) | Self::Modified(o) | Self::Deleted(o) => Some(o),
            Self::Error(_) => None,
        }
    }

    /// Generic payload as a JSON document, `None` for error events.
    pub fn payload(&self) -> Option<Result<Json, serde_json::Error>> {
        self.object().map(serde_json::to_value)
    }
}

impl From<ErrorResponse> for ChangeEvent {
    fn from(e: ErrorResponse) -> Self {
        Self::Error(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_events_map_to_change_events() {
        let ev: WatchEvent<DynamicObject> = serde_json::from_value(serde_json::json!({
            "type": "ADDED",
            "object": {"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a", "namespace": "ns"}}
        }))
        .unwrap();
        let ce = ChangeEvent::from_watch_event(ev).unwrap();
        assert_eq!(ce.event_type(), EventType::Added);
        let payload = ce.payload().unwrap().unwrap();
        assert_eq!(payload.get("kind").and_then(|v| v.as_str()), Some("ConfigMap"));
        assert_eq!(payload.pointer("/metadata/name").and_then(|v| v.as_str()), Some("a"));
    }

    #[test]
    fn bookmarks_are_dropped_and_errors_keep_status() {
        let bm: WatchEvent<DynamicObject> = serde_json::from_value(serde_json::json!({
            "type": "BOOKMARK",
            "object": {"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"resourceVersion": "10"}}
        }))
        .unwrap();
        assert!(ChangeEvent::from_watch_event(bm).is_none());

        let err: WatchEvent<DynamicObject> = serde_json::from_value(serde_json::json!({
            "type": "ERROR",
            "object": {"status": "Failure", "message": "too old resource version", "reason": "Expired", "code": 410}
        }))
        .unwrap();
        match ChangeEvent::from_watch_event(err) {
            Some(ChangeEvent::Error(s)) => {
                assert_eq!(s.code, 410);
                assert_eq!(s.reason, "Expired");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
