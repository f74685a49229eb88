//! kubedyn core types
//!
//! Leaf crate shared by the discovery, apply and dispatch layers:
//! - a static registry of recognized kinds
//! - manifest decoding into a generic document plus its group/version/kind
//! - resource mappings and scope-checked resource handles
//! - change events and the error taxonomy

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod event;
pub mod kinds;
pub mod manifest;
pub mod mapping;

pub use config::{ManifestLimits, OperatorConfig};
pub use error::{
    ApiStatus, ApplyError, DecodeError, DeleteError, DiscoveryError, KindLookupError, ReadError, ScopeError, WatchError,
};
pub use event::{ChangeEvent, EventType};
pub use kinds::{is_recognized, Kind};
pub use manifest::{extract_gvk, extract_gvk_with, extract_kind, extract_kind_with, gvk_key, parse_gvk_key, strip_server_fields, Manifest};
pub use mapping::{ResourceHandle, ResourceMapping, Scope, Target};

pub use kube::core::{DynamicObject, GroupVersionKind};

pub mod prelude {
    pub use super::{
        ChangeEvent, EventType, GroupVersionKind, Manifest, OperatorConfig, ResourceHandle, ResourceMapping, Scope,
    };
}
