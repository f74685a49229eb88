//! Error taxonomy shared by every layer.
//!
//! Server rejections keep the API status (`code`, `reason`, `message`) so callers
//! can branch on them; transport failures keep the underlying `kube::Error`.

use std::fmt;
use std::time::Duration;

use kube::core::ErrorResponse;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// API status returned by the server when it rejects a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiStatus {
    pub code: u16,
    pub reason: String,
    pub message: String,
}

impl ApiStatus {
    pub fn is_not_found(&self) -> bool {
        self.code == 404
    }

    pub fn is_conflict(&self) -> bool {
        self.code == 409
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.code, self.reason, self.message)
    }
}

impl From<ErrorResponse> for ApiStatus {
    fn from(e: ErrorResponse) -> Self {
        Self { code: e.code, reason: e.reason, message: e.message }
    }
}

impl From<&ErrorResponse> for ApiStatus {
    fn from(e: &ErrorResponse) -> Self {
        Self { code: e.code, reason: e.reason.clone(), message: e.message.clone() }
    }
}

/// Split a kube error into a server status or leave it as a transport failure.
pub fn split_kube_error(err: kube::Error) -> Result<ApiStatus, kube::Error> {
    match err {
        kube::Error::Api(ae) => Ok(ae.into()),
        other => Err(other),
    }
}

/// The manifest could not be parsed or lacks its identity fields.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("manifest is empty")]
    Empty,
    #[error("manifest too large ({size} bytes > {max})")]
    TooLarge { size: usize, max: usize },
    #[error("manifest too complex (>{max} nodes)")]
    TooComplex { max: usize },
    #[error("parsing manifest: {0}")]
    Syntax(#[from] serde_yaml::Error),
    #[error("converting manifest: {0}")]
    Convert(#[from] serde_json::Error),
    #[error("manifest is not a mapping")]
    NotAMapping,
    #[error("manifest missing {0}")]
    MissingField(&'static str),
    #[error("invalid apiVersion {0:?}")]
    InvalidApiVersion(String),
    #[error("invalid gvk key {0:?} (expect v1/Kind or group/v1/Kind)")]
    InvalidGvkKey(String),
}

/// Result of looking up a manifest's kind in the registry.
///
/// `Missing` and `Unrecognized` are both NotFound-class.
#[derive(Debug, Error)]
pub enum KindLookupError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("manifest has no kind")]
    Missing,
    #[error("kind {0:?} is not recognized")]
    Unrecognized(String),
}

impl KindLookupError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Missing | Self::Unrecognized(_))
    }
}

/// Discovery could not produce a mapping.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("resource type {0} is not served by the cluster")]
    NotServed(String),
    #[error("discovery request failed: {0}")]
    Unreachable(#[source] kube::Error),
    #[error("discovery timed out after {0:?}")]
    Timeout(Duration),
    #[error("inconsistent discovery data for {gvk}: {reason}")]
    Inconsistent { gvk: String, reason: String },
}

impl DiscoveryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotServed(_))
    }
}

/// A handle could not be bound for the mapping's scope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("{kind} {name:?} is namespaced but no namespace was given")]
    NamespaceRequired { kind: String, name: String },
    #[error("{0} spans all namespaces and cannot address a single object")]
    NotAddressable(String),
}

/// The server rejected a server-side apply, or it never completed.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("manifest has no metadata.name")]
    MissingName,
    #[error("encoding apply body: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error("server rejected apply: {0}")]
    Rejected(ApiStatus),
    #[error("apply request failed: {0}")]
    Transport(#[source] kube::Error),
    #[error("apply timed out after {0:?}")]
    Timeout(Duration),
}

impl ApplyError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Rejected(s) if s.is_conflict())
    }
}

impl From<kube::Error> for ApplyError {
    fn from(err: kube::Error) -> Self {
        match split_kube_error(err) {
            Ok(status) => Self::Rejected(status),
            Err(e) => Self::Transport(e),
        }
    }
}

/// Delete failed. A missing object is reported as `NotFound`, never as a transport error.
#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("{name:?} not found")]
    NotFound { name: String },
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error("server rejected delete: {0}")]
    Rejected(ApiStatus),
    #[error("delete request failed: {0}")]
    Transport(#[source] kube::Error),
    #[error("delete timed out after {0:?}")]
    Timeout(Duration),
}

impl DeleteError {
    pub fn from_kube(err: kube::Error, name: &str) -> Self {
        match split_kube_error(err) {
            Ok(status) if status.is_not_found() => Self::NotFound { name: name.to_string() },
            Ok(status) => Self::Rejected(status),
            Err(e) => Self::Transport(e),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Get or list failed.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("{name:?} not found")]
    NotFound { name: String },
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error("server rejected read: {0}")]
    Rejected(ApiStatus),
    #[error("read request failed: {0}")]
    Transport(#[source] kube::Error),
    #[error("read timed out after {0:?}")]
    Timeout(Duration),
}

impl ReadError {
    pub fn from_kube(err: kube::Error, name: &str) -> Self {
        match split_kube_error(err) {
            Ok(status) if status.is_not_found() => Self::NotFound { name: name.to_string() },
            Ok(status) => Self::Rejected(status),
            Err(e) => Self::Transport(e),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// A watch could not be opened, or ended abnormally.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("server rejected watch: {0}")]
    Rejected(ApiStatus),
    #[error("watch request failed: {0}")]
    Transport(#[source] kube::Error),
    #[error("watch ended by server: {0}")]
    Server(ApiStatus),
    #[error("watch stream failed: {0}")]
    Stream(#[source] kube::Error),
    #[error("opening watch timed out after {0:?}")]
    Timeout(Duration),
}

impl WatchError {
    /// Error while opening the subscription.
    pub fn opening(err: kube::Error) -> Self {
        match split_kube_error(err) {
            Ok(status) => Self::Rejected(status),
            Err(e) => Self::Transport(e),
        }
    }

    /// 410 Gone: the requested resource version is too old.
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Server(s) if s.code == 410)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        let resp: ErrorResponse = serde_json::from_value(serde_json::json!({
            "status": "Failure",
            "message": format!("synthetic {reason}"),
            "reason": reason,
            "code": code,
        }))
        .unwrap();
        kube::Error::Api(resp)
    }

    #[test]
    fn delete_not_found_is_distinct_from_rejection() {
        let e = DeleteError::from_kube(api_err(404, "NotFound"), "web");
        assert!(e.is_not_found());
        assert!(matches!(e, DeleteError::NotFound { ref name } if name == "web"));

        let e = DeleteError::from_kube(api_err(403, "Forbidden"), "web");
        assert!(!e.is_not_found());
        assert!(matches!(e, DeleteError::Rejected(ref s) if s.code == 403));
    }

    #[test]
    fn apply_conflict_is_detected() {
        let e = ApplyError::from(api_err(409, "Conflict"));
        assert!(e.is_conflict());
        let e = ApplyError::from(api_err(422, "Invalid"));
        assert!(!e.is_conflict());
        assert!(e.to_string().contains("422 Invalid"), "{e}");
    }

    #[test]
    fn kind_lookup_not_found_class() {
        assert!(KindLookupError::Missing.is_not_found());
        assert!(KindLookupError::Unrecognized("Frobnicator".into()).is_not_found());
        assert!(!KindLookupError::Decode(DecodeError::Empty).is_not_found());
    }

    #[test]
    fn watch_gone_is_expired() {
        let status = ApiStatus { code: 410, reason: "Expired".into(), message: "too old resource version".into() };
        assert!(WatchError::Server(status).is_expired());
        assert!(!WatchError::opening(api_err(403, "Forbidden")).is_expired());
    }
}
