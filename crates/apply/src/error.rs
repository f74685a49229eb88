use kubedyn_core::{ApplyError, DecodeError, DeleteError, DiscoveryError, ReadError, ScopeError, WatchError};
use thiserror::Error;

/// Any failure of the manifest-level helpers, from decoding to the final call.
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error("{kind} manifest has no metadata.name")]
    MissingName { kind: String },
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Delete(#[from] DeleteError),
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Watch(#[from] WatchError),
}

impl OperatorError {
    /// Unserved resource type or absent object.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Discovery(e) => e.is_not_found(),
            Self::Delete(e) => e.is_not_found(),
            Self::Read(e) => e.is_not_found(),
            _ => false,
        }
    }
}
