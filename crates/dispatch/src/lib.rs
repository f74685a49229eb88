//! kubedyn dispatch: kind-tagged decoding of watch events.
//!
//! [`dispatch`] drains one change-event stream, reads each payload's `kind` tag and
//! decodes the handled kinds into typed [`ResourceView`]s for an [`EventHandler`].
//! [`supervise`] and [`spawn_supervised`] add reconnects with exponential backoff
//! on top of the operator's non-reconnecting watch.

#![forbid(unsafe_code)]

pub mod dispatcher;
pub mod supervisor;
pub mod views;

pub use dispatcher::{dispatch, dispatch_into, DispatchOutcome, DispatchStats, DispatchedEvent, EventHandler};
pub use supervisor::{
    is_retryable, spawn_supervised, supervise, CancelHandle, SupervisorConfig, SupervisorExit, SupervisorHandle,
};
pub use views::{decode_view, handled_kinds, is_handled, type_tag, ResourceView, ViewSummary};
