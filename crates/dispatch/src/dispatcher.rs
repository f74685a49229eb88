//! The dispatch loop: one event at a time, until the stream ends or fails.

use std::ops::ControlFlow;

use futures::{Stream, StreamExt};
use kubedyn_core::{ChangeEvent, EventType, WatchError};
use metrics::counter;
use tracing::{debug, warn};

use crate::views::{decode_view, type_tag, ResourceView};

/// A change event whose payload was decoded into its concrete representation.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedEvent {
    pub event_type: EventType,
    pub view: ResourceView,
}

/// Receives decoded events. Return `ControlFlow::Break` to stop the loop.
pub trait EventHandler: Send {
    fn handle(&mut self, event: DispatchedEvent) -> ControlFlow<()>;
}

impl<F> EventHandler for F
where
    F: FnMut(DispatchedEvent) -> ControlFlow<()> + Send,
{
    fn handle(&mut self, event: DispatchedEvent) -> ControlFlow<()> {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events taken off the stream.
    pub received: u64,
    /// Events passed to the handler.
    pub handled: u64,
    /// Events whose tag has no concrete representation.
    pub ignored: u64,
    /// Events of a handled tag whose payload did not decode.
    pub undecodable: u64,
}

/// How a dispatch loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The stream ended.
    Closed(DispatchStats),
    /// The handler asked to stop.
    Stopped(DispatchStats),
}

impl DispatchOutcome {
    pub fn stats(&self) -> DispatchStats {
        match self {
            Self::Closed(s) | Self::Stopped(s) => *s,
        }
    }
}

enum Decoded {
    View(ResourceView),
    Ignored,
    Undecodable,
}

fn decode_event(ev: &ChangeEvent) -> Decoded {
    let payload = match ev.payload() {
        Some(Ok(p)) => p,
        Some(Err(e)) => {
            warn!(error = %e, "event payload could not be serialized");
            return Decoded::Undecodable;
        }
        None => return Decoded::Ignored,
    };
    let tag = match type_tag(&payload) {
        Ok(Some(tag)) => tag,
        Ok(None) => {
            debug!("event payload without kind tag");
            return Decoded::Ignored;
        }
        Err(e) => {
            warn!(error = %e, "event kind tag is malformed");
            return Decoded::Undecodable;
        }
    };
    match decode_view(&tag, payload) {
        Ok(Some(view)) => Decoded::View(view),
        Ok(None) => {
            debug!(kind = %tag, "no handling for kind");
            Decoded::Ignored
        }
        Err(e) => {
            warn!(kind = %tag, error = %e, "payload does not match its kind");
            Decoded::Undecodable
        }
    }
}

/// Consume `stream`, decoding and handing each event to `handler` in arrival order.
///
/// Ends with `Closed` when the stream ends and `Stopped` when the handler breaks.
/// A server `Error` event ends the loop as `WatchError::Server`; a stream failure as
/// the error the stream produced. Unhandled kinds and undecodable payloads are skipped.
pub async fn dispatch<S, H>(stream: S, handler: &mut H) -> Result<DispatchOutcome, WatchError>
where
    S: Stream<Item = Result<ChangeEvent, WatchError>> + Unpin,
    H: EventHandler + ?Sized,
{
    let mut stats = DispatchStats::default();
    dispatch_into(stream, handler, &mut stats).await
}

/// Like [`dispatch`], counting into `stats` so the tally survives a failed session.
pub async fn dispatch_into<S, H>(
    mut stream: S,
    handler: &mut H,
    stats: &mut DispatchStats,
) -> Result<DispatchOutcome, WatchError>
where
    S: Stream<Item = Result<ChangeEvent, WatchError>> + Unpin,
    H: EventHandler + ?Sized,
{
    while let Some(item) = stream.next().await {
        let ev = match item {
            Ok(ev) => ev,
            Err(e) => {
                debug!(?stats, error = %e, "watch stream failed");
                return Err(e);
            }
        };
        if let ChangeEvent::Error(status) = ev {
            warn!(code = status.code, reason = %status.reason, "watch ended by server status");
            return Err(WatchError::Server(status));
        }
        stats.received += 1;
        counter!("dispatch_events", 1u64);
        match decode_event(&ev) {
            Decoded::View(view) => {
                stats.handled += 1;
                let event = DispatchedEvent { event_type: ev.event_type(), view };
                if handler.handle(event).is_break() {
                    debug!(?stats, "dispatch stopped by handler");
                    return Ok(DispatchOutcome::Stopped(*stats));
                }
            }
            Decoded::Ignored => {
                stats.ignored += 1;
                counter!("dispatch_unhandled", 1u64);
            }
            Decoded::Undecodable => {
                stats.undecodable += 1;
                counter!("dispatch_decode_err", 1u64);
            }
        }
    }
    debug!(?stats, "watch stream closed");
    Ok(DispatchOutcome::Closed(*stats))
}
