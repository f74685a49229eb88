use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use kubedyn_core::{ChangeEvent, WatchError};
use kubedyn_kubehub::EventStream;
use tracing::debug;

/// Change notifications of one watch subscription, bookmarks removed.
///
/// Ends when the server closes the watch or the caller calls [`close`](Self::close).
/// Server status events arrive as `ChangeEvent::Error`; transport failures as
/// `WatchError::Stream`.
pub struct ChangeEventStream {
    inner: Option<EventStream>,
}

impl ChangeEventStream {
    pub fn new(inner: EventStream) -> Self {
        Self { inner: Some(inner) }
    }

    /// Release the subscription. Later polls yield `None`.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            debug!("watch closed by caller");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl Stream for ChangeEventStream {
    type Item = Result<ChangeEvent, WatchError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };
            match inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    this.inner = None;
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(WatchError::Stream(e)))),
                Poll::Ready(Some(Ok(ev))) => {
                    if let Some(ce) = ChangeEvent::from_watch_event(ev) {
                        return Poll::Ready(Some(Ok(ce)));
                    }
                }
            }
        }
    }
}
