//! Reconnecting supervisor around watch + dispatch.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use futures::Stream;
use kubedyn_core::{ChangeEvent, ResourceHandle, WatchError};
use kubedyn_kubehub::{ClusterContext, WatchOptions};
use metrics::counter;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::dispatcher::{dispatch_into, DispatchOutcome, DispatchStats, EventHandler};

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failed attempts before giving up; `None` retries forever.
    pub max_retries: Option<usize>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { min_delay: Duration::from_millis(500), max_delay: Duration::from_secs(30), max_retries: None }
    }
}

impl SupervisorConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let max_delay = std::env::var("KUBEDYN_WATCH_BACKOFF_MAX_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(d.max_delay);
        Self { max_delay, ..d }
    }

    fn builder(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay.max(self.min_delay))
            .with_factor(2.0)
            .with_jitter()
            .with_max_times(self.max_retries.unwrap_or(usize::MAX))
    }
}

/// Why a supervisor returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    Cancelled,
    /// The handler asked to stop.
    Stopped,
    /// Retries ran out after streams that closed without an error.
    Exhausted,
}

/// Stops a running supervisor. Dropping the handle stops it too.
pub struct CancelHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl CancelHandle {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn cancel(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Errors worth another attempt. Permission and not-found rejections are final.
pub fn is_retryable(err: &WatchError) -> bool {
    match err {
        WatchError::Rejected(s) => s.code >= 500 || s.code == 429,
        WatchError::Transport(_) | WatchError::Stream(_) | WatchError::Server(_) | WatchError::Timeout(_) => true,
    }
}

/// Open and dispatch repeatedly until cancelled, stopped, or out of retries.
///
/// A session that delivered events resets the backoff, however it ended. Non-retryable errors are
/// returned at once; after the last retry the last error is returned.
pub async fn supervise<O, Fut, S, H>(
    mut open: O,
    handler: &mut H,
    cfg: &SupervisorConfig,
    mut cancel: oneshot::Receiver<()>,
) -> Result<SupervisorExit, WatchError>
where
    O: FnMut() -> Fut,
    Fut: Future<Output = Result<S, WatchError>>,
    S: Stream<Item = Result<ChangeEvent, WatchError>> + Unpin,
    H: EventHandler + ?Sized,
{
    let builder = cfg.builder();
    let mut backoff = builder.clone().build();
    let mut attempt = 0u64;
    loop {
        attempt += 1;
        let opened = tokio::select! {
            _ = &mut cancel => return Ok(SupervisorExit::Cancelled),
            res = open() => res,
        };
        let failure = match opened {
            Err(e) if !is_retryable(&e) => return Err(e),
            Err(e) => Some(e),
            Ok(stream) => {
                let mut stats = DispatchStats::default();
                let res = tokio::select! {
                    _ = &mut cancel => return Ok(SupervisorExit::Cancelled),
                    res = dispatch_into(stream, handler, &mut stats) => res,
                };
                if stats.received > 0 {
                    backoff = builder.clone().build();
                }
                match res {
                    Ok(DispatchOutcome::Stopped(_)) => return Ok(SupervisorExit::Stopped),
                    Ok(DispatchOutcome::Closed(_)) => None,
                    Err(e) if !is_retryable(&e) => return Err(e),
                    Err(e) => {
                        if e.is_expired() {
                            // resource version gone; next open starts from scratch
                            backoff = builder.clone().build();
                        }
                        Some(e)
                    }
                }
            }
        };

        let Some(delay) = backoff.next() else {
            warn!(attempt, "watch retries exhausted");
            return match failure {
                Some(e) => Err(e),
                None => Ok(SupervisorExit::Exhausted),
            };
        };
        counter!("watch_reconnects", 1u64);
        match &failure {
            Some(e) => warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "watch failed, reconnecting"),
            None => info!(attempt, delay_ms = delay.as_millis() as u64, "watch closed, reconnecting"),
        }
        tokio::select! {
            _ = &mut cancel => return Ok(SupervisorExit::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// A supervisor running on its own task.
pub struct SupervisorHandle {
    pub cancel: CancelHandle,
    pub join: JoinHandle<Result<SupervisorExit, WatchError>>,
}

impl SupervisorHandle {
    /// Cancel and wait for the task. `None` if the task panicked.
    pub async fn shutdown(self) -> Option<Result<SupervisorExit, WatchError>> {
        self.cancel.cancel();
        self.join.await.ok()
    }
}

/// Watch `handle` through the operator with reconnects, dispatching into `handler`.
pub fn spawn_supervised<H>(
    ctx: Arc<ClusterContext>,
    handle: ResourceHandle,
    opts: WatchOptions,
    cfg: SupervisorConfig,
    mut handler: H,
) -> SupervisorHandle
where
    H: EventHandler + 'static,
{
    let (cancel, rx) = CancelHandle::new();
    let join = tokio::spawn(async move {
        info!(target_ref = %handle, "supervised watch starting");
        let open = || {
            let ctx = ctx.clone();
            let handle = handle.clone();
            let opts = opts.clone();
            async move { kubedyn_apply::watch(&ctx, &handle, &opts).await }
        };
        supervise(open, &mut handler, &cfg, rx).await
    });
    SupervisorHandle { cancel, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubedyn_core::ApiStatus;

    #[test]
    fn retry_classification() {
        let status = |code| ApiStatus { code, reason: "r".into(), message: "m".into() };
        assert!(!is_retryable(&WatchError::Rejected(status(403))));
        assert!(!is_retryable(&WatchError::Rejected(status(404))));
        assert!(is_retryable(&WatchError::Rejected(status(503))));
        assert!(is_retryable(&WatchError::Rejected(status(429))));
        assert!(is_retryable(&WatchError::Server(status(410))));
        assert!(is_retryable(&WatchError::Timeout(Duration::from_secs(1))));
    }

    #[test]
    fn env_overrides_max_delay() {
        std::env::set_var("KUBEDYN_WATCH_BACKOFF_MAX_SECS", "7");
        assert_eq!(SupervisorConfig::from_env().max_delay, Duration::from_secs(7));
        std::env::set_var("KUBEDYN_WATCH_BACKOFF_MAX_SECS", "0");
        assert_eq!(SupervisorConfig::from_env().max_delay, Duration::from_secs(30));
        std::env::remove_var("KUBEDYN_WATCH_BACKOFF_MAX_SECS");
    }

    #[test]
    fn bounded_backoff_runs_out() {
        let cfg = SupervisorConfig { max_retries: Some(3), ..Default::default() };
        assert_eq!(cfg.builder().build().count(), 3);
    }
}
