//! Long-running watch reconnection and bounded retry of idempotent
//! actions. Both utilities honor a message-passing cancellation token:
//! no shared flags, the stop signal travels over a channel.

#![forbid(unsafe_code)]

use std::future::Future;
use std::time::Duration;

use anyhow::{Error, Result};
use metrics::counter;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Backoff between watch reopen attempts.
const WATCH_BACKOFF: Duration = Duration::from_secs(1);

fn queue_cap() -> usize {
    std::env::var("RUDDER_WATCH_QUEUE_CAP")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1024)
}

/// Cancels the paired [`CancelToken`]s. Safe to call any number of times;
/// dropping the handle without calling [`cancel`](Self::cancel) also
/// cancels.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observer side of a cancellation signal. Cheap to clone.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the paired handle cancels (or is dropped).
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// One item of a retried watch stream: an upstream event or the error
/// that interrupted it.
#[derive(Debug)]
pub enum WatchItem<E> {
    Event(E),
    Error(Error),
}

/// Produce a bounded channel of watch items from an `open_watch` factory,
/// reopening the upstream whenever it fails or closes.
///
/// Exactly one upstream is active at a time and the previous one is
/// closed before another is opened. Factory errors surface as
/// [`WatchItem::Error`] followed by a backoff; upstream closes are
/// transient and reopen after the same backoff. Cancellation stops the
/// loop and closes the output channel; nothing is emitted after close.
pub fn watch_with_retry<E, F, Fut>(mut open_watch: F, mut token: CancelToken) -> mpsc::Receiver<WatchItem<E>>
where
    E: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<mpsc::Receiver<E>>> + Send,
{
    let (tx, rx) = mpsc::channel(queue_cap());
    tokio::spawn(async move {
        loop {
            if token.is_cancelled() {
                break;
            }
            let opened = tokio::select! {
                _ = token.cancelled() => break,
                res = open_watch() => res,
            };
            let mut upstream = match opened {
                Ok(w) => w,
                Err(e) => {
                    warn!(error = %e, "opening watch failed; backing off");
                    counter!("watch_errors_total", 1u64);
                    if tx.send(WatchItem::Error(e)).await.is_err() {
                        break;
                    }
                    if sleep_or_cancelled(&mut token).await {
                        break;
                    }
                    continue;
                }
            };
            info!("watch stream opened");
            let cancelled = loop {
                tokio::select! {
                    _ = token.cancelled() => break true,
                    ev = upstream.recv() => match ev {
                        Some(e) => {
                            if tx.send(WatchItem::Event(e)).await.is_err() {
                                break true;
                            }
                        }
                        // upstream close is transient
                        None => break false,
                    }
                }
            };
            drop(upstream);
            if cancelled {
                break;
            }
            debug!("watch stream ended; reopening after backoff");
            counter!("watch_restarts_total", 1u64);
            if sleep_or_cancelled(&mut token).await {
                break;
            }
        }
        debug!("watch loop stopped");
    });
    rx
}

// True when cancellation arrived during the backoff.
async fn sleep_or_cancelled(token: &mut CancelToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(WATCH_BACKOFF) => false,
    }
}

/// Invoke `action` until it succeeds or the token cancels, sleeping
/// `interval` between failed attempts. Always attempts at least once;
/// never attempts again after cancellation is observed. The action's
/// error is advisory and goes to the log only.
pub async fn retry_until_succeed<F, Fut>(
    mut action: F,
    desc: &str,
    mut token: CancelToken,
    interval: Duration,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        debug!(action = desc, "starting attempt");
        match action().await {
            Ok(()) => {
                debug!(action = desc, "completed");
                return;
            }
            Err(e) => {
                if token.is_cancelled() {
                    debug!(action = desc, "canceled; not retrying");
                    return;
                }
                debug!(action = desc, error = %e, interval_ms = interval.as_millis() as u64, "attempt failed; will retry");
            }
        }
        tokio::select! {
            _ = token.cancelled() => {
                debug!(action = desc, "canceled during backoff");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
