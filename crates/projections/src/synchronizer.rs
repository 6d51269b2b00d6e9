//! Live subscription keeping a [`ViewCache`] in step with the event feed.
//!
//! Lifecycle: `Connecting → Resyncing → Live`, back to `Connecting` when the
//! feed closes, back to `Resyncing` when events were dropped, and finally
//! `Disposed`. The feed is connected before resynchronizing, so no event
//! committed after the snapshot can be missed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use domain::DomainEvent;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::{SnapshotSource, ViewCache};
use crate::error::{ProjectionError, Result};
use crate::tags::Scope;

/// A live stream of events. Ends when the connection closes.
pub type EventStream = BoxStream<'static, Result<DomainEvent>>;

/// Source of live events, e.g. a WebSocket or an in-process broadcaster.
#[async_trait]
pub trait EventFeed: Send + Sync {
    async fn connect(&self, scope: Scope) -> Result<EventStream>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Resyncing,
    Live,
    Disposed,
}

/// Reconnect pacing.
#[derive(Debug, Clone)]
pub struct SubscriptionOptions {
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl SubscriptionOptions {
    fn backoff(&self, attempt: u32) -> Duration {
        self.reconnect_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
            .min(self.max_reconnect_delay)
    }
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(250),
            max_reconnect_delay: Duration::from_secs(10),
        }
    }
}

/// A running cache subscription. Disposing or dropping it stops the task.
pub struct ViewSubscription {
    state: watch::Receiver<SubscriptionState>,
    shutdown: watch::Sender<bool>,
    resyncs: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl ViewSubscription {
    /// Spawns the subscription task. Must be called inside a tokio runtime.
    pub fn connect<F, S>(
        cache: ViewCache,
        feed: Arc<F>,
        source: Arc<S>,
        scope: Scope,
        options: SubscriptionOptions,
    ) -> Self
    where
        F: EventFeed + ?Sized + 'static,
        S: SnapshotSource + ?Sized + 'static,
    {
        let (state_tx, state) = watch::channel(SubscriptionState::Connecting);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let resyncs = Arc::new(AtomicU64::new(0));
        let reconnects = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            cache,
            feed,
            source,
            scope,
            options,
            state: state_tx,
            shutdown: shutdown_rx,
            resyncs: Arc::clone(&resyncs),
            reconnects: Arc::clone(&reconnects),
        };
        let handle = tokio::spawn(worker.run());

        Self {
            state,
            shutdown,
            resyncs,
            reconnects,
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Waits until the subscription reaches `target`.
    pub async fn wait_for(&mut self, target: SubscriptionState) -> Result<()> {
        self.state
            .wait_for(|s| *s == target || *s == SubscriptionState::Disposed)
            .await
            .map_err(|_| ProjectionError::Disposed)
            .and_then(|s| {
                if *s == target {
                    Ok(())
                } else {
                    Err(ProjectionError::Disposed)
                }
            })
    }

    /// Full resynchronizations performed so far.
    pub fn resyncs(&self) -> u64 {
        self.resyncs.load(Ordering::Relaxed)
    }

    /// Times the feed was reconnected after closing.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Stops the task and waits for it to finish.
    pub async fn dispose(mut self) {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "subscription task failed");
        }
    }
}

impl Drop for ViewSubscription {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

struct Worker<F: ?Sized, S: ?Sized> {
    cache: ViewCache,
    feed: Arc<F>,
    source: Arc<S>,
    scope: Scope,
    options: SubscriptionOptions,
    state: watch::Sender<SubscriptionState>,
    shutdown: watch::Receiver<bool>,
    resyncs: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
}

/// Why the live loop stopped.
enum Interrupt {
    Shutdown,
    Lagged,
    Closed,
}

impl<F, S> Worker<F, S>
where
    F: EventFeed + ?Sized,
    S: SnapshotSource + ?Sized,
{
    async fn run(mut self) {
        let mut attempt = 0u32;
        'connect: loop {
            if self.stopping() {
                break;
            }
            self.state.send_replace(SubscriptionState::Connecting);

            let connected = tokio::select! {
                _ = self.shutdown.changed() => break,
                connected = self.feed.connect(self.scope) => connected,
            };
            let mut stream = match connected {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(scope = ?self.scope, error = %e, "event feed connect failed");
                    if !self.pause(attempt).await {
                        break;
                    }
                    attempt += 1;
                    continue;
                }
            };

            loop {
                if !self.resync().await {
                    if !self.pause(attempt).await {
                        break 'connect;
                    }
                    attempt += 1;
                    continue 'connect;
                }
                attempt = 0;
                self.state.send_replace(SubscriptionState::Live);

                match self.consume(&mut stream).await {
                    Interrupt::Shutdown => break 'connect,
                    Interrupt::Lagged => continue,
                    Interrupt::Closed => break,
                }
            }

            self.reconnects.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("view_subscription_reconnects_total").increment(1);
            if !self.pause(attempt).await {
                break;
            }
        }

        self.state.send_replace(SubscriptionState::Disposed);
        tracing::debug!(scope = ?self.scope, "view subscription disposed");
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn resync(&mut self) -> bool {
        self.state.send_replace(SubscriptionState::Resyncing);
        match self.cache.resync(self.scope, self.source.as_ref()).await {
            Ok(_) => {
                self.resyncs.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                tracing::warn!(scope = ?self.scope, error = %e, "view cache resync failed");
                false
            }
        }
    }

    async fn consume(&mut self, stream: &mut EventStream) -> Interrupt {
        loop {
            let item = tokio::select! {
                _ = self.shutdown.changed() => return Interrupt::Shutdown,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(event)) => {
                    if self.scope.matches(&event) {
                        self.cache.apply(&event).await;
                    }
                }
                Some(Err(ProjectionError::Lagged { missed })) => {
                    tracing::warn!(scope = ?self.scope, missed, "event feed lagged, resynchronizing");
                    return Interrupt::Lagged;
                }
                Some(Err(e)) => {
                    tracing::warn!(scope = ?self.scope, error = %e, "event feed failed");
                    return Interrupt::Closed;
                }
                None => {
                    tracing::debug!(scope = ?self.scope, "event feed closed");
                    return Interrupt::Closed;
                }
            }
        }
    }

    /// Sleeps before the next attempt. Returns false if shut down meanwhile.
    async fn pause(&mut self, attempt: u32) -> bool {
        let delay = self.options.backoff(attempt);
        tokio::select! {
            _ = self.shutdown.changed() => false,
            _ = tokio::time::sleep(delay) => !self.stopping(),
        }
    }
}
