//! Deferred invalidation queue and worker
//!
//! Async invalidation and refresh requests are enqueued as
//! [`InvalidationEvent`]s and drained by an [`InvalidationWorker`], which
//! translates each event back into the engine's synchronous counterpart.
//! Handlers never dispatch further events, so a dispatched event can never
//! loop. Delivery is at-least-once; every handler action is idempotent
//! (deletes delete, refreshes overwrite).
//!
//! A worker does not care where its events come from: the in-process queue
//! half of [`invalidation_channel`], or an external bus feeding
//! [`InvalidationWorker::from_receiver`] (e.g. a Redis pub/sub subscription
//! decoding events from their wire form).

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use swr_cache_core::{
    CacheMetrics, InvalidateMode, InvalidationEvent, Loader, RefreshMode, StoreAdapter,
};

use super::CacheEngine;

/// Producer half: non-blocking dispatch into the worker queue
#[derive(Debug, Clone)]
pub struct InvalidationQueue {
    tx: mpsc::UnboundedSender<InvalidationEvent>,
}

impl InvalidationQueue {
    /// Enqueue an event and return immediately
    pub fn dispatch(&self, event: InvalidationEvent) {
        if self.tx.send(event).is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!(target: "swr_cache", "invalidation worker is gone; event dropped");
        }
    }
}

/// Consumer half: drains events against one engine
pub struct InvalidationWorker {
    rx: mpsc::UnboundedReceiver<InvalidationEvent>,
    refreshing: Arc<DashMap<String, ()>>,
}

/// Create a connected queue/worker pair
pub fn invalidation_channel() -> (InvalidationQueue, InvalidationWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InvalidationQueue { tx }, InvalidationWorker::from_receiver(rx))
}

impl InvalidationWorker {
    /// Wrap any event source, such as a store's pub/sub subscription
    pub fn from_receiver(rx: mpsc::UnboundedReceiver<InvalidationEvent>) -> Self {
        Self {
            rx,
            refreshing: Arc::new(DashMap::new()),
        }
    }

    /// Drain events until the sending side is dropped
    ///
    /// Each event runs through the engine's synchronous path. Errors are
    /// logged and swallowed; rethrowing would tear down the worker over a
    /// single bad key.
    pub async fn run<B, L, M>(mut self, engine: CacheEngine<B, L, M>)
    where
        B: StoreAdapter,
        L: Loader,
        L::Value: Serialize + DeserializeOwned + Send + Sync + 'static,
        M: CacheMetrics,
    {
        while let Some(event) = self.rx.recv().await {
            self.handle(&engine, event).await;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(target: "swr_cache", "invalidation queue closed; worker exiting");
    }

    async fn handle<B, L, M>(&self, engine: &CacheEngine<B, L, M>, event: InvalidationEvent)
    where
        B: StoreAdapter,
        L: Loader,
        L::Value: Serialize + DeserializeOwned + Send + Sync + 'static,
        M: CacheMetrics,
    {
        match event {
            InvalidationEvent::DeleteExact(key) => {
                if let Err(_e) = engine.invalidate_exact(&key, InvalidateMode::DeleteSync).await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        target: "swr_cache",
                        key = %key,
                        error = %_e,
                        "deferred exact invalidation failed"
                    );
                }
            }
            InvalidationEvent::DeletePrefix(prefix) => {
                if let Err(_e) = engine.bump_namespace(&prefix).await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        target: "swr_cache",
                        prefix = %prefix,
                        error = %_e,
                        "deferred prefix invalidation failed"
                    );
                }
            }
            InvalidationEvent::Refresh(key) => {
                // collapse bursts of refresh events for the same key
                let key_string = key.to_string();
                let claimed = match self.refreshing.entry(key_string.clone()) {
                    dashmap::mapref::entry::Entry::Vacant(vacant) => {
                        vacant.insert(());
                        true
                    }
                    dashmap::mapref::entry::Entry::Occupied(_) => false,
                };
                if !claimed {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        target: "swr_cache",
                        key = %key,
                        "refresh already in flight; event collapsed"
                    );
                    return;
                }

                let engine = engine.clone();
                let refreshing = Arc::clone(&self.refreshing);
                tokio::spawn(async move {
                    if let Err(_e) = engine.refresh(&key, RefreshMode::Sync).await {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            target: "swr_cache",
                            key = %key,
                            error = %_e,
                            "deferred refresh failed"
                        );
                    }
                    refreshing.remove(&key_string);
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swr_cache_core::{Key, KeyPrefix};

    #[tokio::test]
    async fn test_channel_pair_is_connected() {
        let (queue, mut worker) = invalidation_channel();
        let key = Key::simple("d", "f", "1").unwrap();

        queue.dispatch(InvalidationEvent::DeleteExact(key.clone()));
        let received = worker.rx.recv().await.unwrap();
        assert_eq!(received, InvalidationEvent::DeleteExact(key));
    }

    #[tokio::test]
    async fn test_worker_accepts_external_receivers() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut worker = InvalidationWorker::from_receiver(rx);

        let prefix = KeyPrefix::new("user", "profile", None, None).unwrap();
        tx.send(InvalidationEvent::DeletePrefix(prefix.clone())).unwrap();

        let received = worker.rx.recv().await.unwrap();
        assert_eq!(received, InvalidationEvent::DeletePrefix(prefix));
    }

    #[test]
    fn test_dispatch_without_worker_does_not_panic() {
        let (queue, worker) = invalidation_channel();
        drop(worker);
        queue.dispatch(InvalidationEvent::DeleteExact(
            Key::simple("d", "f", "1").unwrap(),
        ));
    }
}
