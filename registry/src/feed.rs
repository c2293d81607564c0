//! Catalog feed: the live, ordered view of the whole collection.
//!
//! The feed owns a subscription to the [`CatalogStore`] and republishes every
//! full snapshot through a `watch` channel, so readers always see either the
//! previous or the next complete list. If the store's stream ends or errors,
//! the feed re-subscribes with exponential backoff; errors never replace the
//! last good snapshot.
//!
//! Cancelling or dropping the feed aborts its task, which drops the store
//! stream and releases the listener.

use crate::metrics::RegistryMetrics;
use futures::StreamExt;
use gift_registry_core::catalog::{CatalogError, CatalogQuery, CatalogStore, CatalogStream};
use gift_registry_core::item::CatalogSnapshot;
use gift_registry_runtime::retry::{RetryPolicy, retry_with_backoff};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Live catalog subscription.
#[derive(Debug)]
pub struct CatalogFeed {
    latest: watch::Receiver<CatalogSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl CatalogFeed {
    /// Subscribe to `store` and wait for the initial snapshot.
    ///
    /// # Errors
    ///
    /// Returns the last [`CatalogError`] if no subscription could be opened
    /// within `retry`.
    pub async fn start(
        store: Arc<dyn CatalogStore>,
        query: CatalogQuery,
        retry: RetryPolicy,
    ) -> Result<Self, CatalogError> {
        let (stream, initial) = retry_with_backoff(&retry, "catalog_subscribe", || open(store.as_ref(), query)).await?;
        tracing::info!(
            collection = store.collection(),
            items = initial.len(),
            "Catalog feed started"
        );

        let (tx, latest) = watch::channel(initial);
        let task = tokio::spawn(run(store, query, retry, stream, tx));

        Ok(Self {
            latest,
            task: Some(task),
        })
    }

    /// Receiver of every snapshot published from now on.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CatalogSnapshot> {
        self.latest.clone()
    }

    /// Most recent complete snapshot.
    #[must_use]
    pub fn latest(&self) -> CatalogSnapshot {
        self.latest.borrow().clone()
    }

    /// Stop the feed and wait until the store listener is released.
    pub async fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            tracing::debug!("Catalog feed cancelled");
        }
    }
}

impl Drop for CatalogFeed {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Open a stream and take its first snapshot.
async fn open(
    store: &dyn CatalogStore,
    query: CatalogQuery,
) -> Result<(CatalogStream, CatalogSnapshot), CatalogError> {
    let mut stream = store.subscribe(query).await?;
    match stream.next().await {
        Some(Ok(snapshot)) => {
            RegistryMetrics::record_snapshot();
            Ok((stream, snapshot))
        },
        Some(Err(error)) => Err(error),
        None => Err(CatalogError::SubscriptionFailed {
            collection: store.collection().to_string(),
            reason: "stream ended before the first snapshot".to_string(),
        }),
    }
}

async fn run(
    store: Arc<dyn CatalogStore>,
    query: CatalogQuery,
    retry: RetryPolicy,
    mut stream: CatalogStream,
    tx: watch::Sender<CatalogSnapshot>,
) {
    loop {
        while let Some(next) = stream.next().await {
            match next {
                Ok(snapshot) => {
                    RegistryMetrics::record_snapshot();
                    tracing::trace!(items = snapshot.len(), "Catalog snapshot received");
                    tx.send_replace(snapshot);
                },
                Err(error) => {
                    tracing::warn!(error = %error, "Catalog stream failed");
                    break;
                },
            }
        }

        // Stream is over; drop it before opening the next one.
        drop(stream);
        stream = loop {
            RegistryMetrics::record_resubscribe();
            match retry_with_backoff(&retry, "catalog_resubscribe", || open(store.as_ref(), query)).await {
                Ok((reopened, snapshot)) => {
                    tx.send_replace(snapshot);
                    break reopened;
                },
                Err(error) => {
                    tracing::error!(error = %error, "Catalog feed could not re-subscribe, backing off");
                    tokio::time::sleep(retry.max_delay).await;
                },
            }
        };
        tracing::info!("Catalog feed re-subscribed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use gift_registry_core::item::{ClientId, GiftItem, ItemId, ReservationFields};
    use gift_registry_testing::{InMemoryCatalogStore, fixtures};
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build()
    }

    async fn next_change(rx: &mut watch::Receiver<CatalogSnapshot>) -> CatalogSnapshot {
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();
        rx.borrow_and_update().clone()
    }

    #[tokio::test]
    async fn start_delivers_initial_snapshot() {
        let store = InMemoryCatalogStore::with_items("gifts", fixtures::kitchen_items());
        let feed = CatalogFeed::start(Arc::new(store), CatalogQuery::by_order(), fast_retry())
            .await
            .unwrap();

        let latest = feed.latest();
        assert_eq!(latest.len(), 5);
        assert_eq!(latest.items()[0].id, ItemId::new("kettle"));
    }

    #[tokio::test]
    async fn empty_collection_starts_with_empty_snapshot() {
        let store = InMemoryCatalogStore::new("gifts");
        let feed = CatalogFeed::start(Arc::new(store), CatalogQuery::by_order(), fast_retry())
            .await
            .unwrap();

        assert!(feed.latest().is_empty());
    }

    #[tokio::test]
    async fn changes_from_other_clients_are_pushed() {
        let store = InMemoryCatalogStore::with_items("gifts", fixtures::kitchen_items());
        let feed = CatalogFeed::start(Arc::new(store.clone()), CatalogQuery::by_order(), fast_retry())
            .await
            .unwrap();
        let mut rx = feed.subscribe();

        store.write_reservation(
            &ItemId::new("plates"),
            &ReservationFields::claimed_by(ClientId::new("someone")),
        );

        let snapshot = next_change(&mut rx).await;
        assert!(snapshot.get(&ItemId::new("plates")).unwrap().reserved);
    }

    #[tokio::test]
    async fn resubscribes_after_disconnect() {
        let store = InMemoryCatalogStore::with_items("gifts", fixtures::kitchen_items());
        let feed = CatalogFeed::start(Arc::new(store.clone()), CatalogQuery::by_order(), fast_retry())
            .await
            .unwrap();
        let mut rx = feed.subscribe();

        store.fail_next_subscriptions(1);
        store.disconnect_subscribers();
        // The re-opened stream publishes the current list again.
        let _ = next_change(&mut rx).await;

        store.insert(GiftItem::new("lamp", "Lamp", 9));
        let snapshot = loop {
            let snapshot = next_change(&mut rx).await;
            if snapshot.len() == 6 {
                break snapshot;
            }
        };
        assert_eq!(snapshot.items()[5].id, ItemId::new("lamp"));
        assert_eq!(feed.latest().len(), 6);
    }

    #[tokio::test]
    async fn cancel_releases_the_listener() {
        let store = InMemoryCatalogStore::with_items("gifts", fixtures::kitchen_items());
        let feed = CatalogFeed::start(Arc::new(store.clone()), CatalogQuery::by_order(), fast_retry())
            .await
            .unwrap();
        assert_eq!(store.subscriber_count(), 1);

        feed.cancel().await;
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn start_fails_when_store_keeps_refusing() {
        let store = InMemoryCatalogStore::new("gifts");
        store.fail_next_subscriptions(10);

        let result = CatalogFeed::start(Arc::new(store), CatalogQuery::by_order(), fast_retry()).await;
        assert!(matches!(result, Err(CatalogError::SubscriptionFailed { .. })));
    }
}
