//! In-memory catalog store with optimistic concurrency control.
//!
//! Provides a fast, deterministic [`CatalogStore`] for tests and the console
//! client:
//! - Full ordered snapshots pushed to every subscriber after each change
//! - Per-record versions checked at commit time; stale attempts re-run the
//!   whole transaction body under a [`RetryPolicy`]
//! - Fault injection for transport errors, forced conflicts, interleaved
//!   writes from "another client" and dropped listeners

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a panicking test

use gift_registry_core::catalog::{
    CatalogError, CatalogQuery, CatalogStore, CatalogStream, Transaction, TransactionBody,
};
use gift_registry_core::item::{CatalogSnapshot, GiftItem, ItemId, ItemRef, ReservationFields};
use gift_registry_runtime::metrics::TransactionMetrics;
use gift_registry_runtime::retry::RetryPolicy;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;

/// A failure scripted into the next transaction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Another client writes `fields` to `id` after the body ran but before
    /// the attempt commits
    ConcurrentWrite {
        /// Record written by the other client
        id: ItemId,
        /// Fields it writes
        fields: ReservationFields,
    },
    /// The attempt fails validation without any data changing
    Conflict,
    /// The store cannot be reached; the transaction fails without retry
    Transport(String),
}

#[derive(Debug, Clone)]
struct Versioned {
    item: GiftItem,
    version: u64,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<ItemId, Versioned>,
    revision: u64,
    faults: VecDeque<Fault>,
    failing_subscriptions: usize,
    attempts: usize,
    commits: usize,
}

impl Inner {
    fn version_of(&self, id: &ItemId) -> u64 {
        self.records.get(id).map_or(0, |record| record.version)
    }

    /// Merge reservation fields, creating a reservation-only record when
    /// the id is unknown.
    fn merge(&mut self, id: &ItemId, fields: &ReservationFields) {
        self.revision += 1;
        let version = self.revision;
        match self.records.get_mut(id) {
            Some(record) => {
                record.item.apply(fields);
                record.version = version;
            },
            None => {
                self.records.insert(
                    id.clone(),
                    Versioned {
                        item: GiftItem::from_fields(id.clone(), fields),
                        version,
                    },
                );
            },
        }
    }

    fn snapshot(&self, query: CatalogQuery) -> CatalogSnapshot {
        let mut items: Vec<GiftItem> = self
            .records
            .values()
            .map(|record| record.item.clone())
            .collect();
        query.sort(&mut items);
        CatalogSnapshot::from_items(items)
    }
}

/// Transaction handle for one attempt.
struct InMemoryTransaction<'a> {
    collection: &'a str,
    inner: &'a RwLock<Inner>,
    reads: Vec<(ItemId, u64)>,
    writes: Vec<(ItemId, ReservationFields)>,
}

impl InMemoryTransaction<'_> {
    fn check_collection(&self, item: &ItemRef) -> Result<(), CatalogError> {
        if item.collection() == self.collection {
            Ok(())
        } else {
            Err(CatalogError::InvalidTransaction(format!(
                "{item} does not belong to collection '{}'",
                self.collection
            )))
        }
    }
}

impl Transaction for InMemoryTransaction<'_> {
    fn get(&mut self, item: &ItemRef) -> Result<Option<GiftItem>, CatalogError> {
        self.check_collection(item)?;
        if !self.writes.is_empty() {
            return Err(CatalogError::InvalidTransaction(
                "reads must happen before writes".to_string(),
            ));
        }

        let inner = self.inner.read().unwrap();
        let record = inner.records.get(item.id());
        self.reads
            .push((item.id().clone(), record.map_or(0, |record| record.version)));
        Ok(record.map(|record| record.item.clone()))
    }

    fn set(&mut self, item: &ItemRef, fields: ReservationFields) -> Result<(), CatalogError> {
        self.check_collection(item)?;
        self.writes.push((item.id().clone(), fields));
        Ok(())
    }
}

enum Wake {
    Changed,
    Closed,
    Disconnected,
}

enum AttemptOutcome {
    Committed,
    Stale,
}

/// In-memory catalog store for fast, deterministic testing.
///
/// Cloning is cheap; clones share the same records and subscribers, which is
/// how tests model several clients talking to one database.
///
/// # Example
///
/// ```
/// use gift_registry_core::catalog::{CatalogQuery, CatalogStore};
/// use gift_registry_core::item::GiftItem;
/// use gift_registry_testing::InMemoryCatalogStore;
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryCatalogStore::with_items("gifts", [GiftItem::new("vase", "Vase", 1)]);
///
/// let mut stream = store.subscribe(CatalogQuery::by_order()).await?;
/// let first = stream.next().await.transpose()?;
/// assert_eq!(first.map(|snapshot| snapshot.len()), Some(1));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryCatalogStore {
    collection: String,
    inner: Arc<RwLock<Inner>>,
    changes: Arc<watch::Sender<u64>>,
    disconnects: Arc<watch::Sender<u64>>,
    retry_policy: RetryPolicy,
    latency: Duration,
}

impl InMemoryCatalogStore {
    /// Create an empty store for `collection`.
    #[must_use]
    pub fn new(collection: impl Into<String>) -> Self {
        let (changes, _) = watch::channel(0);
        let (disconnects, _) = watch::channel(0);
        Self {
            collection: collection.into(),
            inner: Arc::new(RwLock::new(Inner::default())),
            changes: Arc::new(changes),
            disconnects: Arc::new(disconnects),
            retry_policy: RetryPolicy::default(),
            latency: Duration::ZERO,
        }
    }

    /// Create a store seeded with `items`.
    #[must_use]
    pub fn with_items(collection: impl Into<String>, items: impl IntoIterator<Item = GiftItem>) -> Self {
        let store = Self::new(collection);
        for item in items {
            store.insert(item);
        }
        store
    }

    /// Replace the transaction retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Delay every transaction attempt by `latency`, like a slow round trip.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Insert or replace a whole record, notifying subscribers.
    pub fn insert(&self, item: GiftItem) {
        {
            let mut inner = self.inner.write().unwrap();
            inner.revision += 1;
            let version = inner.revision;
            inner.records.insert(item.id.clone(), Versioned { item, version });
        }
        self.notify();
    }

    /// Delete a record, notifying subscribers. Returns the removed record.
    pub fn remove(&self, id: &ItemId) -> Option<GiftItem> {
        let removed = self.inner.write().unwrap().records.remove(id);
        if removed.is_some() {
            self.notify();
        }
        removed.map(|record| record.item)
    }

    /// Write reservation fields outside any transaction, as another client
    /// with direct access would.
    pub fn write_reservation(&self, id: &ItemId, fields: &ReservationFields) {
        self.inner.write().unwrap().merge(id, fields);
        self.notify();
    }

    /// Read one record.
    #[must_use]
    pub fn get(&self, id: &ItemId) -> Option<GiftItem> {
        self.inner
            .read()
            .unwrap()
            .records
            .get(id)
            .map(|record| record.item.clone())
    }

    /// Current records ordered by `order`.
    #[must_use]
    pub fn snapshot(&self) -> CatalogSnapshot {
        self.inner.read().unwrap().snapshot(CatalogQuery::by_order())
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().records.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Script a fault for an upcoming transaction attempt (FIFO).
    pub fn inject_fault(&self, fault: Fault) {
        self.inner.write().unwrap().faults.push_back(fault);
    }

    /// Make the next `count` calls to `subscribe` fail.
    pub fn fail_next_subscriptions(&self, count: usize) {
        self.inner.write().unwrap().failing_subscriptions += count;
    }

    /// End every open subscription stream with a transport error.
    pub fn disconnect_subscribers(&self) {
        self.disconnects.send_modify(|generation| *generation += 1);
    }

    /// Number of live subscription streams.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    /// Total transaction body executions so far.
    #[must_use]
    pub fn transaction_attempts(&self) -> usize {
        self.inner.read().unwrap().attempts
    }

    /// Total committed transactions so far.
    #[must_use]
    pub fn transaction_commits(&self) -> usize {
        self.inner.read().unwrap().commits
    }

    fn notify(&self) {
        self.changes.send_modify(|revision| *revision += 1);
    }

    /// Run the body once and try to commit its writes.
    fn attempt(&self, body: &mut TransactionBody) -> Result<AttemptOutcome, CatalogError> {
        let fault = {
            let mut inner = self.inner.write().unwrap();
            inner.attempts += 1;
            inner.faults.pop_front()
        };
        TransactionMetrics::record_attempt();

        if let Some(Fault::Transport(reason)) = &fault {
            return Err(CatalogError::Transport(reason.clone()));
        }

        let mut tx = InMemoryTransaction {
            collection: &self.collection,
            inner: &self.inner,
            reads: Vec::new(),
            writes: Vec::new(),
        };
        body(&mut tx)?;
        let InMemoryTransaction { reads, writes, .. } = tx;

        if let Some(Fault::ConcurrentWrite { id, fields }) = &fault {
            self.write_reservation(id, fields);
        }

        {
            let mut inner = self.inner.write().unwrap();
            let stale = matches!(fault, Some(Fault::Conflict))
                || reads
                    .iter()
                    .any(|(id, version)| inner.version_of(id) != *version);
            if stale {
                return Ok(AttemptOutcome::Stale);
            }

            for (id, fields) in &writes {
                inner.merge(id, fields);
            }
            inner.commits += 1;
        }

        if !writes.is_empty() {
            self.notify();
        }
        Ok(AttemptOutcome::Committed)
    }
}

impl CatalogStore for InMemoryCatalogStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn subscribe(
        &self,
        query: CatalogQuery,
    ) -> Pin<Box<dyn Future<Output = Result<CatalogStream, CatalogError>> + Send + '_>> {
        Box::pin(async move {
            {
                let mut inner = self.inner.write().unwrap();
                if inner.failing_subscriptions > 0 {
                    inner.failing_subscriptions -= 1;
                    return Err(CatalogError::SubscriptionFailed {
                        collection: self.collection.clone(),
                        reason: "listener rejected".to_string(),
                    });
                }
            }

            let mut changes = self.changes.subscribe();
            let mut disconnects = self.disconnects.subscribe();
            let inner = Arc::clone(&self.inner);

            let stream = async_stream::stream! {
                loop {
                    let snapshot = inner.read().unwrap().snapshot(query);
                    yield Ok(snapshot);

                    let wake = tokio::select! {
                        changed = changes.changed() => {
                            if changed.is_ok() { Wake::Changed } else { Wake::Closed }
                        }
                        _ = disconnects.changed() => Wake::Disconnected,
                    };
                    match wake {
                        Wake::Changed => {},
                        Wake::Closed => break,
                        Wake::Disconnected => {
                            yield Err(CatalogError::Transport("listener disconnected".to_string()));
                            break;
                        },
                    }
                }
            };

            Ok(Box::pin(stream) as CatalogStream)
        })
    }

    fn run_transaction(
        &self,
        body: TransactionBody,
    ) -> Pin<Box<dyn Future<Output = Result<(), CatalogError>> + Send + '_>> {
        Box::pin(async move {
            let mut body = body;
            let max_attempts = self.retry_policy.max_attempts();

            for attempt in 0..max_attempts {
                if !self.latency.is_zero() {
                    tokio::time::sleep(self.latency).await;
                }
                match self.attempt(&mut body)? {
                    AttemptOutcome::Committed => {
                        TransactionMetrics::record_commit();
                        return Ok(());
                    },
                    AttemptOutcome::Stale => {
                        TransactionMetrics::record_retry();
                        tracing::debug!(
                            collection = %self.collection,
                            attempt = attempt + 1,
                            "Transaction read stale data, re-running"
                        );
                        if attempt + 1 < max_attempts {
                            tokio::time::sleep(self.retry_policy.delay_for_attempt(attempt)).await;
                        }
                    },
                }
            }

            TransactionMetrics::record_contention();
            tracing::warn!(
                collection = %self.collection,
                attempts = max_attempts,
                "Transaction gave up after repeated conflicts"
            );
            Err(CatalogError::Contention {
                attempts: max_attempts,
            })
        })
    }
}
