//! Registry session: one guest's live view of the registry.
//!
//! Wires the [`CatalogFeed`] into a runtime [`Store`] running the
//! [`RegistryReducer`]. Every snapshot the feed publishes becomes a
//! `CatalogUpdated` action; toggles and saves are request/response exchanges
//! over the store, correlated by [`RequestId`].
//!
//! ```text
//! CatalogStore ──► CatalogFeed ──► forwarder ──► Store<RegistryReducer>
//!      ▲                                           │  Toggle / Save
//!      └────────────── CommitEngine ◄──────────────┘  (future effect)
//! ```

use crate::engine::{CommitEngine, CommitReport};
use crate::error::{RegistryError, Result};
use crate::feed::CatalogFeed;
use crate::reducer::{RegistryEnvironment, RegistryReducer};
use crate::staging::{StagedIntent, ToggleOutcome};
use crate::types::{RegistryAction, RegistryState, RequestId, SaveRejection};
use crate::view::RegistryView;
use gift_registry_core::catalog::{CatalogQuery, CatalogStore};
use gift_registry_core::environment::{Clock, SystemClock};
use gift_registry_core::item::{CatalogSnapshot, ClientId, ItemId};
use gift_registry_runtime::retry::RetryPolicy;
use gift_registry_runtime::{Store, StoreError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

type RegistryStore = Store<RegistryState, RegistryAction, RegistryEnvironment, RegistryReducer>;

/// Tunables of a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Ordering of the catalog feed
    pub query: CatalogQuery,
    /// How long `save()` waits for its commit pass
    pub save_timeout: Duration,
    /// How long `toggle()` waits for its answer
    pub request_timeout: Duration,
    /// Backoff for (re-)subscribing the catalog feed
    pub feed_retry: RetryPolicy,
    /// How long `close()` waits for running effects
    pub shutdown_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            query: CatalogQuery::by_order(),
            save_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(5),
            feed_retry: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of a successful `save()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing was staged; no pass ran
    NothingToSave,
    /// A pass ran; the report lists every item
    Completed(CommitReport),
}

/// A running session.
pub struct RegistrySession {
    store: Arc<RegistryStore>,
    feed: Option<CatalogFeed>,
    forwarder: Option<JoinHandle<()>>,
    applied: watch::Receiver<u64>,
    next_request: AtomicU64,
    save_gate: Mutex<()>,
    client: ClientId,
    settings: SessionSettings,
}

impl RegistrySession {
    /// Start a session for `client` using the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Catalog`] if the catalog feed cannot deliver
    /// its initial snapshot.
    pub async fn start(
        catalog: Arc<dyn CatalogStore>,
        client: ClientId,
        settings: SessionSettings,
    ) -> Result<Self> {
        Self::start_with_clock(catalog, client, settings, Arc::new(SystemClock)).await
    }

    /// Start a session with an injected clock.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Catalog`] if the catalog feed cannot deliver
    /// its initial snapshot.
    #[tracing::instrument(skip(catalog, settings, clock), fields(collection = catalog.collection()))]
    pub async fn start_with_clock(
        catalog: Arc<dyn CatalogStore>,
        client: ClientId,
        settings: SessionSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let feed = CatalogFeed::start(Arc::clone(&catalog), settings.query, settings.feed_retry.clone()).await?;
        let mut snapshots = feed.subscribe();
        let initial = snapshots.borrow_and_update().clone();

        let mut state = RegistryState::new(client.clone(), initial);
        state.catalog_updated_at = Some(clock.now());
        let engine = CommitEngine::new(catalog, client.clone(), Arc::clone(&clock));
        let store = Arc::new(Store::with_broadcast_capacity(
            state,
            RegistryReducer::new(),
            RegistryEnvironment::new(engine, clock),
            64,
        ));

        let (applied_tx, applied) = watch::channel(0_u64);
        let forwarder = tokio::spawn(forward(Arc::clone(&store), snapshots, applied_tx));
        tracing::info!(%client, "Registry session started");

        Ok(Self {
            store,
            feed: Some(feed),
            forwarder: Some(forwarder),
            applied,
            next_request: AtomicU64::new(1),
            save_gate: Mutex::new(()),
            client,
            settings,
        })
    }

    /// The local identity.
    #[must_use]
    pub const fn client(&self) -> &ClientId {
        &self.client
    }

    /// Flip the local intent for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if the session is closing or the
    /// answer does not arrive in time.
    pub async fn toggle(&self, id: &ItemId) -> Result<ToggleOutcome> {
        let request = self.next_request();
        let answer = self
            .store
            .send_and_wait_for(
                RegistryAction::Toggle {
                    request,
                    id: id.clone(),
                },
                move |action| action.answers_toggle(request),
                self.settings.request_timeout,
            )
            .await?;

        match answer {
            RegistryAction::Toggled { outcome, .. } => Ok(outcome),
            _ => Err(RegistryError::UnexpectedAnswer { request }),
        }
    }

    /// Commit everything staged and wait for the pass to finish.
    ///
    /// Saves from this session run one at a time.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::CommitInProgress`] if an earlier pass (whose save
    ///   timed out) is still running
    /// - [`RegistryError::Store`] if the session is closing or the pass
    ///   outlives the save timeout
    pub async fn save(&self) -> Result<SaveOutcome> {
        let _gate = self.save_gate.lock().await;
        let request = self.next_request();

        let answer = self
            .store
            .send_and_wait_for(
                RegistryAction::Save { request },
                move |action| action.answers_save(request),
                self.settings.save_timeout,
            )
            .await?;

        match answer {
            RegistryAction::NothingToSave { .. } => Ok(SaveOutcome::NothingToSave),
            RegistryAction::CommitCompleted { report, .. } => Ok(SaveOutcome::Completed(report)),
            RegistryAction::SaveRejected {
                reason: SaveRejection::CommitInProgress { current },
                ..
            } => Err(RegistryError::CommitInProgress { current }),
            _ => Err(RegistryError::UnexpectedAnswer { request }),
        }
    }

    /// Effective checkbox state of `id`.
    pub async fn effective_checked(&self, id: &ItemId) -> bool {
        self.store.state(|state| state.effective_checked(id)).await
    }

    /// Intents waiting for the next save.
    pub async fn staged(&self) -> Vec<StagedIntent> {
        self.store.state(|state| state.staging.staged()).await
    }

    /// Whether a commit pass is running.
    pub async fn is_committing(&self) -> bool {
        self.store.state(RegistryState::is_committing).await
    }

    /// Grouped rows for rendering.
    pub async fn view(&self) -> RegistryView {
        self.store
            .state(|state| RegistryView::build(&state.catalog, &state.staging))
            .await
    }

    /// Catalog snapshot the session currently works with.
    pub async fn catalog(&self) -> CatalogSnapshot {
        self.store.state(|state| state.catalog.clone()).await
    }

    /// Report of the most recent pass.
    pub async fn last_report(&self) -> Option<CommitReport> {
        self.store.state(|state| state.last_report.clone()).await
    }

    /// Wait until the session's catalog satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::Store`] with [`StoreError::Timeout`] if `timeout` expires
    /// - [`RegistryError::Closed`] if the feed stopped forwarding
    pub async fn wait_for_catalog<F>(&self, predicate: F, timeout: Duration) -> Result<CatalogSnapshot>
    where
        F: Fn(&CatalogSnapshot) -> bool,
    {
        let mut applied = self.applied.clone();

        tokio::time::timeout(timeout, async {
            loop {
                let _ = applied.borrow_and_update();
                let catalog = self.catalog().await;
                if predicate(&catalog) {
                    return Ok(catalog);
                }
                if applied.changed().await.is_err() {
                    return Err(RegistryError::Closed);
                }
            }
        })
        .await
        .map_err(|_| RegistryError::Store(StoreError::Timeout))?
    }

    /// Stop the feed and shut the store down.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if running effects outlive the
    /// shutdown timeout.
    pub async fn close(mut self) -> Result<()> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
            let _ = forwarder.await;
        }
        if let Some(feed) = self.feed.take() {
            feed.cancel().await;
        }
        self.store.shutdown(self.settings.shutdown_timeout).await?;
        tracing::info!(client = %self.client, "Registry session closed");
        Ok(())
    }

    fn next_request(&self) -> RequestId {
        RequestId::new(self.next_request.fetch_add(1, Ordering::Relaxed))
    }
}

impl Drop for RegistrySession {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

impl std::fmt::Debug for RegistrySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrySession")
            .field("client", &self.client)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

async fn forward(
    store: Arc<RegistryStore>,
    mut snapshots: watch::Receiver<CatalogSnapshot>,
    applied: watch::Sender<u64>,
) {
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        if let Err(error) = store.send(RegistryAction::CatalogUpdated { snapshot }).await {
            tracing::debug!(error = %error, "Catalog forwarding stopped");
            break;
        }
        applied.send_modify(|count| *count += 1);
    }
}
