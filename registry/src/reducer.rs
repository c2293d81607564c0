//! Registry reducer.
//!
//! Owns the session state: the latest catalog snapshot and the staging
//! layer. Toggles are answered synchronously; a save moves the staged
//! intents in flight and hands them to the [`CommitEngine`] as a future
//! effect, whose `CommitCompleted` answer ends the pass. Committed rows stay
//! in flight until a `CatalogUpdated` snapshot shows them.

use crate::engine::CommitEngine;
use crate::metrics::RegistryMetrics;
use crate::staging::ToggleOutcome;
use crate::types::{RegistryAction, RegistryState, SaveRejection};
use gift_registry_core::{SmallVec, effect::Effect, environment::Clock, reducer::Reducer, smallvec};
use std::sync::Arc;

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the registry reducer
#[derive(Clone)]
pub struct RegistryEnvironment {
    /// Writes staged intents to the catalog store
    pub engine: CommitEngine,
    /// Clock for catalog timestamps
    pub clock: Arc<dyn Clock>,
}

impl RegistryEnvironment {
    /// Creates a new `RegistryEnvironment`
    #[must_use]
    pub fn new(engine: CommitEngine, clock: Arc<dyn Clock>) -> Self {
        Self { engine, clock }
    }
}

impl std::fmt::Debug for RegistryEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEnvironment")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for one guest's registry session
#[derive(Clone, Debug, Default)]
pub struct RegistryReducer;

impl RegistryReducer {
    /// Creates a new `RegistryReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Reducer for RegistryReducer {
    type State = RegistryState;
    type Action = RegistryAction;
    type Environment = RegistryEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            RegistryAction::CatalogUpdated { snapshot } => {
                tracing::trace!(items = snapshot.len(), "Catalog replaced");
                state.catalog = snapshot;
                state.catalog_updated_at = Some(env.clock.now());
                state.staging.settle(&state.catalog);
                SmallVec::new()
            },

            RegistryAction::Toggle { request, id } => {
                let outcome = state.staging.toggle(&id, &state.catalog);
                let result = match &outcome {
                    ToggleOutcome::Staged { checked } => {
                        tracing::debug!(%request, item = %id, checked, "Intent staged");
                        "staged"
                    },
                    ToggleOutcome::Rejected { owner } => {
                        tracing::debug!(%request, item = %id, %owner, "Toggle rejected, item held by another guest");
                        "rejected"
                    },
                };
                RegistryMetrics::record_toggle(result, state.staging.len());

                smallvec![Effect::emit(RegistryAction::Toggled {
                    request,
                    id,
                    outcome,
                })]
            },

            RegistryAction::Save { request } => {
                if let Some(current) = state.committing {
                    tracing::warn!(%request, %current, "Save rejected, a commit pass is running");
                    return smallvec![Effect::emit(RegistryAction::SaveRejected {
                        request,
                        reason: SaveRejection::CommitInProgress { current },
                    })];
                }

                if state.staging.is_empty() {
                    tracing::debug!(%request, "Nothing to save");
                    return smallvec![Effect::emit(RegistryAction::NothingToSave { request })];
                }

                let intents = state.staging.begin_commit();
                state.committing = Some(request);
                RegistryMetrics::record_staged(0);
                tracing::info!(%request, items = intents.len(), "Save started");

                let engine = env.engine.clone();
                smallvec![Effect::Future(Box::pin(async move {
                    let report = engine.commit(intents).await;
                    Some(RegistryAction::CommitCompleted { request, report })
                }))]
            },

            RegistryAction::CommitCompleted { request, report } => {
                if state.committing == Some(request) {
                    state.staging.finish_commit(&report.unsuccessful(), &state.catalog);
                    state.committing = None;
                    RegistryMetrics::record_staged(state.staging.len());
                }
                tracing::info!(
                    %request,
                    success = report.is_success(),
                    unsuccessful = report.unsuccessful().len(),
                    "Save finished"
                );
                state.last_report = Some(report);
                SmallVec::new()
            },

            // Answers only; observed by waiters.
            RegistryAction::Toggled { .. }
            | RegistryAction::NothingToSave { .. }
            | RegistryAction::SaveRejected { .. } => SmallVec::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::engine::{CommitReport, ItemOutcome, ItemReport};
    use crate::types::RequestId;
    use gift_registry_core::item::{CatalogSnapshot, ClientId, GiftItem, ItemId};
    use gift_registry_testing::{InMemoryCatalogStore, ReducerTest, assertions, test_clock};

    fn me() -> ClientId {
        ClientId::new("me")
    }

    fn items() -> Vec<GiftItem> {
        vec![
            GiftItem::new("kettle", "Kettle", 1),
            GiftItem::new("plates", "Plates", 2).claimed_by(ClientId::new("them")),
        ]
    }

    fn create_test_env(store: &InMemoryCatalogStore) -> RegistryEnvironment {
        let clock: Arc<dyn Clock> = Arc::new(test_clock());
        let engine = CommitEngine::new(Arc::new(store.clone()), me(), Arc::clone(&clock));
        RegistryEnvironment::new(engine, clock)
    }

    fn fresh_state() -> RegistryState {
        RegistryState::new(me(), CatalogSnapshot::from_items(items()))
    }

    fn staged_state() -> RegistryState {
        let mut state = fresh_state();
        state.staging.toggle(&ItemId::new("kettle"), &state.catalog);
        state
    }

    #[test]
    fn catalog_update_replaces_snapshot_and_stamps_time() {
        let store = InMemoryCatalogStore::new("gifts");

        ReducerTest::new(RegistryReducer::new())
            .with_env(create_test_env(&store))
            .given_state(fresh_state())
            .when_action(RegistryAction::CatalogUpdated {
                snapshot: CatalogSnapshot::default(),
            })
            .then_state(|state| {
                assert!(state.catalog.is_empty());
                assert_eq!(state.catalog_updated_at, Some(test_clock().now()));
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn toggle_stages_and_answers() {
        let store = InMemoryCatalogStore::new("gifts");

        ReducerTest::new(RegistryReducer::new())
            .with_env(create_test_env(&store))
            .given_state(fresh_state())
            .when_action(RegistryAction::Toggle {
                request: RequestId::new(1),
                id: ItemId::new("kettle"),
            })
            .then_state(|state| {
                assert_eq!(state.staging.len(), 1);
                assert!(state.effective_checked(&ItemId::new("kettle")));
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn toggle_on_foreign_item_stages_nothing() {
        let store = InMemoryCatalogStore::new("gifts");

        ReducerTest::new(RegistryReducer::new())
            .with_env(create_test_env(&store))
            .given_state(fresh_state())
            .when_action(RegistryAction::Toggle {
                request: RequestId::new(1),
                id: ItemId::new("plates"),
            })
            .then_state(|state| assert!(state.staging.is_empty()))
            .then_effects(|effects| assertions::assert_effects_count(effects, 1))
            .run();
    }

    #[test]
    fn save_moves_intents_in_flight() {
        let store = InMemoryCatalogStore::with_items("gifts", items());

        ReducerTest::new(RegistryReducer::new())
            .with_env(create_test_env(&store))
            .given_state(staged_state())
            .when_action(RegistryAction::Save { request: RequestId::new(2) })
            .then_state(|state| {
                assert_eq!(state.committing, Some(RequestId::new(2)));
                assert!(state.staging.is_empty());
                assert!(state.staging.is_pending(&ItemId::new("kettle")));
                assert!(state.effective_checked(&ItemId::new("kettle")));
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn save_while_committing_is_rejected() {
        let store = InMemoryCatalogStore::new("gifts");
        let mut state = staged_state();
        state.committing = Some(RequestId::new(1));

        ReducerTest::new(RegistryReducer::new())
            .with_env(create_test_env(&store))
            .given_state(state)
            .when_action(RegistryAction::Save { request: RequestId::new(2) })
            .then_state(|state| {
                assert_eq!(state.committing, Some(RequestId::new(1)));
                assert_eq!(state.staging.len(), 1);
            })
            .then_effects(|effects| assertions::assert_has_future_effect(effects))
            .run();
    }

    fn in_flight_state(request: RequestId) -> RegistryState {
        let mut state = staged_state();
        let _ = state.staging.begin_commit();
        state.committing = Some(request);
        state
    }

    fn report_for(outcome: ItemOutcome) -> CommitReport {
        CommitReport {
            items: vec![ItemReport {
                id: ItemId::new("kettle"),
                outcome,
            }],
            started_at: test_clock().now(),
            finished_at: test_clock().now(),
        }
    }

    #[test]
    fn committed_row_stays_checked_until_the_snapshot_arrives() {
        let store = InMemoryCatalogStore::new("gifts");

        ReducerTest::new(RegistryReducer::new())
            .with_env(create_test_env(&store))
            .given_state(in_flight_state(RequestId::new(3)))
            .when_action(RegistryAction::CommitCompleted {
                request: RequestId::new(3),
                report: report_for(ItemOutcome::Claimed),
            })
            .then_state(|state| {
                assert!(!state.is_committing());
                assert!(state.effective_checked(&ItemId::new("kettle")));
                assert!(state.staging.is_pending(&ItemId::new("kettle")));
                assert!(state.last_report.is_some());
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn snapshot_showing_the_claim_settles_the_row() {
        let store = InMemoryCatalogStore::new("gifts");
        let mut state = in_flight_state(RequestId::new(3));
        let _ = RegistryReducer::new().reduce(
            &mut state,
            RegistryAction::CommitCompleted {
                request: RequestId::new(3),
                report: report_for(ItemOutcome::Claimed),
            },
            &create_test_env(&store),
        );
        let mut confirmed = items();
        confirmed[0] = GiftItem::new("kettle", "Kettle", 1).claimed_by(me());

        ReducerTest::new(RegistryReducer::new())
            .with_env(create_test_env(&store))
            .given_state(state)
            .when_action(RegistryAction::CatalogUpdated {
                snapshot: CatalogSnapshot::from_items(confirmed),
            })
            .then_state(|state| {
                assert!(state.effective_checked(&ItemId::new("kettle")));
                assert!(!state.staging.is_pending(&ItemId::new("kettle")));
            })
            .run();
    }

    #[test]
    fn conflicted_row_falls_back_to_the_store_on_completion() {
        let store = InMemoryCatalogStore::new("gifts");

        ReducerTest::new(RegistryReducer::new())
            .with_env(create_test_env(&store))
            .given_state(in_flight_state(RequestId::new(3)))
            .when_action(RegistryAction::CommitCompleted {
                request: RequestId::new(3),
                report: report_for(ItemOutcome::Conflict { owner: Some(ClientId::new("them")) }),
            })
            .then_state(|state| {
                assert!(!state.is_committing());
                assert!(!state.effective_checked(&ItemId::new("kettle")));
                assert!(!state.staging.is_pending(&ItemId::new("kettle")));
            })
            .run();
    }

    #[tokio::test]
    async fn save_effect_commits_and_answers() {
        let store = InMemoryCatalogStore::with_items("gifts", items());
        let env = create_test_env(&store);
        let mut state = staged_state();

        let mut effects = RegistryReducer::new().reduce(
            &mut state,
            RegistryAction::Save { request: RequestId::new(4) },
            &env,
        );
        let Some(Effect::Future(future)) = effects.pop() else {
            panic!("expected a future effect");
        };

        match future.await {
            Some(RegistryAction::CommitCompleted { request, report }) => {
                assert_eq!(request, RequestId::new(4));
                assert_eq!(report.items.len(), 1);
                assert_eq!(report.items[0].outcome, ItemOutcome::Claimed);
            },
            other => panic!("unexpected answer: {other:?}"),
        }
        assert_eq!(store.get(&ItemId::new("kettle")).unwrap().owner(), Some(&me()));
    }

    #[tokio::test]
    async fn empty_save_answers_nothing_to_save() {
        let store = InMemoryCatalogStore::new("gifts");
        let env = create_test_env(&store);
        let mut state = fresh_state();

        let mut effects = RegistryReducer::new().reduce(
            &mut state,
            RegistryAction::Save { request: RequestId::new(5) },
            &env,
        );
        let Some(Effect::Future(future)) = effects.pop() else {
            panic!("expected a future effect");
        };

        assert!(matches!(
            future.await,
            Some(RegistryAction::NothingToSave { request }) if request == RequestId::new(5)
        ));
        assert!(!state.is_committing());
        assert_eq!(store.transaction_attempts(), 0);
    }
}
