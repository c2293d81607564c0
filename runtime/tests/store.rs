//! Integration tests for the Store runtime
//!
//! Covers the request-response pattern the registry session relies on:
//! correlation ids, feedback ordering, shutdown and effect tracking.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use gift_registry_core::{SmallVec, effect::Effect, reducer::Reducer, smallvec};
use gift_registry_runtime::{Store, StoreError};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum HoldAction {
    /// Ask for a hold with a correlation id
    Request { id: u64, delay_ms: u64 },
    /// Hold granted (terminal)
    Granted { id: u64, position: u32 },
    /// Chain of three steps, each a separate effect
    Chain { id: u64 },
    /// One step of a chain
    Step { id: u64, step: u32 },
    /// Chain finished (terminal)
    ChainDone { id: u64 },
    /// Record a label
    Mark(&'static str),
}

#[derive(Debug, Default)]
struct HoldState {
    granted: Vec<u64>,
    steps: Vec<u32>,
    marks: Vec<&'static str>,
}

#[derive(Clone)]
struct HoldReducer;

impl Reducer for HoldReducer {
    type State = HoldState;
    type Action = HoldAction;
    type Environment = ();

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        _env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            HoldAction::Request { id, delay_ms } => {
                let position = u32::try_from(state.granted.len()).unwrap_or(u32::MAX);
                smallvec![Effect::Future(Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    Some(HoldAction::Granted { id, position })
                }))]
            },
            HoldAction::Granted { id, .. } => {
                state.granted.push(id);
                smallvec![Effect::None]
            },
            HoldAction::Chain { id } => {
                state.steps.clear();
                smallvec![Effect::emit(HoldAction::Step { id, step: 1 })]
            },
            HoldAction::Step { id, step } => {
                state.steps.push(step);
                if step < 3 {
                    smallvec![Effect::emit(HoldAction::Step { id, step: step + 1 })]
                } else {
                    smallvec![Effect::emit(HoldAction::ChainDone { id })]
                }
            },
            HoldAction::ChainDone { .. } => smallvec![Effect::None],
            HoldAction::Mark(label) => {
                state.marks.push(label);
                smallvec![Effect::None]
            },
        }
    }
}

fn hold_store() -> Store<HoldState, HoldAction, (), HoldReducer> {
    Store::new(HoldState::default(), HoldReducer, ())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn terminal_action_is_reduced_before_the_waiter_sees_it() {
    let store = hold_store();

    let result = store
        .send_and_wait_for(
            HoldAction::Request { id: 7, delay_ms: 0 },
            |action| matches!(action, HoldAction::Granted { id: 7, .. }),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert_eq!(result, HoldAction::Granted { id: 7, position: 0 });
    let granted = store.state(|s| s.granted.clone()).await;
    assert_eq!(granted, vec![7]);
}

#[tokio::test]
async fn waits_through_a_chain_of_effects() {
    let store = hold_store();

    let result = store
        .send_and_wait_for(
            HoldAction::Chain { id: 1 },
            |action| matches!(action, HoldAction::ChainDone { id: 1 }),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert_eq!(result, HoldAction::ChainDone { id: 1 });
    assert_eq!(store.state(|s| s.steps.clone()).await, vec![1, 2, 3]);
}

#[tokio::test]
async fn times_out_when_no_matching_action_arrives() {
    let store = hold_store();

    let result = store
        .send_and_wait_for(
            HoldAction::Request { id: 1, delay_ms: 0 },
            |action| matches!(action, HoldAction::Granted { id: 2, .. }),
            Duration::from_millis(50),
        )
        .await;

    assert!(matches!(result, Err(StoreError::Timeout)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_waiters_get_their_own_results() {
    let store = Arc::new(hold_store());

    let mut tasks = Vec::new();
    for id in 1..=5_u64 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store
                .send_and_wait_for(
                    HoldAction::Request {
                        id,
                        delay_ms: 30 - id * 5,
                    },
                    move |action| matches!(action, HoldAction::Granted { id: got, .. } if *got == id),
                    Duration::from_secs(2),
                )
                .await
        }));
    }

    for (index, task) in tasks.into_iter().enumerate() {
        let action = task.await.unwrap().unwrap();
        let expected = u64::try_from(index).unwrap() + 1;
        assert!(matches!(action, HoldAction::Granted { id, .. } if id == expected));
    }

    let mut granted = store.state(|s| s.granted.clone()).await;
    granted.sort_unstable();
    assert_eq!(granted, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn handle_tracks_spawned_effects() {
    let store = hold_store();

    let mut handle = store
        .send(HoldAction::Request { id: 3, delay_ms: 20 })
        .await
        .unwrap();
    assert_eq!(handle.pending(), 1);

    handle.wait().await;
    assert_eq!(handle.pending(), 0);
}

#[tokio::test]
async fn shutdown_rejects_new_actions() {
    let store = hold_store();

    store
        .send(HoldAction::Request { id: 1, delay_ms: 10 })
        .await
        .unwrap();
    store.shutdown(Duration::from_secs(1)).await.unwrap();

    let result = store.send(HoldAction::Mark("late")).await;
    assert!(matches!(result, Err(StoreError::ShutdownInProgress)));
}

#[tokio::test]
async fn shutdown_times_out_on_slow_effects() {
    let store = hold_store();

    store
        .send(HoldAction::Request { id: 1, delay_ms: 500 })
        .await
        .unwrap();

    let result = store.shutdown(Duration::from_millis(20)).await;
    assert!(matches!(result, Err(StoreError::ShutdownTimeout(1))));
}

#[tokio::test]
async fn effect_actions_are_reduced_without_a_waiter() {
    let store = hold_store();

    let mut handle = store.send(HoldAction::Chain { id: 9 }).await.unwrap();
    handle.wait().await;

    tokio::time::timeout(Duration::from_secs(1), async {
        while store.state(|s| s.steps.len()).await < 3 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(store.state(|s| s.steps.clone()).await, vec![1, 2, 3]);
}

#[tokio::test]
async fn actions_sent_directly_are_reduced_in_place() {
    let store = hold_store();

    let handle = store.send(HoldAction::Mark("direct")).await.unwrap();

    assert_eq!(handle.pending(), 0);
    assert_eq!(store.state(|s| s.marks.clone()).await, vec!["direct"]);
}
