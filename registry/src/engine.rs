//! Commit engine: turns staged intents into durable reservations.
//!
//! Each intent runs in its own store transaction; items are processed one at
//! a time in staging order and never share a transaction. Inside the
//! transaction the decision is made on a fresh read, so a guest who lost a
//! race sees the winner's write and takes the conflict branch.
//!
//! ```text
//! want reserve │ record state           │ decision
//! ─────────────┼────────────────────────┼──────────
//! yes          │ free (or missing)      │ Claim
//! yes          │ held by me             │ Reaffirm
//! yes          │ held by anyone else    │ Conflict
//! no           │ held by me             │ Release
//! no           │ anything else          │ NoOp
//! ```

use crate::metrics::RegistryMetrics;
use crate::staging::StagedIntent;
use chrono::{DateTime, Utc};
use gift_registry_core::catalog::{CatalogError, CatalogStore, TransactionAbort};
use gift_registry_core::environment::Clock;
use gift_registry_core::item::{ClientId, GiftItem, ItemId, ReservationFields};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// What a transaction does with one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Free record: take it
    Claim,
    /// Already mine: write the same ownership again
    Reaffirm,
    /// Mine and no longer wanted: clear both fields
    Release,
    /// Nothing to write
    NoOp,
    /// Held by someone else (`owner` is `None` for a reserved record
    /// without an owner)
    Conflict {
        /// Current holder
        owner: Option<ClientId>,
    },
}

impl Decision {
    /// Fields to merge into the record, if any.
    #[must_use]
    pub fn write(&self, client: &ClientId) -> Option<ReservationFields> {
        match self {
            Self::Claim | Self::Reaffirm => Some(ReservationFields::claimed_by(client.clone())),
            Self::Release => Some(ReservationFields::released()),
            Self::NoOp | Self::Conflict { .. } => None,
        }
    }
}

/// Decide what to do with `current` (a missing record counts as free).
#[must_use]
pub fn decide(want_reserved: bool, current: Option<&GiftItem>, client: &ClientId) -> Decision {
    let currently_reserved = current.is_some_and(|item| item.reserved);
    let current_owner = current.and_then(|item| item.reserved_by.as_ref());

    if want_reserved {
        if !currently_reserved {
            Decision::Claim
        } else if current_owner == Some(client) {
            Decision::Reaffirm
        } else {
            Decision::Conflict {
                owner: current_owner.cloned(),
            }
        }
    } else if currently_reserved && current_owner == Some(client) {
        Decision::Release
    } else {
        Decision::NoOp
    }
}

/// Result of one item in a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The item is now reserved by the local guest
    Claimed,
    /// The local guest already held it
    Reaffirmed,
    /// The local guest's reservation was removed
    Released,
    /// Nothing needed to change
    Unchanged,
    /// Another guest holds the item, or the store gave up retrying
    Conflict {
        /// Holder seen by the last attempt, when known
        owner: Option<ClientId>,
    },
    /// The transaction could not run
    Failed {
        /// Store error message
        reason: String,
    },
}

impl ItemOutcome {
    fn from_decision(decision: Decision) -> Self {
        match decision {
            Decision::Claim => Self::Claimed,
            Decision::Reaffirm => Self::Reaffirmed,
            Decision::Release => Self::Released,
            Decision::NoOp => Self::Unchanged,
            Decision::Conflict { owner } => Self::Conflict { owner },
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::Reaffirmed => "reaffirmed",
            Self::Released => "released",
            Self::Unchanged => "unchanged",
            Self::Conflict { .. } => "conflict",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether the item's transaction succeeded.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(
            self,
            Self::Claimed | Self::Reaffirmed | Self::Released | Self::Unchanged
        )
    }
}

/// Outcome of one item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemReport {
    /// The item
    pub id: ItemId,
    /// What happened
    pub outcome: ItemOutcome,
}

/// Summary of a commit pass, in staging order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitReport {
    /// Per-item outcomes
    pub items: Vec<ItemReport>,
    /// When the pass started
    pub started_at: DateTime<Utc>,
    /// When the pass finished
    pub finished_at: DateTime<Utc>,
}

impl CommitReport {
    /// Items whose transaction succeeded.
    #[must_use]
    pub fn committed(&self) -> Vec<ItemId> {
        self.ids_where(ItemOutcome::is_committed)
    }

    /// Items another guest won (including exhausted retries).
    #[must_use]
    pub fn conflicts(&self) -> Vec<ItemId> {
        self.ids_where(|outcome| matches!(outcome, ItemOutcome::Conflict { .. }))
    }

    /// Items whose transaction failed for transport or store reasons.
    #[must_use]
    pub fn failures(&self) -> Vec<(ItemId, String)> {
        self.items
            .iter()
            .filter_map(|report| match &report.outcome {
                ItemOutcome::Failed { reason } => Some((report.id.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }

    /// Conflicts and failures together, in staging order.
    #[must_use]
    pub fn unsuccessful(&self) -> Vec<ItemId> {
        self.ids_where(|outcome| !outcome.is_committed())
    }

    /// Whether every item committed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.items.iter().all(|report| report.outcome.is_committed())
    }

    fn ids_where(&self, keep: impl Fn(&ItemOutcome) -> bool) -> Vec<ItemId> {
        self.items
            .iter()
            .filter(|report| keep(&report.outcome))
            .map(|report| report.id.clone())
            .collect()
    }
}

/// Applies staged intents to the catalog store.
#[derive(Clone)]
pub struct CommitEngine {
    store: Arc<dyn CatalogStore>,
    client: ClientId,
    clock: Arc<dyn Clock>,
}

impl CommitEngine {
    /// Engine writing on behalf of `client`.
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>, client: ClientId, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            client,
            clock,
        }
    }

    /// Identity reservations are written under.
    #[must_use]
    pub const fn client(&self) -> &ClientId {
        &self.client
    }

    /// Run one commit pass over `intents`, serially.
    ///
    /// Never fails as a whole: every item ends up in the report.
    #[tracing::instrument(skip(self, intents), fields(client = %self.client, items = intents.len()))]
    pub async fn commit(&self, intents: Vec<StagedIntent>) -> CommitReport {
        let started_at = self.clock.now();
        let timer = Instant::now();
        tracing::info!("Commit pass started");

        let mut items = Vec::with_capacity(intents.len());
        for intent in intents {
            let outcome = self.commit_one(&intent).await;
            RegistryMetrics::record_item(outcome.label());
            items.push(ItemReport {
                id: intent.id,
                outcome,
            });
        }

        RegistryMetrics::record_pass(timer.elapsed());
        let report = CommitReport {
            items,
            started_at,
            finished_at: self.clock.now(),
        };
        tracing::info!(
            committed = report.committed().len(),
            conflicts = report.conflicts().len(),
            failures = report.failures().len(),
            "Commit pass finished"
        );
        report
    }

    async fn commit_one(&self, intent: &StagedIntent) -> ItemOutcome {
        let item_ref = self.store.item_ref(&intent.id);
        let client = self.client.clone();
        let reserve = intent.reserve;
        // Decision of the most recent attempt; only the last one commits.
        let decided: Arc<Mutex<Option<Decision>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&decided);

        let result = self
            .store
            .run_transaction(Box::new(move |tx| {
                let current = tx.get(&item_ref)?;
                let decision = decide(reserve, current.as_ref(), &client);
                if let Ok(mut last) = slot.lock() {
                    *last = Some(decision.clone());
                }

                match decision {
                    Decision::Conflict { owner } => {
                        Err(TransactionAbort::conflict(item_ref.clone(), owner).into())
                    },
                    other => match other.write(&client) {
                        Some(fields) => tx.set(&item_ref, fields),
                        None => Ok(()),
                    },
                }
            }))
            .await;

        match result {
            Ok(()) => {
                let decision = decided.lock().ok().and_then(|mut last| last.take());
                let outcome = decision.map_or(ItemOutcome::Unchanged, ItemOutcome::from_decision);
                tracing::debug!(item = %intent.id, outcome = outcome.label(), "Item committed");
                outcome
            },
            Err(error) if error.is_conflict() => {
                tracing::warn!(item = %intent.id, error = %error, "Item already reserved by another guest");
                let owner = match error {
                    CatalogError::Aborted(TransactionAbort::Conflict { owner, .. }) => owner,
                    _ => None,
                };
                ItemOutcome::Conflict { owner }
            },
            Err(error) => {
                tracing::error!(item = %intent.id, error = %error, "Item could not be committed");
                ItemOutcome::Failed {
                    reason: error.to_string(),
                }
            },
        }
    }
}

impl std::fmt::Debug for CommitEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitEngine")
            .field("collection", &self.store.collection())
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
