//! Catalog store abstraction: the shared, transactional collection of gifts.
//!
//! This module defines the [`CatalogStore`] trait, the contract the registry
//! requires of whatever database holds the gift records. The registry never
//! talks to a database directly; it needs exactly two capabilities:
//!
//! - A **live ordered subscription** delivering the full collection again
//!   every time any record changes (including changes made by other clients)
//! - A **transaction primitive** running a read-decide-write block atomically
//!   per record, with optimistic conflict detection and automatic re-attempt
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   subscribe(query)    ┌──────────────────┐
//! │ Catalog Feed │◄──────────────────────│                  │
//! └──────┬───────┘  full snapshots       │                  │
//!        │                               │   CatalogStore   │
//!        ▼                               │                  │
//! ┌──────────────┐  run_transaction(fn)  │  (OCC, bounded   │
//! │Commit Engine │──────────────────────►│   retry)         │
//! └──────────────┘  get / set (merge)    └──────────────────┘
//! ```
//!
//! # Transaction Semantics
//!
//! - Reads record the version they observed; the commit validates that no
//!   other writer touched those records in between
//! - On a detected conflict the **whole body** runs again on fresh reads
//! - Attempts are bounded; exhausting them yields [`CatalogError::Contention`]
//! - A body returning an error aborts immediately without retry
//! - Reads must happen before writes
//!
//! # Implementations
//!
//! - `InMemoryCatalogStore` (in `gift-registry-testing`): fast, deterministic,
//!   with fault injection for tests and the console client
//!
//! # Example
//!
//! ```rust,ignore
//! use gift_registry_core::catalog::{CatalogStore, TransactionAbort};
//! use gift_registry_core::item::{ItemId, ReservationFields};
//!
//! async fn claim(store: &dyn CatalogStore, id: &ItemId, me: ClientId) -> Result<(), CatalogError> {
//!     let item_ref = store.item_ref(id);
//!     store
//!         .run_transaction(Box::new(move |tx| {
//!             let current = tx.get(&item_ref)?;
//!             if current.as_ref().is_some_and(|item| item.reserved) {
//!                 return Err(TransactionAbort::conflict(item_ref.clone(), None).into());
//!             }
//!             tx.set(&item_ref, ReservationFields::claimed_by(me.clone()))
//!         }))
//!         .await
//! }
//! ```

use crate::item::{CatalogSnapshot, ClientId, GiftItem, ItemId, ItemRef, ReservationFields};
use futures::Stream;
use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Reasons a transaction body gives up on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionAbort {
    /// The record is held by another identity
    #[error("{item} is already reserved by another guest")]
    Conflict {
        /// The contested record
        item: ItemRef,
        /// Owner observed by the transaction, if any
        owner: Option<ClientId>,
    },
}

impl TransactionAbort {
    /// Ownership conflict on `item`.
    #[must_use]
    pub const fn conflict(item: ItemRef, owner: Option<ClientId>) -> Self {
        Self::Conflict { item, owner }
    }
}

/// Errors that can occur during catalog store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The transaction body aborted
    #[error("Transaction aborted: {0}")]
    Aborted(#[from] TransactionAbort),

    /// Conflicting writes kept invalidating the transaction
    #[error("Transaction gave up after {attempts} attempts due to concurrent writes")]
    Contention {
        /// How many times the body ran
        attempts: usize,
    },

    /// The body used the transaction handle incorrectly
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Failed to subscribe to the collection
    #[error("Subscription failed for collection '{collection}': {reason}")]
    SubscriptionFailed {
        /// The collection that failed
        collection: String,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error
    #[error("Transport error: {0}")]
    Transport(String),
}

impl CatalogError {
    /// Whether the error means "someone else won the record".
    ///
    /// Ownership aborts and retry exhaustion both count; transport failures
    /// and misuse do not.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Aborted(TransactionAbort::Conflict { .. }) | Self::Contention { .. }
        )
    }
}

/// Ordering requested by a subscriber: `order` ascending, ties broken by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatalogQuery;

impl CatalogQuery {
    /// The registry's display ordering.
    #[must_use]
    pub const fn by_order() -> Self {
        Self
    }

    /// Compare two records according to this query.
    #[must_use]
    pub fn compare(self, left: &GiftItem, right: &GiftItem) -> Ordering {
        left.order.cmp(&right.order).then_with(|| left.id.cmp(&right.id))
    }

    /// Sort items in place according to this query.
    pub fn sort(self, items: &mut [GiftItem]) {
        items.sort_by(|left, right| self.compare(left, right));
    }
}

/// Stream of full, ordered catalog snapshots.
///
/// The first item is the current state of the collection (possibly empty);
/// every later item follows a change to any record. Dropping the stream
/// releases the underlying listener.
pub type CatalogStream = Pin<Box<dyn Stream<Item = Result<CatalogSnapshot, CatalogError>> + Send>>;

/// Handle given to a transaction body.
///
/// All reads must precede all writes. Writes are buffered and applied
/// atomically when the body returns `Ok`.
pub trait Transaction {
    /// Read a record as of this attempt, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::InvalidTransaction`] when called after a write
    /// - [`CatalogError::Transport`] when the record could not be read
    fn get(&mut self, item: &ItemRef) -> Result<Option<GiftItem>, CatalogError>;

    /// Buffer a merge write of the reservation fields.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidTransaction`] if `item` belongs to a
    /// different collection.
    fn set(&mut self, item: &ItemRef, fields: ReservationFields) -> Result<(), CatalogError>;
}

/// A transaction body. It may run several times, once per attempt.
pub type TransactionBody = Box<dyn FnMut(&mut dyn Transaction) -> Result<(), CatalogError> + Send>;

/// Trait for catalog store implementations.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync`; a single store is shared by the
/// catalog feed and the commit engine.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `async fn` to enable trait object usage (`Arc<dyn CatalogStore>`), which
/// is how the registry environment captures it.
pub trait CatalogStore: Send + Sync {
    /// Name of the collection this store serves (e.g. `"gifts"`).
    fn collection(&self) -> &str;

    /// Stable reference for a record of this collection.
    fn item_ref(&self, id: &ItemId) -> ItemRef {
        ItemRef::new(self.collection(), id.clone())
    }

    /// Subscribe to the whole collection.
    ///
    /// The returned stream yields the current snapshot first, then a fresh
    /// full snapshot after every change.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::SubscriptionFailed`] if the listener cannot be
    /// established.
    fn subscribe(
        &self,
        query: CatalogQuery,
    ) -> Pin<Box<dyn Future<Output = Result<CatalogStream, CatalogError>> + Send + '_>>;

    /// Run `body` as an atomic read-decide-write transaction.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::Aborted`]: the body aborted (no retry)
    /// - [`CatalogError::Contention`]: retries exhausted
    /// - [`CatalogError::Transport`]: the store could not be reached
    fn run_transaction(
        &self,
        body: TransactionBody,
    ) -> Pin<Box<dyn Future<Output = Result<(), CatalogError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_classification() {
        let item = ItemRef::new("gifts", ItemId::new("a"));
        assert!(CatalogError::from(TransactionAbort::conflict(item, None)).is_conflict());
        assert!(CatalogError::Contention { attempts: 5 }.is_conflict());
        assert!(!CatalogError::Transport("offline".into()).is_conflict());
        assert!(!CatalogError::InvalidTransaction("set before get".into()).is_conflict());
    }

    #[test]
    fn order_query_breaks_ties_by_id() {
        let mut items = vec![
            GiftItem::new("c", "Cups", 2),
            GiftItem::new("b", "Bowls", 1),
            GiftItem::new("a", "Aprons", 2),
        ];
        CatalogQuery::by_order().sort(&mut items);
        let ids: Vec<_> = items.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c"]);
    }

    proptest::proptest! {
        #[test]
        fn order_query_is_independent_of_input_order(
            orders in proptest::collection::vec(-50_i64..50, 0..20)
        ) {
            let items: Vec<GiftItem> = orders
                .iter()
                .enumerate()
                .map(|(position, order)| GiftItem::new(format!("id-{position:02}"), "gift", *order))
                .collect();
            let mut forward = items.clone();
            let mut backward: Vec<GiftItem> = items.into_iter().rev().collect();

            CatalogQuery::by_order().sort(&mut forward);
            CatalogQuery::by_order().sort(&mut backward);

            proptest::prop_assert_eq!(&forward, &backward);
            proptest::prop_assert!(forward.windows(2).all(|pair| pair[0].order <= pair[1].order));
        }
    }

    #[test]
    fn conflict_message_names_the_record() {
        let abort = TransactionAbort::conflict(ItemRef::new("gifts", ItemId::new("vase")), None);
        assert_eq!(abort.to_string(), "gifts/vase is already reserved by another guest");
    }
}
