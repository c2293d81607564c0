//! # Gift Registry Testing
//!
//! Testing utilities and helpers for the gift registry.
//!
//! This crate provides:
//! - [`InMemoryCatalogStore`]: an optimistic-concurrency catalog store with
//!   fault injection
//! - [`ReducerTest`]: Given-When-Then harness for reducers
//! - Deterministic clocks and catalog fixtures
//!
//! ## Example
//!
//! ```ignore
//! use gift_registry_testing::{fixtures, InMemoryCatalogStore};
//!
//! #[tokio::test]
//! async fn guest_claims_a_gift() {
//!     let store = InMemoryCatalogStore::with_items("gifts", fixtures::kitchen_items());
//!     let session = RegistrySession::start(Arc::new(store), fixtures::guest("alice"), settings).await?;
//!     session.toggle(&ItemId::new("kettle")).await?;
//!     session.save().await?;
//! }
//! ```

use chrono::{DateTime, Utc};
use gift_registry_core::environment::Clock;

mod catalog_store;

pub use catalog_store::{Fault, InMemoryCatalogStore};
pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use gift_registry_testing::mocks::FixedClock;
    /// use gift_registry_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-06-14 15:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-06-14T15:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Catalog fixtures shared by the crate tests.
pub mod fixtures {
    use gift_registry_core::item::{ClientId, GiftItem};

    /// A guest identity with a readable name.
    #[must_use]
    pub fn guest(name: &str) -> ClientId {
        ClientId::new(format!("guest-{name}"))
    }

    /// Four unreserved items across two sections, plus one without a section.
    #[must_use]
    pub fn kitchen_items() -> Vec<GiftItem> {
        vec![
            GiftItem::new("kettle", "Kettle", 1).in_section("Kitchen"),
            GiftItem::new("plates", "Dinner plates", 2).in_section("Kitchen"),
            GiftItem::new("towels", "Bath towels", 3).in_section("Bathroom"),
            GiftItem::new("knives", "Knife set", 4).in_section("Kitchen"),
            GiftItem::new("voucher", "Honeymoon voucher", 5),
        ]
    }

    /// Install a test-friendly tracing subscriber (once per process).
    ///
    /// Honors `RUST_LOG`; output goes through the test harness capture.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_never_moves() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn kitchen_fixture_has_unique_ids() {
        let items = fixtures::kitchen_items();
        let mut ids: Vec<_> = items.iter().map(|item| item.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), items.len());
        assert!(items.iter().all(|item| !item.reserved));
    }
}
