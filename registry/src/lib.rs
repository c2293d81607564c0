//! Gift Registry - reservation consistency for a shared wedding gift list
//!
//! Guests browse a catalog of gifts, mark the ones they intend to bring, and
//! save. Many guests do this concurrently and anonymously; the registry makes
//! sure no two of them ever own the same item.
//!
//! # Architecture
//!
//! ```text
//!             live snapshots                      on save
//! ┌──────────────┐        ┌───────────────┐              ┌───────────────┐
//! │ Catalog Feed │───────►│ Staging Layer │─────────────►│ Commit Engine │
//! └──────▲───────┘        └───────────────┘              └───────┬───────┘
//!        │                                                       │ one transaction
//!        │                  ┌──────────────┐                     │ per item
//!        └──────────────────│ CatalogStore │◄────────────────────┘
//!          change stream    └──────────────┘
//! ```
//!
//! - [`feed::CatalogFeed`]: standing subscription republishing full ordered snapshots
//! - [`staging::StagingLayer`]: the guest's uncommitted intent, overlaid on the snapshot
//! - [`engine::CommitEngine`]: per-item read-decide-write transactions with a
//!   conflict report
//! - [`RegistryReducer`] and [`RegistrySession`]: the reducer owning session
//!   state, and the facade running it on the runtime `Store`
//!
//! # Consistency
//!
//! ```text
//! Decision runs inside the store transaction, on a fresh read:
//!
//!   want reserve + free          → claim
//!   want reserve + mine          → re-affirm (idempotent)
//!   want reserve + someone else  → CONFLICT (abort, reported)
//!   want release + mine          → release
//!   want release + anything else → no-op
//! ```
//!
//! The store retries the whole block when another writer touched the record
//! in between, so of two guests racing for one item exactly one wins.

pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod feed;
pub mod identity;
pub mod metrics;
pub mod reducer;
pub mod session;
pub mod staging;
pub mod types;
pub mod view;

pub use config::Config;
pub use engine::{CommitEngine, CommitReport, ItemOutcome};
pub use error::RegistryError;
pub use reducer::{RegistryEnvironment, RegistryReducer};
pub use session::{RegistrySession, SaveOutcome, SessionSettings};
pub use staging::{StagedIntent, StagingLayer, ToggleOutcome};
pub use types::{RegistryAction, RegistryState, RequestId};
