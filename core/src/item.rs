//! Gift records, client identities and catalog snapshots.
//!
//! This module defines strong types for item identification (`ItemId`,
//! `ItemRef`), the pseudonymous identity of a guest's device (`ClientId`), the
//! gift record itself (`GiftItem`) and the immutable, ordered view of the
//! whole collection delivered by a catalog subscription (`CatalogSnapshot`).

use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Section label used for items that do not name one.
pub const DEFAULT_SECTION: &str = "General";

/// Error type for identifier parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid identifier: {0}")]
pub struct ParseIdError(String);

/// Opaque, stable identifier of a gift record.
///
/// Assigned by the store and immutable. For example `"toaster"` or a
/// store-generated document key.
///
/// # Validation
///
/// - `FromStr::from_str()`: Validates input (rejects empty strings)
/// - `From::from()` and `new()`: No validation (for trusted input)
///
/// # Examples
///
/// ```
/// use gift_registry_core::item::ItemId;
///
/// let id = ItemId::new("toaster");
/// assert_eq!(id.as_str(), "toaster");
///
/// let parsed: ItemId = "blender".parse().unwrap();
/// assert_eq!(parsed, ItemId::new("blender"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Create a new `ItemId` from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the item ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseIdError("Item ID cannot be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Pseudonymous identity of one guest device.
///
/// Generated once per device, persisted locally and written into
/// `reservedBy` when the guest claims an item. It is not verified by anyone:
/// a client can claim to be any identity by forging the value.
///
/// # Examples
///
/// ```
/// use gift_registry_core::item::ClientId;
///
/// let alice = ClientId::new("alice-device");
/// assert_eq!(alice.to_string(), "alice-device");
///
/// let generated = ClientId::generate();
/// assert!(!generated.as_str().is_empty());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Create a `ClientId` from a known value (e.g. one read back from disk).
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identity.
    ///
    /// Uses a random UUID v4 from the operating system's secure source. When
    /// that source is unavailable, falls back to a `u_`-prefixed base-36
    /// token from a time-seeded generator.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0_u8; 16];
        match OsRng.try_fill_bytes(&mut bytes) {
            Ok(()) => Self(uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()),
            Err(_) => Self::fallback_token(),
        }
    }

    fn fallback_token() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() ^ u64::from(elapsed.subsec_nanos()))
            .unwrap_or_default()
            ^ u64::from(std::process::id());
        let mut rng = StdRng::seed_from_u64(seed);
        let token: String = (0..7)
            .filter_map(|_| char::from_digit(rng.gen_range(0..36), 36))
            .collect();
        Self(format!("u_{token}"))
    }

    /// Get the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClientId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseIdError("Client ID cannot be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Address of one record: collection name plus item id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ItemRef {
    collection: String,
    id: ItemId,
}

impl ItemRef {
    /// Build a reference to `id` inside `collection`.
    #[must_use]
    pub fn new(collection: impl Into<String>, id: ItemId) -> Self {
        Self {
            collection: collection.into(),
            id,
        }
    }

    /// Collection the record lives in.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Item id within the collection.
    #[must_use]
    pub const fn id(&self) -> &ItemId {
        &self.id
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// The reservation fields written by a transaction.
///
/// Writes merge: only `reserved` and `reservedBy` are touched, everything
/// else on the record is preserved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationFields {
    /// New value of `reserved`
    pub reserved: bool,
    /// New value of `reservedBy` (always `None` when `reserved` is false)
    pub reserved_by: Option<ClientId>,
}

impl ReservationFields {
    /// Fields claiming the record for `owner`.
    #[must_use]
    pub const fn claimed_by(owner: ClientId) -> Self {
        Self {
            reserved: true,
            reserved_by: Some(owner),
        }
    }

    /// Fields releasing the record.
    #[must_use]
    pub const fn released() -> Self {
        Self {
            reserved: false,
            reserved_by: None,
        }
    }
}

/// A single entry of the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftItem {
    /// Stable identifier assigned by the store
    pub id: ItemId,
    /// Display label
    #[serde(default)]
    pub name: String,
    /// Grouping label, `None` means [`DEFAULT_SECTION`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Sort key for display ordering (ascending)
    #[serde(default)]
    pub order: i64,
    /// Whether the item is currently claimed
    #[serde(default)]
    pub reserved: bool,
    /// Owner of the claim, only meaningful while `reserved` is true
    #[serde(default)]
    pub reserved_by: Option<ClientId>,
}

impl GiftItem {
    /// Creates a new, unreserved item
    #[must_use]
    pub fn new(id: impl Into<ItemId>, name: impl Into<String>, order: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            section: None,
            order,
            reserved: false,
            reserved_by: None,
        }
    }

    /// Places the item in a section
    #[must_use]
    pub fn in_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    /// Marks the item as reserved by `owner`
    #[must_use]
    pub fn claimed_by(mut self, owner: ClientId) -> Self {
        self.apply(&ReservationFields::claimed_by(owner));
        self
    }

    /// Record created by a merge write into a missing document: only the
    /// reservation fields are present.
    #[must_use]
    pub fn from_fields(id: ItemId, fields: &ReservationFields) -> Self {
        let mut item = Self::new(id, String::new(), 0);
        item.apply(fields);
        item
    }

    /// Section label, falling back to [`DEFAULT_SECTION`]
    #[must_use]
    pub fn section_or_default(&self) -> &str {
        match self.section.as_deref() {
            Some(section) if !section.is_empty() => section,
            _ => DEFAULT_SECTION,
        }
    }

    /// Current owner, if the item is reserved
    #[must_use]
    pub fn owner(&self) -> Option<&ClientId> {
        if self.reserved {
            self.reserved_by.as_ref()
        } else {
            None
        }
    }

    /// Whether somebody other than `client` holds the item.
    ///
    /// A reserved record without an owner is not considered foreign here;
    /// the store-side transaction still refuses to hand it out.
    #[must_use]
    pub fn is_reserved_by_other(&self, client: &ClientId) -> bool {
        self.owner().is_some_and(|owner| owner != client)
    }

    /// Merge reservation fields into the record
    pub fn apply(&mut self, fields: &ReservationFields) {
        self.reserved = fields.reserved;
        self.reserved_by = if fields.reserved {
            fields.reserved_by.clone()
        } else {
            None
        };
    }
}

/// Immutable, ordered view of the whole collection.
///
/// Cheap to clone (shared slices). A new snapshot replaces the previous one
/// wholesale, so consumers never observe a partially updated list.
#[derive(Clone, Debug, Default)]
pub struct CatalogSnapshot {
    items: Arc<[GiftItem]>,
    index: Arc<HashMap<ItemId, usize>>,
}

impl CatalogSnapshot {
    /// Snapshot of an empty collection.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from items already in display order.
    #[must_use]
    pub fn from_items(items: Vec<GiftItem>) -> Self {
        let index = items
            .iter()
            .enumerate()
            .map(|(position, item)| (item.id.clone(), position))
            .collect();
        Self {
            items: items.into(),
            index: Arc::new(index),
        }
    }

    /// Look up an item by id.
    #[must_use]
    pub fn get(&self, id: &ItemId) -> Option<&GiftItem> {
        self.index.get(id).and_then(|&position| self.items.get(position))
    }

    /// Items in display order.
    #[must_use]
    pub fn items(&self) -> &[GiftItem] {
        &self.items
    }

    /// Iterate items in display order.
    pub fn iter(&self) -> std::slice::Iter<'_, GiftItem> {
        self.items.iter()
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Group items by section, sections in order of first appearance.
    #[must_use]
    pub fn sections(&self) -> Vec<(&str, Vec<&GiftItem>)> {
        let mut sections: Vec<(&str, Vec<&GiftItem>)> = Vec::new();
        for item in self.items.iter() {
            let name = item.section_or_default();
            match sections.iter_mut().find(|(section, _)| *section == name) {
                Some((_, members)) => members.push(item),
                None => sections.push((name, vec![item])),
            }
        }
        sections
    }
}

impl PartialEq for CatalogSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<'a> IntoIterator for &'a CatalogSnapshot {
    type Item = &'a GiftItem;
    type IntoIter = std::slice::Iter<'a, GiftItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
