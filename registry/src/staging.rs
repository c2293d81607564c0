//! Staging layer: the local guest's uncommitted intent.
//!
//! A sparse overlay on the live catalog. Only items toggled since the last
//! commit pass have an entry; everything else shows the store's state. While
//! a pass runs, the entries it works on move to an *in-flight* overlay so the
//! checkboxes do not flicker back before the store confirms. Entries the
//! store accepted stay in flight until a snapshot reflects them.

use gift_registry_core::item::{CatalogSnapshot, ClientId, ItemId};
use std::collections::BTreeMap;

/// One desired reservation state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedIntent {
    /// Item the intent is about
    pub id: ItemId,
    /// `true` reserves under the local identity, `false` releases
    pub reserve: bool,
}

/// Result of a local toggle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The intent was recorded; `checked` is the new effective state
    Staged {
        /// Effective checked state after the toggle
        checked: bool,
    },
    /// Another guest holds the item; nothing was staged
    Rejected {
        /// Identity holding the item
        owner: ClientId,
    },
}

/// Pending intent of the local guest.
#[derive(Clone, Debug)]
pub struct StagingLayer {
    client: ClientId,
    staged: BTreeMap<ItemId, bool>,
    in_flight: BTreeMap<ItemId, bool>,
}

impl StagingLayer {
    /// Empty staging for `client`.
    #[must_use]
    pub const fn new(client: ClientId) -> Self {
        Self {
            client,
            staged: BTreeMap::new(),
            in_flight: BTreeMap::new(),
        }
    }

    /// The local identity.
    #[must_use]
    pub const fn client(&self) -> &ClientId {
        &self.client
    }

    /// Checkbox state: staged entry, then in-flight entry, then the live
    /// record (`false` for unknown items).
    #[must_use]
    pub fn effective_checked(&self, id: &ItemId, catalog: &CatalogSnapshot) -> bool {
        self.staged
            .get(id)
            .or_else(|| self.in_flight.get(id))
            .copied()
            .unwrap_or_else(|| catalog.get(id).is_some_and(|item| item.reserved))
    }

    /// Whether the item is held by someone else, so the checkbox is disabled.
    #[must_use]
    pub fn is_disabled(&self, id: &ItemId, catalog: &CatalogSnapshot) -> bool {
        catalog
            .get(id)
            .is_some_and(|item| item.is_reserved_by_other(&self.client))
    }

    /// Whether `id` has an uncommitted or in-flight entry.
    #[must_use]
    pub fn is_pending(&self, id: &ItemId) -> bool {
        self.staged.contains_key(id) || self.in_flight.contains_key(id)
    }

    /// Flip the effective state of `id`, unless another guest holds it.
    ///
    /// Repeated toggles overwrite each other; the last one wins.
    pub fn toggle(&mut self, id: &ItemId, catalog: &CatalogSnapshot) -> ToggleOutcome {
        if let Some(owner) = catalog
            .get(id)
            .and_then(|item| item.owner())
            .filter(|owner| **owner != self.client)
        {
            return ToggleOutcome::Rejected {
                owner: owner.clone(),
            };
        }

        let checked = !self.effective_checked(id, catalog);
        self.staged.insert(id.clone(), checked);
        ToggleOutcome::Staged { checked }
    }

    /// Staged entries in id order.
    #[must_use]
    pub fn staged(&self) -> Vec<StagedIntent> {
        self.staged
            .iter()
            .map(|(id, reserve)| StagedIntent {
                id: id.clone(),
                reserve: *reserve,
            })
            .collect()
    }

    /// Number of staged entries (not counting in-flight ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Take the staged entries for a commit pass, keeping them visible as
    /// in-flight until [`StagingLayer::finish_commit`].
    pub fn begin_commit(&mut self) -> Vec<StagedIntent> {
        let intents = self.staged();
        self.in_flight.append(&mut self.staged);
        intents
    }

    /// End a commit pass.
    ///
    /// Entries in `unsuccessful` are dropped so the row shows the store's
    /// state again. Committed entries are kept until `catalog` (or a later
    /// snapshot passed to [`StagingLayer::settle`]) reflects them.
    pub fn finish_commit(&mut self, unsuccessful: &[ItemId], catalog: &CatalogSnapshot) {
        for id in unsuccessful {
            self.in_flight.remove(id);
        }
        self.settle(catalog);
    }

    /// Drop in-flight entries that `catalog` already reflects.
    ///
    /// A claim is reflected once the record is reserved, a release once the
    /// record is no longer held by the local guest. Missing records settle.
    pub fn settle(&mut self, catalog: &CatalogSnapshot) {
        let client = &self.client;
        self.in_flight.retain(|id, reserve| match catalog.get(id) {
            None => false,
            Some(item) if *reserve => !item.reserved,
            Some(item) => item.owner() == Some(client),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use gift_registry_core::item::GiftItem;
    use proptest::prelude::*;

    fn me() -> ClientId {
        ClientId::new("me")
    }

    fn catalog() -> CatalogSnapshot {
        CatalogSnapshot::from_items(vec![
            GiftItem::new("free", "Free", 1),
            GiftItem::new("mine", "Mine", 2).claimed_by(me()),
            GiftItem::new("theirs", "Theirs", 3).claimed_by(ClientId::new("them")),
        ])
    }

    #[test]
    fn effective_state_falls_back_to_live_record() {
        let staging = StagingLayer::new(me());
        let catalog = catalog();

        assert!(!staging.effective_checked(&ItemId::new("free"), &catalog));
        assert!(staging.effective_checked(&ItemId::new("mine"), &catalog));
        assert!(staging.effective_checked(&ItemId::new("theirs"), &catalog));
        assert!(!staging.effective_checked(&ItemId::new("unknown"), &catalog));
    }

    #[test]
    fn toggle_flips_and_records_intent() {
        let mut staging = StagingLayer::new(me());
        let catalog = catalog();

        assert_eq!(
            staging.toggle(&ItemId::new("free"), &catalog),
            ToggleOutcome::Staged { checked: true }
        );
        assert_eq!(
            staging.toggle(&ItemId::new("mine"), &catalog),
            ToggleOutcome::Staged { checked: false }
        );
        assert_eq!(
            staging.staged(),
            vec![
                StagedIntent { id: ItemId::new("free"), reserve: true },
                StagedIntent { id: ItemId::new("mine"), reserve: false },
            ]
        );
    }

    #[test]
    fn courtesy_guard_blocks_foreign_items() {
        let mut staging = StagingLayer::new(me());
        let catalog = catalog();
        let theirs = ItemId::new("theirs");

        assert!(staging.is_disabled(&theirs, &catalog));
        assert_eq!(
            staging.toggle(&theirs, &catalog),
            ToggleOutcome::Rejected { owner: ClientId::new("them") }
        );
        assert!(staging.is_empty());
    }

    #[test]
    fn reserved_without_owner_is_not_guarded() {
        let mut orphan = GiftItem::new("orphan", "Orphan", 1);
        orphan.reserved = true;
        let catalog = CatalogSnapshot::from_items(vec![orphan]);
        let mut staging = StagingLayer::new(me());

        assert!(!staging.is_disabled(&ItemId::new("orphan"), &catalog));
        assert_eq!(
            staging.toggle(&ItemId::new("orphan"), &catalog),
            ToggleOutcome::Staged { checked: false }
        );
    }

    #[test]
    fn in_flight_entries_stay_visible_until_finished() {
        let mut staging = StagingLayer::new(me());
        let catalog = catalog();
        let free = ItemId::new("free");
        staging.toggle(&free, &catalog);

        let intents = staging.begin_commit();
        assert_eq!(intents.len(), 1);
        assert!(staging.is_empty());
        assert!(staging.effective_checked(&free, &catalog));
        assert!(staging.is_pending(&free));

        // Committed, but the snapshot still shows the record free.
        staging.finish_commit(&[], &catalog);
        assert!(staging.effective_checked(&free, &catalog));
        assert!(staging.is_pending(&free));

        let confirmed = CatalogSnapshot::from_items(vec![GiftItem::new("free", "Free", 1).claimed_by(me())]);
        staging.settle(&confirmed);
        assert!(staging.effective_checked(&free, &confirmed));
        assert!(!staging.is_pending(&free));
    }

    #[test]
    fn unsuccessful_entries_fall_back_to_the_store() {
        let mut staging = StagingLayer::new(me());
        let catalog = catalog();
        let free = ItemId::new("free");
        staging.toggle(&free, &catalog);
        let _ = staging.begin_commit();

        staging.finish_commit(&[free.clone()], &catalog);

        assert!(!staging.effective_checked(&free, &catalog));
        assert!(!staging.is_pending(&free));
    }

    #[test]
    fn committed_release_settles_once_the_guest_no_longer_holds_it() {
        let mut staging = StagingLayer::new(me());
        let catalog = catalog();
        let mine = ItemId::new("mine");
        staging.toggle(&mine, &catalog);
        let _ = staging.begin_commit();

        staging.finish_commit(&[], &catalog);
        assert!(!staging.effective_checked(&mine, &catalog));
        assert!(staging.is_pending(&mine));

        staging.settle(&CatalogSnapshot::from_items(vec![GiftItem::new("mine", "Mine", 2)]));
        assert!(!staging.is_pending(&mine));
    }

    #[test]
    fn toggles_during_a_pass_wait_for_the_next_one() {
        let mut staging = StagingLayer::new(me());
        let catalog = catalog();
        let free = ItemId::new("free");
        staging.toggle(&free, &catalog);
        let _ = staging.begin_commit();

        // In-flight says checked, so this toggle unchecks.
        assert_eq!(staging.toggle(&free, &catalog), ToggleOutcome::Staged { checked: false });
        staging.finish_commit(&[], &catalog);

        assert_eq!(staging.staged(), vec![StagedIntent { id: free, reserve: false }]);
    }

    proptest! {
        #[test]
        fn last_toggle_wins(flips in 1_usize..12) {
            let mut staging = StagingLayer::new(me());
            let catalog = catalog();
            let free = ItemId::new("free");

            for _ in 0..flips {
                staging.toggle(&free, &catalog);
            }

            let expected = flips % 2 == 1;
            prop_assert_eq!(staging.len(), 1);
            prop_assert_eq!(staging.effective_checked(&free, &catalog), expected);
        }

        #[test]
        fn foreign_items_never_get_staged(toggles in proptest::collection::vec(0_usize..3, 0..20)) {
            let mut staging = StagingLayer::new(me());
            let catalog = catalog();
            let ids = [ItemId::new("free"), ItemId::new("mine"), ItemId::new("theirs")];

            for index in toggles {
                staging.toggle(&ids[index], &catalog);
            }

            prop_assert!(staging.staged().iter().all(|intent| intent.id != ids[2]));
        }
    }
}
