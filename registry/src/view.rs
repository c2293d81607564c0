//! Grouped view of the registry, as a UI renders it.

use crate::staging::StagingLayer;
use gift_registry_core::item::{CatalogSnapshot, ItemId};
use std::fmt;

/// Label next to a checked item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Badge {
    /// The store shows the local guest as owner
    ReservedByYou,
    /// Checked, but not (yet) owned by the local guest in the store
    Reserved,
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReservedByYou => write!(f, "reserved (you)"),
            Self::Reserved => write!(f, "reserved"),
        }
    }
}

/// One item row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowView {
    /// Item id
    pub id: ItemId,
    /// Display label
    pub name: String,
    /// Effective checkbox state
    pub checked: bool,
    /// Whether the courtesy guard applies
    pub disabled: bool,
    /// Whether a staged or in-flight intent exists
    pub pending: bool,
    /// Badge shown for checked rows
    pub badge: Option<Badge>,
}

/// Rows of one section, in catalog order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionView {
    /// Section label
    pub name: String,
    /// Rows
    pub rows: Vec<RowView>,
}

/// The whole registry, grouped by section in first-appearance order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryView {
    /// Sections
    pub sections: Vec<SectionView>,
}

impl RegistryView {
    /// Build the view of `catalog` overlaid with `staging`.
    #[must_use]
    pub fn build(catalog: &CatalogSnapshot, staging: &StagingLayer) -> Self {
        let sections = catalog
            .sections()
            .into_iter()
            .map(|(name, items)| SectionView {
                name: name.to_string(),
                rows: items
                    .into_iter()
                    .map(|item| {
                        let checked = staging.effective_checked(&item.id, catalog);
                        let badge = checked.then(|| {
                            if item.reserved && item.owner() == Some(staging.client()) {
                                Badge::ReservedByYou
                            } else {
                                Badge::Reserved
                            }
                        });
                        RowView {
                            id: item.id.clone(),
                            name: item.name.clone(),
                            checked,
                            disabled: staging.is_disabled(&item.id, catalog),
                            pending: staging.is_pending(&item.id),
                            badge,
                        }
                    })
                    .collect(),
            })
            .collect();

        Self { sections }
    }

    /// Look up a row by id.
    #[must_use]
    pub fn row(&self, id: &ItemId) -> Option<&RowView> {
        self.sections
            .iter()
            .flat_map(|section| section.rows.iter())
            .find(|row| &row.id == id)
    }

    /// Total number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.iter().map(|section| section.rows.len()).sum()
    }

    /// Whether there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|section| section.rows.is_empty())
    }
}

impl fmt::Display for RegistryView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "(the registry is empty)");
        }

        for section in &self.sections {
            writeln!(f, "{}", section.name)?;
            for row in &section.rows {
                let mark = match (row.checked, row.disabled) {
                    (true, true) => "[#]",
                    (true, false) => "[x]",
                    (false, _) => "[ ]",
                };
                write!(f, "  {mark} {:<20} {}", row.name, row.id)?;
                if let Some(badge) = row.badge {
                    write!(f, "  {badge}")?;
                }
                if row.pending {
                    write!(f, "  *")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use gift_registry_core::item::{ClientId, GiftItem};

    fn me() -> ClientId {
        ClientId::new("me")
    }

    fn catalog() -> CatalogSnapshot {
        CatalogSnapshot::from_items(vec![
            GiftItem::new("kettle", "Kettle", 1).in_section("Kitchen"),
            GiftItem::new("towels", "Towels", 2).in_section("Bathroom").claimed_by(me()),
            GiftItem::new("plates", "Plates", 3)
                .in_section("Kitchen")
                .claimed_by(ClientId::new("them")),
            GiftItem::new("voucher", "Voucher", 4),
        ])
    }

    #[test]
    fn groups_by_first_appearance() {
        let view = RegistryView::build(&catalog(), &StagingLayer::new(me()));
        let names: Vec<_> = view.sections.iter().map(|section| section.name.as_str()).collect();

        assert_eq!(names, vec!["Kitchen", "Bathroom", "General"]);
        assert_eq!(view.sections[0].rows.len(), 2);
        assert_eq!(view.len(), 4);
    }

    #[test]
    fn badges_distinguish_owner() {
        let view = RegistryView::build(&catalog(), &StagingLayer::new(me()));

        assert_eq!(view.row(&ItemId::new("towels")).unwrap().badge, Some(Badge::ReservedByYou));
        let plates = view.row(&ItemId::new("plates")).unwrap();
        assert_eq!(plates.badge, Some(Badge::Reserved));
        assert!(plates.disabled);
        assert_eq!(view.row(&ItemId::new("kettle")).unwrap().badge, None);
    }

    #[test]
    fn staged_rows_are_checked_and_pending() {
        let catalog = catalog();
        let mut staging = StagingLayer::new(me());
        staging.toggle(&ItemId::new("kettle"), &catalog);

        let view = RegistryView::build(&catalog, &staging);
        let kettle = view.row(&ItemId::new("kettle")).unwrap();

        assert!(kettle.checked);
        assert!(kettle.pending);
        assert_eq!(kettle.badge, Some(Badge::Reserved));
        assert!(view.to_string().contains("reserved (you)"));
    }

    #[test]
    fn empty_catalog_renders_placeholder() {
        let view = RegistryView::build(&CatalogSnapshot::default(), &StagingLayer::new(me()));
        assert!(view.is_empty());
        assert_eq!(view.to_string(), "(the registry is empty)\n");
    }
}
