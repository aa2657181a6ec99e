//! Read-only ownership and quantity audit for one item template.
//!
//! Every stored copy is decoded for its stack size, attributed to an owner group
//! (clan first, then the owning character or guild) and labelled with where it sits.

pub mod catalog;

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, warn};
use serde::Serialize;

use crate::blob;
use crate::errors::SnapshotError;
use crate::logutil::hex_preview;
use crate::snapshot::{
    short_class_name, InventoryType, ItemRow, Ownership, OwnershipResolver, OwnershipSource,
};

pub use catalog::ItemCatalog;

/// Where a copy of the item is stored.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Location {
    Inventory(String),
    Equipment(String),
    Hotbar(String),
    Container(String),
    Follower,
    Other(i64),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Inventory(who) => write!(f, "Inventory ({who})"),
            Location::Equipment(who) => write!(f, "Equipment ({who})"),
            Location::Hotbar(who) => write!(f, "Hotbar ({who})"),
            Location::Container(name) => write!(f, "Container ({name})"),
            Location::Follower => f.write_str("Follower inventory"),
            Location::Other(code) => write!(f, "Type {code}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportLine {
    pub location: Location,
    pub owner_id: i64,
    pub slot: i64,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerGroup {
    pub label: String,
    pub total: u64,
    /// Sorted by location label.
    pub lines: Vec<ReportLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub template_id: u32,
    pub item_name: Option<String>,
    /// Largest holder first.
    pub groups: Vec<OwnerGroup>,
    pub total: u64,
    /// Rows whose blob could not be decoded.
    pub skipped: usize,
}

impl ItemReport {
    /// Build the report from the rows of one template. Rows of other templates are
    /// ignored; undecodable rows are counted in `skipped` and left out of the totals.
    pub fn build<S: OwnershipSource + ?Sized>(
        template_id: u32,
        rows: &[ItemRow],
        source: &S,
    ) -> Result<Self, SnapshotError> {
        let resolver = OwnershipResolver::new(source);
        let mut groups: BTreeMap<String, OwnerGroup> = BTreeMap::new();
        let mut skipped = 0;

        for row in rows.iter().filter(|r| r.template_id == template_id) {
            let model = match blob::decode(&row.data, template_id) {
                Ok(model) => model,
                Err(e) => {
                    warn!(
                        "audit: skipping item {}/{} of owner {}: {} [{}]",
                        row.inv_type,
                        row.item_id,
                        row.owner_id,
                        e,
                        hex_preview(&row.data)
                    );
                    skipped += 1;
                    continue;
                }
            };
            if let Some(t) = model.truncation() {
                debug!(
                    "audit: item {}/{} truncated at offset {}, quantity taken from what was read",
                    row.inv_type, row.item_id, t.offset
                );
            }

            let inventory = row.inventory_type();
            let ownership = resolver.resolve(row.owner_id, inventory)?;
            let location = location_for(inventory, row.owner_id, &ownership, source)?;
            let quantity = model.quantity();

            let label = ownership.group_label().to_string();
            let group = groups.entry(label.clone()).or_insert_with(|| OwnerGroup {
                label,
                total: 0,
                lines: Vec::new(),
            });
            group.total += u64::from(quantity);
            group.lines.push(ReportLine {
                location,
                owner_id: row.owner_id,
                slot: row.item_id,
                quantity,
            });
        }

        let mut groups: Vec<OwnerGroup> = groups.into_values().collect();
        for group in &mut groups {
            group
                .lines
                .sort_by_cached_key(|line| line.location.to_string());
        }
        // stable: equal totals keep label order
        groups.sort_by(|a, b| b.total.cmp(&a.total));
        let total = groups.iter().map(|g| g.total).sum();

        Ok(Self {
            template_id,
            item_name: None,
            groups,
            total,
            skipped,
        })
    }

    pub fn with_catalog(mut self, catalog: &ItemCatalog) -> Self {
        self.item_name = catalog.name(self.template_id).map(str::to_string);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

fn location_for<S: OwnershipSource + ?Sized>(
    inventory: InventoryType,
    owner_id: i64,
    ownership: &Ownership,
    source: &S,
) -> Result<Location, SnapshotError> {
    let who = || ownership.owner_name().unwrap_or("Unknown").to_string();
    Ok(match inventory {
        InventoryType::Backpack => Location::Inventory(who()),
        InventoryType::Equipment => Location::Equipment(who()),
        InventoryType::Hotbar => Location::Hotbar(who()),
        InventoryType::Container => {
            let class = source.container_class(owner_id)?;
            Location::Container(short_class_name(class.as_deref()))
        }
        InventoryType::Follower => Location::Follower,
        InventoryType::Other(code) => Location::Other(code),
    })
}

/// `1234567` → `1,234,567`
pub fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

impl fmt::Display for ItemReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "OWNERSHIP REPORT - ITEM: {} (ID: {})",
            self.item_name.as_deref().unwrap_or("Unknown Name"),
            self.template_id
        )?;
        writeln!(f, "{}", "-".repeat(90))?;
        for group in &self.groups {
            writeln!(
                f,
                "GROUP: {:40} | TOTAL: {:>10}",
                group.label,
                thousands(group.total)
            )?;
            for line in &group.lines {
                writeln!(
                    f,
                    "  └─ {:65} : {:>10}",
                    line.location.to_string(),
                    thousands(u64::from(line.quantity))
                )?;
            }
        }
        writeln!(f, "{}", "-".repeat(90))?;
        write!(f, "TOTAL: {}", thousands(self.total))?;
        if self.skipped > 0 {
            write!(f, " ({} unreadable items skipped)", self.skipped)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{CharacterRow, GuildRow};
    use std::collections::HashMap;

    const TEMPLATE: u32 = 10097;

    #[derive(Default)]
    struct Fixture {
        characters: HashMap<i64, CharacterRow>,
        guilds: HashMap<i64, GuildRow>,
        buildings: HashMap<i64, i64>,
        classes: HashMap<i64, String>,
    }

    impl OwnershipSource for Fixture {
        fn character(&self, id: i64) -> Result<Option<CharacterRow>, SnapshotError> {
            Ok(self.characters.get(&id).cloned())
        }
        fn guild(&self, id: i64) -> Result<Option<GuildRow>, SnapshotError> {
            Ok(self.guilds.get(&id).cloned())
        }
        fn container_owner(&self, object_id: i64) -> Result<Option<i64>, SnapshotError> {
            Ok(self.buildings.get(&object_id).copied())
        }
        fn container_class(&self, object_id: i64) -> Result<Option<String>, SnapshotError> {
            Ok(self.classes.get(&object_id).cloned())
        }
    }

    fn blob_with_quantity(quantity: Option<u32>) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&blob::HEADER_MAGIC);
        for s in ["/Game/Items/Food/Ration.Ration_C", "Ration_C_1"] {
            out.extend_from_slice(&(s.len() as u32 + 1).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        out.extend_from_slice(&TEMPLATE.to_le_bytes());
        match quantity {
            Some(q) => {
                out.extend_from_slice(&1u32.to_le_bytes());
                out.extend_from_slice(&1u32.to_le_bytes());
                out.extend_from_slice(&q.to_le_bytes());
            }
            None => out.extend_from_slice(&0u32.to_le_bytes()),
        }
        out
    }

    fn row(owner_id: i64, inv_type: i64, slot: i64, data: Vec<u8>) -> ItemRow {
        ItemRow {
            item_id: slot,
            owner_id,
            inv_type,
            template_id: TEMPLATE,
            data,
        }
    }

    fn fixture() -> Fixture {
        let mut f = Fixture::default();
        f.characters.insert(
            1,
            CharacterRow {
                id: 1,
                name: "Tharn".into(),
                guild_id: Some(900),
            },
        );
        f.characters.insert(
            2,
            CharacterRow {
                id: 2,
                name: "Kalla".into(),
                guild_id: None,
            },
        );
        f.guilds.insert(
            900,
            GuildRow {
                id: 900,
                name: "Teppanyaki".into(),
            },
        );
        f.buildings.insert(500, 900);
        f.classes.insert(
            500,
            "/Game/Placeables/BP_PL_Chest_Large.BP_PL_Chest_Large_C".into(),
        );
        f
    }

    #[test]
    fn groups_by_clan_and_sorts_by_total() {
        let rows = vec![
            row(1, 0, 3, blob_with_quantity(Some(10))),
            row(500, 4, 0, blob_with_quantity(Some(250))),
            row(2, 2, 1, blob_with_quantity(None)),
            row(77, 6, 0, blob_with_quantity(Some(4))),
        ];
        let report = ItemReport::build(TEMPLATE, &rows, &fixture()).unwrap();

        let labels: Vec<&str> = report.groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["Teppanyaki", "Unknown", "Kalla"]);
        assert_eq!(report.groups[0].total, 260);
        assert_eq!(report.groups[2].total, 1);
        assert_eq!(report.total, 265);
        assert_eq!(report.skipped, 0);

        let locations: Vec<String> = report.groups[0]
            .lines
            .iter()
            .map(|l| l.location.to_string())
            .collect();
        assert_eq!(locations, vec!["Container (Chest_Large)", "Inventory (Tharn)"]);
        assert_eq!(report.groups[1].lines[0].location, Location::Follower);
        assert_eq!(
            report.groups[2].lines[0].location,
            Location::Hotbar("Kalla".into())
        );
    }

    #[test]
    fn undecodable_rows_are_skipped() {
        let rows = vec![
            row(2, 0, 0, vec![0xFF; 8]),
            row(2, 0, 1, Vec::new()),
            row(2, 0, 2, blob_with_quantity(Some(3))),
        ];
        let report = ItemReport::build(TEMPLATE, &rows, &fixture()).unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.total, 3);
        assert!(report.to_string().contains("2 unreadable items skipped"));
    }

    #[test]
    fn catalog_names_the_item() {
        let catalog = ItemCatalog::from_reader(
            "id,name\n10097,\"NSLOCTEXT(\"\"\"\", \"\"k\"\", \"\"Maul\"\")\"\n".as_bytes(),
        )
        .unwrap();
        let report = ItemReport::build(TEMPLATE, &[], &fixture())
            .unwrap()
            .with_catalog(&catalog);
        assert!(report.is_empty());
        assert!(report.to_string().starts_with("OWNERSHIP REPORT - ITEM: Maul (ID: 10097)"));
    }

    #[test]
    fn thousands_separators() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(1234567), "1,234,567");
    }
}
