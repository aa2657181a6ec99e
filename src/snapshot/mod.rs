//! Read-only access to a copy of the game's SQLite store.
//!
//! The live database keeps changing while the server runs; everything here works on a
//! periodic snapshot opened read-only so no query can ever take a write lock. Only
//! the handful of tables the auditor needs are touched:
//!
//! | table            | columns used                                      |
//! |------------------|---------------------------------------------------|
//! | `item_inventory` | `item_id, owner_id, inv_type, template_id, data`  |
//! | `characters`     | `id, char_name, guild`                            |
//! | `guilds`         | `guildId, name`                                   |
//! | `buildings`      | `object_id, owner_id`                             |
//! | `actor_position` | `id, class`                                       |

pub mod ownership;

use std::path::Path;

use log::debug;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;

use crate::errors::SnapshotError;

pub use ownership::{
    InventoryType, OwnerKind, Ownership, OwnershipResolver, OwnershipResult, OwnershipSource,
};

/// One stored item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemRow {
    /// Slot index inside the owning inventory.
    pub item_id: i64,
    pub owner_id: i64,
    pub inv_type: i64,
    pub template_id: u32,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl ItemRow {
    pub fn inventory_type(&self) -> InventoryType {
        InventoryType::from_code(self.inv_type)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            item_id: row.get(0)?,
            owner_id: row.get(1)?,
            inv_type: row.get(2)?,
            template_id: row.get(3)?,
            data: row.get::<_, Option<Vec<u8>>>(4)?.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CharacterRow {
    pub id: i64,
    pub name: String,
    pub guild_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuildRow {
    pub id: i64,
    pub name: String,
}

const ITEM_COLUMNS: &str = "item_id, owner_id, inv_type, template_id, data";

/// SQLite snapshot handle. One per thread; `rusqlite::Connection` is not `Sync`.
pub struct SnapshotDb {
    conn: Connection,
}

impl SnapshotDb {
    /// Open the snapshot at `path` read-only. The file must already exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SnapshotError::Unavailable(format!(
                "{} is not a file",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        debug!("opened snapshot {} read-only", path.display());
        Ok(Self { conn })
    }

    /// Wrap an existing connection (tests build snapshots in memory).
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Item in `slot` of the given owner's inventory.
    pub fn item(
        &self,
        owner_id: i64,
        slot: i64,
        inventory: InventoryType,
    ) -> Result<Option<ItemRow>, SnapshotError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM item_inventory \
             WHERE owner_id = ?1 AND item_id = ?2 AND inv_type = ?3"
        );
        let row = self
            .conn
            .query_row(&sql, params![owner_id, slot, inventory.code()], ItemRow::from_row)
            .optional()?;
        Ok(row)
    }

    /// Every stored instance of a template, across all owners.
    pub fn items_by_template(&self, template_id: u32) -> Result<Vec<ItemRow>, SnapshotError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM item_inventory WHERE template_id = ?1 \
             ORDER BY owner_id, inv_type, item_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![template_id], ItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Slots in use in one inventory, ascending.
    pub fn occupied_slots(
        &self,
        owner_id: i64,
        inventory: InventoryType,
    ) -> Result<Vec<i64>, SnapshotError> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id FROM item_inventory WHERE owner_id = ?1 AND inv_type = ?2 \
             ORDER BY item_id",
        )?;
        let slots = stmt
            .query_map(params![owner_id, inventory.code()], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(slots)
    }

    /// Lowest slot index not in use in one inventory.
    pub fn first_free_slot(
        &self,
        owner_id: i64,
        inventory: InventoryType,
    ) -> Result<i64, SnapshotError> {
        let mut free = 0;
        for slot in self.occupied_slots(owner_id, inventory)? {
            if slot == free {
                free += 1;
            } else if slot > free {
                break;
            }
        }
        Ok(free)
    }
}

impl OwnershipSource for SnapshotDb {
    fn character(&self, id: i64) -> Result<Option<CharacterRow>, SnapshotError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, char_name, guild FROM characters WHERE id = ?1",
                params![id],
                |row| {
                    Ok(CharacterRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        guild_id: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn guild(&self, id: i64) -> Result<Option<GuildRow>, SnapshotError> {
        let row = self
            .conn
            .query_row(
                "SELECT guildId, name FROM guilds WHERE guildId = ?1",
                params![id],
                |row| {
                    Ok(GuildRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn container_owner(&self, object_id: i64) -> Result<Option<i64>, SnapshotError> {
        let owner = self
            .conn
            .query_row(
                "SELECT owner_id FROM buildings WHERE object_id = ?1",
                params![object_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner)
    }

    fn container_class(&self, object_id: i64) -> Result<Option<String>, SnapshotError> {
        let class = self
            .conn
            .query_row(
                "SELECT class FROM actor_position WHERE id = ?1",
                params![object_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(class)
    }
}

/// Short display name for a blueprint class path:
/// `/Game/.../BP_PL_Chest_Large.BP_PL_Chest_Large_C` → `Chest_Large`.
pub fn short_class_name(class_path: Option<&str>) -> String {
    match class_path {
        Some(path) if !path.is_empty() => {
            let tail = path.rsplit('.').next().unwrap_or(path);
            let tail = tail.strip_prefix("BP_PL_").unwrap_or(tail);
            tail.strip_suffix("_C").unwrap_or(tail).to_string()
        }
        _ => "Unknown".to_string(),
    }
}
