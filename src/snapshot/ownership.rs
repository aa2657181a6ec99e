//! Item → owner resolution.
//!
//! Items in a character's own inventories point straight at the character. Items in
//! placed containers point at the container object, whose `buildings` row names either
//! a character or a guild. Results are recomputed on every call; ownership changes as
//! players trade and clans form, and a stale label in an audit is worse than a slow one.

use serde::Serialize;

use super::{CharacterRow, GuildRow};
use crate::errors::SnapshotError;

/// `item_inventory.inv_type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum InventoryType {
    Backpack,
    Equipment,
    Hotbar,
    Container,
    Follower,
    Other(i64),
}

impl InventoryType {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => InventoryType::Backpack,
            1 => InventoryType::Equipment,
            2 => InventoryType::Hotbar,
            4 => InventoryType::Container,
            6 => InventoryType::Follower,
            other => InventoryType::Other(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            InventoryType::Backpack => 0,
            InventoryType::Equipment => 1,
            InventoryType::Hotbar => 2,
            InventoryType::Container => 4,
            InventoryType::Follower => 6,
            InventoryType::Other(code) => *code,
        }
    }

    /// Owner id is a character id.
    pub fn is_direct(&self) -> bool {
        matches!(
            self,
            InventoryType::Backpack | InventoryType::Equipment | InventoryType::Hotbar
        )
    }
}

/// Lookups the resolver needs. Implemented by [`super::SnapshotDb`]; tests use maps.
pub trait OwnershipSource {
    fn character(&self, id: i64) -> Result<Option<CharacterRow>, SnapshotError>;
    fn guild(&self, id: i64) -> Result<Option<GuildRow>, SnapshotError>;
    /// Owner (character or guild id) of a placed container object.
    fn container_owner(&self, object_id: i64) -> Result<Option<i64>, SnapshotError>;

    /// Blueprint class path of a placed object, used to name containers.
    fn container_class(&self, _object_id: i64) -> Result<Option<String>, SnapshotError> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OwnerKind {
    Character,
    Guild,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnershipResult {
    pub owner_kind: OwnerKind,
    pub owner_id: i64,
    pub owner_name: String,
    /// Clan of a character owner, when they have one.
    pub affiliation: Option<GuildRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Ownership {
    Resolved(OwnershipResult),
    /// No matching character or guild (deleted character, dangling container).
    Unresolved,
}

impl Ownership {
    /// Name used to group audit output: clan first, then the owner's own name.
    pub fn group_label(&self) -> &str {
        match self {
            Ownership::Resolved(result) => result
                .affiliation
                .as_ref()
                .map(|g| g.name.as_str())
                .unwrap_or(result.owner_name.as_str()),
            Ownership::Unresolved => "Unknown",
        }
    }

    pub fn owner_name(&self) -> Option<&str> {
        match self {
            Ownership::Resolved(result) => Some(result.owner_name.as_str()),
            Ownership::Unresolved => None,
        }
    }
}

pub struct OwnershipResolver<'a, S: OwnershipSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: OwnershipSource + ?Sized> OwnershipResolver<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    pub fn resolve(
        &self,
        item_owner_id: i64,
        inventory: InventoryType,
    ) -> Result<Ownership, SnapshotError> {
        if inventory.is_direct() {
            return self.character_owner(item_owner_id);
        }
        if inventory != InventoryType::Container {
            return Ok(Ownership::Unresolved);
        }

        let Some(owner_id) = self.source.container_owner(item_owner_id)? else {
            return Ok(Ownership::Unresolved);
        };
        // An id is either a guild or a character; guilds are checked first.
        if let Some(guild) = self.source.guild(owner_id)? {
            return Ok(Ownership::Resolved(OwnershipResult {
                owner_kind: OwnerKind::Guild,
                owner_id: guild.id,
                owner_name: guild.name,
                affiliation: None,
            }));
        }
        self.character_owner(owner_id)
    }

    fn character_owner(&self, character_id: i64) -> Result<Ownership, SnapshotError> {
        let Some(character) = self.source.character(character_id)? else {
            return Ok(Ownership::Unresolved);
        };
        let affiliation = match character.guild_id {
            Some(guild_id) => self.source.guild(guild_id)?,
            None => None,
        };
        Ok(Ownership::Resolved(OwnershipResult {
            owner_kind: OwnerKind::Character,
            owner_id: character.id,
            owner_name: character.name,
            affiliation,
        }))
    }
}
