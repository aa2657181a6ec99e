//! Property id → value kind table.
//!
//! Blobs carry no type tag for property values: whether the 4 bytes of an id are an
//! integer or a float is only known from observation of the game. Some ids mean
//! different things per item category (id 7 is the integer heavy damage of a weapon but
//! the float max durability of armor and tools), so lookups are keyed by
//! `(id, CategoryHint)` with a per-id fallback.
//!
//! The schema is built once at startup (built-in table or a TOML file) and shared by
//! reference; it is never mutated afterwards.
//!
//! ```toml
//! [[property]]
//! id = 7
//! name = "Heavy damage"
//! kind = "int"
//! categories = { armor = "float", tool = "float" }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::SchemaError;

/// Coarse item classification derived from a blob's class path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryHint {
    Weapon,
    Armor,
    Tool,
    Container,
    Generic,
}

/// Ordered rules; the first match wins. Armor is tested before container words so an
/// armor chest piece is not mistaken for a storage chest.
const CATEGORY_RULES: &[(&str, CategoryHint)] = &[
    ("weapon", CategoryHint::Weapon),
    ("armor", CategoryHint::Armor),
    ("tool", CategoryHint::Tool),
    ("chest", CategoryHint::Container),
    ("box", CategoryHint::Container),
    ("vault", CategoryHint::Container),
];

impl CategoryHint {
    /// Classify an Unreal-style class path, e.g.
    /// `/Game/Items/Weapons/Maul2h/BP_Item_MaulBase.BP_Item_MaulBase_C` → `Weapon`.
    pub fn from_class_path(class_path: &str) -> Self {
        let lowered = class_path.to_ascii_lowercase();
        CATEGORY_RULES
            .iter()
            .find(|(needle, _)| lowered.contains(needle))
            .map(|(_, hint)| *hint)
            .unwrap_or(CategoryHint::Generic)
    }
}

impl fmt::Display for CategoryHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CategoryHint::Weapon => "weapon",
            CategoryHint::Armor => "armor",
            CategoryHint::Tool => "tool",
            CategoryHint::Container => "container",
            CategoryHint::Generic => "generic",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "float")]
    Float,
    /// Id not present in the schema. Copied verbatim, never dropped.
    #[serde(rename = "raw")]
    RawUnknown,
}

/// Which console verb re-applies a property on a live item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplyVerb {
    #[default]
    #[serde(rename = "int")]
    IntApply,
    #[serde(rename = "float")]
    FloatApply,
}

/// One schema entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: ValueKind,
    /// Category-specific kinds that take precedence over `kind`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub categories: BTreeMap<CategoryHint, ValueKind>,
}

impl PropertyDef {
    fn new(id: u32, name: &str, kind: ValueKind) -> Self {
        Self {
            id,
            name: Some(name.to_string()),
            kind,
            categories: BTreeMap::new(),
        }
    }

    fn with_override(mut self, category: CategoryHint, kind: ValueKind) -> Self {
        self.categories.insert(category, kind);
        self
    }
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(rename = "property", default)]
    properties: Vec<PropertyDef>,
}

/// Immutable `(id, category) → (kind, verb)` table.
#[derive(Debug, Clone)]
pub struct PropertySchema {
    entries: HashMap<u32, PropertyDef>,
    unknown_apply: ApplyVerb,
}

impl PropertySchema {
    /// Build a schema from explicit definitions. Fails on duplicate ids.
    pub fn from_defs(defs: Vec<PropertyDef>) -> Result<Self, SchemaError> {
        let mut entries = HashMap::with_capacity(defs.len());
        for def in defs {
            let id = def.id;
            if entries.insert(id, def).is_some() {
                return Err(SchemaError::DuplicateId(id));
            }
        }
        Ok(Self {
            entries,
            unknown_apply: ApplyVerb::default(),
        })
    }

    /// The table observed on live servers.
    pub fn builtin() -> Self {
        use CategoryHint::{Armor, Tool};
        use ValueKind::{Float, Int};

        let defs = vec![
            PropertyDef::new(1, "Quantity", Int),
            PropertyDef::new(4, "Modifier 4", Float),
            PropertyDef::new(5, "Modifier 5", Float),
            PropertyDef::new(6, "Light damage", Int),
            PropertyDef::new(7, "Heavy damage", Int)
                .with_override(Armor, Float)
                .with_override(Tool, Float),
            PropertyDef::new(8, "Durability", Float),
            PropertyDef::new(11, "Armor penetration", Float),
            PropertyDef::new(22, "Instance id", Int),
            PropertyDef::new(29, "Modifier 29", Float),
            PropertyDef::new(30, "Modifier 30", Float),
            PropertyDef::new(40, "Stat 40", Int),
            PropertyDef::new(63, "Kit penetration bonus", Int),
            PropertyDef::new(65, "Stat 65", Int),
            PropertyDef::new(66, "Crafter tier", Int),
            PropertyDef::new(67, "Crafter profession", Int),
            PropertyDef::new(71, "Stat 71", Int),
            PropertyDef::new(72, "Stat 72", Int),
            PropertyDef::new(147, "Stat 147", Int),
        ];
        let entries = defs.into_iter().map(|d| (d.id, d)).collect();
        Self {
            entries,
            unknown_apply: ApplyVerb::default(),
        }
    }

    /// Parse a TOML schema document (see module docs for the layout).
    pub fn from_toml_str(content: &str) -> Result<Self, SchemaError> {
        let file: SchemaFile = toml::from_str(content)?;
        Self::from_defs(file.properties)
    }

    /// Load a TOML schema from disk. Meant to run once during startup.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Verb used for ids the table does not know.
    pub fn with_unknown_apply(mut self, verb: ApplyVerb) -> Self {
        self.unknown_apply = verb;
        self
    }

    pub fn unknown_apply(&self) -> ApplyVerb {
        self.unknown_apply
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolve_kind(&self, id: u32, category: CategoryHint) -> ValueKind {
        match self.entries.get(&id) {
            Some(def) => def.categories.get(&category).copied().unwrap_or(def.kind),
            None => ValueKind::RawUnknown,
        }
    }

    pub fn apply_verb_for(&self, id: u32, category: CategoryHint) -> ApplyVerb {
        match self.resolve_kind(id, category) {
            ValueKind::Int => ApplyVerb::IntApply,
            ValueKind::Float => ApplyVerb::FloatApply,
            ValueKind::RawUnknown => self.unknown_apply,
        }
    }

    /// Human label for reports, if the table has one.
    pub fn label(&self, id: u32) -> Option<&str> {
        self.entries.get(&id).and_then(|d| d.name.as_deref())
    }
}

impl Default for PropertySchema {
    fn default() -> Self {
        Self::builtin()
    }
}
