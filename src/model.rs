//! In-memory form of a decoded item blob.
//!
//! Blobs are "write by exception": properties equal to the template default are simply
//! absent, and a later block may repeat an id to override an earlier one. The model keeps
//! every record in decode order and answers lookups with the last record for an id.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::blob::Header;
use crate::schema::{ApplyVerb, CategoryHint, PropertySchema, ValueKind};

/// Stack size property.
pub const QUANTITY_ID: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PropertyRecord {
    pub id: u32,
    /// Value cell exactly as stored (little-endian).
    pub raw: [u8; 4],
    /// Position across all blocks, starting at 0.
    pub order: usize,
    /// 0 for the anchored block, 1.. for trailing blocks.
    pub block: usize,
}

impl PropertyRecord {
    pub fn bits(&self) -> u32 {
        u32::from_le_bytes(self.raw)
    }

    pub fn as_i32(&self) -> i32 {
        i32::from_le_bytes(self.raw)
    }

    pub fn as_f32(&self) -> f32 {
        f32::from_le_bytes(self.raw)
    }
}

/// Where decoding stopped early. Partial models are fine for audit, never for
/// duplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Truncation {
    /// Offset of the block that could not be read.
    pub offset: usize,
    pub dropped_block: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyModel {
    pub template_id: u32,
    pub header: Header,
    /// Derived from the header once, at construction.
    pub category: CategoryHint,
    records: Vec<PropertyRecord>,
    truncation: Option<Truncation>,
}

impl PropertyModel {
    pub fn new(
        template_id: u32,
        header: Header,
        records: Vec<PropertyRecord>,
        truncation: Option<Truncation>,
    ) -> Self {
        let category = header.category();
        Self {
            template_id,
            header,
            category,
            records,
            truncation,
        }
    }

    pub fn records(&self) -> &[PropertyRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.truncation.is_none()
    }

    pub fn truncation(&self) -> Option<Truncation> {
        self.truncation
    }

    /// Last record carrying `id`.
    pub fn get(&self, id: u32) -> Option<&PropertyRecord> {
        self.records.iter().rev().find(|r| r.id == id)
    }

    pub fn ids(&self) -> BTreeSet<u32> {
        self.records.iter().map(|r| r.id).collect()
    }

    /// Effective value per id after last-write-wins.
    pub fn latest(&self) -> BTreeMap<u32, &PropertyRecord> {
        let mut map = BTreeMap::new();
        for record in &self.records {
            map.insert(record.id, record);
        }
        map
    }

    /// Stack size; an absent quantity means the template default of one.
    pub fn quantity(&self) -> u32 {
        self.get(QUANTITY_ID).map(|r| r.bits()).unwrap_or(1)
    }

    /// Type every record with `schema`, using the category captured at decode time.
    pub fn resolve(&self, schema: &PropertySchema) -> Vec<ResolvedProperty> {
        self.records
            .iter()
            .map(|r| ResolvedProperty::new(r, self.category, schema))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    Int(i32),
    Float(f32),
    Raw(u32),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v:.4}"),
            PropertyValue::Raw(v) => write!(f, "0x{v:08X}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedProperty {
    pub id: u32,
    pub order: usize,
    pub block: usize,
    pub kind: ValueKind,
    pub verb: ApplyVerb,
    pub value: PropertyValue,
    pub label: Option<String>,
}

impl ResolvedProperty {
    pub fn new(record: &PropertyRecord, category: CategoryHint, schema: &PropertySchema) -> Self {
        let kind = schema.resolve_kind(record.id, category);
        let value = match kind {
            ValueKind::Int => PropertyValue::Int(record.as_i32()),
            ValueKind::Float => PropertyValue::Float(record.as_f32()),
            ValueKind::RawUnknown => PropertyValue::Raw(record.bits()),
        };
        Self {
            id: record.id,
            order: record.order,
            block: record.block,
            kind,
            verb: schema.apply_verb_for(record.id, category),
            value,
            label: schema.label(record.id).map(str::to_string),
        }
    }
}

/// One id whose effective value differs between two models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PropertyDelta {
    pub id: u32,
    pub left: Option<[u8; 4]>,
    pub right: Option<[u8; 4]>,
}

/// Compare effective (last-wins) values of two models, bit for bit.
pub fn diff(left: &PropertyModel, right: &PropertyModel) -> Vec<PropertyDelta> {
    let l = left.latest();
    let r = right.latest();
    let ids: BTreeSet<u32> = l.keys().chain(r.keys()).copied().collect();
    ids.into_iter()
        .filter_map(|id| {
            let lv = l.get(&id).map(|rec| rec.raw);
            let rv = r.get(&id).map(|rec| rec.raw);
            (lv != rv).then_some(PropertyDelta {
                id,
                left: lv,
                right: rv,
            })
        })
        .collect()
}
