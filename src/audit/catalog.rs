//! Template id → display name, from the game's exported item table.
//!
//! Column 0 holds the template id; column 1 the localized name wrapped as
//! `NSLOCTEXT("", "ItemTable_<id>_Name", "Real Name")`.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use log::{debug, warn};

use crate::errors::CatalogError;

#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    names: HashMap<u32, String>,
}

impl ItemCatalog {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path.as_ref())?;
        let catalog = Self::from_csv(reader)?;
        debug!(
            "loaded {} item names from {}",
            catalog.len(),
            path.as_ref().display()
        );
        Ok(catalog)
    }

    pub fn from_reader<R: Read>(input: R) -> Result<Self, CatalogError> {
        let reader = csv::ReaderBuilder::new().flexible(true).from_reader(input);
        Self::from_csv(reader)
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> Result<Self, CatalogError> {
        let mut names = HashMap::new();
        for record in reader.records() {
            let record = record?;
            let (Some(id), Some(raw)) = (record.get(0), record.get(1)) else {
                continue;
            };
            let Ok(id) = id.trim().parse::<u32>() else {
                warn!("item table: skipping row with id {:?}", id);
                continue;
            };
            names.insert(id, display_name(raw));
        }
        Ok(Self { names })
    }

    pub fn name(&self, template_id: u32) -> Option<&str> {
        self.names.get(&template_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Unwrap a `NSLOCTEXT(...)` cell to the bare name.
pub fn display_name(raw: &str) -> String {
    let last = raw.rsplit("\", \"").next().unwrap_or(raw);
    let name = last
        .trim_end_matches(['"', ')'])
        .replace("\\'", "'")
        .replace("\\\"", "\"");
    match name.strip_prefix("XX_") {
        Some(rest) => rest.to_string(),
        None => name,
    }
}
