//! Attribute/value/unit metadata attached to catalog entries

use serde::{Deserialize, Serialize};

/// One attribute/value/unit triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metadatum {
    pub attribute: String,
    pub value: String,
    #[serde(default)]
    pub units: Option<String>,
}

impl Metadatum {
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
            units: None,
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }
}

/// Metadata attached to one handle, in gateway order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataCollection {
    entries: Vec<Metadatum>,
}

impl MetadataCollection {
    pub fn new(entries: Vec<Metadatum>) -> Self {
        Self { entries }
    }

    /// First entry with the given attribute name
    pub fn get(&self, attribute: &str) -> Option<&Metadatum> {
        self.entries.iter().find(|m| m.attribute == attribute)
    }

    /// Every entry with the given attribute name (attributes may repeat)
    pub fn get_all(&self, attribute: &str) -> Vec<&Metadatum> {
        self.entries
            .iter()
            .filter(|m| m.attribute == attribute)
            .collect()
    }

    pub fn contains(&self, attribute: &str) -> bool {
        self.get(attribute).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Metadatum> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn push(&mut self, meta: Metadatum) {
        if !self.entries.contains(&meta) {
            self.entries.push(meta);
        }
    }

    pub(crate) fn remove_attribute(&mut self, attribute: &str) {
        self.entries.retain(|m| m.attribute != attribute);
    }
}

impl IntoIterator for MetadataCollection {
    type Item = Metadatum;
    type IntoIter = std::vec::IntoIter<Metadatum>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
