//! Latest known attribute values per campaign.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attribute::{Attribute, AttributeValues};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub campaign_id: String,
    pub values: AttributeValues,
}

impl SnapshotRow {
    pub fn new(campaign_id: impl Into<String>, values: AttributeValues) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            values,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot row {row_index} has blank campaign_id")]
    BlankEntityId { row_index: usize },
    #[error("snapshot has more than one row for campaign_id {0}")]
    DuplicateEntity(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    values: HashMap<String, AttributeValues>,
}

impl Snapshot {
    pub fn from_rows(rows: impl IntoIterator<Item = SnapshotRow>) -> Result<Self, SnapshotError> {
        let mut values = HashMap::new();
        for (row_index, row) in rows.into_iter().enumerate() {
            let campaign_id = row.campaign_id.trim();
            if campaign_id.is_empty() {
                return Err(SnapshotError::BlankEntityId { row_index });
            }
            if values
                .insert(campaign_id.to_string(), row.values)
                .is_some()
            {
                return Err(SnapshotError::DuplicateEntity(campaign_id.to_string()));
            }
        }
        Ok(Self { values })
    }

    pub fn value(&self, entity_id: &str, attribute: Attribute) -> Option<f64> {
        self.values.get(entity_id)?.get(attribute)
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.values.contains_key(entity_id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
