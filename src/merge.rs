//! Joins per-attribute series into one wide table keyed by (campaign, date).

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attribute::{Attribute, AttributeValue};
use crate::grid::PlaceholderGrid;
use crate::reconstruct::ReconstructedSeries;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("no attribute series to merge")]
    NoSeries,
    #[error("attribute {0} appears in more than one series")]
    DuplicateAttribute(Attribute),
    #[error("{attribute} series has no value for campaign {entity_id} on {date}")]
    MissingValue {
        attribute: Attribute,
        entity_id: String,
        date: NaiveDate,
    },
    #[error("{attribute} series has a value for campaign {entity_id} on {date} outside the grid")]
    UnexpectedKey {
        attribute: Attribute,
        entity_id: String,
        date: NaiveDate,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WideRow {
    pub date: NaiveDate,
    pub campaign_id: String,
    pub values: Vec<AttributeValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WideHistory {
    attributes: Vec<Attribute>,
    rows: Vec<WideRow>,
}

impl WideHistory {
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn rows(&self) -> &[WideRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows_for_date(&self, date: NaiveDate) -> &[WideRow] {
        let start = self.rows.partition_point(|row| row.date < date);
        let end = self.rows.partition_point(|row| row.date <= date);
        &self.rows[start..end]
    }

    pub fn value(&self, row: &WideRow, attribute: Attribute) -> Option<AttributeValue> {
        let idx = self.attributes.iter().position(|a| *a == attribute)?;
        row.values.get(idx).copied()
    }
}

pub fn merge_series(
    grid: &PlaceholderGrid,
    series: &[ReconstructedSeries],
) -> Result<WideHistory, MergeError> {
    if series.is_empty() {
        return Err(MergeError::NoSeries);
    }

    let mut seen = HashSet::new();
    for s in series {
        if !seen.insert(s.attribute()) {
            return Err(MergeError::DuplicateAttribute(s.attribute()));
        }
        if s.len() != grid.len() {
            if let Some((entity_id, date, _)) = s
                .iter()
                .find(|(entity_id, date, _)| !grid.contains(entity_id, *date))
            {
                return Err(MergeError::UnexpectedKey {
                    attribute: s.attribute(),
                    entity_id: entity_id.to_string(),
                    date,
                });
            }
        }
    }

    let mut rows = Vec::with_capacity(grid.len());
    for date in grid.dates() {
        for entity_id in grid.entities() {
            let mut values = Vec::with_capacity(series.len());
            for s in series {
                let value =
                    s.value(entity_id, *date)
                        .ok_or_else(|| MergeError::MissingValue {
                            attribute: s.attribute(),
                            entity_id: entity_id.clone(),
                            date: *date,
                        })?;
                values.push(value);
            }
            rows.push(WideRow {
                date: *date,
                campaign_id: entity_id.clone(),
                values,
            });
        }
    }

    Ok(WideHistory {
        attributes: series.iter().map(|s| s.attribute()).collect(),
        rows,
    })
}
