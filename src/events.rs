//! Change-event normalization: one event per (campaign, date) per attribute.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::attribute::{Attribute, AttributeValues};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChangeRow {
    pub campaign_id: String,
    pub account_id: Option<String>,
    pub change_date_time: String,
    pub old: AttributeValues,
    pub new: AttributeValues,
}

impl RawChangeRow {
    pub fn new(campaign_id: impl Into<String>, change_date_time: impl Into<String>) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            account_id: None,
            change_date_time: change_date_time.into(),
            old: AttributeValues::default(),
            new: AttributeValues::default(),
        }
    }

    pub fn with_change(mut self, attribute: Attribute, old: f64, new: f64) -> Self {
        self.old.set(attribute, Some(old));
        self.new.set(attribute, Some(new));
        self
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_id: String,
    pub date: NaiveDate,
    pub old_value: Option<f64>,
    pub new_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvents {
    attribute: Attribute,
    events: BTreeMap<(String, NaiveDate), ChangeEvent>,
}

impl NormalizedEvents {
    pub fn empty(attribute: Attribute) -> Self {
        Self {
            attribute,
            events: BTreeMap::new(),
        }
    }

    pub fn attribute(&self) -> Attribute {
        self.attribute
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, entity_id: &str, date: NaiveDate) -> Option<&ChangeEvent> {
        self.events.get(&(entity_id.to_string(), date))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeEvent> {
        self.events.values()
    }

    pub fn entities(&self) -> BTreeSet<&str> {
        self.events.keys().map(|(entity, _)| entity.as_str()).collect()
    }

    fn insert_last_wins(&mut self, event: ChangeEvent) {
        self.events
            .insert((event.entity_id.clone(), event.date), event);
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("change row {row_index} has blank campaign_id")]
    BlankEntityId { row_index: usize },
    #[error("change row {row_index} has unparseable change date '{value}'")]
    InvalidChangeDate { row_index: usize, value: String },
}

pub fn change_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw
        .trim()
        .split(|c: char| c.is_whitespace() || c == 'T')
        .next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

pub fn normalize_events(
    rows: &[RawChangeRow],
    attribute: Attribute,
) -> Result<NormalizedEvents, EventError> {
    let mut normalized = NormalizedEvents::empty(attribute);
    let mut relevant_rows = 0usize;

    for (row_index, row) in rows.iter().enumerate() {
        let entity_id = row.campaign_id.trim();
        if entity_id.is_empty() {
            return Err(EventError::BlankEntityId { row_index });
        }
        let date =
            change_date(&row.change_date_time).ok_or_else(|| EventError::InvalidChangeDate {
                row_index,
                value: row.change_date_time.clone(),
            })?;

        let old_value = row.old.get(attribute);
        let new_value = row.new.get(attribute);
        if !attribute.is_relevant_change(old_value, new_value) {
            continue;
        }

        relevant_rows += 1;
        normalized.insert_last_wins(ChangeEvent {
            entity_id: entity_id.to_string(),
            date,
            old_value,
            new_value,
        });
    }

    if normalized.is_empty() {
        info!(
            component = "events",
            event = "events.none_found",
            attribute = attribute.column(),
            raw_rows = rows.len()
        );
    } else {
        info!(
            component = "events",
            event = "events.normalized",
            attribute = attribute.column(),
            raw_rows = rows.len(),
            relevant_rows,
            normalized_events = normalized.len()
        );
    }

    Ok(normalized)
}
