//! Lookback window and the campaign×date placeholder grid.

use std::collections::BTreeSet;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CHANGE_HISTORY_RETENTION_DAYS: u32 = 29;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("invalid lookback window: {0}")]
    InvalidWindow(String),
    #[error("active entity set contains a blank campaign_id")]
    BlankEntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookbackWindow {
    start: NaiveDate,
    days: u32,
}

impl LookbackWindow {
    pub fn ending_before(today: NaiveDate, days: u32) -> Result<Self, GridError> {
        if days == 0 {
            return Err(GridError::InvalidWindow(
                "lookback days must be >= 1".to_string(),
            ));
        }
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .ok_or_else(|| {
                GridError::InvalidWindow(format!("{days} days before {today} is out of range"))
            })?;
        Ok(Self { start, days })
    }

    pub fn from_bounds(start: NaiveDate, end_inclusive: NaiveDate) -> Result<Self, GridError> {
        if end_inclusive < start {
            return Err(GridError::InvalidWindow(format!(
                "end {end_inclusive} precedes start {start}"
            )));
        }
        let span = (end_inclusive - start).num_days() + 1;
        let days = u32::try_from(span)
            .map_err(|_| GridError::InvalidWindow(format!("{span} days is too long")))?;
        Ok(Self { start, days })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end_inclusive(&self) -> NaiveDate {
        self.start + Days::new(u64::from(self.days - 1))
    }

    pub fn len(&self) -> usize {
        self.days as usize
    }

    pub fn is_empty(&self) -> bool {
        self.days == 0
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end_inclusive()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start.iter_days().take(self.len()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderGrid {
    entities: Vec<String>,
    dates: Vec<NaiveDate>,
}

impl PlaceholderGrid {
    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.entities.len() * self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, entity_id: &str, date: NaiveDate) -> bool {
        self.dates.binary_search(&date).is_ok()
            && self
                .entities
                .binary_search_by(|probe| probe.as_str().cmp(entity_id))
                .is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, NaiveDate)> + '_ {
        self.entities.iter().flat_map(move |entity| {
            self.dates
                .iter()
                .map(move |date| (entity.as_str(), *date))
        })
    }
}

pub fn build_placeholder_grid<I, S>(
    entities: I,
    window: &LookbackWindow,
) -> Result<PlaceholderGrid, GridError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut unique = BTreeSet::new();
    for entity in entities {
        let trimmed = entity.as_ref().trim();
        if trimmed.is_empty() {
            return Err(GridError::BlankEntityId);
        }
        unique.insert(trimmed.to_string());
    }

    Ok(PlaceholderGrid {
        entities: unique.into_iter().collect(),
        dates: window.dates(),
    })
}
