//! Daily attribute history reconstruction.
//!
//! The value in effect on a date is modeled as a step function of the
//! recorded changes:
//! - on and after a campaign's first change in the window, the most recent
//!   `new_value` carries forward;
//! - before the first change, that change's `old_value` is extrapolated back
//!   to the start of the window (an assumption, the true pre-window value is
//!   unknown);
//! - campaigns with no change in the window take their snapshot value.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::attribute::{Attribute, AttributeValue};
use crate::events::{ChangeEvent, NormalizedEvents};
use crate::grid::PlaceholderGrid;
use crate::snapshot::Snapshot;

#[derive(Debug, Error, PartialEq)]
pub enum ReconstructError {
    #[error("no snapshot {attribute} for campaign {entity_id}, which has no usable change in the window")]
    MissingSnapshotValue {
        entity_id: String,
        attribute: Attribute,
    },
    #[error("{attribute} value {value} for campaign {entity_id} on {date} is not a representable number")]
    InvalidValue {
        entity_id: String,
        date: NaiveDate,
        attribute: Attribute,
        value: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillSource {
    Forward,
    Backward,
    Snapshot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillStats {
    pub forward_filled: u64,
    pub backward_filled: u64,
    pub snapshot_filled: u64,
}

impl FillStats {
    fn record(&mut self, source: FillSource) {
        match source {
            FillSource::Forward => self.forward_filled += 1,
            FillSource::Backward => self.backward_filled += 1,
            FillSource::Snapshot => self.snapshot_filled += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructedSeries {
    attribute: Attribute,
    values: BTreeMap<(String, NaiveDate), AttributeValue>,
    stats: FillStats,
}

impl ReconstructedSeries {
    pub fn attribute(&self) -> Attribute {
        self.attribute
    }

    pub fn value(&self, entity_id: &str, date: NaiveDate) -> Option<AttributeValue> {
        self.values.get(&(entity_id.to_string(), date)).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn stats(&self) -> FillStats {
        self.stats
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, NaiveDate, AttributeValue)> {
        self.values
            .iter()
            .map(|((entity, date), value)| (entity.as_str(), *date, *value))
    }

    #[cfg(test)]
    pub(crate) fn from_cells(
        attribute: Attribute,
        cells: impl IntoIterator<Item = ((String, NaiveDate), AttributeValue)>,
    ) -> Self {
        Self {
            attribute,
            values: cells.into_iter().collect(),
            stats: FillStats::default(),
        }
    }
}

pub fn reconstruct_history(
    events: &NormalizedEvents,
    snapshot: &Snapshot,
    grid: &PlaceholderGrid,
) -> Result<ReconstructedSeries, ReconstructError> {
    let attribute = events.attribute();
    let dates = grid.dates();

    let outside_grid = events
        .iter()
        .filter(|event| !grid.contains(&event.entity_id, event.date))
        .count();
    if outside_grid > 0 {
        debug!(
            component = "reconstruct",
            event = "reconstruct.events.outside_grid",
            attribute = attribute.column(),
            ignored_events = outside_grid
        );
    }

    let mut values = BTreeMap::new();
    let mut stats = FillStats::default();

    for entity_id in grid.entities() {
        let day_events: Vec<Option<&ChangeEvent>> = dates
            .iter()
            .map(|date| events.get(entity_id, *date))
            .collect();
        let backward = backward_fill(&day_events);
        let forward = forward_fill(&day_events);

        for (idx, date) in dates.iter().enumerate() {
            let (raw, source) = match (forward[idx], backward[idx]) {
                (Some(value), _) => (value, FillSource::Forward),
                (None, Some(value)) => (value, FillSource::Backward),
                (None, None) => {
                    let value = snapshot.value(entity_id, attribute).ok_or_else(|| {
                        ReconstructError::MissingSnapshotValue {
                            entity_id: entity_id.clone(),
                            attribute,
                        }
                    })?;
                    (value, FillSource::Snapshot)
                }
            };

            let value = AttributeValue::cast(attribute, raw).ok_or_else(|| {
                ReconstructError::InvalidValue {
                    entity_id: entity_id.clone(),
                    date: *date,
                    attribute,
                    value: raw,
                }
            })?;
            stats.record(source);
            values.insert((entity_id.clone(), *date), value);
        }
    }

    info!(
        component = "reconstruct",
        event = "reconstruct.attribute.filled",
        attribute = attribute.column(),
        cells = values.len(),
        forward_filled = stats.forward_filled,
        backward_filled = stats.backward_filled,
        snapshot_filled = stats.snapshot_filled
    );

    Ok(ReconstructedSeries {
        attribute,
        values,
        stats,
    })
}

fn backward_fill(day_events: &[Option<&ChangeEvent>]) -> Vec<Option<f64>> {
    let mut filled = vec![None; day_events.len()];
    let mut earliest_old = None;
    for (idx, event) in day_events.iter().enumerate().rev() {
        if let Some(old) = event.and_then(|e| e.old_value) {
            earliest_old = Some(old);
        }
        filled[idx] = earliest_old;
    }
    filled
}

fn forward_fill(day_events: &[Option<&ChangeEvent>]) -> Vec<Option<f64>> {
    let mut latest_new = None;
    day_events
        .iter()
        .map(|event| {
            if let Some(new) = event.and_then(|e| e.new_value) {
                latest_new = Some(new);
            }
            latest_new
        })
        .collect()
}
