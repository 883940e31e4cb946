//! Input collaborators: change events, current-value snapshot, active campaigns.

use std::collections::BTreeSet;
use std::path::PathBuf;

use csv::StringRecord;
use thiserror::Error;
use tracing::info;

use crate::attribute::{Attribute, AttributeValues, ALL_ATTRIBUTES};
use crate::events::{change_date, RawChangeRow};
use crate::grid::LookbackWindow;
use crate::snapshot::{Snapshot, SnapshotError, SnapshotRow};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{origin} is missing required column {column}")]
    MissingColumn { origin: String, column: String },
    #[error("{origin} row {row}: field {field} value '{value}' is not numeric")]
    ParseField {
        origin: String,
        row: u64,
        field: String,
        value: String,
    },
    #[error("{origin} row {row}: {field} is empty")]
    BlankKey {
        origin: String,
        row: u64,
        field: String,
    },
    #[error("invalid snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("{origin} has no {table} table")]
    MissingTable { origin: String, table: String },
    #[error("{origin} row {row}: {field} has unsupported value {value}")]
    UnsupportedKey {
        origin: String,
        row: u64,
        field: String,
        value: String,
    },
}

pub trait EventSource {
    fn fetch_change_events(
        &self,
        window: &LookbackWindow,
        accounts: &[String],
    ) -> Result<Vec<RawChangeRow>, SourceError>;
}

pub trait SnapshotSource {
    fn fetch_snapshot(&self) -> Result<Snapshot, SourceError>;
}

pub trait ActiveEntitySource {
    fn fetch_active_entities(
        &self,
        accounts: &[String],
    ) -> Result<BTreeSet<String>, SourceError>;
}

pub(crate) fn account_in_scope(account_id: Option<&str>, accounts: &[String]) -> bool {
    if accounts.is_empty() {
        return true;
    }
    account_id
        .map(|account| {
            let account = account.replace('-', "");
            accounts.iter().any(|a| *a == account)
        })
        .unwrap_or(false)
}

// Unparseable dates stay in scope so normalization rejects them by row.
fn row_in_scope(row: &RawChangeRow, window: &LookbackWindow, accounts: &[String]) -> bool {
    let in_window = change_date(&row.change_date_time)
        .map(|date| window.contains(date))
        .unwrap_or(true);
    in_window && account_in_scope(row.account_id.as_deref(), accounts)
}

#[derive(Debug, Clone)]
pub struct CsvEventSource {
    path: PathBuf,
}

impl CsvEventSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

struct ChangeColumns {
    campaign_id: usize,
    change_date: usize,
    account_id: Option<usize>,
    attributes: Vec<(Attribute, Option<usize>, Option<usize>)>,
}

impl EventSource for CsvEventSource {
    fn fetch_change_events(
        &self,
        window: &LookbackWindow,
        accounts: &[String],
    ) -> Result<Vec<RawChangeRow>, SourceError> {
        let origin = self.path.display().to_string();
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)?;
        let headers = reader.headers()?.clone();

        let columns = ChangeColumns {
            campaign_id: required_column(&headers, "campaign_id", &origin)?,
            change_date: required_column(&headers, "change_date", &origin)?,
            account_id: column_index(&headers, "account_id"),
            attributes: ALL_ATTRIBUTES
                .into_iter()
                .map(|attribute| {
                    (
                        attribute,
                        column_index(&headers, &attribute.old_column()),
                        column_index(&headers, &attribute.new_column()),
                    )
                })
                .collect(),
        };
        if !accounts.is_empty() && columns.account_id.is_none() {
            return Err(SourceError::MissingColumn {
                origin,
                column: "account_id".to_string(),
            });
        }

        let mut total = 0u64;
        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record?;
            let row_number = idx as u64 + 1;
            total += 1;

            let mut row = RawChangeRow::new(
                record.get(columns.campaign_id).unwrap_or_default(),
                record.get(columns.change_date).unwrap_or_default(),
            );
            row.account_id = columns
                .account_id
                .and_then(|i| record.get(i))
                .filter(|account| !account.is_empty())
                .map(str::to_string);

            for (attribute, old_idx, new_idx) in &columns.attributes {
                let old_column = attribute.old_column();
                let new_column = attribute.new_column();
                let old = optional_f64(&record, *old_idx, &old_column, &origin, row_number)?;
                let new = optional_f64(&record, *new_idx, &new_column, &origin, row_number)?;
                row.old.set(*attribute, old);
                row.new.set(*attribute, new);
            }

            if row_in_scope(&row, window, accounts) {
                rows.push(row);
            }
        }

        info!(
            component = "sources",
            event = "sources.change_history.loaded",
            path = %origin,
            total_rows = total,
            in_scope_rows = rows.len(),
            accounts = accounts.len()
        );

        Ok(rows)
    }
}

#[derive(Debug, Clone)]
pub struct CsvSnapshotSource {
    path: PathBuf,
}

impl CsvSnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotSource for CsvSnapshotSource {
    fn fetch_snapshot(&self) -> Result<Snapshot, SourceError> {
        let origin = self.path.display().to_string();
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)?;
        let headers = reader.headers()?.clone();
        let campaign_idx = required_column(&headers, "campaign_id", &origin)?;
        let attribute_columns: Vec<(Attribute, Option<usize>)> = ALL_ATTRIBUTES
            .into_iter()
            .map(|attribute| (attribute, column_index(&headers, attribute.column())))
            .collect();

        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record?;
            let row_number = idx as u64 + 1;
            let campaign_id = record.get(campaign_idx).unwrap_or_default();
            if campaign_id.is_empty() {
                return Err(SourceError::BlankKey {
                    origin,
                    row: row_number,
                    field: "campaign_id".to_string(),
                });
            }

            let mut values = AttributeValues::default();
            for (attribute, column) in &attribute_columns {
                let value =
                    optional_f64(&record, *column, attribute.column(), &origin, row_number)?;
                values.set(*attribute, value);
            }
            rows.push(SnapshotRow::new(campaign_id, values));
        }

        Ok(Snapshot::from_rows(rows)?)
    }
}

fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|header| header == name)
}

fn required_column(headers: &StringRecord, name: &str, origin: &str) -> Result<usize, SourceError> {
    column_index(headers, name).ok_or_else(|| SourceError::MissingColumn {
        origin: origin.to_string(),
        column: name.to_string(),
    })
}

fn optional_f64(
    record: &StringRecord,
    idx: Option<usize>,
    field: &str,
    origin: &str,
    row: u64,
) -> Result<Option<f64>, SourceError> {
    let Some(raw) = idx.and_then(|i| record.get(i)) else {
        return Ok(None);
    };
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| SourceError::ParseField {
            origin: origin.to_string(),
            row,
            field: field.to_string(),
            value: raw.to_string(),
        })
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryEventSource {
    rows: Vec<RawChangeRow>,
}

impl InMemoryEventSource {
    pub fn new(rows: Vec<RawChangeRow>) -> Self {
        Self { rows }
    }
}

impl EventSource for InMemoryEventSource {
    fn fetch_change_events(
        &self,
        window: &LookbackWindow,
        accounts: &[String],
    ) -> Result<Vec<RawChangeRow>, SourceError> {
        Ok(self
            .rows
            .iter()
            .filter(|row| row_in_scope(row, window, accounts))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotSource {
    snapshot: Snapshot,
}

impl InMemorySnapshotSource {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }
}

impl SnapshotSource for InMemorySnapshotSource {
    fn fetch_snapshot(&self) -> Result<Snapshot, SourceError> {
        Ok(self.snapshot.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryActiveEntitySource {
    entities: Vec<(Option<String>, String)>,
}

impl InMemoryActiveEntitySource {
    pub fn new<I, S>(entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entities: entities.into_iter().map(|id| (None, id.into())).collect(),
        }
    }

    pub fn with_account<I, S>(mut self, account_id: &str, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities.extend(
            entities
                .into_iter()
                .map(|id| (Some(account_id.to_string()), id.into())),
        );
        self
    }
}

impl ActiveEntitySource for InMemoryActiveEntitySource {
    fn fetch_active_entities(
        &self,
        accounts: &[String],
    ) -> Result<BTreeSet<String>, SourceError> {
        Ok(self
            .entities
            .iter()
            .filter(|(account, _)| account_in_scope(account.as_deref(), accounts))
            .map(|(_, id)| id.clone())
            .collect())
    }
}
