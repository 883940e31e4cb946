//! Per-date partition writes with create-if-absent semantics.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::attribute::Attribute;
use crate::grid::LookbackWindow;
use crate::merge::{WideHistory, WideRow};

pub const DEFAULT_TABLE_PREFIX: &str = "bid_budgets";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("partition {table} already exists")]
    AlreadyExists { table: String },
    #[error("invalid partition identifier '{0}': only ASCII letters, digits and '_' are allowed")]
    InvalidIdentifier(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("sink rejected partition {table}: {message}")]
    Rejected { table: String, message: String },
}

// An existing table must be reported as `SinkError::AlreadyExists`.
pub trait PartitionSink {
    fn create_partition(
        &mut self,
        table: &str,
        attributes: &[Attribute],
        rows: &[WideRow],
    ) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionNaming {
    prefix: String,
}

impl PartitionNaming {
    pub fn new(prefix: impl Into<String>) -> Result<Self, SinkError> {
        let prefix = prefix.into();
        validate_identifier(&prefix)?;
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn table_for(&self, date: NaiveDate) -> String {
        format!("{}_{}", self.prefix, date.format("%Y%m%d"))
    }
}

impl Default for PartitionNaming {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_TABLE_PREFIX.to_string(),
        }
    }
}

pub fn validate_identifier(identifier: &str) -> Result<(), SinkError> {
    let valid = !identifier.is_empty()
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SinkError::InvalidIdentifier(identifier.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PartitionOutcome {
    Written { rows: u64, fingerprint: String },
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionReport {
    pub date: NaiveDate,
    pub table: String,
    pub outcome: PartitionOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionWriteReport {
    pub partitions: Vec<PartitionReport>,
    pub written: u64,
    pub already_present: u64,
    pub rows_written: u64,
}

pub fn write_partitions(
    history: &WideHistory,
    window: &LookbackWindow,
    naming: &PartitionNaming,
    sink: &mut dyn PartitionSink,
) -> Result<PartitionWriteReport, SinkError> {
    let mut report = PartitionWriteReport::default();

    for date in window.dates() {
        let table = naming.table_for(date);
        let rows = history.rows_for_date(date);

        let outcome = match sink.create_partition(&table, history.attributes(), rows) {
            Ok(()) => {
                let fingerprint = partition_fingerprint(history.attributes(), rows);
                info!(
                    component = "partition",
                    event = "partition.written",
                    table = %table,
                    rows = rows.len(),
                    fingerprint = %fingerprint
                );
                report.written += 1;
                report.rows_written += rows.len() as u64;
                PartitionOutcome::Written {
                    rows: rows.len() as u64,
                    fingerprint,
                }
            }
            Err(SinkError::AlreadyExists { .. }) => {
                warn!(
                    component = "partition",
                    event = "partition.already_exists",
                    table = %table
                );
                report.already_present += 1;
                PartitionOutcome::AlreadyPresent
            }
            Err(err) => {
                warn!(
                    component = "partition",
                    event = "partition.write.error",
                    table = %table,
                    error = %err
                );
                return Err(err);
            }
        };

        report.partitions.push(PartitionReport {
            date,
            table,
            outcome,
        });
    }

    Ok(report)
}

pub fn partition_fingerprint(attributes: &[Attribute], rows: &[WideRow]) -> String {
    let mut hasher = Sha256::new();
    hasher.update("columns:date,campaign_id");
    for attribute in attributes {
        hasher.update(format!(",{}", attribute.column()));
    }
    hasher.update(";rows:");
    for row in rows {
        hasher.update(format!("{},{}", row.date, row.campaign_id));
        for value in &row.values {
            hasher.update(format!(",{value}"));
        }
        hasher.update(";");
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    tables: BTreeMap<String, Vec<WideRow>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, table: &str) -> Option<&[WideRow]> {
        self.tables.get(table).map(Vec::as_slice)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}

impl PartitionSink for InMemorySink {
    fn create_partition(
        &mut self,
        table: &str,
        _attributes: &[Attribute],
        rows: &[WideRow],
    ) -> Result<(), SinkError> {
        validate_identifier(table)?;
        if self.tables.contains_key(table) {
            return Err(SinkError::AlreadyExists {
                table: table.to_string(),
            });
        }
        self.tables.insert(table.to_string(), rows.to_vec());
        Ok(())
    }
}
