//! SQLite-backed dataset: snapshot and activity inputs plus dated output
//! partitions.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use thiserror::Error;
use tracing::info;

use crate::attribute::{
    Attribute, AttributeKind, AttributeValue, AttributeValues, ALL_ATTRIBUTES,
};
use crate::merge::WideRow;
use crate::partition::{validate_identifier, PartitionSink, SinkError};
use crate::snapshot::{Snapshot, SnapshotRow};
use crate::sources::{account_in_scope, ActiveEntitySource, SnapshotSource, SourceError};

const SNAPSHOT_TABLE: &str = "bid_budget";
const PERFORMANCE_TABLE: &str = "asset_performance";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub struct SqliteStore {
    conn: Connection,
    origin: String,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            ",
        )?;
        info!(
            component = "store",
            event = "store.open",
            path = %path.display()
        );

        Ok(Self {
            conn,
            origin: path.display().to_string(),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            origin: ":memory:".to_string(),
        })
    }

    pub fn upsert_snapshot(&mut self, rows: &[SnapshotRow]) -> Result<(), StoreError> {
        ensure_snapshot_table(&self.conn)?;
        if rows.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO bid_budget (campaign_id, budget_amount, target_cpa, target_roas)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(campaign_id) DO UPDATE SET
                    budget_amount = excluded.budget_amount,
                    target_cpa = excluded.target_cpa,
                    target_roas = excluded.target_roas
                ",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.campaign_id,
                    row.values.budget_amount,
                    row.values.target_cpa,
                    row.values.target_roas,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn record_performance(
        &mut self,
        account_id: &str,
        campaign_id: &str,
        date: NaiveDate,
        impressions: i64,
    ) -> Result<(), StoreError> {
        ensure_performance_table(&self.conn)?;
        self.conn.execute(
            "
            INSERT INTO asset_performance (account_id, campaign_id, date, impressions)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![account_id, campaign_id, date.to_string(), impressions],
        )?;
        Ok(())
    }

    fn require_table(&self, table: &str) -> Result<(), SourceError> {
        if table_exists(&self.conn, table)? {
            Ok(())
        } else {
            Err(SourceError::MissingTable {
                origin: self.origin.clone(),
                table: table.to_string(),
            })
        }
    }

    pub fn partition_exists(&self, table: &str) -> Result<bool, SinkError> {
        validate_identifier(table)?;
        Ok(table_exists(&self.conn, table)?)
    }

    pub fn count_partition_rows(&self, table: &str) -> Result<u64, SinkError> {
        validate_identifier(table)?;
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
                    row.get(0)
                })?;
        Ok(count as u64)
    }

    pub fn read_partition(
        &self,
        table: &str,
        attributes: &[Attribute],
    ) -> Result<Vec<WideRow>, SinkError> {
        validate_identifier(table)?;
        let mut columns = vec!["date".to_string(), "campaign_id".to_string()];
        columns.extend(attributes.iter().map(|a| a.column().to_string()));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM \"{table}\" ORDER BY campaign_id",
            columns.join(", ")
        ))?;

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let raw_date: String = row.get(0)?;
            let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d").map_err(|_| {
                SinkError::Rejected {
                    table: table.to_string(),
                    message: format!("stored date '{raw_date}' is not YYYY-MM-DD"),
                }
            })?;
            let mut values = Vec::with_capacity(attributes.len());
            for (offset, attribute) in attributes.iter().enumerate() {
                let idx = offset + 2;
                values.push(match attribute.kind() {
                    AttributeKind::Integer => AttributeValue::Integer(row.get(idx)?),
                    AttributeKind::Ratio => AttributeValue::Ratio(row.get(idx)?),
                });
            }
            out.push(WideRow {
                date,
                campaign_id: row.get(1)?,
                values,
            });
        }
        Ok(out)
    }
}

impl SnapshotSource for SqliteStore {
    fn fetch_snapshot(&self) -> Result<Snapshot, SourceError> {
        self.require_table(SNAPSHOT_TABLE)?;
        let mut stmt = self.conn.prepare(
            "SELECT campaign_id, budget_amount, target_cpa, target_roas FROM bid_budget",
        )?;
        let mut rows = stmt.query([])?;

        let mut out = Vec::new();
        let mut row_number = 0u64;
        while let Some(row) = rows.next()? {
            row_number += 1;
            let campaign_id = campaign_id_text(row.get(0)?, SNAPSHOT_TABLE, row_number)?;
            let mut values = AttributeValues::default();
            for (offset, attribute) in ALL_ATTRIBUTES.into_iter().enumerate() {
                let value = numeric_value(
                    row.get(offset + 1)?,
                    attribute.column(),
                    SNAPSHOT_TABLE,
                    row_number,
                )?;
                values.set(attribute, value);
            }
            out.push(SnapshotRow::new(campaign_id, values));
        }

        Ok(Snapshot::from_rows(out)?)
    }
}

impl ActiveEntitySource for SqliteStore {
    fn fetch_active_entities(
        &self,
        accounts: &[String],
    ) -> Result<BTreeSet<String>, SourceError> {
        self.require_table(PERFORMANCE_TABLE)?;
        let mut stmt = self.conn.prepare(
            "
            SELECT DISTINCT account_id, campaign_id
            FROM asset_performance
            WHERE impressions > 0
            ",
        )?;
        let mut rows = stmt.query([])?;

        let mut out = BTreeSet::new();
        let mut row_number = 0u64;
        while let Some(row) = rows.next()? {
            row_number += 1;
            let account_id = match row.get::<_, Value>(0)? {
                Value::Integer(v) => Some(v.to_string()),
                Value::Text(v) => Some(v),
                _ => None,
            };
            if !account_in_scope(account_id.as_deref(), accounts) {
                continue;
            }
            out.insert(campaign_id_text(
                row.get(1)?,
                PERFORMANCE_TABLE,
                row_number,
            )?);
        }
        Ok(out)
    }
}

impl PartitionSink for SqliteStore {
    fn create_partition(
        &mut self,
        table: &str,
        attributes: &[Attribute],
        rows: &[WideRow],
    ) -> Result<(), SinkError> {
        validate_identifier(table)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        if table_exists(&tx, table)? {
            return Err(SinkError::AlreadyExists {
                table: table.to_string(),
            });
        }

        let mut ddl =
            format!("CREATE TABLE \"{table}\" (date TEXT NOT NULL, campaign_id TEXT NOT NULL");
        for attribute in attributes {
            let sql_type = match attribute.kind() {
                AttributeKind::Integer => "INTEGER",
                AttributeKind::Ratio => "REAL",
            };
            ddl.push_str(&format!(", {} {sql_type} NOT NULL", attribute.column()));
        }
        ddl.push_str(", PRIMARY KEY(campaign_id))");
        tx.execute_batch(&ddl)?;

        {
            let columns: Vec<&str> = ["date", "campaign_id"]
                .into_iter()
                .chain(attributes.iter().map(|a| a.column()))
                .collect();
            let placeholders: Vec<String> =
                (1..=columns.len()).map(|i| format!("?{i}")).collect();
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO \"{table}\" ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            ))?;

            for row in rows {
                let mut values = vec![
                    Value::Text(row.date.to_string()),
                    Value::Text(row.campaign_id.clone()),
                ];
                values.extend(row.values.iter().map(|value| match value {
                    AttributeValue::Integer(v) => Value::Integer(*v),
                    AttributeValue::Ratio(v) => Value::Real(*v),
                }));
                stmt.execute(params_from_iter(values))?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}

fn ensure_snapshot_table(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS bid_budget (
            campaign_id TEXT NOT NULL PRIMARY KEY,
            budget_amount REAL,
            target_cpa REAL,
            target_roas REAL
        );
        ",
    )
}

fn ensure_performance_table(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS asset_performance (
            account_id TEXT,
            campaign_id TEXT NOT NULL,
            date TEXT,
            impressions INTEGER NOT NULL DEFAULT 0
        );
        ",
    )
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, rusqlite::Error> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1 LIMIT 1",
            params![table],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    Ok(exists)
}

fn campaign_id_text(value: Value, origin: &str, row: u64) -> Result<String, SourceError> {
    let unsupported = |value: String| SourceError::UnsupportedKey {
        origin: origin.to_string(),
        row,
        field: "campaign_id".to_string(),
        value,
    };
    let text = match value {
        Value::Integer(v) => v.to_string(),
        Value::Text(v) => v.trim().to_string(),
        Value::Null => String::new(),
        Value::Real(v) => return Err(unsupported(format!("REAL {v:?}"))),
        Value::Blob(bytes) => return Err(unsupported(format!("BLOB of {} bytes", bytes.len()))),
    };
    if text.is_empty() {
        return Err(SourceError::BlankKey {
            origin: origin.to_string(),
            row,
            field: "campaign_id".to_string(),
        });
    }
    Ok(text)
}

fn numeric_value(
    value: Value,
    field: &str,
    origin: &str,
    row: u64,
) -> Result<Option<f64>, SourceError> {
    let parse_error = |raw: String| SourceError::ParseField {
        origin: origin.to_string(),
        row,
        field: field.to_string(),
        value: raw,
    };
    match value {
        Value::Null => Ok(None),
        Value::Integer(v) => Ok(Some(v as f64)),
        Value::Real(v) => Ok(Some(v)),
        Value::Text(text) => text
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| parse_error(text)),
        Value::Blob(bytes) => Err(parse_error(format!("<{} byte blob>", bytes.len()))),
    }
}
