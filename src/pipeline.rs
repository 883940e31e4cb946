//! One backfill run: read every input once, rebuild each attribute's daily
//! history, merge, and write date partitions.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::attribute::{Attribute, ALL_ATTRIBUTES};
use crate::config::RunConfig;
use crate::events::{normalize_events, EventError, RawChangeRow};
use crate::grid::{build_placeholder_grid, GridError, LookbackWindow};
use crate::merge::{merge_series, MergeError, WideHistory};
use crate::partition::{
    write_partitions, PartitionNaming, PartitionSink, PartitionWriteReport, SinkError,
};
use crate::reconstruct::{reconstruct_history, FillStats, ReconstructError};
use crate::snapshot::Snapshot;
use crate::sources::{ActiveEntitySource, EventSource, SnapshotSource, SourceError};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("invalid run window: {0}")]
    Grid(#[from] GridError),
    #[error("input source failed: {0}")]
    Source(#[from] SourceError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("malformed change history: {0}")]
    Event(#[from] EventError),
    #[error("history reconstruction failed: {0}")]
    Reconstruct(#[from] ReconstructError),
    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),
    #[error("partition write failed: {0}")]
    Sink(#[from] SinkError),
    #[error("no active campaigns in scope; refusing to write empty partitions")]
    NoActiveEntities,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillPlan {
    pub window: LookbackWindow,
    pub accounts: Vec<String>,
    pub naming: PartitionNaming,
}

impl BackfillPlan {
    pub fn from_config(cfg: &RunConfig, today: NaiveDate) -> Result<Self, BackfillError> {
        Ok(Self {
            window: LookbackWindow::ending_before(today, cfg.lookback_days)?,
            accounts: cfg.accounts.clone(),
            naming: PartitionNaming::new(cfg.table_prefix.clone())?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackfillInputs {
    pub change_rows: Vec<RawChangeRow>,
    pub snapshot: Snapshot,
    pub active_entities: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSummary {
    pub attribute: Attribute,
    pub normalized_events: usize,
    pub fill: FillStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub accounts: Vec<String>,
    pub active_entities: usize,
    pub grid_rows: usize,
    pub attributes: Vec<AttributeSummary>,
    pub partitions: PartitionWriteReport,
}

pub fn fetch_inputs(
    plan: &BackfillPlan,
    events: &dyn EventSource,
    snapshot: &dyn SnapshotSource,
    active: &dyn ActiveEntitySource,
) -> Result<BackfillInputs, BackfillError> {
    let change_rows = events.fetch_change_events(&plan.window, &plan.accounts)?;
    let snapshot = snapshot.fetch_snapshot()?;
    let active_entities = active.fetch_active_entities(&plan.accounts)?;

    info!(
        component = "pipeline",
        event = "backfill.inputs.fetched",
        change_rows = change_rows.len(),
        snapshot_entities = snapshot.len(),
        active_entities = active_entities.len()
    );
    if active_entities.is_empty() {
        warn!(
            component = "pipeline",
            event = "backfill.inputs.no_active_entities",
            accounts = plan.accounts.len()
        );
    }

    Ok(BackfillInputs {
        change_rows,
        snapshot,
        active_entities,
    })
}

pub fn build_wide_history(
    window: &LookbackWindow,
    inputs: &BackfillInputs,
) -> Result<(WideHistory, Vec<AttributeSummary>), BackfillError> {
    let grid = build_placeholder_grid(&inputs.active_entities, window)?;

    let mut series = Vec::with_capacity(ALL_ATTRIBUTES.len());
    let mut summaries = Vec::with_capacity(ALL_ATTRIBUTES.len());
    for attribute in ALL_ATTRIBUTES {
        let events = normalize_events(&inputs.change_rows, attribute)?;
        let filled = reconstruct_history(&events, &inputs.snapshot, &grid)?;
        summaries.push(AttributeSummary {
            attribute,
            normalized_events: events.len(),
            fill: filled.stats(),
        });
        series.push(filled);
    }

    let history = merge_series(&grid, &series)?;
    Ok((history, summaries))
}

pub fn run_backfill(
    plan: &BackfillPlan,
    inputs: &BackfillInputs,
    sink: &mut dyn PartitionSink,
) -> Result<BackfillReport, BackfillError> {
    info!(
        component = "pipeline",
        event = "backfill.run.start",
        window_start = %plan.window.start(),
        window_end = %plan.window.end_inclusive(),
        accounts = plan.accounts.len(),
        table_prefix = plan.naming.prefix()
    );

    if inputs.active_entities.is_empty() {
        return Err(BackfillError::NoActiveEntities);
    }

    let (history, attributes) = build_wide_history(&plan.window, inputs)?;
    let partitions = write_partitions(&history, &plan.window, &plan.naming, sink)?;

    let report = BackfillReport {
        window_start: plan.window.start(),
        window_end: plan.window.end_inclusive(),
        accounts: plan.accounts.clone(),
        active_entities: inputs.active_entities.len(),
        grid_rows: history.len(),
        attributes,
        partitions,
    };

    info!(
        component = "pipeline",
        event = "backfill.run.finish",
        grid_rows = report.grid_rows,
        partitions_written = report.partitions.written,
        partitions_already_present = report.partitions.already_present,
        rows_written = report.partitions.rows_written
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeValue, AttributeValues};
    use crate::partition::InMemorySink;
    use crate::snapshot::SnapshotRow;
    use crate::sources::{
        InMemoryActiveEntitySource, InMemoryEventSource, InMemorySnapshotSource,
    };

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn plan(days: u32) -> BackfillPlan {
        BackfillPlan::from_config(
            &RunConfig {
                lookback_days: days,
                ..RunConfig::default()
            },
            today(),
        )
        .unwrap()
    }

    fn snapshot_row(id: &str, budget: f64, cpa: f64, roas: f64) -> SnapshotRow {
        SnapshotRow::new(
            id,
            AttributeValues {
                budget_amount: Some(budget),
                target_cpa: Some(cpa),
                target_roas: Some(roas),
            },
        )
    }

    #[test]
    fn plan_window_ends_yesterday() {
        let plan = plan(3);
        assert_eq!(plan.window.start(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(
            plan.window.end_inclusive(),
            NaiveDate::from_ymd_opt(2024, 3, 3).unwrap()
        );
        assert_eq!(plan.naming.table_for(plan.window.start()), "bid_budgets_20240301");
    }

    #[test]
    fn attributes_with_different_event_subsets_merge_completely() {
        let plan = plan(3);
        let events = InMemoryEventSource::new(vec![
            RawChangeRow::new("111", "2024-03-02 10:00:00").with_change(
                Attribute::BudgetAmount,
                100.0,
                150.0,
            ),
            RawChangeRow::new("222", "2024-03-03 08:00:00").with_change(
                Attribute::TargetCpa,
                20.0,
                25.0,
            ),
        ]);
        let snapshot = InMemorySnapshotSource::new(
            Snapshot::from_rows([
                snapshot_row("111", 150.0, 10.0, 2.0),
                snapshot_row("222", 200.0, 25.0, 3.5),
            ])
            .unwrap(),
        );
        let active = InMemoryActiveEntitySource::new(["111", "222"]);

        let inputs = fetch_inputs(&plan, &events, &snapshot, &active).unwrap();
        let (history, summaries) = build_wide_history(&plan.window, &inputs).unwrap();

        assert_eq!(history.len(), 6);
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].normalized_events, 1);
        assert_eq!(summaries[1].normalized_events, 1);
        assert_eq!(summaries[2].normalized_events, 0);

        let day_one = history.rows_for_date(plan.window.start());
        assert_eq!(
            day_one[1].values,
            vec![
                AttributeValue::Integer(200),
                AttributeValue::Integer(20),
                AttributeValue::Ratio(3.5)
            ]
        );
    }

    #[test]
    fn rerun_reports_every_partition_as_present() {
        let plan = plan(3);
        let inputs = BackfillInputs {
            change_rows: Vec::new(),
            snapshot: Snapshot::from_rows([snapshot_row("111", 1.0, 2.0, 3.0)]).unwrap(),
            active_entities: ["111".to_string()].into_iter().collect(),
        };
        let mut sink = InMemorySink::new();

        let first = run_backfill(&plan, &inputs, &mut sink).unwrap();
        assert_eq!(first.partitions.written, 3);
        assert_eq!(first.grid_rows, 3);

        let second = run_backfill(&plan, &inputs, &mut sink).unwrap();
        assert_eq!(second.partitions.written, 0);
        assert_eq!(second.partitions.already_present, 3);
        assert_eq!(second.partitions.rows_written, 0);
    }

    #[test]
    fn empty_active_set_writes_nothing() {
        let plan = plan(3);
        let inputs = BackfillInputs {
            change_rows: Vec::new(),
            snapshot: Snapshot::from_rows([snapshot_row("111", 1.0, 2.0, 3.0)]).unwrap(),
            active_entities: BTreeSet::new(),
        };
        let mut sink = InMemorySink::new();

        let err = run_backfill(&plan, &inputs, &mut sink).unwrap_err();
        assert!(matches!(err, BackfillError::NoActiveEntities));
        assert!(sink.table_names().is_empty());
    }

    #[test]
    fn account_scope_applies_to_active_entities() {
        let plan = BackfillPlan {
            accounts: vec!["1".to_string()],
            ..plan(3)
        };
        let events = InMemoryEventSource::new(vec![RawChangeRow::new(
            "222",
            "2024-03-02 10:00:00",
        )
        .with_change(Attribute::BudgetAmount, 300.0, 350.0)
        .with_account("2")]);
        let snapshot = InMemorySnapshotSource::new(
            Snapshot::from_rows([
                snapshot_row("111", 100.0, 10.0, 2.0),
                snapshot_row("222", 350.0, 20.0, 3.0),
            ])
            .unwrap(),
        );
        let active = InMemoryActiveEntitySource::default()
            .with_account("1", ["111"])
            .with_account("2", ["222"]);

        let inputs = fetch_inputs(&plan, &events, &snapshot, &active).unwrap();
        assert!(inputs.change_rows.is_empty());
        assert_eq!(
            inputs.active_entities.into_iter().collect::<Vec<_>>(),
            vec!["111".to_string()]
        );
    }

    #[test]
    fn missing_snapshot_surfaces_as_reconstruct_error() {
        let plan = plan(2);
        let inputs = BackfillInputs {
            change_rows: Vec::new(),
            snapshot: Snapshot::default(),
            active_entities: ["111".to_string()].into_iter().collect(),
        };
        let mut sink = InMemorySink::new();

        let err = run_backfill(&plan, &inputs, &mut sink).unwrap_err();
        assert!(matches!(
            err,
            BackfillError::Reconstruct(ReconstructError::MissingSnapshotValue { .. })
        ));
        assert!(sink.table_names().is_empty());
    }
}
