use std::collections::HashSet;
use std::fs;

use bidhist::{
    fetch_inputs, run_backfill, Attribute, AttributeValue, AttributeValues, BackfillError,
    BackfillPlan, CsvEventSource, InMemoryActiveEntitySource, InMemoryEventSource,
    InMemorySnapshotSource, PartitionOutcome, RawChangeRow, RunConfig, SinkError, Snapshot,
    SnapshotRow, SourceError, SqliteStore, ALL_ATTRIBUTES,
};
use chrono::NaiveDate;
use tempfile::tempdir;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).expect("valid March 2024 date")
}

fn plan(lookback_days: u32, today: NaiveDate) -> BackfillPlan {
    BackfillPlan::from_config(
        &RunConfig {
            lookback_days,
            ..RunConfig::default()
        },
        today,
    )
    .expect("plan should build")
}

fn full_values(budget: f64, cpa: f64, roas: f64) -> AttributeValues {
    AttributeValues {
        budget_amount: Some(budget),
        target_cpa: Some(cpa),
        target_roas: Some(roas),
    }
}

fn integer(value: Option<AttributeValue>) -> i64 {
    match value {
        Some(AttributeValue::Integer(v)) => v,
        other => panic!("expected integer value, got {other:?}"),
    }
}

#[test]
fn worked_example_lands_in_sqlite_partitions() {
    let temp = tempdir().expect("temp dir should be created");
    let mut store =
        SqliteStore::open(&temp.path().join("dataset.sqlite")).expect("store should open");

    store
        .upsert_snapshot(&[
            SnapshotRow::new("111", full_values(150.0, 10.0, 2.0)),
            SnapshotRow::new("222", full_values(200.0, 20.0, 4.5)),
        ])
        .expect("snapshot should be stored");
    store.record_performance("1234567890", "111", day(1), 50).expect("performance row");
    store.record_performance("1234567890", "222", day(2), 7).expect("performance row");
    store.record_performance("1234567890", "999", day(2), 0).expect("performance row");

    let events = InMemoryEventSource::new(vec![RawChangeRow::new("111", "2024-03-02 14:05:11")
        .with_change(Attribute::BudgetAmount, 100.0, 150.0)]);

    let plan = plan(3, day(4));
    let inputs = fetch_inputs(&plan, &events, &store, &store).expect("inputs should load");
    assert_eq!(inputs.active_entities.len(), 2);

    let report = run_backfill(&plan, &inputs, &mut store).expect("run should succeed");
    assert_eq!(report.grid_rows, 6);
    assert_eq!(report.partitions.written, 3);
    assert_eq!(report.partitions.rows_written, 6);

    let mut budgets = Vec::new();
    for d in [1, 2, 3] {
        let table = format!("bid_budgets_202403{d:02}");
        let rows = store
            .read_partition(&table, &ALL_ATTRIBUTES)
            .expect("partition should read back");
        assert_eq!(rows.len(), 2);
        for row in rows {
            assert_eq!(row.date, day(d));
            budgets.push((row.campaign_id.clone(), d, integer(Some(row.values[0]))));
        }
    }

    assert_eq!(
        budgets,
        vec![
            ("111".to_string(), 1, 100),
            ("222".to_string(), 1, 200),
            ("111".to_string(), 2, 150),
            ("222".to_string(), 2, 200),
            ("111".to_string(), 3, 150),
            ("222".to_string(), 3, 200),
        ]
    );
}

#[test]
fn full_window_has_one_row_per_campaign_and_date() {
    let entities: Vec<String> = (1..=7).map(|i| format!("{}", 1000 + i)).collect();
    let snapshot = Snapshot::from_rows(
        entities
            .iter()
            .map(|id| SnapshotRow::new(id.clone(), full_values(100.0, 5.0, 1.25))),
    )
    .expect("snapshot should build");

    let mut rows = Vec::new();
    for (idx, id) in entities.iter().enumerate().take(4) {
        let d = 3 + idx as u32 * 5;
        rows.push(
            RawChangeRow::new(id.clone(), format!("2024-03-{d:02} 09:00:00")).with_change(
                Attribute::BudgetAmount,
                90.0,
                110.0,
            ),
        );
        rows.push(
            RawChangeRow::new(id.clone(), format!("2024-03-{d:02} 18:00:00")).with_change(
                Attribute::TargetRoas,
                1.5,
                1.75,
            ),
        );
    }

    let plan = plan(29, NaiveDate::from_ymd_opt(2024, 3, 31).expect("valid date"));
    let inputs = fetch_inputs(
        &plan,
        &InMemoryEventSource::new(rows),
        &InMemorySnapshotSource::new(snapshot),
        &InMemoryActiveEntitySource::new(entities.clone()),
    )
    .expect("inputs should load");

    let mut store = SqliteStore::open_in_memory().expect("store should open");
    let report = run_backfill(&plan, &inputs, &mut store).expect("run should succeed");

    assert_eq!(report.grid_rows, 7 * 29);
    assert_eq!(report.partitions.partitions.len(), 29);

    let mut seen = HashSet::new();
    for partition in &report.partitions.partitions {
        let stored = store
            .read_partition(&partition.table, &ALL_ATTRIBUTES)
            .expect("partition should read back");
        assert_eq!(stored.len(), 7);
        for row in stored {
            assert!(seen.insert((row.campaign_id.clone(), row.date)));
        }
    }
    assert_eq!(seen.len(), 7 * 29);
}

#[test]
fn single_change_yields_step_function_and_others_keep_snapshot() {
    let snapshot = Snapshot::from_rows([
        SnapshotRow::new("111", full_values(999.0, 30.0, 9.0)),
        SnapshotRow::new("222", full_values(400.0, 40.0, 2.5)),
    ])
    .expect("snapshot should build");
    let events = InMemoryEventSource::new(vec![RawChangeRow::new("111", "2024-03-05 23:59:59")
        .with_change(Attribute::TargetCpa, 12.0, 18.0)]);

    let plan = plan(10, day(11));
    let inputs = fetch_inputs(
        &plan,
        &events,
        &InMemorySnapshotSource::new(snapshot),
        &InMemoryActiveEntitySource::new(["111", "222"]),
    )
    .expect("inputs should load");

    let mut store = SqliteStore::open_in_memory().expect("store should open");
    run_backfill(&plan, &inputs, &mut store).expect("run should succeed");

    for d in 1..=10 {
        let rows = store
            .read_partition(&format!("bid_budgets_202403{d:02}"), &ALL_ATTRIBUTES)
            .expect("partition should read back");
        let cpa_111 = integer(Some(rows[0].values[1]));
        let expected = if d < 5 { 12 } else { 18 };
        assert_eq!(cpa_111, expected, "campaign 111 target_cpa on day {d}");

        assert_eq!(integer(Some(rows[0].values[0])), 999);
        assert_eq!(integer(Some(rows[1].values[0])), 400);
        assert_eq!(integer(Some(rows[1].values[1])), 40);
        assert_eq!(rows[1].values[2], AttributeValue::Ratio(2.5));
    }
}

#[test]
fn rerun_against_same_store_writes_nothing() {
    let temp = tempdir().expect("temp dir should be created");
    let store_path = temp.path().join("dataset.sqlite");
    let plan = plan(5, day(6));
    let inputs = fetch_inputs(
        &plan,
        &InMemoryEventSource::default(),
        &InMemorySnapshotSource::new(
            Snapshot::from_rows([SnapshotRow::new("111", full_values(10.0, 1.0, 0.5))])
                .expect("snapshot should build"),
        ),
        &InMemoryActiveEntitySource::new(["111"]),
    )
    .expect("inputs should load");

    {
        let mut store = SqliteStore::open(&store_path).expect("store should open");
        let first = run_backfill(&plan, &inputs, &mut store).expect("first run should succeed");
        assert_eq!(first.partitions.written, 5);
    }

    let mut store = SqliteStore::open(&store_path).expect("store should reopen");
    let second = run_backfill(&plan, &inputs, &mut store).expect("second run should succeed");
    assert_eq!(second.partitions.written, 0);
    assert_eq!(second.partitions.already_present, 5);
    assert_eq!(second.partitions.rows_written, 0);
    assert!(second
        .partitions
        .partitions
        .iter()
        .all(|p| p.outcome == PartitionOutcome::AlreadyPresent));
    for d in 1..=5 {
        assert_eq!(
            store
                .count_partition_rows(&format!("bid_budgets_202403{d:02}"))
                .expect("count should succeed"),
            1
        );
    }
}

#[test]
fn partial_run_resumes_from_missing_partitions() {
    let plan = plan(4, day(5));
    let inputs = fetch_inputs(
        &plan,
        &InMemoryEventSource::default(),
        &InMemorySnapshotSource::new(
            Snapshot::from_rows([SnapshotRow::new("111", full_values(10.0, 1.0, 0.5))])
                .expect("snapshot should build"),
        ),
        &InMemoryActiveEntitySource::new(["111"]),
    )
    .expect("inputs should load");

    let short_plan = BackfillPlan {
        window: bidhist::LookbackWindow::from_bounds(day(1), day(2)).expect("valid window"),
        ..plan.clone()
    };
    let mut store = SqliteStore::open_in_memory().expect("store should open");
    run_backfill(&short_plan, &inputs, &mut store).expect("partial run should succeed");

    let report = run_backfill(&plan, &inputs, &mut store).expect("resumed run should succeed");
    assert_eq!(report.partitions.already_present, 2);
    assert_eq!(report.partitions.written, 2);
    assert!(matches!(
        report.partitions.partitions[3].outcome,
        PartitionOutcome::Written { rows: 1, .. }
    ));
}

fn seeded_store() -> SqliteStore {
    let mut store = SqliteStore::open_in_memory().expect("store should open");
    store
        .upsert_snapshot(&[
            SnapshotRow::new("111", full_values(150.0, 10.0, 2.0)),
            SnapshotRow::new("222", full_values(350.0, 20.0, 4.0)),
        ])
        .expect("snapshot should be stored");
    store.record_performance("1234567890", "111", day(1), 1).expect("performance row");
    store.record_performance("555-555-5555", "222", day(1), 1).expect("performance row");
    store
}

#[test]
fn csv_change_history_drives_the_run_and_bad_numbers_abort_it() {
    let temp = tempdir().expect("temp dir should be created");
    let csv_path = temp.path().join("change_history.csv");
    fs::write(
        &csv_path,
        "account_id,campaign_id,change_date,old_budget_amount,new_budget_amount,old_target_cpa,new_target_cpa,old_target_roas,new_target_roas\n\
         1234567890,111,2024-03-02 08:00:00,100,120,,,,\n\
         1234567890,111,2024-03-02 20:00:00,120,150,,,,\n\
         555-555-5555,222,2024-03-02 09:00:00,300,350,,,,\n",
    )
    .expect("csv should be written");
    let events = CsvEventSource::new(&csv_path);

    let unscoped = plan(3, day(4));
    let scoped = BackfillPlan {
        accounts: vec!["1234567890".to_string()],
        ..unscoped.clone()
    };
    let mut store = seeded_store();
    let inputs = fetch_inputs(&scoped, &events, &store, &store).expect("inputs should load");
    assert_eq!(inputs.change_rows.len(), 2);
    assert_eq!(inputs.active_entities.len(), 1);

    run_backfill(&scoped, &inputs, &mut store).expect("scoped run should succeed");
    let day_one = store
        .read_partition("bid_budgets_20240301", &ALL_ATTRIBUTES)
        .expect("partition should read back");
    assert_eq!(day_one.len(), 1);
    assert_eq!(day_one[0].campaign_id, "111");
    assert_eq!(integer(Some(day_one[0].values[0])), 120);

    let mut store = seeded_store();
    let inputs = fetch_inputs(&unscoped, &events, &store, &store).expect("inputs should load");
    run_backfill(&unscoped, &inputs, &mut store).expect("unscoped run should succeed");
    let day_one = store
        .read_partition("bid_budgets_20240301", &ALL_ATTRIBUTES)
        .expect("partition should read back");
    let budgets: Vec<(String, i64)> = day_one
        .iter()
        .map(|row| (row.campaign_id.clone(), integer(Some(row.values[0]))))
        .collect();
    assert_eq!(
        budgets,
        vec![("111".to_string(), 120), ("222".to_string(), 300)]
    );

    fs::write(
        &csv_path,
        "campaign_id,change_date,old_budget_amount,new_budget_amount\n111,2024-03-02,100,n/a\n",
    )
    .expect("csv should be rewritten");
    let err = fetch_inputs(&unscoped, &events, &store, &store).unwrap_err();
    assert!(matches!(err, BackfillError::Source(_)));
    assert!(err.to_string().contains("new_budget_amount"));
}

#[test]
fn unseeded_store_fails_without_leaving_partitions_behind() {
    let temp = tempdir().expect("temp dir should be created");
    let store_path = temp.path().join("dataset.sqlite");
    let plan = plan(3, day(4));
    let events = InMemoryEventSource::default();

    let mut store = SqliteStore::open(&store_path).expect("store should open");
    let err = fetch_inputs(&plan, &events, &store, &store).unwrap_err();
    assert!(matches!(
        err,
        BackfillError::Source(SourceError::MissingTable { .. })
    ));

    store.record_performance("1234567890", "111", day(1), 0).expect("performance row");
    store
        .upsert_snapshot(&[SnapshotRow::new("111", full_values(10.0, 1.0, 0.5))])
        .expect("snapshot should be stored");
    let inputs = fetch_inputs(&plan, &events, &store, &store).expect("inputs should load");
    let err = run_backfill(&plan, &inputs, &mut store).unwrap_err();
    assert!(matches!(err, BackfillError::NoActiveEntities));
    assert!(!store
        .partition_exists("bid_budgets_20240301")
        .expect("existence check should succeed"));

    store.record_performance("1234567890", "111", day(2), 12).expect("performance row");
    let inputs = fetch_inputs(&plan, &events, &store, &store).expect("inputs should load");
    let report = run_backfill(&plan, &inputs, &mut store).expect("seeded run should succeed");
    assert_eq!(report.partitions.written, 3);
    assert_eq!(report.partitions.rows_written, 3);
}

#[test]
fn invalid_table_prefix_is_rejected_before_any_write() {
    let err = BackfillPlan::from_config(
        &RunConfig {
            table_prefix: "bid.budgets".to_string(),
            ..RunConfig::default()
        },
        day(10),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        BackfillError::Sink(SinkError::InvalidIdentifier(_))
    ));
}
