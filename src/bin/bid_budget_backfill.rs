use bidhist::{
    fetch_inputs, init_logging, log_app_finish, log_app_start, logging_config_from_env,
    run_backfill, run_config_from_env, BackfillPlan, CsvEventSource, CsvSnapshotSource,
    SnapshotSource, SqliteStore,
};
use chrono::Utc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let run_cfg = run_config_from_env()?;
    log_app_start(&logging_cfg, &run_cfg);

    let today = Utc::now().date_naive();
    let plan = BackfillPlan::from_config(&run_cfg, today)?;

    let mut store = SqliteStore::open(&run_cfg.store_path)?;
    let events = CsvEventSource::new(&run_cfg.change_history_path);
    let csv_snapshot = run_cfg.snapshot_path.as_ref().map(CsvSnapshotSource::new);
    let snapshot_source: &dyn SnapshotSource = match &csv_snapshot {
        Some(source) => source,
        None => &store,
    };

    let inputs = fetch_inputs(&plan, &events, snapshot_source, &store)?;
    let report = run_backfill(&plan, &inputs, &mut store)?;
    log_app_finish(&report);

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
