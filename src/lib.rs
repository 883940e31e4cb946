//! Daily bid and budget history reconstruction.
//!
//! Change history only records when a campaign's budget or bid target moved.
//! This crate turns those sparse events plus a current-value snapshot into
//! one row per (campaign, date) over the lookback window:
//! - `events`: one change per campaign per day, per attribute
//! - `grid`: lookback window and campaign×date placeholders
//! - `reconstruct`: forward/backward fill with snapshot fallback
//! - `merge`: wide table across attributes
//! - `partition`: date-suffixed, create-if-absent writes

mod attribute;
mod config;
mod events;
mod grid;
mod merge;
mod observability;
mod partition;
mod pipeline;
mod reconstruct;
mod snapshot;
mod sources;
mod store;

pub use attribute::{Attribute, AttributeKind, AttributeValue, AttributeValues, ALL_ATTRIBUTES};
pub use config::{run_config_from_env, ConfigError, RunConfig};
pub use events::{
    change_date, normalize_events, ChangeEvent, EventError, NormalizedEvents, RawChangeRow,
};
pub use grid::{
    build_placeholder_grid, GridError, LookbackWindow, PlaceholderGrid,
    CHANGE_HISTORY_RETENTION_DAYS,
};
pub use merge::{merge_series, MergeError, WideHistory, WideRow};
pub use observability::{
    init_logging, log_app_finish, log_app_start, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use partition::{
    partition_fingerprint, validate_identifier, write_partitions, InMemorySink, PartitionNaming,
    PartitionOutcome, PartitionReport, PartitionSink, PartitionWriteReport, SinkError,
    DEFAULT_TABLE_PREFIX,
};
pub use pipeline::{
    build_wide_history, fetch_inputs, run_backfill, AttributeSummary, BackfillError,
    BackfillInputs, BackfillPlan, BackfillReport,
};
pub use reconstruct::{
    reconstruct_history, FillSource, FillStats, ReconstructError, ReconstructedSeries,
};
pub use snapshot::{Snapshot, SnapshotError, SnapshotRow};
pub use sources::{
    ActiveEntitySource, CsvEventSource, CsvSnapshotSource, EventSource,
    InMemoryActiveEntitySource, InMemoryEventSource, InMemorySnapshotSource, SnapshotSource,
    SourceError,
};
pub use store::{SqliteStore, StoreError};
