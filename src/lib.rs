//! # GL Allocation Engine
//!
//! A library for turning arbitrary trial-balance spreadsheet exports into
//! reconciled, allocatable general-ledger activity.
//!
//! ## Core Concepts
//!
//! - **Canonical period**: a calendar month normalized to `YYYY-MM-01`,
//!   extracted heuristically from whatever period text an export carries
//!   (`Jan'24`, `08/2024`, `202408`, a sheet name, ...)
//! - **Dense grid**: the reconciled output where every tracked account has
//!   an explicit (possibly zero) value for every reported dimension/period
//!   pair
//! - **Preset**: a named, reusable set of target-datapoint split rules
//!   applied to a source account's activity
//! - **Replace-by-key persistence**: reconciled grids are written
//!   delete-then-insert in bounded batches, so re-submitting an upload is
//!   idempotent
//!
//! ## Example
//!
//! ```rust,ignore
//! use gl_allocation_engine::*;
//!
//! let records: Vec<RawActivityRecord> = serde_json::from_str(payload)?;
//! let universe = AccountUniverse::new(chart_of_account_ids);
//!
//! let pipeline = IngestionPipeline::new(my_store);
//! let summary = pipeline.run(&records, &universe)?;
//! println!("{}", summary);
//! ```

pub mod allocation;
pub mod error;
pub mod ingestion;
pub mod period;
pub mod reconcile;
pub mod schema;
pub mod store;

pub use allocation::{pct_to_external, pct_to_storage, resolve, EXCLUDED_TARGET};
pub use error::{GlEngineError, Result, StoreError};
pub use ingestion::{ingest_records, parse_money, record_to_entry, IngestionSummary, SkipReason};
pub use period::{detect_from_row, extract_from_free_text, is_valid_normalized_month, normalize};
pub use reconcile::{chunk_entries, reconcile, reconcile_with_stats, ReconcileStats};
pub use schema::*;
pub use store::{
    ActivityStore, BatchPersistenceCoordinator, ReplaceReport, UpsertReport,
    MAX_ENTRIES_PER_BATCH, MAX_MAPPINGS_PER_BATCH,
};

use log::{debug, info};

/// Wires the engine end to end: payload rows are normalized, reconciled
/// against the account universe, and replaced into the store in bounded
/// batches. Holds no shared mutable state; concurrent pipelines are the
/// caller's affair, serialized per entity/upload if at-most-one-writer-per-
/// key is required.
pub struct IngestionPipeline<S: ActivityStore> {
    coordinator: BatchPersistenceCoordinator<S>,
}

impl<S: ActivityStore> IngestionPipeline<S> {
    pub fn new(store: S) -> Self {
        Self {
            coordinator: BatchPersistenceCoordinator::new(store),
        }
    }

    pub fn with_batch_size(store: S, max_entries_per_batch: usize) -> Self {
        Self {
            coordinator: BatchPersistenceCoordinator::with_batch_size(store, max_entries_per_batch),
        }
    }

    pub fn coordinator(&self) -> &BatchPersistenceCoordinator<S> {
        &self.coordinator
    }

    pub fn run(
        &self,
        records: &[RawActivityRecord],
        universe: &AccountUniverse,
    ) -> Result<IngestionSummary> {
        let (entries, mut summary) = ingest_records(records);
        info!(
            "ingested {} of {} payload rows",
            summary.ingested, summary.total_rows
        );

        let (grid, stats) = reconcile_with_stats(entries, universe);
        summary.dropped_in_reconcile = stats.dropped_invalid;
        debug!(
            "reconciled into {} grid entries ({} key groups)",
            stats.emitted_entries, stats.summed_groups
        );

        let report = self.coordinator.replace(&grid)?;
        summary.persisted = report.inserted;

        info!("{}", summary);
        Ok(summary)
    }
}

/// Resolves the allocation specification for each entry, joining it to its
/// mapping config by account key and to the preset rows referenced by that
/// config. Entries without a config resolve as unmapped pass-throughs.
pub fn resolve_allocations(
    entries: &[ActivityEntry],
    configs: &[MappingConfig],
    details: &[PresetDetail],
) -> Vec<AllocationResult> {
    entries
        .iter()
        .map(|entry| {
            let config = configs
                .iter()
                .find(|c| c.account_key == entry.account_key)
                .cloned()
                .unwrap_or_else(|| MappingConfig {
                    account_key: entry.account_key.clone(),
                    ..Default::default()
                });
            allocation::resolve(entry, &config, details)
        })
        .collect()
}
