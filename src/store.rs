//! Persistence coordination over the parameterized store boundary.
//!
//! The engine never talks to a database directly; callers hand it an
//! [`ActivityStore`]. Replacement is delete-then-insert per batch so a
//! reconciled grid can be re-submitted idempotently, and mapping upserts
//! diff field-by-field so unchanged rows never produce writes.

use crate::error::{GlEngineError, Result, StoreError};
use crate::reconcile::chunk_entries;
use crate::schema::{ActivityEntry, EntryKey, MappingConfig};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Activity rows bind 4 parameters each; this keeps a statement under the
/// common 999-parameter ceiling with headroom.
pub const MAX_ENTRIES_PER_BATCH: usize = 200;

/// Mapping rows bind 8 parameters each.
pub const MAX_MAPPINGS_PER_BATCH: usize = 100;

/// The store boundary: a parameterized delete/insert/merge interface.
/// Implementations own connections, transactions, and timeouts; the
/// coordinator owns batching and failure context.
pub trait ActivityStore: Send + Sync {
    fn delete_activity_keys(&self, keys: &[EntryKey]) -> std::result::Result<usize, StoreError>;
    fn insert_activities(&self, entries: &[ActivityEntry])
        -> std::result::Result<usize, StoreError>;
    fn get_mapping(
        &self,
        entity_id: &str,
        account_key: &str,
    ) -> std::result::Result<Option<MappingConfig>, StoreError>;
    fn insert_mapping(&self, config: &MappingConfig) -> std::result::Result<(), StoreError>;
    fn update_mapping(&self, config: &MappingConfig) -> std::result::Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceReport {
    pub batches: usize,
    pub deleted: usize,
    pub inserted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertReport {
    /// The post-merge state of every row that exists after the call
    /// (refused rows excluded).
    pub rows: Vec<MappingConfig>,
    pub inserted: usize,
    pub updated: usize,
    /// Rows with no meaningful change, skipped without a write.
    pub unchanged: usize,
    /// All-null incoming rows refused as new inserts.
    pub refused: usize,
}

pub struct BatchPersistenceCoordinator<S: ActivityStore> {
    store: S,
    max_entries_per_batch: usize,
}

impl<S: ActivityStore> BatchPersistenceCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_entries_per_batch: MAX_ENTRIES_PER_BATCH,
        }
    }

    pub fn with_batch_size(store: S, max_entries_per_batch: usize) -> Self {
        Self {
            store,
            max_entries_per_batch,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replaces the given entries by exact (dimension, account, period) key:
    /// per batch, delete all matching rows, then insert the batch. Batches
    /// apply strictly in order; a failure surfaces the batch index and how
    /// many batches completed, since earlier batches stay applied.
    pub fn replace(&self, entries: &[ActivityEntry]) -> Result<ReplaceReport> {
        let batches = chunk_entries(entries, self.max_entries_per_batch)?;
        let mut report = ReplaceReport {
            batches: batches.len(),
            ..Default::default()
        };

        for (batch_index, batch) in batches.iter().enumerate() {
            let keys: Vec<EntryKey> = batch.iter().map(ActivityEntry::key).collect();
            let wrap = |e: StoreError| GlEngineError::StoreFailure {
                batch_index,
                completed_batches: batch_index,
                detail: e.to_string(),
            };

            report.deleted += self.store.delete_activity_keys(&keys).map_err(wrap)?;
            report.inserted += self.store.insert_activities(batch).map_err(wrap)?;
            debug!(
                "replace batch {}/{}: {} entries",
                batch_index + 1,
                report.batches,
                batch.len()
            );
        }

        info!(
            "replaced activity in {} batches ({} deleted, {} inserted)",
            report.batches, report.deleted, report.inserted
        );
        Ok(report)
    }

    /// Merges mapping rows by (entity, account) key. Stored fields are only
    /// overwritten by differing incoming values, rows with no meaningful
    /// change are skipped, and a new row is only created when the incoming
    /// row carries a mapping target or preset.
    pub fn upsert_mappings(&self, incoming: &[MappingConfig]) -> Result<UpsertReport> {
        let mut report = UpsertReport::default();

        for (batch_index, batch) in incoming.chunks(MAX_MAPPINGS_PER_BATCH).enumerate() {
            let wrap = |e: StoreError| GlEngineError::StoreFailure {
                batch_index,
                completed_batches: batch_index,
                detail: e.to_string(),
            };

            for config in batch {
                let stored = self
                    .store
                    .get_mapping(&config.entity_id, &config.account_key)
                    .map_err(wrap)?;

                match stored {
                    Some(existing) => {
                        let (merged, dirty) = merge_mapping(&existing, config);
                        if dirty {
                            self.store.update_mapping(&merged).map_err(wrap)?;
                            report.updated += 1;
                        } else {
                            report.unchanged += 1;
                        }
                        report.rows.push(merged);
                    }
                    None if config.has_primary_value() => {
                        self.store.insert_mapping(config).map_err(wrap)?;
                        report.inserted += 1;
                        report.rows.push(config.clone());
                    }
                    None => {
                        debug!(
                            "refusing to create empty mapping row for ({}, {})",
                            config.entity_id, config.account_key
                        );
                        report.refused += 1;
                    }
                }
            }
        }

        info!(
            "upserted mappings: {} inserted, {} updated, {} unchanged, {} refused",
            report.inserted, report.updated, report.unchanged, report.refused
        );
        Ok(report)
    }
}

/// Field-by-field merge of an incoming row into the stored row. Incoming
/// `None` leaves the stored value alone; the dirty flag is only raised by a
/// real difference.
fn merge_mapping(stored: &MappingConfig, incoming: &MappingConfig) -> (MappingConfig, bool) {
    let mut merged = stored.clone();
    let mut dirty = false;

    let mut merge_field = |target: &mut Option<String>, source: &Option<String>| {
        if let Some(value) = source {
            if target.as_deref() != Some(value.as_str()) {
                *target = Some(value.clone());
                dirty = true;
            }
        }
    };

    merge_field(&mut merged.polarity, &incoming.polarity);
    merge_field(&mut merged.mapping_type, &incoming.mapping_type);
    merge_field(&mut merged.preset_id, &incoming.preset_id);
    merge_field(&mut merged.mapping_status, &incoming.mapping_status);
    merge_field(&mut merged.mapped_datapoint, &incoming.mapped_datapoint);

    if (merged.exclusion_pct - incoming.exclusion_pct).abs() > f64::EPSILON {
        merged.exclusion_pct = incoming.exclusion_pct;
        dirty = true;
    }

    (merged, dirty)
}

pub mod memory {
    //! Reference in-memory store, used by the test suites and handy for
    //! consumers' own tests.

    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryActivityStore {
        activities: Mutex<BTreeMap<EntryKey, f64>>,
        mappings: Mutex<BTreeMap<(String, String), MappingConfig>>,
    }

    impl InMemoryActivityStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn activities(&self) -> Vec<ActivityEntry> {
            self.activities
                .lock()
                .expect("store lock")
                .iter()
                .map(|(key, value)| ActivityEntry {
                    dimension_key: key.dimension_key.clone(),
                    account_key: key.account_key.clone(),
                    period: key.period,
                    value: *value,
                })
                .collect()
        }

        pub fn mappings(&self) -> Vec<MappingConfig> {
            self.mappings
                .lock()
                .expect("store lock")
                .values()
                .cloned()
                .collect()
        }
    }

    impl ActivityStore for InMemoryActivityStore {
        fn delete_activity_keys(
            &self,
            keys: &[EntryKey],
        ) -> std::result::Result<usize, StoreError> {
            let mut activities = self.activities.lock().expect("store lock");
            let before = activities.len();
            for key in keys {
                activities.remove(key);
            }
            Ok(before - activities.len())
        }

        fn insert_activities(
            &self,
            entries: &[ActivityEntry],
        ) -> std::result::Result<usize, StoreError> {
            let mut activities = self.activities.lock().expect("store lock");
            for entry in entries {
                if activities.contains_key(&entry.key()) {
                    return Err(StoreError(format!(
                        "duplicate key: {}/{}/{}",
                        entry.dimension_key, entry.account_key, entry.period
                    )));
                }
                activities.insert(entry.key(), entry.value);
            }
            Ok(entries.len())
        }

        fn get_mapping(
            &self,
            entity_id: &str,
            account_key: &str,
        ) -> std::result::Result<Option<MappingConfig>, StoreError> {
            let mappings = self.mappings.lock().expect("store lock");
            Ok(mappings
                .get(&(entity_id.to_string(), account_key.to_string()))
                .cloned())
        }

        fn insert_mapping(&self, config: &MappingConfig) -> std::result::Result<(), StoreError> {
            let mut mappings = self.mappings.lock().expect("store lock");
            mappings.insert(
                (config.entity_id.clone(), config.account_key.clone()),
                config.clone(),
            );
            Ok(())
        }

        fn update_mapping(&self, config: &MappingConfig) -> std::result::Result<(), StoreError> {
            let mut mappings = self.mappings.lock().expect("store lock");
            mappings.insert(
                (config.entity_id.clone(), config.account_key.clone()),
                config.clone(),
            );
            Ok(())
        }
    }
}
