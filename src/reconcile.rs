//! Expansion of sparse activity entries into dense, zero-filled grids.
//!
//! Every (dimension, period) pair a batch reports comes out with exactly one
//! entry per tracked account, explicit or zero. Collisions on a key are
//! summed, never overwritten.

use crate::error::{GlEngineError, Result};
use crate::schema::{AccountUniverse, ActivityEntry, CanonicalPeriod};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub input_entries: usize,
    /// Entries dropped for an empty key or non-finite value.
    pub dropped_invalid: usize,
    /// Distinct (dimension, account, period) keys after summation.
    pub summed_groups: usize,
    pub emitted_entries: usize,
}

/// Reconciles a sparse batch against the account universe, producing a dense
/// grid. Convenience wrapper over [`reconcile_with_stats`] that discards the
/// stats.
pub fn reconcile(entries: Vec<ActivityEntry>, universe: &AccountUniverse) -> Vec<ActivityEntry> {
    reconcile_with_stats(entries, universe).0
}

pub fn reconcile_with_stats(
    entries: Vec<ActivityEntry>,
    universe: &AccountUniverse,
) -> (Vec<ActivityEntry>, ReconcileStats) {
    let mut stats = ReconcileStats {
        input_entries: entries.len(),
        ..Default::default()
    };

    // Normalize keys and sum collisions in one pass. Dimension keys are
    // operation/entity codes and compare case-insensitively; account keys
    // keep their stored casing.
    let mut summed: BTreeMap<(String, String, CanonicalPeriod), f64> = BTreeMap::new();
    for entry in entries {
        let dimension_key = entry.dimension_key.trim().to_ascii_uppercase();
        let account_key = entry.account_key.trim().to_string();
        if dimension_key.is_empty() || account_key.is_empty() || !entry.value.is_finite() {
            warn!(
                "dropping invalid activity entry (dimension: '{}', account: '{}', value: {})",
                entry.dimension_key, entry.account_key, entry.value
            );
            stats.dropped_invalid += 1;
            continue;
        }
        *summed
            .entry((dimension_key, account_key, entry.period))
            .or_insert(0.0) += entry.value;
    }
    stats.summed_groups = summed.len();

    // The effective account set: universe plus any account the input
    // references, minus exclusions.
    let mut relevant: BTreeSet<String> = universe.effective();
    for (_, account_key, _) in summed.keys() {
        if !universe.is_excluded(account_key) {
            relevant.insert(account_key.clone());
        }
    }

    // With nothing to expand against, return the summed entries as-is
    // rather than producing nothing.
    if relevant.is_empty() {
        let out: Vec<ActivityEntry> = summed
            .into_iter()
            .map(|((dimension_key, account_key, period), value)| ActivityEntry {
                dimension_key,
                account_key,
                period,
                value,
            })
            .collect();
        stats.emitted_entries = out.len();
        return (out, stats);
    }

    let scopes: BTreeSet<(String, CanonicalPeriod)> = summed
        .keys()
        .map(|(dimension_key, _, period)| (dimension_key.clone(), *period))
        .collect();

    let mut out = Vec::with_capacity(scopes.len() * relevant.len());
    for (dimension_key, period) in &scopes {
        for account_key in &relevant {
            let value = summed
                .get(&(dimension_key.clone(), account_key.clone(), *period))
                .copied()
                .unwrap_or(0.0);
            out.push(ActivityEntry {
                dimension_key: dimension_key.clone(),
                account_key: account_key.clone(),
                period: *period,
                value,
            });
        }
    }
    stats.emitted_entries = out.len();

    debug!(
        "reconciled {} input entries into {} grid entries across {} scopes ({} dropped)",
        stats.input_entries,
        stats.emitted_entries,
        scopes.len(),
        stats.dropped_invalid
    );

    (out, stats)
}

/// Splits entries into persistence-sized batches without ever splitting a
/// (dimension, account, period) key group across two batches. Entries that
/// share a key must be adjacent (reconciled output already is).
pub fn chunk_entries(
    entries: &[ActivityEntry],
    max_per_batch: usize,
) -> Result<Vec<Vec<ActivityEntry>>> {
    if max_per_batch == 0 {
        return Err(GlEngineError::InvalidBatchSize(0));
    }

    let mut batches: Vec<Vec<ActivityEntry>> = Vec::new();
    let mut current: Vec<ActivityEntry> = Vec::new();

    for entry in entries {
        let same_key_as_last = current.last().is_some_and(|last| last.key() == entry.key());
        if current.len() >= max_per_batch && !same_key_as_last {
            batches.push(std::mem::take(&mut current));
        }
        current.push(entry.clone());
    }
    if !current.is_empty() {
        batches.push(current);
    }

    Ok(batches)
}
