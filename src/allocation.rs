//! Resolution of one source account's activity into its target split
//! specification.
//!
//! The resolver's output is the split *specification*: calculated rows carry
//! their basis datapoint forward for downstream proportional computation
//! rather than resolving to a fixed amount here, since basis-driven amounts
//! need cross-entry context that a single entry does not have.

use crate::schema::{
    ActivityEntry, AllocationResult, AllocationType, MappingConfig, MappingStatus, MappingType,
    Polarity, PresetDetail, TargetAllocation,
};
use log::debug;

/// Sentinel target marking funds removed from distribution rather than a
/// real datapoint.
pub const EXCLUDED_TARGET: &str = "Excluded";

impl Polarity {
    /// Explicit configuration wins; otherwise inferred from the sign of the
    /// entry's value.
    pub fn resolve(configured: Option<&str>, value: f64) -> Self {
        match configured.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("debit") => Polarity::Debit,
            Some("credit") => Polarity::Credit,
            Some("absolute") => Polarity::Absolute,
            _ => {
                if value > 0.0 {
                    Polarity::Debit
                } else if value < 0.0 {
                    Polarity::Credit
                } else {
                    Polarity::Absolute
                }
            }
        }
    }
}

impl MappingType {
    /// Anything other than the four known types collapses to Direct.
    pub fn resolve(configured: Option<&str>) -> Self {
        match configured.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("percentage") => MappingType::Percentage,
            Some("dynamic") => MappingType::Dynamic,
            Some("exclude") => MappingType::Exclude,
            _ => MappingType::Direct,
        }
    }
}

impl MappingStatus {
    pub fn resolve(configured_status: Option<&str>, mapping_type: Option<&str>) -> Self {
        match configured_status
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("excluded") | Some("exclude") => MappingStatus::Excluded,
            Some("mapped") => MappingStatus::Mapped,
            Some("new") => MappingStatus::New,
            _ => {
                if MappingType::resolve(mapping_type) == MappingType::Exclude {
                    MappingStatus::Excluded
                } else {
                    MappingStatus::Unmapped
                }
            }
        }
    }
}

/// Converts an externally-exchanged percentage (0-100) to the at-rest scale
/// (0.000-1.000, three-decimal precision). Out-of-range input is clamped,
/// never rejected, to tolerate upstream rounding.
pub fn pct_to_storage(external: f64) -> f64 {
    let clamped = if external.is_finite() {
        external.clamp(0.0, 100.0)
    } else {
        0.0
    };
    (clamped / 100.0 * 1000.0).round() / 1000.0
}

/// Converts an at-rest percentage (0.000-1.000) back to the external 0-100
/// scale.
pub fn pct_to_external(storage: f64) -> f64 {
    storage * 100.0
}

/// Computes the target split specification for one source entry.
pub fn resolve(
    entry: &ActivityEntry,
    config: &MappingConfig,
    details: &[PresetDetail],
) -> AllocationResult {
    let polarity = Polarity::resolve(config.polarity.as_deref(), entry.value);
    let status = MappingStatus::resolve(
        config.mapping_status.as_deref(),
        config.mapping_type.as_deref(),
    );
    let mapping_type = MappingType::resolve(config.mapping_type.as_deref());

    let preset_id = config
        .preset_id
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    let preset_applies = preset_id.is_some()
        && matches!(mapping_type, MappingType::Percentage | MappingType::Dynamic);

    let mut exclusion_external = config.exclusion_pct;
    let mut allocations = Vec::new();

    if let Some(preset_id) = preset_id.filter(|_| preset_applies) {
        for detail in details.iter().filter(|d| d.preset_id == preset_id) {
            let target = detail.target_datapoint.trim();
            if target.is_empty() {
                continue;
            }

            let basis = detail
                .basis_datapoint
                .as_deref()
                .map(str::trim)
                .filter(|b| !b.is_empty());
            if detail.is_calculated && basis.is_none() {
                // Partial success: one malformed row never fails the whole
                // resolution.
                debug!(
                    "dropping calculated preset row without basis (preset: {}, target: {})",
                    detail.preset_id, target
                );
                continue;
            }

            let is_exclusion = target.eq_ignore_ascii_case(EXCLUDED_TARGET);
            if is_exclusion {
                exclusion_external += detail.specified_pct;
            }

            allocations.push(TargetAllocation {
                target_key: target.to_string(),
                allocation_type: AllocationType::Percentage,
                allocation_value: pct_to_storage(detail.specified_pct),
                is_exclusion,
                basis_datapoint: if detail.is_calculated {
                    basis.map(str::to_string)
                } else {
                    None
                },
            });
        }
    } else {
        // No usable preset: the source account passes through to itself in
        // full.
        allocations.push(TargetAllocation {
            target_key: entry.account_key.clone(),
            allocation_type: AllocationType::Percentage,
            allocation_value: pct_to_storage(100.0),
            is_exclusion: false,
            basis_datapoint: None,
        });
    }

    AllocationResult {
        source_account: entry.account_key.clone(),
        polarity,
        status,
        allocations,
        exclusion_pct: pct_to_storage(exclusion_external),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period;

    fn entry(value: f64) -> ActivityEntry {
        ActivityEntry::new("OP1", "4000", period::normalize("2024-01").unwrap(), value)
    }

    fn config(mapping_type: &str, preset: Option<&str>) -> MappingConfig {
        MappingConfig {
            entity_id: "ent-1".to_string(),
            account_key: "4000".to_string(),
            mapping_type: Some(mapping_type.to_string()),
            preset_id: preset.map(str::to_string),
            ..Default::default()
        }
    }

    fn detail(target: &str, pct: f64) -> PresetDetail {
        PresetDetail {
            preset_id: "p1".to_string(),
            basis_datapoint: None,
            target_datapoint: target.to_string(),
            is_calculated: false,
            specified_pct: pct,
        }
    }

    #[test]
    fn test_polarity_explicit_wins_over_sign() {
        assert_eq!(Polarity::resolve(Some("Credit"), 100.0), Polarity::Credit);
        assert_eq!(Polarity::resolve(Some("DEBIT"), -5.0), Polarity::Debit);
        assert_eq!(Polarity::resolve(Some("absolute"), -5.0), Polarity::Absolute);
    }

    #[test]
    fn test_polarity_inferred_from_sign() {
        assert_eq!(Polarity::resolve(None, 100.0), Polarity::Debit);
        assert_eq!(Polarity::resolve(None, -5.0), Polarity::Credit);
        assert_eq!(Polarity::resolve(None, 0.0), Polarity::Absolute);
        assert_eq!(Polarity::resolve(Some("sideways"), -5.0), Polarity::Credit);
    }

    #[test]
    fn test_status_resolution_order() {
        assert_eq!(
            MappingStatus::resolve(Some("excluded"), Some("percentage")),
            MappingStatus::Excluded
        );
        assert_eq!(
            MappingStatus::resolve(Some("Mapped"), None),
            MappingStatus::Mapped
        );
        assert_eq!(MappingStatus::resolve(Some("new"), None), MappingStatus::New);
        assert_eq!(
            MappingStatus::resolve(None, Some("exclude")),
            MappingStatus::Excluded
        );
        assert_eq!(MappingStatus::resolve(None, None), MappingStatus::Unmapped);
        assert_eq!(
            MappingStatus::resolve(Some("pending"), Some("direct")),
            MappingStatus::Unmapped
        );
    }

    #[test]
    fn test_unknown_mapping_type_defaults_to_direct() {
        assert_eq!(MappingType::resolve(Some("weird")), MappingType::Direct);
        assert_eq!(MappingType::resolve(None), MappingType::Direct);
        assert_eq!(MappingType::resolve(Some("Percentage")), MappingType::Percentage);
    }

    #[test]
    fn test_pct_round_trip() {
        for x in [0.0f64, 12.5, 33.3, 100.0, 150.0, -4.0] {
            let expected = x.clamp(0.0, 100.0);
            let round_tripped = pct_to_external(pct_to_storage(x));
            assert!(
                (round_tripped - expected).abs() < 0.051,
                "x: {}, got {}",
                x,
                round_tripped
            );
        }
        for y in [0.0, 0.125, 0.333, 1.0] {
            assert!((pct_to_external(y) - y * 100.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_storage_rounds_to_three_decimals() {
        assert_eq!(pct_to_storage(33.3333), 0.333);
        assert_eq!(pct_to_storage(66.6667), 0.667);
        assert_eq!(pct_to_storage(f64::NAN), 0.0);
    }

    #[test]
    fn test_pass_through_without_preset() {
        let result = resolve(&entry(100.0), &config("direct", None), &[]);
        assert_eq!(result.allocations.len(), 1);
        let allocation = &result.allocations[0];
        assert_eq!(allocation.target_key, "4000");
        assert_eq!(allocation.allocation_value, 1.0);
        assert!(!allocation.is_exclusion);
    }

    #[test]
    fn test_direct_type_ignores_attached_preset() {
        let details = vec![detail("DP-A", 60.0), detail("DP-B", 40.0)];
        let result = resolve(&entry(100.0), &config("direct", Some("p1")), &details);
        assert_eq!(result.allocations.len(), 1);
        assert_eq!(result.allocations[0].target_key, "4000");
    }

    #[test]
    fn test_percentage_preset_splits() {
        let details = vec![detail("DP-A", 60.0), detail("DP-B", 40.0)];
        let result = resolve(&entry(100.0), &config("percentage", Some("p1")), &details);
        assert_eq!(result.allocations.len(), 2);
        assert_eq!(result.allocations[0].allocation_value, 0.6);
        assert_eq!(result.allocations[1].allocation_value, 0.4);
    }

    #[test]
    fn test_preset_rows_from_other_presets_ignored() {
        let mut foreign = detail("DP-X", 50.0);
        foreign.preset_id = "p2".to_string();
        let details = vec![detail("DP-A", 100.0), foreign];
        let result = resolve(&entry(100.0), &config("percentage", Some("p1")), &details);
        assert_eq!(result.allocations.len(), 1);
        assert_eq!(result.allocations[0].target_key, "DP-A");
    }

    #[test]
    fn test_exclusion_sentinel_never_an_active_target() {
        let details = vec![detail("DP-A", 80.0), detail("Excluded", 20.0)];
        let result = resolve(&entry(100.0), &config("percentage", Some("p1")), &details);

        let active: Vec<_> = result.active_allocations().collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].target_key, "DP-A");
        assert_eq!(result.exclusion_pct, 0.2);
    }

    #[test]
    fn test_config_exclusion_pct_adds_to_sentinel_rows() {
        let mut cfg = config("percentage", Some("p1"));
        cfg.exclusion_pct = 10.0;
        let details = vec![detail("DP-A", 80.0), detail("Excluded", 20.0)];
        let result = resolve(&entry(100.0), &cfg, &details);
        assert_eq!(result.exclusion_pct, 0.3);
    }

    #[test]
    fn test_calculated_row_carries_basis_provenance() {
        let details = vec![PresetDetail {
            preset_id: "p1".to_string(),
            basis_datapoint: Some("Revenue".to_string()),
            target_datapoint: "DP-A".to_string(),
            is_calculated: true,
            specified_pct: 0.0,
        }];
        let result = resolve(&entry(100.0), &config("dynamic", Some("p1")), &details);
        assert_eq!(result.allocations.len(), 1);
        assert_eq!(result.allocations[0].basis_datapoint.as_deref(), Some("Revenue"));
    }

    #[test]
    fn test_calculated_row_without_basis_dropped() {
        let details = vec![
            PresetDetail {
                preset_id: "p1".to_string(),
                basis_datapoint: None,
                target_datapoint: "DP-A".to_string(),
                is_calculated: true,
                specified_pct: 0.0,
            },
            detail("DP-B", 100.0),
        ];
        let result = resolve(&entry(100.0), &config("percentage", Some("p1")), &details);
        assert_eq!(result.allocations.len(), 1);
        assert_eq!(result.allocations[0].target_key, "DP-B");
    }

    #[test]
    fn test_empty_target_rows_skipped() {
        let details = vec![detail("  ", 50.0), detail("DP-A", 50.0)];
        let result = resolve(&entry(100.0), &config("percentage", Some("p1")), &details);
        assert_eq!(result.allocations.len(), 1);
    }

    #[test]
    fn test_blank_preset_id_is_pass_through() {
        let result = resolve(&entry(100.0), &config("percentage", Some("  ")), &[]);
        assert_eq!(result.allocations.len(), 1);
        assert_eq!(result.allocations[0].target_key, "4000");
    }
}
