use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// A calendar month. Only ever constructed by the period normalizer (or by
/// deserializing an already-canonical `YYYY-MM-01` string); downstream code
/// never hand-assembles one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalPeriod {
    year: i32,
    month: u32,
}

impl CanonicalPeriod {
    pub(crate) fn from_parts(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The external rendering of a period: the first day of its month.
    pub fn first_day(&self) -> NaiveDate {
        // Month is validated at construction, so this cannot fail.
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(self.year, 1, 1).expect("valid date"))
    }
}

impl fmt::Display for CanonicalPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-01", self.year, self.month)
    }
}

impl Serialize for CanonicalPeriod {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CanonicalPeriod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_canonical(&s)
            .ok_or_else(|| D::Error::custom(format!("expected YYYY-MM-01 period, got '{}'", s)))
    }
}

fn parse_canonical(s: &str) -> Option<CanonicalPeriod> {
    if !crate::period::is_valid_normalized_month(s) {
        return None;
    }
    let year: i32 = s[0..4].parse().ok()?;
    let month: u32 = s[5..7].parse().ok()?;
    CanonicalPeriod::from_parts(year, month)
}

/// One unit of general-ledger activity: an amount for a (dimension, account,
/// period) key. Entries sharing a key are summed before persistence, never
/// overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// The aggregation scope: an operation code or entity id, depending on
    /// the call site.
    pub dimension_key: String,
    /// The GL / chart-of-accounts identifier.
    pub account_key: String,
    pub period: CanonicalPeriod,
    pub value: f64,
}

impl ActivityEntry {
    pub fn new(
        dimension_key: impl Into<String>,
        account_key: impl Into<String>,
        period: CanonicalPeriod,
        value: f64,
    ) -> Self {
        Self {
            dimension_key: dimension_key.into(),
            account_key: account_key.into(),
            period,
            value,
        }
    }

    pub fn key(&self) -> EntryKey {
        EntryKey {
            dimension_key: self.dimension_key.clone(),
            account_key: self.account_key.clone(),
            period: self.period,
        }
    }
}

/// The identity of an activity entry, used for replace-by-key deletes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub dimension_key: String,
    pub account_key: String,
    pub period: CanonicalPeriod,
}

/// The set of chart-of-accounts identifiers eligible for zero-fill, plus the
/// subset never eligible (e.g. financial-only accounts). Read-only reference
/// data supplied by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountUniverse {
    pub known: BTreeSet<String>,
    pub excluded: BTreeSet<String>,
}

impl AccountUniverse {
    pub fn new<I, S>(known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: known.into_iter().map(Into::into).collect(),
            excluded: BTreeSet::new(),
        }
    }

    pub fn with_excluded<I, S>(mut self, excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded = excluded.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_excluded(&self, account_key: &str) -> bool {
        self.excluded.contains(account_key)
    }

    /// Known accounts minus excluded ones.
    pub fn effective(&self) -> BTreeSet<String> {
        self.known.difference(&self.excluded).cloned().collect()
    }
}

/// How an account's activity direction is interpreted when allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum Polarity {
    Debit,
    Credit,
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum MappingType {
    Direct,
    Percentage,
    Dynamic,
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum MappingStatus {
    Mapped,
    New,
    Excluded,
    Unmapped,
}

/// Per (entity, account) mapping configuration as loaded from the store.
/// Polarity/type/status arrive as free-form strings from upstream systems
/// and are resolved to their enums by the allocation resolver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MappingConfig {
    pub entity_id: String,
    pub account_key: String,
    #[serde(default)]
    pub polarity: Option<String>,
    #[serde(default)]
    pub mapping_type: Option<String>,
    #[serde(default)]
    pub preset_id: Option<String>,
    #[serde(default)]
    pub mapping_status: Option<String>,
    /// External scale, 0-100 inclusive.
    #[serde(default)]
    pub exclusion_pct: f64,
    /// The directly-mapped target datapoint, if any.
    #[serde(default)]
    pub mapped_datapoint: Option<String>,
}

impl MappingConfig {
    /// Whether the row carries a meaningful mapping target. Rows without one
    /// are never allowed to create a new stored row.
    pub fn has_primary_value(&self) -> bool {
        let non_empty = |o: &Option<String>| o.as_deref().is_some_and(|s| !s.trim().is_empty());
        non_empty(&self.mapped_datapoint) || non_empty(&self.preset_id)
    }
}

/// One split rule of a distribution preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresetDetail {
    pub preset_id: String,
    /// Required when `is_calculated`; the datapoint whose share drives the
    /// proportional split.
    #[serde(default)]
    pub basis_datapoint: Option<String>,
    pub target_datapoint: String,
    #[serde(default)]
    pub is_calculated: bool,
    /// External scale, 0-100 inclusive.
    #[serde(default)]
    pub specified_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AllocationType {
    Percentage,
    Amount,
}

/// One resolved target of an allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetAllocation {
    pub target_key: String,
    pub allocation_type: AllocationType,
    /// Percentage allocations use the storage scale (0.000-1.000).
    pub allocation_value: f64,
    pub is_exclusion: bool,
    /// Carried forward for calculated splits; downstream proportional
    /// computation resolves the actual amount from the basis share.
    pub basis_datapoint: Option<String>,
}

/// The full split specification for one source entry. Derived on every
/// resolution call, never cached or persisted by this engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResult {
    pub source_account: String,
    pub polarity: Polarity,
    pub status: MappingStatus,
    pub allocations: Vec<TargetAllocation>,
    /// Storage scale (0.000-1.000): the share removed from distribution.
    pub exclusion_pct: f64,
}

impl AllocationResult {
    /// Allocations that route funds to a real target (exclusion rows
    /// filtered out).
    pub fn active_allocations(&self) -> impl Iterator<Item = &TargetAllocation> {
        self.allocations.iter().filter(|a| !a.is_exclusion)
    }
}

/// One row of the ingestion payload as delivered by the upload/HTTP layer.
/// The value may be numeric or a currency-formatted string; the period is
/// detected from the remaining columns.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RawActivityRecord {
    #[serde(default, alias = "operation", alias = "operationCode")]
    pub dimension_key: Option<String>,
    #[serde(default, alias = "account", alias = "glAccount", alias = "accountId")]
    pub account_key: Option<String>,
    #[serde(default)]
    pub value: serde_json::Value,
    /// All remaining spreadsheet columns, inspected for a period value.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RawActivityRecord {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(RawActivityRecord)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period;

    #[test]
    fn test_period_renders_first_of_month() {
        let p = period::normalize("2024-08-15").unwrap();
        assert_eq!(p.to_string(), "2024-08-01");
        assert_eq!(p.first_day(), NaiveDate::from_ymd_opt(2024, 8, 1).unwrap());
    }

    #[test]
    fn test_period_serde_round_trip() {
        let p = period::normalize("Aug'24").unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"2024-08-01\"");

        let back: CanonicalPeriod = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_period_deserialize_rejects_non_canonical() {
        assert!(serde_json::from_str::<CanonicalPeriod>("\"2024-08-15\"").is_err());
        assert!(serde_json::from_str::<CanonicalPeriod>("\"2024-13-01\"").is_err());
        assert!(serde_json::from_str::<CanonicalPeriod>("\"garbage\"").is_err());
    }

    #[test]
    fn test_universe_effective_excludes() {
        let universe = AccountUniverse::new(["4000", "4010", "9999"]).with_excluded(["9999"]);
        let effective = universe.effective();
        assert_eq!(effective.len(), 2);
        assert!(!effective.contains("9999"));
        assert!(universe.is_excluded("9999"));
    }

    #[test]
    fn test_mapping_primary_value() {
        let mut config = MappingConfig {
            entity_id: "ent-1".to_string(),
            account_key: "4000".to_string(),
            ..Default::default()
        };
        assert!(!config.has_primary_value());

        config.mapped_datapoint = Some("  ".to_string());
        assert!(!config.has_primary_value());

        config.preset_id = Some("preset-7".to_string());
        assert!(config.has_primary_value());
    }

    #[test]
    fn test_raw_record_schema_generation() {
        let schema_json = RawActivityRecord::schema_as_json().unwrap();
        assert!(schema_json.contains("dimensionKey"));
        assert!(schema_json.contains("accountKey"));
        assert!(schema_json.contains("value"));
    }

    #[test]
    fn test_raw_record_aliases() {
        let record: RawActivityRecord = serde_json::from_str(
            r#"{"operation": "OP1", "glAccount": "4000", "value": "$1,234.56", "glMonth": "Jan'24"}"#,
        )
        .unwrap();
        assert_eq!(record.dimension_key.as_deref(), Some("OP1"));
        assert_eq!(record.account_key.as_deref(), Some("4000"));
        assert!(record.extra.contains_key("glMonth"));
    }
}
