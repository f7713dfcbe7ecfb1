#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use gs_io::CsvDialect;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable consulted by [`AggregationPolicy::from_env`].
pub const MODE_ENV_VAR: &str = "GROUPSUM_MODE";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    /// Malformed data rows are dropped and recorded in the ledger.
    #[default]
    Lenient,
    /// The first malformed data row fails the whole run.
    Strict,
}

impl RuntimeMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lenient => "lenient",
            Self::Strict => "strict",
        }
    }
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown runtime mode {0:?} (expected lenient or strict)")]
    UnknownMode(String),
}

impl FromStr for RuntimeMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            _ => Err(ConfigError::UnknownMode(value.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Group cell is empty or past the end of the row.
    MissingGroup,
    /// Aggregate cell is empty or past the end of the row.
    MissingAggregate,
    /// Aggregate cell has content that is not a base-10 integer.
    NonIntegerAggregate,
}

impl SkipReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingGroup => "missing group value",
            Self::MissingAggregate => "missing aggregate value",
            Self::NonIntegerAggregate => "aggregate value is not an integer",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A data row excluded from the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRow {
    /// 1-based position among all records read from the source, blank ones included.
    pub record: u64,
    pub reason: SkipReason,
    /// Offending aggregate cell, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell: Option<String>,
}

impl fmt::Display for SkippedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cell {
            Some(cell) => write!(f, "record {}: {} ({cell:?})", self.record, self.reason),
            None => write!(f, "record {}: {}", self.record, self.reason),
        }
    }
}

/// Per-run account of what happened to each record.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipLedger {
    skipped: Vec<SkippedRow>,
    blank_rows: u64,
    aggregated_rows: u64,
}

impl SkipLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: SkippedRow) {
        self.skipped.push(row);
    }

    pub fn note_blank(&mut self) {
        self.blank_rows += 1;
    }

    pub fn note_aggregated(&mut self) {
        self.aggregated_rows += 1;
    }

    #[must_use]
    pub fn records(&self) -> &[SkippedRow] {
        &self.skipped
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.len()
    }

    #[must_use]
    pub const fn blank_rows(&self) -> u64 {
        self.blank_rows
    }

    #[must_use]
    pub const fn aggregated_rows(&self) -> u64 {
        self.aggregated_rows
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationPolicy {
    pub mode: RuntimeMode,
    #[serde(default)]
    pub dialect: CsvDialect,
}

impl AggregationPolicy {
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            mode: RuntimeMode::Lenient,
            dialect: CsvDialect::default(),
        }
    }

    #[must_use]
    pub fn strict() -> Self {
        Self {
            mode: RuntimeMode::Strict,
            dialect: CsvDialect::default(),
        }
    }

    /// Lenient policy unless `GROUPSUM_MODE` names another mode.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_mode_var(std::env::var(MODE_ENV_VAR).ok().as_deref())
    }

    fn from_mode_var(value: Option<&str>) -> Result<Self, ConfigError> {
        let mode = match value {
            Some(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => RuntimeMode::default(),
        };
        Ok(Self {
            mode,
            dialect: CsvDialect::default(),
        })
    }

    #[must_use]
    pub const fn is_strict(&self) -> bool {
        matches!(self.mode, RuntimeMode::Strict)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AggregationPolicy, ConfigError, RuntimeMode, SkipLedger, SkipReason, SkippedRow,
    };

    #[test]
    fn default_policy_is_lenient() {
        let policy = AggregationPolicy::default();
        assert_eq!(policy.mode, RuntimeMode::Lenient);
        assert!(!policy.is_strict());
        assert!(AggregationPolicy::strict().is_strict());
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Strict".parse::<RuntimeMode>(), Ok(RuntimeMode::Strict));
        assert_eq!(" lenient ".parse::<RuntimeMode>(), Ok(RuntimeMode::Lenient));
        assert_eq!(
            "loose".parse::<RuntimeMode>(),
            Err(ConfigError::UnknownMode("loose".to_owned()))
        );
    }

    #[test]
    fn mode_var_falls_back_to_lenient_when_unset_or_empty() {
        assert_eq!(
            AggregationPolicy::from_mode_var(None).expect("unset").mode,
            RuntimeMode::Lenient
        );
        assert_eq!(
            AggregationPolicy::from_mode_var(Some("  ")).expect("empty").mode,
            RuntimeMode::Lenient
        );
        assert_eq!(
            AggregationPolicy::from_mode_var(Some("strict")).expect("strict").mode,
            RuntimeMode::Strict
        );
        assert!(AggregationPolicy::from_mode_var(Some("nope")).is_err());
    }

    #[test]
    fn ledger_counts_each_outcome() {
        let mut ledger = SkipLedger::new();
        ledger.note_blank();
        ledger.note_aggregated();
        ledger.note_aggregated();
        ledger.push(SkippedRow {
            record: 4,
            reason: SkipReason::NonIntegerAggregate,
            cell: Some("n/a".to_owned()),
        });

        assert_eq!(ledger.blank_rows(), 1);
        assert_eq!(ledger.aggregated_rows(), 2);
        assert_eq!(ledger.skipped(), 1);
        assert_eq!(
            ledger.records()[0].to_string(),
            "record 4: aggregate value is not an integer (\"n/a\")"
        );
    }

    #[test]
    fn policy_serializes_with_snake_case_mode() {
        let json = serde_json::to_value(AggregationPolicy::strict()).expect("serialize");
        assert_eq!(json["mode"], "strict");
        assert_eq!(json["dialect"]["delimiter"], 44);
    }

    #[test]
    fn skipped_row_omits_absent_cell() {
        let row = SkippedRow {
            record: 2,
            reason: SkipReason::MissingGroup,
            cell: None,
        };
        let json = serde_json::to_value(&row).expect("serialize");
        assert_eq!(json["reason"], "missing_group");
        assert!(json.get("cell").is_none());
        assert_eq!(row.to_string(), "record 2: missing group value");
    }
}
