#![forbid(unsafe_code)]

//! Single-pass group-by-sum over CSV records.
//!
//! The first non-blank record is the header. It is used once to find the
//! group and aggregate columns; every later non-blank record is a data row
//! whose integer aggregate cell is added to the running sum of its group.
//! Data rows that cannot contribute are skipped (or rejected in strict mode),
//! never guessed at.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt::Write as _;
use std::io::Read;

use gs_io::{IntCellError, IoError, RecordSource, Row, is_blank_row, parse_int_cell};
use gs_runtime::{AggregationPolicy, SkipLedger, SkipReason, SkippedRow};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("Group and aggregate must be in headers. Headers: {}", headers_repr(.headers))]
    HeaderResolution { headers: Vec<String> },
    #[error("Sum for group {group:?} does not fit in a 64-bit integer")]
    Overflow { group: String },
    #[error("Rejected malformed row in strict mode: {0}")]
    RejectedRow(SkippedRow),
    #[error("File content could not be read as csv: {0}")]
    Io(#[from] IoError),
}

impl AggregateError {
    /// Header cells carried by a header resolution failure.
    #[must_use]
    pub fn headers(&self) -> Option<&[String]> {
        match self {
            Self::HeaderResolution { headers } => Some(headers),
            _ => None,
        }
    }
}

/// Group value to integer sum. Serializes as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregationResult {
    sums: BTreeMap<String, i64>,
}

impl AggregationResult {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, group: &str) -> Option<i64> {
        self.sums.get(group).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sums.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sums.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, i64> {
        self.sums.iter()
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, i64> {
        self.sums
    }

    fn add(&mut self, group: &str, value: i64) -> Result<(), AggregateError> {
        match self.sums.get_mut(group) {
            Some(sum) => {
                *sum = sum
                    .checked_add(value)
                    .ok_or_else(|| AggregateError::Overflow {
                        group: group.to_owned(),
                    })?;
            }
            None => {
                self.sums.insert(group.to_owned(), value);
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a AggregationResult {
    type Item = (&'a String, &'a i64);
    type IntoIter = btree_map::Iter<'a, String, i64>;

    fn into_iter(self) -> Self::IntoIter {
        self.sums.iter()
    }
}

impl From<AggregationResult> for BTreeMap<String, i64> {
    fn from(result: AggregationResult) -> Self {
        result.sums
    }
}

/// Column positions resolved from the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderResolution {
    pub group_index: usize,
    pub aggregate_index: usize,
}

impl HeaderResolution {
    /// Finds both names by exact match. The first occurrence wins when a name
    /// repeats.
    pub fn resolve(header: &Row, group: &str, aggregate: &str) -> Result<Self, AggregateError> {
        let position = |name: &str| header.iter().position(|cell| cell == name);
        match (position(group), position(aggregate)) {
            (Some(group_index), Some(aggregate_index)) => Ok(Self {
                group_index,
                aggregate_index,
            }),
            _ => Err(AggregateError::HeaderResolution {
                headers: header.iter().map(str::to_owned).collect(),
            }),
        }
    }

    fn classify<'r>(&self, row: &'r Row) -> DataRow<'r> {
        let group = match row.get(self.group_index) {
            Some(group) if !group.is_empty() => group,
            _ => {
                return DataRow::Skipped {
                    reason: SkipReason::MissingGroup,
                    cell: None,
                };
            }
        };

        match row.get(self.aggregate_index) {
            None | Some("") => DataRow::Skipped {
                reason: SkipReason::MissingAggregate,
                cell: None,
            },
            Some(cell) => match parse_int_cell(cell) {
                Ok(value) => DataRow::Valid { group, value },
                Err(IntCellError::OutOfRange) => DataRow::OutOfRange { group },
                Err(IntCellError::Invalid) => DataRow::Skipped {
                    reason: SkipReason::NonIntegerAggregate,
                    cell: Some(cell),
                },
            },
        }
    }
}

enum DataRow<'r> {
    Valid {
        group: &'r str,
        value: i64,
    },
    /// A well-formed integer too large for the sum type.
    OutOfRange {
        group: &'r str,
    },
    Skipped {
        reason: SkipReason,
        cell: Option<&'r str>,
    },
}

/// Lenient aggregation with a throwaway ledger.
pub fn aggregate<S: RecordSource>(
    source: S,
    group_name: &str,
    aggregate_name: &str,
) -> Result<AggregationResult, AggregateError> {
    let mut ledger = SkipLedger::new();
    aggregate_with_policy(
        source,
        group_name,
        aggregate_name,
        &AggregationPolicy::lenient(),
        &mut ledger,
    )
}

/// Reads raw CSV bytes using the policy's dialect.
pub fn aggregate_csv<R: Read>(
    input: R,
    group_name: &str,
    aggregate_name: &str,
    policy: &AggregationPolicy,
    ledger: &mut SkipLedger,
) -> Result<AggregationResult, AggregateError> {
    let reader = policy.dialect.reader(input);
    aggregate_with_policy(reader, group_name, aggregate_name, policy, ledger)
}

/// Consumes `source` once, front to back.
///
/// Fails with [`AggregateError::HeaderResolution`] when the first non-blank
/// record lacks either column name, or when the source has no non-blank
/// record at all (reported with an empty header list).
pub fn aggregate_with_policy<S: RecordSource>(
    mut source: S,
    group_name: &str,
    aggregate_name: &str,
    policy: &AggregationPolicy,
    ledger: &mut SkipLedger,
) -> Result<AggregationResult, AggregateError> {
    let span = tracing::debug_span!(
        target: "groupsum",
        "aggregate",
        group = group_name,
        aggregate = aggregate_name,
        mode = %policy.mode
    );
    let _entered = span.enter();

    let mut row = Row::new();
    let mut record: u64 = 0;
    let mut columns: Option<HeaderResolution> = None;
    let mut result = AggregationResult::new();

    while source.read_row(&mut row)? {
        record += 1;
        if is_blank_row(&row) {
            ledger.note_blank();
            continue;
        }

        let Some(resolved) = columns else {
            let resolved = HeaderResolution::resolve(&row, group_name, aggregate_name)?;
            debug!(
                record,
                group_index = resolved.group_index,
                aggregate_index = resolved.aggregate_index,
                "resolved header"
            );
            columns = Some(resolved);
            continue;
        };

        match resolved.classify(&row) {
            DataRow::Valid { group, value } => {
                result.add(group, value)?;
                ledger.note_aggregated();
            }
            DataRow::OutOfRange { group } => {
                debug!(record, group, "aggregate cell out of range");
                return Err(AggregateError::Overflow {
                    group: group.to_owned(),
                });
            }
            DataRow::Skipped { reason, cell } => {
                let skipped = SkippedRow {
                    record,
                    reason,
                    cell: cell.map(str::to_owned),
                };
                if policy.is_strict() {
                    return Err(AggregateError::RejectedRow(skipped));
                }
                trace!(record, %reason, "skipped data row");
                ledger.push(skipped);
            }
        }
    }

    if columns.is_none() {
        debug!(records = record, "no header row found");
        return Err(AggregateError::HeaderResolution {
            headers: Vec::new(),
        });
    }

    debug!(
        groups = result.len(),
        aggregated = ledger.aggregated_rows(),
        skipped = ledger.skipped(),
        blank = ledger.blank_rows(),
        "aggregation finished"
    );
    Ok(result)
}

/// Renders cells as a Python list literal, e.g. `['', 'first_name']`.
#[must_use]
pub fn headers_repr(headers: &[String]) -> String {
    let mut out = String::from("[");
    for (idx, cell) in headers.iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        push_str_repr(&mut out, cell);
    }
    out.push(']');
    out
}

fn push_str_repr(out: &mut String, cell: &str) {
    let quote = if cell.contains('\'') && !cell.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for ch in cell.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if !is_printable(c) => {
                let code = u32::from(c);
                // Writing to a String cannot fail.
                let _ = if code <= 0xff {
                    write!(out, "\\x{code:02x}")
                } else if code <= 0xffff {
                    write!(out, "\\u{code:04x}")
                } else {
                    write!(out, "\\U{code:08x}")
                };
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

/// Printable in the Python `str.isprintable` sense: control (Cc), format
/// (Cf), private-use (Co) and separator (Zl, Zp, Zs other than the ASCII
/// space) characters are not. Unassigned code points are not tracked.
fn is_printable(c: char) -> bool {
    if c == ' ' {
        return true;
    }
    !matches!(
        c,
        '\u{0}'..='\u{1f}'
            | '\u{7f}'..='\u{a0}'
            | '\u{ad}'
            | '\u{600}'..='\u{605}'
            | '\u{61c}'
            | '\u{6dd}'
            | '\u{70f}'
            | '\u{890}'..='\u{891}'
            | '\u{8e2}'
            | '\u{1680}'
            | '\u{180e}'
            | '\u{2000}'..='\u{200f}'
            | '\u{2028}'..='\u{202f}'
            | '\u{205f}'..='\u{2064}'
            | '\u{2066}'..='\u{206f}'
            | '\u{3000}'
            | '\u{e000}'..='\u{f8ff}'
            | '\u{feff}'
            | '\u{fff9}'..='\u{fffb}'
            | '\u{110bd}'
            | '\u{110cd}'
            | '\u{13430}'..='\u{1343f}'
            | '\u{1bca0}'..='\u{1bca3}'
            | '\u{1d173}'..='\u{1d17a}'
            | '\u{e0001}'
            | '\u{e0020}'..='\u{e007f}'
            | '\u{f0000}'..='\u{ffffd}'
            | '\u{100000}'..='\u{10fffd}'
    )
}
