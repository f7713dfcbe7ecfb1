#![forbid(unsafe_code)]

use std::io::Read;

use csv::{Reader, ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One parsed CSV record. Reused across reads to avoid per-row allocation.
pub type Row = StringRecord;

#[derive(Debug, Error)]
pub enum IoError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Sequential access to CSV records, read once front to back.
///
/// Implementations overwrite `row` with the next record and return `Ok(false)`
/// once the source is exhausted. The contents of `row` are unspecified after
/// `Ok(false)` or an error.
pub trait RecordSource {
    fn read_row(&mut self, row: &mut Row) -> Result<bool, IoError>;
}

impl<R: Read> RecordSource for Reader<R> {
    fn read_row(&mut self, row: &mut Row) -> Result<bool, IoError> {
        Ok(self.read_record(row)?)
    }
}

impl<S: RecordSource + ?Sized> RecordSource for &mut S {
    fn read_row(&mut self, row: &mut Row) -> Result<bool, IoError> {
        (**self).read_row(row)
    }
}

/// Adapts already-split rows (any iterator of string sequences) into a
/// [`RecordSource`].
#[derive(Debug, Clone)]
pub struct RowsSource<I> {
    rows: I,
}

impl<I> RowsSource<I> {
    pub fn new<T>(rows: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl<I> RecordSource for RowsSource<I>
where
    I: Iterator,
    I::Item: IntoIterator,
    <I::Item as IntoIterator>::Item: AsRef<str>,
{
    fn read_row(&mut self, row: &mut Row) -> Result<bool, IoError> {
        let Some(cells) = self.rows.next() else {
            return Ok(false);
        };
        row.clear();
        for cell in cells {
            row.push_field(cell.as_ref());
        }
        Ok(true)
    }
}

/// Field separation and quoting rules. The default matches the common
/// spreadsheet export format: comma separated, `"` quoted, embedded quotes
/// written as `""`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvDialect {
    pub delimiter: u8,
    pub quote: u8,
    pub double_quote: bool,
    pub escape: Option<u8>,
}

impl Default for CsvDialect {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            double_quote: true,
            escape: None,
        }
    }
}

impl CsvDialect {
    /// Builds a headerless, flexible reader: header detection is left to the
    /// caller and rows may differ in width.
    #[must_use]
    pub fn reader<R: Read>(&self, input: R) -> Reader<R> {
        ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .quote(self.quote)
            .double_quote(self.double_quote)
            .escape(self.escape)
            .from_reader(input)
    }
}

/// A row is blank when it has no cells or every cell is the empty string.
/// Whitespace-only cells count as content.
#[must_use]
pub fn is_blank_row(row: &Row) -> bool {
    row.iter().all(str::is_empty)
}

/// Why an aggregate cell could not be read as an `i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IntCellError {
    #[error("not a base-10 integer")]
    Invalid,
    #[error("integer does not fit in 64 bits")]
    OutOfRange,
}

/// Parses a base-10 integer cell.
///
/// Accepts surrounding whitespace, one leading sign and single underscores
/// between digits (`" -1_000 "`). Well-formed integers outside `i64` are
/// [`IntCellError::OutOfRange`]; anything else is [`IntCellError::Invalid`].
pub fn parse_int_cell(cell: &str) -> Result<i64, IntCellError> {
    let trimmed = cell.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'+') => (false, &trimmed[1..]),
        Some(b'-') => (true, &trimmed[1..]),
        Some(_) => (false, trimmed),
        None => return Err(IntCellError::Invalid),
    };

    if digits.is_empty()
        || digits.starts_with('_')
        || digits.ends_with('_')
        || digits.contains("__")
        || !digits.bytes().all(|b| b == b'_' || b.is_ascii_digit())
    {
        return Err(IntCellError::Invalid);
    }

    let mut value: i64 = 0;
    for byte in digits.bytes().filter(|&b| b != b'_') {
        let digit = i64::from(byte - b'0');
        // Accumulate toward the sign so i64::MIN stays representable.
        value = value
            .checked_mul(10)
            .and_then(|v| {
                if negative {
                    v.checked_sub(digit)
                } else {
                    v.checked_add(digit)
                }
            })
            .ok_or(IntCellError::OutOfRange)?;
    }
    Ok(value)
}
