//! Bank statement spreadsheet parsers
//!
//! Each bank exports statements in its own layout. A parser decodes one
//! layout into [`RawLineItem`]s; the [`ParserFactory`] selects a parser by
//! bank code. Supporting a new bank means implementing [`ExcelParser`] and
//! registering it, nothing else in the pipeline changes.

mod bancolombia;

pub use bancolombia::BancolombiaParser;

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use calamine::{Data, Range, Reader};
use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{Error, Result};
use crate::models::RawLineItem;

/// Decodes a bank-specific spreadsheet into raw line items
pub trait ExcelParser: Send + Sync {
    /// Upper-case code identifying the bank (also the bank's stored name)
    fn bank_code(&self) -> &'static str;

    /// Parse the raw file bytes
    ///
    /// Fails with [`Error::Format`] when the sheet does not have the
    /// columns this bank's export is expected to have.
    fn parse(&self, content: &[u8]) -> Result<Vec<RawLineItem>>;
}

/// Registry of parsers keyed by bank code
#[derive(Clone)]
pub struct ParserFactory {
    parsers: BTreeMap<String, Arc<dyn ExcelParser>>,
}

impl ParserFactory {
    /// An empty registry
    pub fn empty() -> Self {
        Self {
            parsers: BTreeMap::new(),
        }
    }

    /// Registry with every built-in bank parser
    pub fn new() -> Self {
        let mut factory = Self::empty();
        factory.register(Arc::new(BancolombiaParser));
        factory
    }

    pub fn register(&mut self, parser: Arc<dyn ExcelParser>) {
        self.parsers
            .insert(parser.bank_code().to_uppercase(), parser);
    }

    /// Look up a parser by bank code (case-insensitive)
    pub fn get(&self, bank_code: &str) -> Result<Arc<dyn ExcelParser>> {
        self.parsers
            .get(&bank_code.trim().to_uppercase())
            .cloned()
            .ok_or_else(|| Error::UnsupportedBank {
                code: bank_code.to_string(),
                supported: self.supported_codes(),
            })
    }

    /// Registered bank codes, sorted
    pub fn supported_codes(&self) -> Vec<String> {
        self.parsers.keys().cloned().collect()
    }
}

impl Default for ParserFactory {
    fn default() -> Self {
        Self::new()
    }
}

// ========== Sheet helpers shared by bank parsers ==========

/// Open an in-memory workbook (xlsx, xls, xlsb or ods) and return its first sheet
pub(crate) fn first_sheet(content: &[u8]) -> Result<Range<Data>> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(content))
        .map_err(|e| Error::Format(format!("Not a readable spreadsheet: {}", e)))?;

    workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::Format("Workbook has no sheets".to_string()))?
        .map_err(Error::from)
}

/// Column positions resolved from a header row
#[derive(Debug)]
pub(crate) struct HeaderIndex {
    columns: Vec<String>,
}

impl HeaderIndex {
    pub(crate) fn from_row(row: &[Data]) -> Self {
        let columns = row
            .iter()
            .map(|cell| cell_text(cell).unwrap_or_default().to_lowercase())
            .collect();
        Self { columns }
    }

    /// Position of a column by name (trimmed, case-insensitive)
    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        let wanted = name.to_lowercase();
        self.columns.iter().position(|c| *c == wanted)
    }

    /// Resolve every required column or fail with a format error naming them all
    pub(crate) fn require<const N: usize>(
        &self,
        bank: &str,
        names: [&str; N],
    ) -> Result<[usize; N]> {
        let mut positions = [0usize; N];
        for (slot, name) in positions.iter_mut().zip(names.iter()) {
            *slot = self.position(name).ok_or_else(|| {
                Error::Format(format!(
                    "File does not have the expected {} format. Expected columns: {}",
                    bank,
                    names.join(", ")
                ))
            })?;
        }
        Ok(positions)
    }
}

/// Whether every cell of a row is empty
pub(crate) fn is_blank_row(row: &[Data]) -> bool {
    row.iter().all(|cell| cell_text(cell).is_none())
}

/// Trimmed text of a cell, `None` for empty cells
///
/// Integral floats render without a fractional part so numeric references
/// read the way they do in the spreadsheet.
pub(crate) fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty | Data::Error(_) => return None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.as_f64().to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Date from a date-typed, serial-number, or text cell
pub(crate) fn cell_date(cell: &Data) -> Option<NaiveDate> {
    match cell {
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64()),
        Data::Float(f) => excel_serial_to_date(*f),
        Data::Int(i) => excel_serial_to_date(*i as f64),
        Data::String(s) | Data::DateTimeIso(s) => parse_date(s),
        _ => None,
    }
}

/// Signed amount from a numeric or text cell
pub(crate) fn cell_amount(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        Data::String(s) => parse_amount(s),
        _ => None,
    }
}

/// Convert an Excel serial day number to a date
///
/// Excel's epoch is 1899-12-30 once the 1900 leap year bug is accounted for.
pub(crate) fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_signed(chrono::Duration::days(serial.trunc() as i64))
}

/// Parse a date string in the formats bank exports commonly use
///
/// Slash and dash dates are read day-first, matching Colombian statements.
pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();

    let date_formats = [
        "%Y-%m-%d", // 2024-01-15
        "%Y/%m/%d", // 2024/01/15
        "%d/%m/%Y", // 15/01/2024
        "%d-%m-%Y", // 15-01-2024
        "%Y%m%d",   // 20240115
    ];
    for fmt in date_formats {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }

    let datetime_formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M:%S"];
    for fmt in datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    None
}

/// Parse an amount string, handling currency symbols and thousands separators
///
/// Whichever of `.` or `,` appears last is taken as the decimal separator.
/// Parenthesised amounts are negative.
pub(crate) fn parse_amount(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    let negative_parens = trimmed.starts_with('(') && trimmed.ends_with(')');

    let mut cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
        .collect();

    match (cleaned.rfind('.'), cleaned.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => {
            cleaned = cleaned.replace('.', "").replace(',', ".");
        }
        (Some(_), Some(_)) => {
            cleaned = cleaned.replace(',', "");
        }
        (None, Some(comma)) => {
            // "1,234,567" is grouping; "12,50" is a decimal comma
            let decimals = cleaned.len() - comma - 1;
            if cleaned.matches(',').count() == 1 && decimals != 3 {
                cleaned = cleaned.replace(',', ".");
            } else {
                cleaned = cleaned.replace(',', "");
            }
        }
        _ => {}
    }

    let value = cleaned.parse::<f64>().ok()?;
    Some(if negative_parens { -value.abs() } else { value })
}
