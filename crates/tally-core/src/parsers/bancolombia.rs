//! Bancolombia statement export
//!
//! Layout: a header row with `Fecha`, `Descripción`, `Referencia`, `Valor`
//! (other columns are ignored), followed by one row per movement. `Valor`
//! is signed: deposits positive, charges negative.

use calamine::Data;
use tracing::debug;

use super::{cell_amount, cell_date, cell_text, first_sheet, is_blank_row, ExcelParser, HeaderIndex};
use crate::error::{Error, Result};
use crate::models::RawLineItem;

const REQUIRED_COLUMNS: [&str; 4] = ["Fecha", "Descripción", "Referencia", "Valor"];

static EMPTY: Data = Data::Empty;

fn cell(row: &[Data], col: usize) -> &Data {
    row.get(col).unwrap_or(&EMPTY)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BancolombiaParser;

impl BancolombiaParser {
    pub const BANK_CODE: &'static str = "BANCOLOMBIA";

    /// Decode already-read sheet rows, the first being the header
    pub fn decode_rows<'a, I>(&self, rows: I) -> Result<Vec<RawLineItem>>
    where
        I: IntoIterator<Item = &'a [Data]>,
    {
        let mut rows = rows.into_iter();
        let header = rows
            .next()
            .ok_or_else(|| Error::Format("Spreadsheet is empty".to_string()))?;
        let [date_col, desc_col, ref_col, amount_col] =
            HeaderIndex::from_row(header).require("Bancolombia", REQUIRED_COLUMNS)?;

        let mut items = Vec::new();
        for (idx, row) in rows.enumerate() {
            if is_blank_row(row) {
                continue;
            }
            // Spreadsheet row number (1-based, after the header)
            let line = idx + 2;

            let date = cell_date(cell(row, date_col)).ok_or_else(|| {
                Error::Format(format!("Row {}: invalid date in column Fecha", line))
            })?;
            let amount = cell_amount(cell(row, amount_col)).ok_or_else(|| {
                Error::Format(format!("Row {}: invalid amount in column Valor", line))
            })?;

            items.push(RawLineItem {
                date,
                description: cell_text(cell(row, desc_col)).unwrap_or_default(),
                reference: cell_text(cell(row, ref_col)),
                amount,
            });
        }

        debug!(count = items.len(), "Parsed Bancolombia statement");
        Ok(items)
    }
}

impl ExcelParser for BancolombiaParser {
    fn bank_code(&self) -> &'static str {
        Self::BANK_CODE
    }

    fn parse(&self, content: &[u8]) -> Result<Vec<RawLineItem>> {
        let range = first_sheet(content)?;
        self.decode_rows(range.rows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn s(v: &str) -> Data {
        Data::String(v.to_string())
    }

    fn header() -> Vec<Data> {
        vec![s("Fecha"), s("Descripción"), s("Referencia"), s("Valor")]
    }

    fn decode(rows: &[Vec<Data>]) -> Result<Vec<RawLineItem>> {
        BancolombiaParser.decode_rows(rows.iter().map(|r| r.as_slice()))
    }

    #[test]
    fn test_decode_statement() {
        let rows = vec![
            header(),
            vec![s("2024-03-01"), s("PAGO NOMINA ACME"), Data::Float(998877.0), Data::Float(100.0)],
            vec![Data::Float(45351.0), s("COMPRA EXITO"), Data::Empty, Data::Int(-50)],
            vec![s("03/03/2024"), s("UBER TRIP"), s("REF-9"), s("-20,00")],
        ];

        let items = decode(&rows).unwrap();
        assert_eq!(items.len(), 3);

        assert_eq!(items[0].date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(items[0].description, "PAGO NOMINA ACME");
        assert_eq!(items[0].reference.as_deref(), Some("998877"));
        assert_eq!(items[0].amount, 100.0);

        assert_eq!(items[1].date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(items[1].reference, None);
        assert_eq!(items[1].amount, -50.0);

        assert_eq!(items[2].date, NaiveDate::from_ymd_opt(2024, 3, 3).unwrap());
        assert_eq!(items[2].amount, -20.0);
    }

    #[test]
    fn test_extra_columns_and_order_are_tolerated() {
        let rows = vec![
            vec![s("Valor"), s("Sucursal"), s("Referencia"), s("Descripción"), s("Fecha")],
            vec![Data::Float(-12.5), s("MEDELLIN"), Data::Empty, s("TIENDA D1"), s("2024-01-02")],
        ];
        let items = decode(&rows).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].description, "TIENDA D1");
        assert_eq!(items[0].amount, -12.5);
    }

    #[test]
    fn test_missing_column_is_format_error() {
        let rows = vec![
            vec![s("Fecha"), s("Descripción"), s("Valor")],
            vec![s("2024-03-01"), s("PAGO"), Data::Float(1.0)],
        ];
        let err = decode(&rows).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert!(err.to_string().contains("Referencia"));
    }

    #[test]
    fn test_blank_rows_skipped_and_empty_description_kept() {
        let rows = vec![
            header(),
            vec![Data::Empty, Data::Empty, Data::Empty, Data::Empty],
            vec![s("2024-03-01"), Data::Empty, Data::Empty, Data::Float(5.0)],
            vec![],
        ];
        let items = decode(&rows).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].description, "");
    }

    #[test]
    fn test_bad_amount_reports_row() {
        let rows = vec![
            header(),
            vec![s("2024-03-01"), s("PAGO"), Data::Empty, s("n/a")],
        ];
        let err = decode(&rows).unwrap_err();
        assert!(err.to_string().contains("Row 2"));
    }

    #[test]
    fn test_empty_sheet() {
        assert!(matches!(decode(&[]), Err(Error::Format(_))));
    }

    #[test]
    fn test_parse_rejects_non_spreadsheet() {
        let err = BancolombiaParser.parse(b"Fecha,Descripcion\n").unwrap_err();
        assert!(err.is_input_error());
    }
}
