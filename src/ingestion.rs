//! Ingestion - reads an order-lines file into an untyped `RawTable`
//!
//! CSV files go through the `csv` crate, spreadsheets through `calamine`
//! (first sheet only). Cells are trimmed and empty cells become `None`, so
//! downstream stages never see whitespace-only values.

use crate::error::{AttachError, Result};
use calamine::{open_workbook_auto, DataType as CalamineDataType, Reader};
use csv::ReaderBuilder;
use std::path::Path;
use tracing::info;

/// Header row plus string cells, exactly as read from the file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn height(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Spreadsheet,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "txt" => Ok(SourceFormat::Csv),
            "xlsx" | "xlsm" | "xls" | "ods" => Ok(SourceFormat::Spreadsheet),
            _ => Err(AttachError::Ingestion(format!(
                "Unsupported file type '{}': expected .csv or .xlsx",
                path.display()
            ))),
        }
    }
}

/// Load a CSV or spreadsheet file. The whole file is read before anything
/// is returned.
pub fn load_table(path: impl AsRef<Path>) -> Result<RawTable> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(AttachError::Ingestion(format!(
            "File not found: {}",
            path.display()
        )));
    }

    let table = match SourceFormat::from_path(path)? {
        SourceFormat::Csv => {
            let text = std::fs::read_to_string(path)?;
            parse_csv(&text)?
        }
        SourceFormat::Spreadsheet => read_spreadsheet(path)?,
    };

    info!(
        "Loaded {} rows with {} columns from {}",
        table.height(),
        table.headers.len(),
        path.display()
    );
    Ok(table)
}

fn clean_cell(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn parse_csv(text: &str) -> Result<RawTable> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = rdr
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(AttachError::Ingestion("CSV file has no header row".to_string()));
    }

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let row = (0..headers.len())
            .map(|idx| record.get(idx).and_then(clean_cell))
            .collect();
        rows.push(row);
    }

    Ok(RawTable { headers, rows })
}

fn cell_to_string(cell: &CalamineDataType) -> Option<String> {
    match cell {
        CalamineDataType::Empty => None,
        CalamineDataType::String(s) => clean_cell(s),
        CalamineDataType::Int(i) => Some(i.to_string()),
        // Whole numbers come back from the sheet as floats
        CalamineDataType::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            Some((*f as i64).to_string())
        }
        other => clean_cell(&other.to_string()),
    }
}

fn read_spreadsheet(path: &Path) -> Result<RawTable> {
    let mut workbook = open_workbook_auto(path).map_err(|e| {
        AttachError::Ingestion(format!("Failed to open spreadsheet {}: {}", path.display(), e))
    })?;

    let sheet_names = workbook.sheet_names().to_owned();
    let sheet_name = sheet_names.first().ok_or_else(|| {
        AttachError::Ingestion(format!("Spreadsheet {} contains no sheets", path.display()))
    })?;

    let range = workbook.worksheet_range(sheet_name).map_err(|e| {
        AttachError::Ingestion(format!("Failed to read sheet '{}': {}", sheet_name, e))
    })?;

    let mut rows_iter = range.rows();
    let headers: Vec<String> = rows_iter
        .next()
        .ok_or_else(|| AttachError::Ingestion(format!("Sheet '{}' is empty", sheet_name)))?
        .iter()
        .map(|cell| cell_to_string(cell).unwrap_or_default())
        .collect();

    let rows = rows_iter
        .map(|row| {
            (0..headers.len())
                .map(|idx| row.get(idx).and_then(cell_to_string))
                .collect()
        })
        .collect();

    Ok(RawTable { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv_trims_headers_and_blanks() {
        let text = " CO_NUM , CO_LINE,ITEM \nO1,1, M1 \nO1,2,   \n";
        let table = parse_csv(text).unwrap();

        assert_eq!(table.headers, vec!["CO_NUM", "CO_LINE", "ITEM"]);
        assert_eq!(table.height(), 2);
        assert_eq!(table.rows[0][2].as_deref(), Some("M1"));
        assert_eq!(table.rows[1][2], None);
    }

    #[test]
    fn test_short_records_are_padded() {
        let table = parse_csv("A,B,C\n1,2\n").unwrap();
        assert_eq!(table.rows[0], vec![Some("1".to_string()), Some("2".to_string()), None]);
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(SourceFormat::from_path(Path::new("orders.CSV")).unwrap(), SourceFormat::Csv);
        assert_eq!(
            SourceFormat::from_path(Path::new("orders.xlsx")).unwrap(),
            SourceFormat::Spreadsheet
        );
        assert!(SourceFormat::from_path(Path::new("orders.parquet")).is_err());
    }

    #[test]
    fn test_spreadsheet_cells_to_strings() {
        assert_eq!(cell_to_string(&CalamineDataType::Float(1.0)).as_deref(), Some("1"));
        assert_eq!(cell_to_string(&CalamineDataType::Float(2.5)).as_deref(), Some("2.5"));
        assert_eq!(cell_to_string(&CalamineDataType::Int(7)).as_deref(), Some("7"));
        assert_eq!(cell_to_string(&CalamineDataType::String("  ".into())), None);
        assert_eq!(cell_to_string(&CalamineDataType::Empty), None);
    }

    #[test]
    fn test_read_first_sheet() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/three_orders.xlsx");
        let table = load_table(&path).unwrap();

        assert_eq!(table.headers, vec!["CO NUM", "CO LINE", "ITEM"]);
        assert_eq!(table.height(), 7);
        assert_eq!(
            table.rows[0],
            vec![Some("1001".to_string()), Some("1".to_string()), Some("M1".to_string())]
        );
    }

    #[test]
    fn test_missing_file_is_ingestion_error() {
        let err = load_table("/nonexistent/orders.csv").unwrap_err();
        assert!(matches!(err, AttachError::Ingestion(_)));
    }
}
