//! Reference spreadsheets: the canonical question list and the optional
//! scoring reference. Excel workbooks (.xlsx/.xlsm/.xlsb) and CSV.

use crate::error::{ExtractError, ExtractResult};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use tracing::{info, warn};

const QUESTION_COLUMN: &str = "QUESTION";
const INDEX_COLUMN: &str = "index";

/// First sheet with data, headers split from rows.
#[derive(Debug, Clone)]
struct RawSheet {
    name: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawSheet {
    fn column_index(&self, header: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(header))
    }
}

/// Per-question reference columns, keyed by question number.
#[derive(Debug, Clone, Default)]
pub struct ScoringReference {
    /// Column labels, index column excluded.
    pub headers: Vec<String>,
    rows: HashMap<String, Vec<String>>,
}

impl ScoringReference {
    pub fn get(&self, question_number: &str) -> Option<&[String]> {
        self.rows.get(question_number).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Canonical question first lines, from the `QUESTION` column.
pub fn load_questions(path: &Path) -> ExtractResult<Vec<String>> {
    let sheet = read_sheet(path)?;
    let col = sheet.column_index(QUESTION_COLUMN).ok_or_else(|| {
        ExtractError::Spreadsheet(format!(
            "no {} column in sheet '{}' of {:?}",
            QUESTION_COLUMN, sheet.name, path
        ))
    })?;

    let questions: Vec<String> = sheet
        .rows
        .iter()
        .filter_map(|row| row.get(col))
        .map(|q| q.replace('\n', "").trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();

    info!("Loaded {} reference questions from {:?}", questions.len(), path);
    Ok(questions)
}

/// Scoring reference rows keyed by their `index` column.
pub fn load_scoring_reference(path: &Path) -> ExtractResult<ScoringReference> {
    let sheet = read_sheet(path)?;
    let key_col = sheet.column_index(INDEX_COLUMN).ok_or_else(|| {
        ExtractError::Spreadsheet(format!("no {} column in {:?}", INDEX_COLUMN, path))
    })?;

    let headers = without(&sheet.headers, key_col);
    let rows: HashMap<String, Vec<String>> = sheet
        .rows
        .iter()
        .filter_map(|row| {
            let key = normalize_key(row.get(key_col)?);
            (!key.is_empty()).then(|| (key, without(row, key_col)))
        })
        .collect();

    info!("Loaded {} scoring reference rows from {:?}", rows.len(), path);
    Ok(ScoringReference { headers, rows })
}

fn without(row: &[String], skip: usize) -> Vec<String> {
    row.iter()
        .enumerate()
        .filter(|(idx, _)| *idx != skip)
        .map(|(_, v)| v.clone())
        .collect()
}

/// "12.0" and "12" name the same question.
fn normalize_key(raw: &str) -> String {
    let raw = raw.trim();
    match raw.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => format!("{}", f as i64),
        _ => raw.to_string(),
    }
}

fn read_sheet(path: &Path) -> ExtractResult<RawSheet> {
    let data = std::fs::read(path)?;
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let sheet = match ext.as_str() {
        "csv" => parse_csv(&sheet_name(path), &data)?,
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => parse_workbook(data)?,
        _ => {
            return Err(ExtractError::Spreadsheet(format!(
                "Unsupported file type: .{}. Supported: .csv, .xlsx, .xlsm, .xlsb",
                ext
            )))
        }
    };

    sheet.ok_or_else(|| ExtractError::Spreadsheet(format!("no sheet with data in {:?}", path)))
}

fn sheet_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn parse_csv(name: &str, data: &[u8]) -> ExtractResult<Option<RawSheet>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(data);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Ok(None);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let row: Vec<String> = record?.iter().map(str::to_string).collect();
        if row.iter().all(|v| v.is_empty()) {
            continue;
        }
        rows.push(row);
    }

    Ok(Some(RawSheet {
        name: name.to_string(),
        headers,
        rows,
    }))
}

/// First worksheet that has a header row and at least one data row.
fn parse_workbook(data: Vec<u8>) -> ExtractResult<Option<RawSheet>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(data))
        .map_err(|e| ExtractError::Spreadsheet(format!("Failed to open workbook: {}", e)))?;

    for name in workbook.sheet_names() {
        let range = match workbook.worksheet_range(&name) {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping sheet '{}': {}", name, e);
                continue;
            }
        };
        if let Some(sheet) = range_to_raw_sheet(&name, &range) {
            return Ok(Some(sheet));
        }
    }

    Ok(None)
}

fn range_to_raw_sheet(name: &str, range: &calamine::Range<Data>) -> Option<RawSheet> {
    let mut row_iter = range.rows();

    let headers: Vec<String> = row_iter.next()?.iter().map(cell_to_string).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return None;
    }

    let rows: Vec<Vec<String>> = row_iter
        .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>())
        .filter(|values| values.iter().any(|v| !v.is_empty()))
        .collect();
    if rows.is_empty() {
        return None;
    }

    Some(RawSheet {
        name: name.to_string(),
        headers,
        rows,
    })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            // Avoid trailing ".0" for whole numbers
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_string(dt.as_f64()),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#ERR:{:?}", e),
    }
}

/// Excel serial day number (epoch 1899-12-30) as `YYYY-MM-DD[ HH:MM:SS]`.
fn excel_serial_to_string(serial: f64) -> String {
    let Some(epoch) = NaiveDate::from_ymd_opt(1899, 12, 30).and_then(|d| d.and_hms_opt(0, 0, 0))
    else {
        return serial.to_string();
    };
    let millis = (serial * 86_400_000.0).round() as i64;
    let Some(dt) = epoch.checked_add_signed(Duration::milliseconds(millis)) else {
        return serial.to_string();
    };

    if dt.time() == chrono::NaiveTime::MIN {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
