//! Export of fetched payloads to JSON and CSV files
//!
//! CSV rows are JSON objects; nested objects are flattened into dotted column
//! names (`priceInfo.lastPrice`) and arrays are written as inline JSON.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors that can occur while exporting data
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The output path has no extension we know how to write
    #[error("cannot infer export format from '{0}', use a .json or .csv file")]
    UnknownFormat(PathBuf),
}

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    /// Picks the format from a file extension (case-insensitive)
    pub fn from_path(path: &Path) -> Result<Self, ExportError> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => Ok(Self::Json),
            Some("csv") => Ok(Self::Csv),
            _ => Err(ExportError::UnknownFormat(path.to_path_buf())),
        }
    }
}

/// Serialize any value to pretty JSON
pub fn render_json<T: Serialize + ?Sized>(data: &T) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(data)?)
}

/// Render rows as CSV
///
/// The header lists every column in order of first appearance. Returns an
/// empty string for no rows.
pub fn render_csv(rows: &[Value]) -> Result<String, ExportError> {
    if rows.is_empty() {
        return Ok(String::new());
    }

    let flat: Vec<Map<String, Value>> = rows.iter().map(flatten_row).collect();

    let mut columns = Vec::new();
    let mut seen = HashSet::new();
    for row in &flat {
        for column in row.keys() {
            if seen.insert(column.as_str()) {
                columns.push(column.as_str());
            }
        }
    }

    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(&columns)?;
    for row in &flat {
        wtr.write_record(columns.iter().map(|column| cell(row.get(*column))))?;
    }

    let data = wtr.into_inner().map_err(|e| ExportError::Csv(e.into_error().into()))?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

/// Write `data` as pretty JSON to `path`
pub fn to_json<T: Serialize + ?Sized>(data: &T, path: &Path) -> Result<(), ExportError> {
    write_file(path, render_json(data)?)
}

/// Write `rows` as CSV to `path`; nothing is written for no rows
pub fn to_csv(rows: &[Value], path: &Path) -> Result<(), ExportError> {
    if rows.is_empty() {
        return Ok(());
    }
    write_file(path, render_csv(rows)?)
}

/// Write `rows` to `path` in the format given by its extension
///
/// JSON output is the array of rows.
pub fn to_path(rows: &[Value], path: &Path) -> Result<ExportFormat, ExportError> {
    let format = ExportFormat::from_path(path)?;
    match format {
        ExportFormat::Json => to_json(rows, path)?,
        ExportFormat::Csv => to_csv(rows, path)?,
    }
    Ok(format)
}

fn write_file(path: &Path, contents: String) -> Result<(), ExportError> {
    fs::write(path, contents).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn flatten_row(row: &Value) -> Map<String, Value> {
    let mut flat = Map::new();
    match row {
        Value::Object(fields) => flatten_into(&mut flat, None, fields),
        other => {
            flat.insert("value".to_string(), other.clone());
        }
    }
    flat
}

fn flatten_into(flat: &mut Map<String, Value>, prefix: Option<&str>, fields: &Map<String, Value>) {
    for (name, value) in fields {
        let column = match prefix {
            Some(prefix) => format!("{prefix}.{name}"),
            None => name.clone(),
        };
        match value {
            Value::Object(nested) => flatten_into(flat, Some(&column), nested),
            other => {
                flat.insert(column, other.clone());
            }
        }
    }
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
