//! Renderings of a finished batch for the presentation layer.

use chrono::{DateTime, TimeZone};
use std::fmt::Display;
use std::path::Path;

use crate::errors::LookupError;
use crate::types::BatchResult;

/// One resolved value per input line, empty for unresolved items.
///
/// Pasted into a spreadsheet column it lines up with the original input.
pub fn spreadsheet_column(result: &BatchResult) -> String {
    result
        .iter()
        .map(|o| o.resolved_value().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Aligned table with index, partial id, resolved value, and status.
pub fn detailed_table(result: &BatchResult) -> String {
    let rows: Vec<[String; 4]> = result
        .iter()
        .enumerate()
        .map(|(i, o)| {
            [
                (i + 1).to_string(),
                o.partial_id().to_string(),
                o.resolved_value().unwrap_or("").to_string(),
                o.status().label().to_string(),
            ]
        })
        .collect();

    let header = ["#", "PARTIAL", "MSISDN", "STATUS"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &header.map(String::from), &widths);
    for row in &rows {
        push_row(&mut out, row, &widths);
    }
    out
}

fn push_row(out: &mut String, cells: &[String; 4], widths: &[usize; 4]) {
    let line = format!(
        "{:>w0$}  {:<w1$}  {:<w2$}  {}",
        cells[0],
        cells[1],
        cells[2],
        cells[3],
        w0 = widths[0],
        w1 = widths[1],
        w2 = widths[2],
    );
    out.push_str(line.trim_end());
    out.push('\n');
}

pub fn to_json(result: &BatchResult) -> Result<String, LookupError> {
    serde_json::to_string_pretty(result)
        .map_err(|e| LookupError::InvalidArgument(format!("cannot serialize results: {e}")))
}

/// Write `contents` as a UTF-8 text file, creating parent directories as needed.
pub fn write_text_file(path: &Path, contents: &str) -> Result<(), LookupError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents.as_bytes())?;
    Ok(())
}

/// File name for a timestamped export, e.g. `msisdn_results_20260119_143005.txt`.
pub fn default_export_file_name<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("msisdn_results_{}.txt", now.format("%Y%m%d_%H%M%S"))
}
