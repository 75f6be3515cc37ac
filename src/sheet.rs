//! Spreadsheet export: one workbook with a worksheet per entry kind.

use crate::entry::{CellValue, Entry, EntryKind, ExportRow, ExportValue, FormatHint};
use crate::geo::ReferenceLocation;
use crate::Result;
use chrono::NaiveDateTime;
use rust_xlsxwriter::{Format, Url, Workbook, Worksheet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Columns that get a fixed width instead of one sized to their content.
const FIXED_WIDTHS: [(&str, f64); 3] = [("Date", 10.0), ("Link", 10.0), ("All other offers", 20.0)];
const WIDTH_PADDING: usize = 4;
/// Longest text a worksheet cell holds.
const MAX_CELL_CHARS: usize = 32_767;

/// How one export value lands in a worksheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetCell {
    /// Literal text, never interpreted as a formula.
    Text(String),
    /// A hyperlink shown as `Link`.
    Link(String),
    Number { value: f64, decimals: Option<u8> },
    Timestamp { value: NaiveDateTime, with_time: bool },
}

impl SheetCell {
    /// Number of characters the cell shows.
    pub fn display_width(&self) -> usize {
        match self {
            SheetCell::Text(text) => text.chars().count(),
            SheetCell::Link(_) => 4,
            SheetCell::Number {
                value,
                decimals: Some(places),
            } => format!("{:.*}", *places as usize, value).len(),
            SheetCell::Number { value, decimals: None } => value.to_string().len(),
            SheetCell::Timestamp { with_time: true, .. } => 16,
            SheetCell::Timestamp { with_time: false, .. } => 10,
        }
    }
}

/// Maps an export value to its cell representation.
pub fn sheet_cell(cell: &ExportValue) -> SheetCell {
    match (&cell.value, cell.format) {
        (CellValue::Text(text), _) if is_link(text) => SheetCell::Link(text.clone()),
        (CellValue::Text(text), _) => SheetCell::Text(text.clone()),
        (CellValue::Number(n), Some(FormatHint::Decimals(places))) => SheetCell::Number {
            value: *n,
            decimals: Some(places),
        },
        (CellValue::Number(n), _) => SheetCell::Number {
            value: *n,
            decimals: None,
        },
        (CellValue::Timestamp(t), Some(FormatHint::Date)) => SheetCell::Timestamp {
            value: *t,
            with_time: false,
        },
        (CellValue::Timestamp(t), _) => SheetCell::Timestamp {
            value: *t,
            with_time: true,
        },
    }
}

fn is_link(text: &str) -> bool {
    text.starts_with("http://") || text.starts_with("https://")
}

fn decimal_format(places: u8) -> String {
    if places == 0 {
        String::from("0")
    } else {
        format!("0.{}", "0".repeat(places as usize))
    }
}

/// Column widths for `rows`: the longest header or cell plus padding, with the fixed widths
/// of the link and date columns applied on top.
pub fn column_widths(rows: &[ExportRow]) -> Vec<f64> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };

    let mut widths: Vec<usize> = first.keys().map(|header| header.chars().count()).collect();
    for row in rows {
        for (width, value) in widths.iter_mut().zip(row.values()) {
            *width = (*width).max(sheet_cell(value).display_width());
        }
    }

    first
        .keys()
        .zip(widths)
        .map(|(header, width)| {
            FIXED_WIDTHS
                .iter()
                .find(|(name, _)| name == header)
                .map(|(_, fixed)| *fixed)
                .unwrap_or((width + WIDTH_PADDING) as f64)
        })
        .collect()
}

/// Export rows of the entries of `kind`, most recently scraped first.
pub fn rows_of_kind(entries: &[Entry], kind: EntryKind, references: &[ReferenceLocation]) -> Vec<ExportRow> {
    let mut of_kind: Vec<&Entry> = entries.iter().filter(|e| e.kind() == kind).collect();
    of_kind.sort_by(|a, b| b.offer().scraped_on.cmp(&a.offer().scraped_on));
    of_kind
        .iter()
        .map(|entry| entry.to_export_row(true, references))
        .collect()
}

/// Writes every kind that has entries as its own worksheet of one workbook at `path`.
///
/// # Arguments
///
/// * `entries` - The persisted entries, in any order.
/// * `references` - Used for the nearest location and distance columns.
/// * `path` - The workbook file; parent directories are created.
///
/// # Returns
///
/// The kinds that got a worksheet, in sheet order. Without any entries no workbook is written.
pub fn export_workbook(entries: &[Entry], references: &[ReferenceLocation], path: &Path) -> Result<Vec<EntryKind>> {
    let mut workbook = Workbook::new();
    let mut written = Vec::new();

    for kind in EntryKind::ALL {
        let rows = rows_of_kind(entries, kind, references);
        if rows.is_empty() {
            continue;
        }

        let worksheet = workbook.add_worksheet();
        worksheet.set_name(kind.display_name())?;
        write_sheet(worksheet, &rows)?;
        debug!(sheet = kind.display_name(), rows = rows.len(), "Wrote worksheet");
        written.push(kind);
    }

    if written.is_empty() {
        info!("No entries to export");
        return Ok(written);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    workbook.save(path)?;
    info!(sheets = written.len(), path = %path.display(), "Exported entries");
    Ok(written)
}

/// Writes a bold header taken from the first row's labels, then every row, sizes the columns
/// and puts an autofilter over the whole table.
pub fn write_sheet(worksheet: &mut Worksheet, rows: &[ExportRow]) -> Result<()> {
    let Some(first) = rows.first() else {
        return Ok(());
    };

    let bold = Format::new().set_bold();
    for (col, header) in first.keys().enumerate() {
        worksheet.write_string_with_format(0, col as u16, header, &bold)?;
    }

    for (index, row) in rows.iter().enumerate() {
        let row_num = index as u32 + 1;
        for (col, value) in row.values().enumerate() {
            write_cell(worksheet, row_num, col as u16, &sheet_cell(value))?;
        }
    }

    for (col, width) in column_widths(rows).into_iter().enumerate() {
        worksheet.set_column_width(col as u16, width)?;
    }
    let last_col = first.len().saturating_sub(1) as u16;
    worksheet.autofilter(0, 0, rows.len() as u32, last_col)?;
    worksheet.set_freeze_panes(1, 0)?;
    Ok(())
}

fn write_cell(worksheet: &mut Worksheet, row: u32, col: u16, cell: &SheetCell) -> Result<()> {
    match cell {
        SheetCell::Text(text) => {
            worksheet.write_string(row, col, truncate(text))?;
        }
        SheetCell::Link(url) => {
            let linked = worksheet
                .write_url(row, col, Url::new(url.as_str()).set_text("Link"))
                .map(|_| ());
            if let Err(e) = linked {
                warn!(url = %url, error = %e, "Link not writable as hyperlink, keeping it as text");
                worksheet.write_string(row, col, truncate(url))?;
            }
        }
        SheetCell::Number {
            value,
            decimals: Some(places),
        } => {
            let format = Format::new().set_num_format(decimal_format(*places));
            worksheet.write_number_with_format(row, col, *value, &format)?;
        }
        SheetCell::Number { value, decimals: None } => {
            worksheet.write_number(row, col, *value)?;
        }
        SheetCell::Timestamp { value, with_time } => {
            let pattern = if *with_time { "dd.mm.yyyy hh:mm" } else { "dd.mm.yyyy" };
            worksheet.write_datetime_with_format(row, col, value, &Format::new().set_num_format(pattern))?;
        }
    }
    Ok(())
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_CELL_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
