use std::path::{Path, PathBuf};

use chrono::Local;
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook, Worksheet, XlsxError};

use crate::TimeZone;
use crate::error::AppError;
use crate::model::SummaryRow;

pub const DEFAULT_OUTPUT_FILE: &str = "log_analysis.xlsx";
const BACKUP_TS_FMT: &str = "%Y%m%d_%H%M%S";
const HEADERS: [&str; 8] = ["SI no", "EventID", "Source", "Level", "Task Category", "Timestamp (logged)", "Description", "Frequency"];
const DESCRIPTION_COL: usize = 6;
const TIMESTAMP_COL: usize = 5;
/// Excel rejects longer cell strings.
const MAX_CELL_CHARS: usize = 32_767;
const TRUNCATED_MARK: &str = "\n[... truncated]";
const MIN_COL_WIDTH: usize = 8;
const MAX_COL_WIDTH: usize = 80;

#[derive(Clone, Copy, Debug)]
pub struct ReportOptions {
    pub time_zone: TimeZone,
}

#[derive(Debug)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub backup: Option<PathBuf>,
    /// Why the styled workbook was abandoned in favour of a plain one.
    pub degraded: Option<AppError>,
    pub rows: usize,
}

impl WriteOutcome {
    pub fn formatted(&self) -> bool { self.degraded.is_none() }
}

enum Cell { Number(f64), Text(String) }

impl Cell {
    fn text_len(&self) -> usize {
        match self {
            Cell::Number(n) => n.to_string().len(),
            Cell::Text(s) => s.lines().map(|l| l.chars().count()).max().unwrap_or(0),
        }
    }
}

fn clamp_cell(s: String) -> String {
    if s.chars().count() <= MAX_CELL_CHARS { return s; }
    let keep = MAX_CELL_CHARS - TRUNCATED_MARK.chars().count();
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(TRUNCATED_MARK);
    out
}

fn format_time(t: &chrono::DateTime<chrono::Utc>, tz: TimeZone) -> String {
    match tz {
        TimeZone::Local => t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
        TimeZone::Utc => t.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

fn table_row(r: &SummaryRow, opts: &ReportOptions) -> Vec<Cell> {
    let timestamps = r.timestamps.iter().map(|t| format_time(t, opts.time_zone)).collect::<Vec<_>>().join(", ");
    vec![
        Cell::Number(r.serial as f64),
        Cell::Number(r.event_id as f64),
        Cell::Text(clamp_cell(r.sources.join(" || "))),
        Cell::Text(clamp_cell(r.levels.join(" || "))),
        Cell::Text(r.category.clone().unwrap_or_default()),
        Cell::Text(clamp_cell(timestamps)),
        Cell::Text(clamp_cell(r.descriptions.join("\n----------\n"))),
        Cell::Number(r.frequency as f64),
    ]
}

/// `<stem>_<YYYYMMDD_HHMMSS><ext>` next to `path`, with a counter if that name is taken.
pub fn backup_path(path: &Path, stamp: &str) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
    let mut candidate = path.with_file_name(format!("{}_{}{}", stem, stamp, ext));
    let mut n = 1;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{}_{}_{}{}", stem, stamp, n, ext));
        n += 1;
    }
    candidate
}

/// Renames an existing report aside. A failed rename aborts the write.
pub fn backup_existing(path: &Path) -> Result<Option<PathBuf>, AppError> {
    if !path.exists() { return Ok(None); }
    let target = backup_path(path, &Local::now().format(BACKUP_TS_FMT).to_string());
    std::fs::rename(path, &target).map_err(|e| AppError::io(format!("back up {} to {}", path.display(), target.display()), e))?;
    log::info!("Backed up {} -> {}", path.display(), target.display());
    Ok(Some(target))
}

struct Styles { header: Format, wrapped: Format, plain: Format }

impl Styles {
    fn new() -> Self {
        Self {
            header: Format::new().set_bold().set_background_color(Color::RGB(0xDDDDDD)).set_align(FormatAlign::Center).set_align(FormatAlign::VerticalCenter),
            wrapped: Format::new().set_text_wrap().set_align(FormatAlign::Top),
            plain: Format::new().set_align(FormatAlign::VerticalCenter),
        }
    }

    fn for_column(&self, col: usize) -> &Format {
        if col == DESCRIPTION_COL || col == TIMESTAMP_COL { &self.wrapped } else { &self.plain }
    }
}

fn write_cell(ws: &mut Worksheet, row: u32, col: u16, cell: &Cell, fmt: Option<&Format>) -> Result<(), XlsxError> {
    match (cell, fmt) {
        (Cell::Number(n), None) => { ws.write_number(row, col, *n)?; }
        (Cell::Number(n), Some(f)) => { ws.write_number_with_format(row, col, *n, f)?; }
        (Cell::Text(s), None) => { ws.write_string(row, col, s.as_str())?; }
        (Cell::Text(s), Some(f)) => { ws.write_string_with_format(row, col, s.as_str(), f)?; }
    }
    Ok(())
}

fn column_width(col: usize, table: &[Vec<Cell>]) -> f64 {
    let longest = table.iter().map(|row| row[col].text_len()).chain(std::iter::once(HEADERS[col].len())).max().unwrap_or(0);
    let w = match col {
        DESCRIPTION_COL => (longest + 4).max(30),
        TIMESTAMP_COL => (longest + 4).max(25),
        _ => (longest + 2).max(MIN_COL_WIDTH),
    };
    w.min(MAX_COL_WIDTH) as f64
}

type Layout = fn(&mut Worksheet, &[Vec<Cell>]) -> Result<(), XlsxError>;

fn apply_layout(ws: &mut Worksheet, table: &[Vec<Cell>]) -> Result<(), XlsxError> {
    for c in 0..HEADERS.len() { ws.set_column_width(c as u16, column_width(c, table))?; }
    ws.set_row_height(0, 26)?;
    ws.set_freeze_panes(1, 0)?;
    ws.autofilter(0, 0, table.len() as u32, (HEADERS.len() - 1) as u16)?;
    ws.set_zoom(80);
    ws.set_print_fit_to_pages(1, 0);
    Ok(())
}

/// Builds the workbook; with `styles` set the header, wrapping and `layout` are applied too.
fn build_workbook(table: &[Vec<Cell>], styles: Option<(&Styles, Layout)>) -> Result<Workbook, XlsxError> {
    let mut wb = Workbook::new();
    let ws = wb.add_worksheet();
    ws.set_name("Summary")?;
    for (c, h) in HEADERS.iter().enumerate() {
        match styles {
            Some((st, _)) => { ws.write_string_with_format(0, c as u16, *h, &st.header)?; }
            None => { ws.write_string(0, c as u16, *h)?; }
        }
    }
    for (r, row) in table.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            write_cell(ws, (r + 1) as u32, c as u16, cell, styles.map(|(st, _)| st.for_column(c)))?;
        }
    }
    if let Some((_, layout)) = styles { layout(ws, table)?; }
    Ok(wb)
}

/// Writes the report to `path`, backing up any file already there. Formatting is
/// best effort: on failure a plain workbook is written and `degraded` says why.
pub fn write_report(rows: &[SummaryRow], path: &Path, opts: &ReportOptions) -> Result<WriteOutcome, AppError> {
    write_with_layout(rows, path, opts, apply_layout)
}

fn write_with_layout(rows: &[SummaryRow], path: &Path, opts: &ReportOptions, layout: Layout) -> Result<WriteOutcome, AppError> {
    let table: Vec<Vec<Cell>> = rows.iter().map(|r| table_row(r, opts)).collect();
    let backup = backup_existing(path)?;
    let (mut wb, degraded) = match build_workbook(&table, Some((&Styles::new(), layout))) {
        Ok(wb) => (wb, None),
        Err(e) => {
            log::warn!("Spreadsheet formatting failed, writing an unformatted report: {}", e);
            (build_workbook(&table, None)?, Some(AppError::Formatting(e.to_string())))
        }
    };
    wb.save(path)?;
    log::info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(WriteOutcome { path: path.to_path_buf(), backup, degraded, rows: rows.len() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone as _, Utc};
    use tempfile::tempdir;

    fn row(serial: usize, id: u16) -> SummaryRow {
        SummaryRow {
            serial,
            event_id: id,
            sources: vec!["Service Control Manager".to_string(), "EventLog".to_string()],
            levels: vec!["ERROR".to_string()],
            category: Some("None".to_string()),
            timestamps: vec![Utc.with_ymd_and_hms(2024, 9, 1, 10, 0, 0).unwrap(), Utc.with_ymd_and_hms(2024, 9, 1, 11, 0, 5).unwrap()],
            descriptions: vec!["first".to_string(), "second".to_string()],
            frequency: 3,
        }
    }

    fn opts() -> ReportOptions { ReportOptions { time_zone: TimeZone::Utc } }

    #[test]
    fn cells_use_report_separators() {
        let cells = table_row(&row(1, 7000), &opts());
        let texts: Vec<String> = cells.iter().map(|c| match c { Cell::Text(s) => s.clone(), Cell::Number(n) => n.to_string() }).collect();
        assert_eq!(texts[0], "1");
        assert_eq!(texts[1], "7000");
        assert_eq!(texts[2], "Service Control Manager || EventLog");
        assert_eq!(texts[5], "2024-09-01 10:00:00, 2024-09-01 11:00:05");
        assert_eq!(texts[6], "first\n----------\nsecond");
        assert_eq!(texts[7], "3");
    }

    #[test]
    fn oversized_cells_are_truncated() {
        let long = "x".repeat(MAX_CELL_CHARS + 10);
        let clamped = clamp_cell(long);
        assert_eq!(clamped.chars().count(), MAX_CELL_CHARS);
        assert!(clamped.ends_with(TRUNCATED_MARK));
        assert_eq!(clamp_cell("short".to_string()), "short");
    }

    #[test]
    fn widths_respect_bounds() {
        let mut r = row(1, 1);
        r.descriptions = vec!["y".repeat(500)];
        let table = vec![table_row(&r, &opts())];
        assert_eq!(column_width(DESCRIPTION_COL, &table), MAX_COL_WIDTH as f64);
        assert_eq!(column_width(0, &table), 8.0);
        assert!(column_width(TIMESTAMP_COL, &table) >= 25.0);
    }

    #[test]
    fn backup_name_gets_counter_when_taken() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("log_analysis.xlsx");
        assert_eq!(backup_path(&p, "20240901_100000"), dir.path().join("log_analysis_20240901_100000.xlsx"));
        std::fs::write(dir.path().join("log_analysis_20240901_100000.xlsx"), b"old").unwrap();
        assert_eq!(backup_path(&p, "20240901_100000"), dir.path().join("log_analysis_20240901_100000_1.xlsx"));
    }

    #[test]
    fn writes_new_file_without_backup() {
        let dir = tempdir().unwrap();
        let p = dir.path().join(DEFAULT_OUTPUT_FILE);
        let out = write_report(&[row(1, 41), row(2, 7000)], &p, &opts()).unwrap();
        assert!(out.formatted());
        assert_eq!(out.backup, None);
        assert_eq!(out.rows, 2);
        let bytes = std::fs::read(&p).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn existing_report_is_renamed_aside() {
        let dir = tempdir().unwrap();
        let p = dir.path().join(DEFAULT_OUTPUT_FILE);
        std::fs::write(&p, b"previous report").unwrap();
        let out = write_report(&[row(1, 41)], &p, &opts()).unwrap();
        let backup = out.backup.unwrap();
        assert_eq!(std::fs::read(&backup).unwrap(), b"previous report");
        assert!(backup.file_name().unwrap().to_string_lossy().starts_with("log_analysis_"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
        assert_eq!(&std::fs::read(&p).unwrap()[..2], b"PK");
    }

    #[test]
    fn empty_rows_still_produce_a_workbook() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("empty.xlsx");
        let out = write_report(&[], &p, &opts()).unwrap();
        assert_eq!(out.rows, 0);
        assert!(out.formatted());
        assert!(p.exists());
    }

    fn broken_layout(ws: &mut Worksheet, _table: &[Vec<Cell>]) -> Result<(), XlsxError> {
        ws.set_name("bad[name]")?;
        Ok(())
    }

    #[test]
    fn failed_formatting_falls_back_to_plain_workbook() {
        let dir = tempdir().unwrap();
        let p = dir.path().join(DEFAULT_OUTPUT_FILE);
        let out = write_with_layout(&[row(1, 41), row(2, 7000)], &p, &opts(), broken_layout).unwrap();
        assert!(!out.formatted());
        assert!(matches!(out.degraded, Some(AppError::Formatting(_))));
        assert_eq!(out.rows, 2);
        assert_eq!(&std::fs::read(&p).unwrap()[..2], b"PK");
    }
}
