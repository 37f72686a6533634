use std::{
    fs,
    path::{Path, PathBuf},
};

use futures::StreamExt;
use rust_xlsxwriter::{ColNum, Format, Formula, RowNum, Workbook, Worksheet, XlsxError};

use crate::{
    config::ReportSettings,
    pipeline::{Envelope, PipelineError, Sink},
    transform::ReportRow,
};

pub const MAIN_SHEET: &str = "Main";
pub const DATA_SHEET: &str = "Data";
pub const CURRENCY_FORMAT: &str = "$#,##0.00";

pub const HEADERS: [&str; 7] = [
    "Hostname",
    "Dataset",
    "Used Space (TB)",
    "Total dollar $",
    "grit:owner",
    "grit:projectcode",
    "grit:lafscode",
];

/// Cost formula for a zero-based `Main` row: unit price times that row's TB cell.
pub fn cost_formula(row: RowNum) -> String {
    format!("={DATA_SHEET}!B1 * C{}", row + 1)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Blank,
    Text(String),
    Number(f64),
    /// Currency formatted formula with the value it evaluates to at write time.
    Cost { formula: String, cached: f64 },
}

impl From<Option<String>> for Cell {
    fn from(value: Option<String>) -> Self {
        value.map(Cell::Text).unwrap_or(Cell::Blank)
    }
}

/// A fully laid out row of the `Main` sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct MainRow {
    pub row: RowNum,
    pub cells: Vec<Cell>,
    pub hidden: bool,
}

/// Lay out one report row. Row 0 holds the headers, so `seq` N lands on row N + 1.
pub fn layout_row(row: RowNum, data: ReportRow, settings: &ReportSettings) -> MainRow {
    let hidden = settings.hide_zero_rows && data.is_zero_usage();
    let cost = Cell::Cost {
        formula: cost_formula(row),
        cached: data.used_tb * settings.unit_price,
    };

    MainRow {
        row,
        cells: vec![
            data.hostname.into(),
            data.dataset.into(),
            Cell::Number(data.used_tb),
            cost,
            data.owner.into(),
            data.project_code.into(),
            data.lafs_code.into(),
        ],
        hidden,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportSummary {
    pub path: PathBuf,
    pub rows: u64,
    pub hidden_rows: u64,
    pub total_tb: f64,
    pub total_cost: f64,
}

fn write_main_sheet(rows: &[MainRow]) -> Result<Worksheet, XlsxError> {
    let bold = Format::new().set_bold();
    let currency = Format::new().set_num_format(CURRENCY_FORMAT);

    let mut sheet = Worksheet::new();
    sheet.set_name(MAIN_SHEET)?;

    for (col, header) in HEADERS.iter().enumerate() {
        sheet.write_string_with_format(0, col as ColNum, *header, &bold)?;
    }

    for main_row in rows {
        for (col, cell) in main_row.cells.iter().enumerate() {
            let col = col as ColNum;
            match cell {
                Cell::Blank => {}
                Cell::Text(s) => {
                    sheet.write_string(main_row.row, col, s)?;
                }
                Cell::Number(n) => {
                    sheet.write_number(main_row.row, col, *n)?;
                }
                Cell::Cost { formula, cached } => {
                    let formula = Formula::new(formula).set_result(cached.to_string());
                    sheet.write_formula_with_format(main_row.row, col, formula, &currency)?;
                }
            }
        }

        if main_row.hidden {
            sheet.set_row_hidden(main_row.row)?;
        }
    }

    sheet.autofit();
    Ok(sheet)
}

fn write_data_sheet(settings: &ReportSettings) -> Result<Worksheet, XlsxError> {
    let currency = Format::new().set_num_format(CURRENCY_FORMAT);

    let mut sheet = Worksheet::new();
    sheet.set_name(DATA_SHEET)?;
    sheet.write_string(0, 0, &settings.price_label)?;
    sheet.write_number_with_format(0, 1, settings.unit_price, &currency)?;
    Ok(sheet)
}

/// Build the workbook and save it to `path`.
pub fn save_workbook(path: &Path, rows: &[MainRow], settings: &ReportSettings) -> Result<(), XlsxError> {
    let mut workbook = Workbook::new();
    workbook.push_worksheet(write_main_sheet(rows)?);
    workbook.push_worksheet(write_data_sheet(settings)?);
    workbook.save(path)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Writes the billing workbook once the input stream is exhausted.
///
/// The file is saved under a `.partial` name and renamed into place, so a
/// failed run never leaves a file under the final name.
pub struct XlsxReportSink {
    path: PathBuf,
    settings: ReportSettings,
}

impl XlsxReportSink {
    pub fn new(path: impl Into<PathBuf>, settings: ReportSettings) -> Self {
        Self {
            path: path.into(),
            settings,
        }
    }

    fn write_error(&self, message: impl ToString) -> PipelineError {
        PipelineError::Write {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }

    fn finalize(&self, rows: &[MainRow]) -> Result<(), PipelineError> {
        let partial = partial_path(&self.path);

        if let Err(e) = save_workbook(&partial, rows, &self.settings) {
            let _ = fs::remove_file(&partial);
            return Err(self.write_error(e));
        }

        if let Err(e) = fs::rename(&partial, &self.path) {
            let _ = fs::remove_file(&partial);
            return Err(self.write_error(e));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl Sink<ReportRow> for XlsxReportSink {
    type Output = ReportSummary;

    async fn run<S>(&self, mut input: S) -> Result<ReportSummary, PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<ReportRow>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut rows: Vec<MainRow> = Vec::new();
        let mut summary = ReportSummary {
            path: self.path.clone(),
            rows: 0,
            hidden_rows: 0,
            total_tb: 0.0,
            total_cost: 0.0,
        };

        while let Some(item) = input.next().await {
            let env = item?;

            let row = env
                .seq
                .checked_add(1)
                .and_then(|n| RowNum::try_from(n).ok())
                .ok_or_else(|| self.write_error(format!("row {} exceeds the sheet row limit", env.seq)))?;

            summary.total_tb += env.payload.used_tb;
            summary.total_cost += env.payload.used_tb * self.settings.unit_price;

            let main_row = layout_row(row, env.payload, &self.settings);
            summary.rows += 1;
            if main_row.hidden {
                summary.hidden_rows += 1;
            }
            rows.push(main_row);
        }

        self.finalize(&rows)?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn report_row(dataset: &str, used_tb: f64, owner: Option<&str>) -> ReportRow {
        ReportRow {
            hostname: Some("nas01".to_string()),
            dataset: Some(dataset.to_string()),
            used_tb,
            owner: owner.map(str::to_string),
            project_code: Some("PRJ-1".to_string()),
            lafs_code: None,
        }
    }

    fn input(rows: Vec<ReportRow>) -> impl futures::Stream<Item = Result<Envelope<ReportRow>, PipelineError>> + Send + Unpin {
        let items: Vec<_> = rows
            .into_iter()
            .enumerate()
            .map(|(seq, payload)| Ok(Envelope { payload, seq: seq as u64 }))
            .collect();
        futures::stream::iter(items)
    }

    #[test]
    fn cost_formula_references_price_cell_and_own_row() {
        assert_eq!(cost_formula(1), "=Data!B1 * C2");
        assert_eq!(cost_formula(41), "=Data!B1 * C42");
    }

    #[test]
    fn layout_places_cells_in_header_order() {
        let settings = ReportSettings::default();
        let row = layout_row(3, report_row("tank/a", 2.0, Some("alab")), &settings);

        assert_eq!(row.row, 3);
        assert!(!row.hidden);
        assert_eq!(
            row.cells,
            vec![
                Cell::Text("nas01".to_string()),
                Cell::Text("tank/a".to_string()),
                Cell::Number(2.0),
                Cell::Cost {
                    formula: "=Data!B1 * C4".to_string(),
                    cached: 7.5,
                },
                Cell::Text("alab".to_string()),
                Cell::Text("PRJ-1".to_string()),
                Cell::Blank,
            ]
        );
        assert_eq!(row.cells.len(), HEADERS.len());
    }

    #[test]
    fn null_hostname_and_dataset_are_written_blank() {
        let mut data = report_row("tank/a", 1.0, None);
        data.hostname = None;
        data.dataset = None;

        let row = layout_row(1, data, &ReportSettings::default());
        assert_eq!(row.cells[0], Cell::Blank);
        assert_eq!(row.cells[1], Cell::Blank);
        assert_eq!(row.cells[2], Cell::Number(1.0));
    }

    #[test]
    fn zero_usage_rows_are_hidden_unless_disabled() {
        let mut settings = ReportSettings::default();
        assert!(layout_row(1, report_row("tank/empty", 0.0, None), &settings).hidden);
        assert!(!layout_row(1, report_row("tank/tiny", 0.000001, None), &settings).hidden);

        settings.hide_zero_rows = false;
        assert!(!layout_row(1, report_row("tank/empty", 0.0, None), &settings).hidden);
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/out/usage_report_20240101000000.xlsx")),
            PathBuf::from("/out/usage_report_20240101000000.xlsx.partial")
        );
    }

    #[tokio::test]
    async fn sink_writes_final_file_and_summarizes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.xlsx");
        let sink = XlsxReportSink::new(&path, ReportSettings::default());

        let summary = sink
            .run(input(vec![
                report_row("tank/a", 2.0, Some("alab")),
                report_row("tank/b", 0.0, None),
                report_row("tank/c", 1.0, Some("blab")),
            ]))
            .await
            .unwrap();

        assert_eq!(summary.rows, 3);
        assert_eq!(summary.hidden_rows, 1);
        assert_eq!(summary.total_tb, 3.0);
        assert_eq!(summary.total_cost, 11.25);
        assert_eq!(summary.path, path);

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"PK"), "xlsx files are zip archives");
        assert!(!partial_path(&path).exists());
    }

    #[tokio::test]
    async fn upstream_errors_leave_no_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.xlsx");
        let sink = XlsxReportSink::new(&path, ReportSettings::default());

        let items = vec![
            Ok(Envelope {
                payload: report_row("tank/a", 1.0, None),
                seq: 0,
            }),
            Err(PipelineError::Query(sqlx::Error::RowNotFound)),
        ];

        let err = sink.run(futures::stream::iter(items)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Query(_)));
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    #[tokio::test]
    async fn unwritable_destination_is_a_write_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("no-such-dir").join("report.xlsx");
        let sink = XlsxReportSink::new(&path, ReportSettings::default());

        let err = sink.run(input(vec![report_row("tank/a", 1.0, None)])).await.unwrap_err();

        match err {
            PipelineError::Write { path: failed, .. } => assert_eq!(failed, path),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
