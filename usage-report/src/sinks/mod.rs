pub mod xlsx_report;

pub use xlsx_report::{ReportSummary, XlsxReportSink};
