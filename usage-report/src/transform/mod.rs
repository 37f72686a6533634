pub mod size;

pub use size::{bytes_to_tb, size_to_bytes, SizeParseError};

use storage_client::domain::UsageRecord;

use crate::pipeline::{Envelope, PipelineError, Transform};

/// One line of the billing sheet, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub hostname: Option<String>,
    pub dataset: Option<String>,
    pub used_tb: f64,
    pub owner: Option<String>,
    pub project_code: Option<String>,
    pub lafs_code: Option<String>,
}

impl ReportRow {
    pub fn is_zero_usage(&self) -> bool {
        self.used_tb == 0.0
    }
}

/// Pure conversion of a `UsageRecord` into a `ReportRow`.
///
/// Fails only when `used_space` cannot be parsed. Missing billing properties
/// are carried through as `None`.
pub fn usage_to_report_row(env: Envelope<UsageRecord>) -> Result<Envelope<ReportRow>, PipelineError> {
    let record = env.payload;

    let used_bytes = size_to_bytes(record.used_space.as_deref()).map_err(|source| PipelineError::SizeParse {
        host: record.hostname.clone().unwrap_or_default(),
        dataset: record.dataset.clone().unwrap_or_default(),
        source,
    })?;

    let row = ReportRow {
        owner: record.owner(),
        project_code: record.project_code(),
        lafs_code: record.lafs_code(),
        used_tb: bytes_to_tb(used_bytes),
        hostname: record.hostname,
        dataset: record.dataset,
    };

    tracing::debug!(
        host = row.hostname.as_deref().unwrap_or(""),
        dataset = row.dataset.as_deref().unwrap_or(""),
        used_space = record.used_space.as_deref().unwrap_or(""),
        used_tb = row.used_tb,
        "usage record converted"
    );

    Ok(Envelope {
        payload: row,
        seq: env.seq,
    })
}

#[derive(Clone, Default)]
pub struct UsageToReportRow;

#[async_trait::async_trait]
impl Transform<UsageRecord, ReportRow> for UsageToReportRow {
    async fn apply(&self, input: Envelope<UsageRecord>) -> Result<Envelope<ReportRow>, PipelineError> {
        usage_to_report_row(input)
    }
}
