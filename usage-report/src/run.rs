use std::sync::Arc;

use anyhow::{Context, Result};
use storage_client::domain::UsageRecord;
use time::{macros::format_description, OffsetDateTime};

use crate::{
    config::{ConfigSource, ReportConfig},
    pipeline::Pipeline,
    sinks::{ReportSummary, XlsxReportSink},
    sources::PostgresUsageSource,
    transform::{ReportRow, UsageToReportRow},
};

/// `usage_report_<YYYYMMDDHHMMSS>.xlsx` for the given instant.
pub fn report_file_name(now: OffsetDateTime) -> Result<String, time::error::Format> {
    let stamp = now.format(format_description!("[year][month][day][hour][minute][second]"))?;
    Ok(format!("usage_report_{stamp}.xlsx"))
}

/// Wall clock in the local time zone, or UTC when the offset can't be determined.
///
/// Call before any extra threads exist; `time` refuses to read the local
/// offset from a multi-threaded process.
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "local UTC offset unavailable, timestamping report in UTC");
        OffsetDateTime::now_utc()
    })
}

/// Query billable usage and write the report for one run.
pub async fn run(config: ReportConfig, now: OffsetDateTime) -> Result<ReportSummary> {
    let file_name = report_file_name(now).context("formatting report file name")?;
    let path = config.output.path.join(file_name);

    tracing::info!(
        path = %path.display(),
        unit_price = config.report.unit_price,
        "generating usage report"
    );

    let pipeline: Pipeline<_, UsageRecord, ReportRow, _> = Pipeline {
        source: PostgresUsageSource::new(config.database.connect_options(), config.report.skip_first_row),
        transform: Arc::new(UsageToReportRow),
        sink: XlsxReportSink::new(path, config.report),
    };

    let summary = pipeline.run().await.map_err(|e| {
        let stage = e.stage();
        anyhow::Error::new(e).context(stage)
    })?;

    tracing::info!(
        path = %summary.path.display(),
        rows = summary.rows,
        hidden_rows = summary.hidden_rows,
        total_tb = summary.total_tb,
        total_cost = summary.total_cost,
        "usage report written"
    );

    Ok(summary)
}

/// Load configuration from `source`, then run.
pub async fn run_from_source<C: ConfigSource>(source: &C, now: OffsetDateTime) -> Result<ReportSummary> {
    let config = source
        .load()
        .with_context(|| format!("loading configuration ({})", source.describe()))?;
    run(config, now).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayeredTomlSource;
    use tempfile::TempDir;
    use time::macros::datetime;

    #[test]
    fn file_name_is_a_zero_padded_timestamp() {
        let name = report_file_name(datetime!(2024-03-05 07:08:09 UTC)).unwrap();
        assert_eq!(name, "usage_report_20240305070809.xlsx");
    }

    #[test]
    fn file_name_uses_the_given_offset() {
        let name = report_file_name(datetime!(2024-12-31 23:59:59 -5)).unwrap();
        assert_eq!(name, "usage_report_20241231235959.xlsx");
    }

    #[tokio::test]
    async fn missing_configuration_aborts_before_connecting() {
        let dir = TempDir::new().unwrap();
        let user = dir.path().join("user.toml");
        let system = dir.path().join("system.toml");
        let source = LayeredTomlSource::new(Some(user.clone()), system.clone());

        let err = run_from_source(&source, datetime!(2024-01-01 00:00:00 UTC))
            .await
            .unwrap_err();

        let msg = format!("{err:#}");
        assert!(msg.starts_with("loading configuration"));
        assert!(msg.contains(&user.display().to_string()));
        assert!(msg.contains(&system.display().to_string()));
    }
}
