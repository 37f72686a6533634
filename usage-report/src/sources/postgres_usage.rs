use futures::{Stream, TryStreamExt};
use sqlx::{postgres::PgConnectOptions, Connection, PgConnection};
use storage_client::{db::usage_queries, domain::UsageRecord};

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// Billable usage rows read from `public.zfs_snapshots`.
///
/// One connection is opened when the stream is first polled. It is closed
/// after the last row, and dropped (closing the socket) if the query or a row
/// decode fails.
pub struct PostgresUsageSource {
    options: PgConnectOptions,
    skip_first_row: bool,
}

impl PostgresUsageSource {
    pub fn new(options: PgConnectOptions, skip_first_row: bool) -> Self {
        Self {
            options,
            skip_first_row,
        }
    }
}

/// Number rows in arrival order, optionally discarding the first one.
///
/// Errors are never discarded, even when the first item is one.
pub(crate) fn sequence_rows<T, S>(rows: S, skip_first_row: bool) -> impl Stream<Item = Result<Envelope<T>, PipelineError>>
where
    S: Stream<Item = Result<T, sqlx::Error>> + Unpin,
{
    async_stream::try_stream! {
        let mut rows = rows;
        let mut pending_skip = skip_first_row;
        let mut seq: u64 = 0;

        while let Some(payload) = rows.try_next().await.map_err(PipelineError::Query)? {
            if pending_skip {
                pending_skip = false;
                tracing::warn!("discarding first billable row (report.skip_first_row is set)");
                continue;
            }

            yield Envelope { payload, seq };
            seq += 1;
        }
    }
}

#[async_trait::async_trait]
impl Source<UsageRecord> for PostgresUsageSource {
    async fn stream(&self) -> EnvelopeStream<UsageRecord> {
        let options = self.options.clone();
        let skip_first_row = self.skip_first_row;

        let s = async_stream::try_stream! {
            let mut conn = PgConnection::connect_with(&options)
                .await
                .map_err(PipelineError::Connection)?;
            tracing::info!(
                host = options.get_host(),
                port = options.get_port(),
                database = options.get_database().unwrap_or(""),
                "connected to usage database"
            );

            {
                let rows = sequence_rows(usage_queries::billable_usage(&mut conn), skip_first_row);
                futures::pin_mut!(rows);
                while let Some(env) = rows.try_next().await? {
                    yield env;
                }
            }

            conn.close().await.map_err(PipelineError::Connection)?;
            tracing::debug!("usage database connection closed");
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(
        rows: Vec<Result<&'static str, sqlx::Error>>,
        skip_first_row: bool,
    ) -> Vec<Result<Envelope<&'static str>, PipelineError>> {
        sequence_rows(futures::stream::iter(rows), skip_first_row).collect().await
    }

    #[tokio::test]
    async fn rows_are_numbered_in_arrival_order() {
        let out = collect(vec![Ok("a"), Ok("b"), Ok("c")], false).await;

        let got: Vec<_> = out.into_iter().map(|r| r.map(|e| (e.seq, e.payload)).unwrap()).collect();
        assert_eq!(got, vec![(0, "a"), (1, "b"), (2, "c")]);
    }

    #[tokio::test]
    async fn first_row_is_dropped_only_when_asked() {
        let out = collect(vec![Ok("sentinel"), Ok("a"), Ok("b")], true).await;

        let got: Vec<_> = out.into_iter().map(|r| r.map(|e| (e.seq, e.payload)).unwrap()).collect();
        assert_eq!(got, vec![(0, "a"), (1, "b")]);
    }

    #[tokio::test]
    async fn query_errors_end_the_stream() {
        let out = collect(vec![Ok("a"), Err(sqlx::Error::RowNotFound), Ok("never")], false).await;

        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert!(matches!(out[1], Err(PipelineError::Query(_))));
    }

    #[tokio::test]
    async fn a_leading_error_is_not_mistaken_for_the_skipped_row() {
        let out = collect(vec![Err(sqlx::Error::RowNotFound), Ok("a")], true).await;

        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(PipelineError::Query(_))));
    }
}
