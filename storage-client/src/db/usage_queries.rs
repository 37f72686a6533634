use futures::stream::BoxStream;
use serde_json::{Map, Value};
use sqlx::{types::Json, PgConnection};

use crate::domain::{usage_record::BILLABLE_KEY, UsageRecord};

/// Every dataset whose properties contain the bound filter document.
///
/// `@>` is a containment match, so datasets carrying other properties still
/// qualify as long as they include every key of the filter.
pub const BILLABLE_USAGE_SQL: &str = r#"
    SELECT
        x.hostname,
        x.filesystem AS dataset,
        x.used_space,
        x.properties
    FROM public.zfs_snapshots x
    WHERE x.properties @> $1::jsonb
"#;

/// `{"grit:billable": "true"}`
pub fn billable_filter() -> Value {
    let mut filter = Map::new();
    filter.insert(BILLABLE_KEY.to_string(), Value::String("true".to_string()));
    Value::Object(filter)
}

/// Stream billable usage rows over a single connection.
///
/// Rows are decoded lazily as the caller polls; the connection stays borrowed
/// until the stream is dropped.
pub fn billable_usage<'c>(conn: &'c mut PgConnection) -> BoxStream<'c, Result<UsageRecord, sqlx::Error>> {
    sqlx::query_as::<_, UsageRecord>(BILLABLE_USAGE_SQL)
        .bind(Json(billable_filter()))
        .fetch(conn)
}
