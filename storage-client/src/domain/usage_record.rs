use std::collections::BTreeMap;

use serde_json::Value;
use sqlx::types::Json;

pub const BILLABLE_KEY: &str = "grit:billable";
pub const OWNER_KEY: &str = "grit:owner";
pub const PROJECT_CODE_KEY: &str = "grit:projectcode";
pub const LAFS_CODE_KEY: &str = "grit:lafscode";

/// One billable dataset as reported by the latest ZFS snapshot scan.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UsageRecord {
    /// `NULL` hostnames and filesystems are carried through and written blank.
    pub hostname: Option<String>,
    pub dataset: Option<String>,
    /// Human readable size such as `12.5G`; `None` or empty means nothing used.
    pub used_space: Option<String>,
    pub properties: Json<BTreeMap<String, Value>>,
}

impl UsageRecord {
    /// Look up a dataset property as text.
    ///
    /// Strings are returned as-is, other JSON scalars are rendered as JSON text
    /// and `null` counts as absent.
    pub fn property(&self, key: &str) -> Option<String> {
        match self.properties.0.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn owner(&self) -> Option<String> {
        self.property(OWNER_KEY)
    }

    pub fn project_code(&self) -> Option<String> {
        self.property(PROJECT_CODE_KEY)
    }

    pub fn lafs_code(&self) -> Option<String> {
        self.property(LAFS_CODE_KEY)
    }
}
