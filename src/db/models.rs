use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use crate::doctype::Doc;

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DbSingleValue {
    pub field: String,
    pub value: Option<String>,
}

/// A single DocType's record as loaded from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSingle {
    pub doc: Doc,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbVersion {
    pub id: i64,
    pub doctype: String,
    pub docname: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}
