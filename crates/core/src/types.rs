/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// A materialized result row: column name to JSON value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Identifier shared by every log record of one run.
pub type RunId = uuid::Uuid;

/// Generate a fresh, time-ordered run identifier.
pub fn new_run_id() -> RunId {
    uuid::Uuid::now_v7()
}
