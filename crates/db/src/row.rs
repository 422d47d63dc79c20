//! Conversion of PostgreSQL rows into column-name-keyed JSON maps.
//!
//! Script SQL runs over the simple query protocol, so every value arrives in
//! text format. Well-known types are decoded into their natural JSON shape;
//! anything else is kept as its text representation.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use pgbatch_core::types::Row;
use serde_json::Value;
use sqlx::postgres::{PgRow, Postgres};
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};

/// Materialize one row. Column order is preserved; SQL `NULL` becomes
/// [`Value::Null`].
pub fn row_to_json(row: &PgRow) -> Row {
    let mut out = Row::new();
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name());
        out.insert(column.name().to_string(), value);
    }
    out
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Value {
    let decoded = match type_name {
        "BOOL" => get::<bool>(row, idx).map(|v| v.map(Value::Bool)),
        "INT2" => get::<i16>(row, idx).map(|v| v.map(Value::from)),
        "INT4" => get::<i32>(row, idx).map(|v| v.map(Value::from)),
        "INT8" => get::<i64>(row, idx).map(|v| v.map(Value::from)),
        "FLOAT4" => get::<f32>(row, idx).map(|v| v.map(|f| Value::from(f64::from(f)))),
        "FLOAT8" => get::<f64>(row, idx).map(|v| v.map(Value::from)),
        "JSON" | "JSONB" => return text(row, idx).map_or(Value::Null, parse_json),
        "TIMESTAMPTZ" => get::<DateTime<Utc>>(row, idx).map(|v| v.map(|t| Value::String(t.to_rfc3339()))),
        "TIMESTAMP" => get::<NaiveDateTime>(row, idx)
            .map(|v| v.map(|t| Value::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))),
        "DATE" => get::<NaiveDate>(row, idx).map(|v| v.map(|d| Value::String(d.to_string()))),
        "TIME" => get::<NaiveTime>(row, idx).map(|v| v.map(|t| Value::String(t.to_string()))),
        "UUID" => get::<uuid::Uuid>(row, idx).map(|v| v.map(|u| Value::String(u.to_string()))),
        _ => return text(row, idx).map_or(Value::Null, Value::String),
    };

    match decoded {
        Ok(Some(value)) => value,
        Ok(None) => Value::Null,
        Err(e) => {
            tracing::debug!(column = idx, type_name, error = %e, "Falling back to text decode");
            text(row, idx).map_or(Value::Null, Value::String)
        }
    }
}

fn get<'r, T>(row: &'r PgRow, idx: usize) -> Result<Option<T>, sqlx::Error>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get::<Option<T>, _>(idx)
}

/// Raw text of a column, ignoring its declared type.
fn text(row: &PgRow, idx: usize) -> Option<String> {
    row.try_get_unchecked::<Option<String>, _>(idx).ok().flatten()
}

fn parse_json(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_text_is_parsed() {
        assert_eq!(parse_json(r#"{"a":1}"#.into()), serde_json::json!({"a": 1}));
    }

    #[test]
    fn malformed_json_kept_as_text() {
        assert_eq!(parse_json("{oops".into()), Value::String("{oops".into()));
    }
}
