use serde_json::Value;
use sqlx::MySqlPool;

use crate::error::AppError;

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, PartialEq)]
pub enum SqlValue {
    String(String),
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Null,
}

/// ===============================
/// SQL update container
/// ===============================
#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// ===============================
/// Build dynamic UPDATE SQL
/// ===============================
/// Only keys listed in `allowed` may be set; anything else is a 400 so that
/// column names never come from the client unchecked.
pub fn build_update_sql(
    table: &str,
    payload: &Value,
    allowed: &[&str],
    id_column: &str,
    id_value: u64,
) -> Result<SqlUpdate, AppError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| AppError::bad_request("Payload must be a JSON object"))?;

    if obj.is_empty() {
        return Err(AppError::bad_request("No fields provided for update"));
    }

    if let Some(unknown) = obj.keys().find(|k| !allowed.contains(&k.as_str())) {
        return Err(AppError::bad_request(format!("Field '{unknown}' cannot be updated")));
    }

    let set_clause = obj
        .keys()
        .map(|k| format!("{} = ?", k))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!("UPDATE {} SET {} WHERE {} = ?", table, set_clause, id_column);

    let mut values = Vec::with_capacity(obj.len() + 1);

    for value in obj.values() {
        match value {
            Value::String(s) => values.push(SqlValue::String(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    values.push(SqlValue::I64(i));
                } else if let Some(f) = n.as_f64() {
                    values.push(SqlValue::F64(f));
                }
            }
            Value::Bool(b) => values.push(SqlValue::Bool(*b)),
            Value::Null => values.push(SqlValue::Null),
            _ => return Err(AppError::bad_request("Unsupported JSON value type")),
        }
    }

    // WHERE id = ?
    values.push(SqlValue::U64(id_value));

    Ok(SqlUpdate { sql, values })
}

/// ===============================
/// Execute the update
/// ===============================
pub async fn execute_update(pool: &MySqlPool, update: SqlUpdate) -> Result<u64, sqlx::Error> {
    let mut query = sqlx::query(&update.sql);

    for value in update.values {
        query = match value {
            SqlValue::String(v) => query.bind(v),
            SqlValue::I64(v) => query.bind(v),
            SqlValue::U64(v) => query.bind(v),
            SqlValue::F64(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::Null => query.bind(None::<String>),
        };
    }

    let result = query.execute(pool).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const COLUMNS: &[&str] = &["name", "bed_number", "email"];

    #[test]
    fn builds_placeholders_in_payload_order() {
        let update = build_update_sql(
            "students",
            &json!({"bed_number": 2, "email": null, "name": "Arif"}),
            COLUMNS,
            "id",
            7,
        )
        .unwrap();

        assert_eq!(
            update.sql,
            "UPDATE students SET bed_number = ?, email = ?, name = ? WHERE id = ?"
        );
        assert_eq!(
            update.values,
            vec![
                SqlValue::I64(2),
                SqlValue::Null,
                SqlValue::String("Arif".to_string()),
                SqlValue::U64(7),
            ]
        );
    }

    #[test]
    fn rejects_columns_outside_the_allow_list() {
        let err = build_update_sql("students", &json!({"id": 1}), COLUMNS, "id", 7).unwrap_err();
        assert_eq!(err.to_string(), "Field 'id' cannot be updated");
    }

    #[test]
    fn rejects_empty_and_non_object_payloads() {
        assert!(build_update_sql("students", &json!({}), COLUMNS, "id", 1).is_err());
        assert!(build_update_sql("students", &json!([1]), COLUMNS, "id", 1).is_err());
        assert!(build_update_sql("students", &json!({"name": [1]}), COLUMNS, "id", 1).is_err());
    }
}
