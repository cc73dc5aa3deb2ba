// SPDX-License-Identifier: Apache-2.0

//! PostgreSQL driver
//!
//! Implements the [`Connection`] trait over SQLx.
//!
//! ## Transaction handling
//!
//! `begin()` acquires a dedicated connection from the pool and holds it
//! until `commit()` or `rollback()`. While it is held, every statement
//! runs on that connection so savepoints and uncommitted rows stay
//! visible to the rest of the batch.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgColumn, PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::{Column, Executor, Row, TypeInfo};
use tokio::sync::Mutex;
use tracing::debug;

use crate::column::RawColumnInfo;
use crate::connection::Connection;
use crate::error::{GridError, GridResult};
use crate::types::{DriverCapabilities, ResultSet, Value};

/// Connection parameters for one PostgreSQL database.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    pub ssl: bool,
    #[serde(default)]
    pub pool_max_connections: Option<u32>,
    #[serde(default)]
    pub pool_acquire_timeout_secs: Option<u32>,
}

fn build_connection_string(config: &PgConnectionConfig) -> String {
    let db = config.database.as_deref().unwrap_or("postgres");
    let ssl_mode = if config.ssl { "require" } else { "disable" };

    format!(
        "postgres://{}:{}@{}:{}/{}?sslmode={}",
        config.username, config.password, config.host, config.port, db, ssl_mode
    )
}

/// Maps array elements into one concrete element type, keeping nulls.
fn typed_array<T, F>(items: &[Value], element: F) -> GridResult<Vec<Option<T>>>
where
    F: Fn(&Value) -> Option<T>,
{
    items
        .iter()
        .map(|v| {
            if v.is_null() {
                return Ok(None);
            }
            element(v).map(Some).ok_or_else(|| {
                GridError::not_supported("array parameters must have one element type")
            })
        })
        .collect()
}

fn parse_version_num(raw: &str) -> GridResult<u32> {
    raw.trim()
        .parse()
        .map_err(|_| GridError::internal(format!("unparseable server_version_num: {}", raw)))
}

fn map_sqlx_error(err: sqlx::Error) -> GridError {
    match err {
        sqlx::Error::Database(db) => GridError::execution(db.message()),
        sqlx::Error::Io(io) => GridError::connection_failed(io.to_string()),
        sqlx::Error::PoolTimedOut => {
            GridError::connection_failed("timed out acquiring a connection from the pool")
        }
        sqlx::Error::PoolClosed => GridError::connection_failed("connection pool is closed"),
        other => GridError::execution(other.to_string()),
    }
}

/// One live PostgreSQL connection, pooled, with an optional dedicated
/// transaction connection.
pub struct PgGridConnection {
    pool: PgPool,
    server_version_num: u32,
    transaction_conn: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgGridConnection {
    /// Connects and captures the server version, which gates the legacy
    /// oid fallback during updatability analysis.
    pub async fn connect(config: &PgConnectionConfig) -> GridResult<Self> {
        let conn_str = build_connection_string(config);
        let max_connections = config.pool_max_connections.unwrap_or(5);
        let acquire_timeout = config.pool_acquire_timeout_secs.unwrap_or(30);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(acquire_timeout as u64))
            .connect(&conn_str)
            .await
            .map_err(|e| GridError::connection_failed(e.to_string()))?;

        let raw_version: String = sqlx::query_scalar("SHOW server_version_num")
            .fetch_one(&pool)
            .await
            .map_err(map_sqlx_error)?;
        let server_version_num = parse_version_num(&raw_version)?;

        debug!(server_version_num, "postgres connection established");
        Ok(Self {
            pool,
            server_version_num,
            transaction_conn: Mutex::new(None),
        })
    }

    pub async fn close(&self) {
        let mut tx = self.transaction_conn.lock().await;
        tx.take();
        self.pool.close().await;
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
        value: &'q Value,
    ) -> GridResult<sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>> {
        Ok(match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(b),
            Value::Int(i) => query.bind(i),
            Value::Float(f) => query.bind(f),
            Value::Text(s) => query.bind(s),
            Value::Bytes(b) => query.bind(b),
            Value::Json(j) => query.bind(j),
            Value::Array(items) => return Self::bind_array(query, items),
        })
    }

    /// Binds a homogeneous array, preserving null elements. The element
    /// type is inferred from the first non-null element; heterogeneous
    /// and nested arrays are refused so the row fails rather than
    /// writing a wrong value.
    fn bind_array<'q>(
        query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
        items: &'q [Value],
    ) -> GridResult<sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>> {
        let first = items.iter().find(|v| !v.is_null());
        match first {
            None => Err(GridError::not_supported(
                "cannot infer the element type of an array with no non-null elements",
            )),
            Some(Value::Bool(_)) => Ok(query.bind(typed_array(items, |v| match v {
                Value::Bool(b) => Some(*b),
                _ => None,
            })?)),
            Some(Value::Int(_)) => Ok(query.bind(typed_array(items, |v| match v {
                Value::Int(i) => Some(*i),
                _ => None,
            })?)),
            Some(Value::Float(_)) => Ok(query.bind(typed_array(items, |v| match v {
                Value::Float(f) => Some(*f),
                _ => None,
            })?)),
            Some(Value::Text(_)) => Ok(query.bind(typed_array(items, |v| match v {
                Value::Text(s) => Some(s.clone()),
                _ => None,
            })?)),
            Some(_) => Err(GridError::not_supported(
                "array parameters support boolean, integer, float, and text elements",
            )),
        }
    }

    fn build_query<'q>(
        sql: &'q str,
        params: &'q [Value],
    ) -> GridResult<sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>> {
        let mut query = sqlx::query(sql);
        for value in params {
            query = Self::bind_param(query, value)?;
        }
        Ok(query)
    }

    async fn fetch_rows(&self, sql: &str, params: &[Value]) -> GridResult<Vec<PgRow>> {
        let query = Self::build_query(sql, params)?;
        let mut tx = self.transaction_conn.lock().await;
        if let Some(conn) = tx.as_mut() {
            query.fetch_all(&mut **conn).await.map_err(map_sqlx_error)
        } else {
            query.fetch_all(&self.pool).await.map_err(map_sqlx_error)
        }
    }

    /// SQLx does not expose the column type modifier in row or statement
    /// metadata, so it is reported as absent and table browses take it
    /// from the catalog instead.
    fn raw_column(col: &PgColumn) -> RawColumnInfo {
        RawColumnInfo {
            name: col.name().to_string(),
            type_oid: col.type_info().oid().map(|oid| oid.0).unwrap_or(0),
            type_name: col.type_info().name().to_ascii_lowercase(),
            not_null: None,
            has_default: None,
            table_oid: col.relation_id().map(|oid| oid.0),
            attnum: col.relation_attribute_no(),
            type_modifier: -1,
        }
    }

    /// Statement-level column metadata via a prepared-statement describe,
    /// so provenance survives queries that return zero rows (the empty
    /// keyed table a user wants to insert the first row into).
    async fn describe_columns(&self, sql: &str) -> GridResult<Vec<RawColumnInfo>> {
        let mut tx = self.transaction_conn.lock().await;
        let describe = if let Some(conn) = tx.as_mut() {
            (&mut **conn).describe(sql).await.map_err(map_sqlx_error)?
        } else {
            self.pool.describe(sql).await.map_err(map_sqlx_error)?
        };

        Ok(describe
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let mut raw = Self::raw_column(col);
                raw.not_null = describe.nullable(idx).map(|nullable| !nullable);
                raw
            })
            .collect())
    }

    fn convert_row(pg_row: &PgRow) -> HashMap<String, Value> {
        pg_row
            .columns()
            .iter()
            .map(|col| {
                (
                    col.name().to_string(),
                    Self::extract_value(pg_row, col.ordinal()),
                )
            })
            .collect()
    }

    /// Extracts a value at the given index, probing common types; NULLs
    /// come back as `Option::None` at every rung.
    fn extract_value(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return v.map(|f| Value::Float(f as f64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<rust_decimal::Decimal>, _>(idx) {
            return v
                .map(|d| Value::Text(d.to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<uuid::Uuid>, _>(idx) {
            return v
                .map(|u| Value::Text(u.to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(Value::Json).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return v
                .map(|dt| Value::Text(dt.to_rfc3339()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return v
                .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return v
                .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return v
                .map(|t| Value::Text(t.format("%H:%M:%S").to_string()))
                .unwrap_or(Value::Null);
        }

        Value::Null
    }
}

#[async_trait]
impl Connection for PgGridConnection {
    fn connected(&self) -> bool {
        !self.pool.is_closed()
    }

    fn server_version_num(&self) -> u32 {
        self.server_version_num
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities::full()
    }

    async fn execute_dict(&self, sql: &str, params: &[Value]) -> GridResult<ResultSet> {
        let rows = self.fetch_rows(sql, params).await?;
        let columns = match rows.first() {
            Some(first) => first.columns().iter().map(Self::raw_column).collect(),
            None => self.describe_columns(sql).await?,
        };
        let rows = rows.iter().map(Self::convert_row).collect();
        Ok(ResultSet { columns, rows })
    }

    async fn execute_scalar(&self, sql: &str, params: &[Value]) -> GridResult<Option<Value>> {
        let rows = self.fetch_rows(sql, params).await?;
        Ok(rows.first().map(|row| Self::extract_value(row, 0)))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> GridResult<u64> {
        let query = Self::build_query(sql, params)?;
        let mut tx = self.transaction_conn.lock().await;
        let result = if let Some(conn) = tx.as_mut() {
            query.execute(&mut **conn).await.map_err(map_sqlx_error)?
        } else {
            query.execute(&self.pool).await.map_err(map_sqlx_error)?
        };
        Ok(result.rows_affected())
    }

    async fn begin(&self) -> GridResult<()> {
        let mut tx = self.transaction_conn.lock().await;
        if tx.is_some() {
            return Err(GridError::execution(
                "a transaction is already active on this connection",
            ));
        }

        let mut conn = self.pool.acquire().await.map_err(|e| {
            GridError::connection_failed(format!(
                "failed to acquire connection for transaction: {}",
                e
            ))
        })?;

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

        *tx = Some(conn);
        Ok(())
    }

    async fn commit(&self) -> GridResult<()> {
        let mut tx = self.transaction_conn.lock().await;
        let mut conn = tx
            .take()
            .ok_or_else(|| GridError::execution("no active transaction to commit"))?;

        sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn rollback(&self) -> GridResult<()> {
        let mut tx = self.transaction_conn.lock().await;
        let mut conn = tx
            .take()
            .ok_or_else(|| GridError::execution("no active transaction to rollback"))?;

        sqlx::query("ROLLBACK")
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PgConnectionConfig {
        PgConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            username: "user".to_string(),
            password: "pass".to_string(),
            database: Some("testdb".to_string()),
            ssl: false,
            pool_max_connections: None,
            pool_acquire_timeout_secs: None,
        }
    }

    #[test]
    fn connection_string_building() {
        let conn_str = build_connection_string(&config());
        assert!(conn_str.contains("localhost:5432"));
        assert!(conn_str.contains("testdb"));
        assert!(conn_str.contains("sslmode=disable"));

        let mut ssl = config();
        ssl.ssl = true;
        ssl.database = None;
        let conn_str = build_connection_string(&ssl);
        assert!(conn_str.contains("/postgres?"));
        assert!(conn_str.contains("sslmode=require"));
    }

    #[test]
    fn version_parsing() {
        assert_eq!(parse_version_num("150002").unwrap(), 150002);
        assert_eq!(parse_version_num(" 110013\n").unwrap(), 110013);
        assert!(parse_version_num("15.2").is_err());
    }

    #[test]
    fn homogeneous_array_parameters_bind() {
        let ints = [Value::Array(vec![
            Value::Int(1),
            Value::Null,
            Value::Int(3),
        ])];
        assert!(PgGridConnection::build_query("SELECT $1", &ints).is_ok());

        let texts = [Value::Array(vec![Value::Text("a".into())])];
        assert!(PgGridConnection::build_query("SELECT $1", &texts).is_ok());
    }

    #[test]
    fn unbindable_array_parameters_are_refused_not_nulled() {
        let mixed = [Value::Array(vec![
            Value::Int(1),
            Value::Text("x".into()),
        ])];
        let err = PgGridConnection::build_query("SELECT $1", &mixed)
            .err()
            .expect("mixed element types");
        assert!(matches!(err, GridError::NotSupported { .. }));

        let nested = [Value::Array(vec![Value::Array(vec![Value::Int(1)])])];
        let err = PgGridConnection::build_query("SELECT $1", &nested)
            .err()
            .expect("nested arrays");
        assert!(matches!(err, GridError::NotSupported { .. }));

        let all_null = [Value::Array(vec![Value::Null])];
        let err = PgGridConnection::build_query("SELECT $1", &all_null)
            .err()
            .expect("untyped array");
        assert!(matches!(err, GridError::NotSupported { .. }));
    }
}
