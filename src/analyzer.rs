// SPDX-License-Identifier: Apache-2.0

//! Primary Key / Updatability Analyzer
//!
//! Decides whether a resultset can be edited in place: single-table
//! provenance, primary-key coverage, duplicate-column detection, and the
//! legacy object-id fallback for historical schemas without a natural key.
//!
//! Catalog failures propagate as errors; they are never reported as
//! "not updatable". The output is recomputed wholesale on every query
//! execution and must not be reused across queries.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog;
use crate::column::{self, ColumnDescriptor, RawColumnInfo, OID_REMOVAL_VERSION_NUM};
use crate::connection::{quote_qualified, Connection};
use crate::error::{GridError, GridResult};
use crate::types::Value;

/// Updatability verdict for one resultset.
///
/// Owned by the session; replaced wholesale whenever a new query runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSetUpdatability {
    pub is_updatable: bool,
    /// Primary-key columns in index order, empty when keyed by oid.
    pub primary_key_columns: Vec<ColumnDescriptor>,
    pub source_table_oid: Option<u32>,
    /// Quoted `schema.name` of the source table, when updatable.
    pub source_qualified_name: Option<String>,
    /// True when the source table carries the legacy per-row object id
    /// usable for row identity on engines predating oid removal.
    pub legacy_oid_supported: bool,
}

impl ResultSetUpdatability {
    pub fn not_updatable() -> Self {
        Self {
            is_updatable: false,
            primary_key_columns: Vec::new(),
            source_table_oid: None,
            source_qualified_name: None,
            legacy_oid_supported: false,
        }
    }
}

/// Analyzes a direct table/view browse.
///
/// Fetches the column metadata from the catalog, resolves descriptors,
/// and derives the primary keys for the object oid. The caller is
/// expected to gate on the object kind itself (views, catalogs, and
/// foreign tables are not grid-editable regardless of keys).
pub async fn analyze_table(
    conn: &dyn Connection,
    table_oid: u32,
) -> GridResult<(Vec<ColumnDescriptor>, ResultSetUpdatability)> {
    if !conn.connected() {
        return Err(GridError::NotConnected);
    }

    let mut columns = fetch_table_columns(conn, table_oid).await?;

    if !conn.capabilities().updatable_resultsets {
        debug!(table_oid, "driver below updatable-resultset capability");
        return Ok((columns, ResultSetUpdatability::not_updatable()));
    }

    let primary_keys = fetch_primary_keys(conn, table_oid).await?;
    mark_primary_keys(&mut columns, &primary_keys);

    let legacy_oid_supported = if primary_keys.is_empty() {
        fetch_has_oids(conn, table_oid).await?
    } else {
        false
    };

    let is_updatable = !primary_keys.is_empty() || legacy_oid_supported;

    for col in columns.iter_mut() {
        col.editable = is_updatable && col.is_table_backed();
    }

    if !is_updatable {
        return Ok((columns, ResultSetUpdatability::not_updatable()));
    }

    let source_qualified_name = fetch_source_name(conn, table_oid).await?;
    let pk_descriptors = pk_descriptors(&columns, &primary_keys);

    Ok((
        columns,
        ResultSetUpdatability {
            is_updatable: true,
            primary_key_columns: pk_descriptors,
            source_table_oid: Some(table_oid),
            source_qualified_name: Some(source_qualified_name),
            legacy_oid_supported,
        },
    ))
}

/// Analyzes a free-form query resultset (the interactive query-tool case).
///
/// The resultset is updatable iff every output column maps to a stored
/// column of one single table, all of that table's primary-key columns
/// appear in the output, and no two output columns share one underlying
/// attribute. Duplicate provenance poisons the whole resultset, not just
/// the duplicate. Editability flags are folded back into `columns`.
pub async fn analyze_query(
    conn: &dyn Connection,
    columns: &mut [ColumnDescriptor],
) -> GridResult<ResultSetUpdatability> {
    if !conn.connected() {
        return Err(GridError::NotConnected);
    }

    if !conn.capabilities().updatable_resultsets {
        mark_all_readonly(columns);
        return Ok(ResultSetUpdatability::not_updatable());
    }

    let Some(table_oid) = single_source_table(columns) else {
        mark_all_readonly(columns);
        return Ok(ResultSetUpdatability::not_updatable());
    };

    let primary_keys = fetch_primary_keys(conn, table_oid).await?;
    mark_primary_keys(columns, &primary_keys);

    let present: HashSet<i16> = columns.iter().filter_map(|c| c.attnum).collect();
    let all_pks_present = primary_keys.iter().all(|(_, attnum)| present.contains(attnum));
    if !all_pks_present {
        mark_all_readonly(columns);
        return Ok(ResultSetUpdatability::not_updatable());
    }

    let mut legacy_oid_supported = false;
    if primary_keys.is_empty() {
        legacy_oid_supported = fetch_has_oids(conn, table_oid).await?;
        let oid_column_present = columns.iter().any(|c| c.is_row_id);
        if !legacy_oid_supported || !oid_column_present {
            // No natural key and no usable row id: rows cannot be targeted.
            mark_all_readonly(columns);
            return Ok(ResultSetUpdatability::not_updatable());
        }
    }

    for col in columns.iter_mut() {
        col.editable = col.is_table_backed() && !col.is_row_id;
    }

    let source_qualified_name = fetch_source_name(conn, table_oid).await?;
    let pk_descriptors = pk_descriptors(columns, &primary_keys);

    Ok(ResultSetUpdatability {
        is_updatable: true,
        primary_key_columns: pk_descriptors,
        source_table_oid: Some(table_oid),
        source_qualified_name: Some(source_qualified_name),
        legacy_oid_supported,
    })
}

/// Single-table provenance check plus duplicate-attribute detection.
///
/// The legacy `oid` pseudo-column has system provenance and is exempt
/// from the table-backed requirement; every other column must trace to a
/// positive attribute of the same table, and no attribute may appear
/// twice. Duplicate detection keys off `(table_oid, attnum)`, never off
/// column names or expression text.
fn single_source_table(columns: &[ColumnDescriptor]) -> Option<u32> {
    let mut table_oid: Option<u32> = None;
    let mut seen: HashSet<(u32, i16)> = HashSet::new();

    for col in columns {
        if col.is_row_id {
            continue;
        }
        if !col.is_table_backed() {
            return None;
        }
        let oid = col.table_oid?;
        let attnum = col.attnum?;
        match table_oid {
            None => table_oid = Some(oid),
            Some(existing) if existing != oid => return None,
            Some(_) => {}
        }
        if !seen.insert((oid, attnum)) {
            return None;
        }
    }

    table_oid
}

fn mark_all_readonly(columns: &mut [ColumnDescriptor]) {
    for col in columns.iter_mut() {
        col.editable = false;
    }
}

fn mark_primary_keys(columns: &mut [ColumnDescriptor], primary_keys: &[(String, i16)]) {
    let pk_attnums: HashSet<i16> = primary_keys.iter().map(|(_, n)| *n).collect();
    for col in columns.iter_mut() {
        col.is_primary_key = col
            .attnum
            .map_or(false, |n| n > 0 && pk_attnums.contains(&n));
    }
}

/// Clones the pk descriptors out of the column list, in key index order.
fn pk_descriptors(
    columns: &[ColumnDescriptor],
    primary_keys: &[(String, i16)],
) -> Vec<ColumnDescriptor> {
    primary_keys
        .iter()
        .filter_map(|(_, attnum)| {
            columns
                .iter()
                .find(|c| c.attnum == Some(*attnum))
                .cloned()
        })
        .collect()
}

async fn fetch_table_columns(
    conn: &dyn Connection,
    table_oid: u32,
) -> GridResult<Vec<ColumnDescriptor>> {
    let query = catalog::table_columns(table_oid);
    let result = conn
        .execute_dict(&query.sql, &query.params)
        .await
        .map_err(as_catalog_error)?;

    let raw: Vec<RawColumnInfo> = result
        .rows
        .iter()
        .map(|row| RawColumnInfo {
            name: text_field(row, "name").unwrap_or_default(),
            type_oid: int_field(row, "type_oid").unwrap_or(0) as u32,
            type_name: text_field(row, "type_name").unwrap_or_default(),
            not_null: bool_field(row, "not_null"),
            has_default: bool_field(row, "has_default"),
            table_oid: Some(table_oid),
            attnum: int_field(row, "attnum").map(|n| n as i16),
            type_modifier: int_field(row, "type_modifier").unwrap_or(-1) as i32,
        })
        .collect();

    Ok(column::resolve(&raw))
}

async fn fetch_primary_keys(
    conn: &dyn Connection,
    table_oid: u32,
) -> GridResult<Vec<(String, i16)>> {
    let query = catalog::primary_keys(table_oid);
    let result = conn
        .execute_dict(&query.sql, &query.params)
        .await
        .map_err(as_catalog_error)?;

    Ok(result
        .rows
        .iter()
        .filter_map(|row| {
            let name = text_field(row, "name")?;
            let attnum = int_field(row, "attnum")? as i16;
            Some((name, attnum))
        })
        .collect())
}

async fn fetch_has_oids(conn: &dyn Connection, table_oid: u32) -> GridResult<bool> {
    // Modern engines dropped relhasoids with the per-row oids themselves;
    // the catalog query only exists below that version.
    if conn.server_version_num() >= OID_REMOVAL_VERSION_NUM {
        return Ok(false);
    }
    let query = catalog::has_oids(table_oid);
    let value = conn
        .execute_scalar(&query.sql, &query.params)
        .await
        .map_err(as_catalog_error)?;
    Ok(matches!(value, Some(Value::Bool(true))))
}

async fn fetch_source_name(conn: &dyn Connection, table_oid: u32) -> GridResult<String> {
    let query = catalog::source_object(table_oid);
    let result = conn
        .execute_dict(&query.sql, &query.params)
        .await
        .map_err(as_catalog_error)?;

    let row = result
        .rows
        .first()
        .ok_or_else(|| GridError::catalog(format!("no catalog entry for oid {}", table_oid)))?;

    let schema = text_field(row, "schema_name")
        .ok_or_else(|| GridError::catalog("catalog row missing schema_name"))?;
    let name = text_field(row, "object_name")
        .ok_or_else(|| GridError::catalog("catalog row missing object_name"))?;
    Ok(quote_qualified(&schema, &name))
}

/// Transport errors pass through untouched; execution errors from catalog
/// statements are re-tagged so callers can tell "could not determine"
/// apart from an ordinary query failure.
fn as_catalog_error(err: GridError) -> GridError {
    if err.is_transport() {
        err
    } else {
        GridError::catalog(err.message())
    }
}

fn text_field(row: &HashMap<String, Value>, key: &str) -> Option<String> {
    match row.get(key) {
        Some(Value::Text(s)) => Some(s.clone()),
        _ => None,
    }
}

fn int_field(row: &HashMap<String, Value>, key: &str) -> Option<i64> {
    match row.get(key) {
        Some(Value::Int(n)) => Some(*n),
        _ => None,
    }
}

fn bool_field(row: &HashMap<String, Value>, key: &str) -> Option<bool> {
    match row.get(key) {
        Some(Value::Bool(b)) => Some(*b),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DriverCapabilities, ResultSet};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Canned catalog backend; routes on recognizable catalog fragments.
    struct MockCatalog {
        connected: bool,
        capabilities: DriverCapabilities,
        server_version_num: u32,
        primary_keys: Vec<(&'static str, i16)>,
        has_oids: bool,
        table_columns: Vec<(&'static str, u32, &'static str, i16)>,
        fail_catalog: bool,
    }

    impl Default for MockCatalog {
        fn default() -> Self {
            Self {
                connected: true,
                capabilities: DriverCapabilities::full(),
                server_version_num: 150002,
                primary_keys: vec![("pk_col", 1)],
                has_oids: false,
                table_columns: vec![
                    ("pk_col", 23, "int4", 1),
                    ("normal_col", 1043, "varchar", 2),
                ],
                fail_catalog: false,
            }
        }
    }

    fn row(pairs: Vec<(&str, Value)>) -> HashMap<String, Value> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[async_trait]
    impl Connection for MockCatalog {
        fn connected(&self) -> bool {
            self.connected
        }

        fn server_version_num(&self) -> u32 {
            self.server_version_num
        }

        fn capabilities(&self) -> DriverCapabilities {
            self.capabilities
        }

        async fn execute_dict(&self, sql: &str, _params: &[Value]) -> GridResult<ResultSet> {
            if self.fail_catalog {
                return Err(GridError::execution("permission denied for pg_index"));
            }
            if sql.contains("pg_index") {
                let rows = self
                    .primary_keys
                    .iter()
                    .map(|(name, attnum)| {
                        row(vec![
                            ("name", Value::Text(name.to_string())),
                            ("attnum", Value::Int(*attnum as i64)),
                        ])
                    })
                    .collect();
                return Ok(ResultSet {
                    columns: Vec::new(),
                    rows,
                });
            }
            if sql.contains("pg_attribute a") {
                let rows = self
                    .table_columns
                    .iter()
                    .map(|(name, type_oid, type_name, attnum)| {
                        row(vec![
                            ("name", Value::Text(name.to_string())),
                            ("type_oid", Value::Int(*type_oid as i64)),
                            ("type_name", Value::Text(type_name.to_string())),
                            ("not_null", Value::Bool(*attnum == 1)),
                            ("has_default", Value::Bool(false)),
                            ("type_modifier", Value::Int(-1)),
                            ("attnum", Value::Int(*attnum as i64)),
                        ])
                    })
                    .collect();
                return Ok(ResultSet {
                    columns: Vec::new(),
                    rows,
                });
            }
            if sql.contains("pg_namespace") {
                return Ok(ResultSet {
                    columns: Vec::new(),
                    rows: vec![row(vec![
                        ("schema_name", Value::Text("public".to_string())),
                        ("object_name", Value::Text("fixture".to_string())),
                        ("kind", Value::Text("r".to_string())),
                    ])],
                });
            }
            Err(GridError::internal(format!("unexpected query: {}", sql)))
        }

        async fn execute_scalar(&self, sql: &str, _params: &[Value]) -> GridResult<Option<Value>> {
            if sql.contains("relhasoids") {
                return Ok(Some(Value::Bool(self.has_oids)));
            }
            Err(GridError::internal(format!("unexpected scalar: {}", sql)))
        }

        async fn execute(&self, _sql: &str, _params: &[Value]) -> GridResult<u64> {
            Ok(0)
        }

        async fn begin(&self) -> GridResult<()> {
            Ok(())
        }

        async fn commit(&self) -> GridResult<()> {
            Ok(())
        }

        async fn rollback(&self) -> GridResult<()> {
            Ok(())
        }
    }

    fn query_columns(specs: &[(&str, Option<u32>, Option<i16>)]) -> Vec<ColumnDescriptor> {
        let raw: Vec<RawColumnInfo> = specs
            .iter()
            .map(|(name, table_oid, attnum)| RawColumnInfo {
                name: name.to_string(),
                type_oid: if *name == "oid" { 26 } else { 23 },
                type_name: if *name == "oid" { "oid" } else { "int4" }.to_string(),
                not_null: None,
                has_default: None,
                table_oid: *table_oid,
                attnum: *attnum,
                type_modifier: -1,
            })
            .collect();
        column::resolve(&raw)
    }

    #[tokio::test]
    async fn table_with_primary_key_is_updatable() {
        let conn = MockCatalog::default();
        let (columns, verdict) = analyze_table(&conn, 16384).await.expect("analyze");

        assert!(verdict.is_updatable);
        assert_eq!(verdict.source_table_oid, Some(16384));
        assert_eq!(
            verdict.source_qualified_name.as_deref(),
            Some("\"public\".\"fixture\"")
        );
        assert_eq!(verdict.primary_key_columns.len(), 1);
        assert_eq!(verdict.primary_key_columns[0].name, "pk_col");
        assert!(columns.iter().all(|c| c.editable));
        assert!(columns[0].is_primary_key);
        assert!(!columns[1].is_primary_key);
    }

    #[tokio::test]
    async fn capability_gate_forces_not_updatable() {
        let conn = MockCatalog {
            capabilities: DriverCapabilities {
                updatable_resultsets: false,
                transactions: true,
            },
            ..Default::default()
        };
        let (columns, verdict) = analyze_table(&conn, 16384).await.expect("analyze");
        assert!(!verdict.is_updatable);
        assert!(columns.iter().all(|c| !c.editable));
    }

    #[tokio::test]
    async fn no_primary_key_and_no_oid_is_not_updatable() {
        let conn = MockCatalog {
            primary_keys: vec![],
            has_oids: false,
            ..Default::default()
        };
        let (_, verdict) = analyze_table(&conn, 16384).await.expect("analyze");
        assert!(!verdict.is_updatable);
    }

    #[tokio::test]
    async fn legacy_oid_table_stays_updatable_on_old_engines() {
        let conn = MockCatalog {
            primary_keys: vec![],
            has_oids: true,
            server_version_num: 110013,
            ..Default::default()
        };
        let (_, verdict) = analyze_table(&conn, 16384).await.expect("analyze");
        assert!(verdict.is_updatable);
        assert!(verdict.legacy_oid_supported);
        assert!(verdict.primary_key_columns.is_empty());
    }

    #[tokio::test]
    async fn oid_fallback_is_gone_on_modern_engines() {
        let conn = MockCatalog {
            primary_keys: vec![],
            has_oids: true,
            server_version_num: 150002,
            ..Default::default()
        };
        let (_, verdict) = analyze_table(&conn, 16384).await.expect("analyze");
        assert!(!verdict.is_updatable);
    }

    #[tokio::test]
    async fn catalog_failure_is_an_error_not_a_verdict() {
        let conn = MockCatalog {
            fail_catalog: true,
            ..Default::default()
        };
        let err = analyze_table(&conn, 16384).await.expect_err("must fail");
        assert!(matches!(err, GridError::CatalogQueryFailed { .. }));
    }

    #[tokio::test]
    async fn disconnected_connection_is_transport_error() {
        let conn = MockCatalog {
            connected: false,
            ..Default::default()
        };
        let err = analyze_table(&conn, 16384).await.expect_err("must fail");
        assert!(matches!(err, GridError::NotConnected));
    }

    #[tokio::test]
    async fn query_over_single_table_with_pk_is_updatable() {
        let conn = MockCatalog::default();
        let mut columns = query_columns(&[
            ("pk_col", Some(16384), Some(1)),
            ("normal_col", Some(16384), Some(2)),
        ]);
        let verdict = analyze_query(&conn, &mut columns).await.expect("analyze");
        assert!(verdict.is_updatable);
        assert!(columns[0].is_primary_key);
        assert!(columns.iter().all(|c| c.editable));
    }

    #[tokio::test]
    async fn derived_column_poisons_the_resultset() {
        let conn = MockCatalog::default();
        let mut columns = query_columns(&[
            ("pk_col", Some(16384), Some(1)),
            ("count", None, None),
        ]);
        let verdict = analyze_query(&conn, &mut columns).await.expect("analyze");
        assert!(!verdict.is_updatable);
        assert!(columns.iter().all(|c| !c.editable));
    }

    #[tokio::test]
    async fn multi_table_provenance_is_not_updatable() {
        let conn = MockCatalog::default();
        let mut columns = query_columns(&[
            ("pk_col", Some(16384), Some(1)),
            ("other", Some(16999), Some(1)),
        ]);
        let verdict = analyze_query(&conn, &mut columns).await.expect("analyze");
        assert!(!verdict.is_updatable);
    }

    #[tokio::test]
    async fn duplicate_attribute_poisons_the_whole_resultset() {
        let conn = MockCatalog::default();
        let mut columns = query_columns(&[
            ("pk_col", Some(16384), Some(1)),
            ("pk_alias", Some(16384), Some(1)),
            ("normal_col", Some(16384), Some(2)),
        ]);
        let verdict = analyze_query(&conn, &mut columns).await.expect("analyze");
        assert!(!verdict.is_updatable);
        assert!(columns.iter().all(|c| !c.editable));
    }

    #[tokio::test]
    async fn missing_pk_column_in_select_list_is_not_updatable() {
        let conn = MockCatalog::default();
        // pk is attnum 1; the select list only carries attnum 2.
        let mut columns = query_columns(&[("normal_col", Some(16384), Some(2))]);
        let verdict = analyze_query(&conn, &mut columns).await.expect("analyze");
        assert!(!verdict.is_updatable);
    }

    #[tokio::test]
    async fn analyze_is_idempotent() {
        let conn = MockCatalog::default();
        let first = analyze_table(&conn, 16384).await.expect("first");
        let second = analyze_table(&conn, 16384).await.expect("second");
        assert_eq!(first, second);
    }
}
