//! Catalog query builders
//!
//! The catalog SQL the analyzer depends on, inlined as parameterized
//! builders instead of external template files. Each builder returns the
//! statement text plus its bind parameters. Version gating lives with
//! the caller: [`has_oids`] is only valid on engines that still have the
//! column.

use crate::types::Value;

/// A statement ready for execution: text plus positional bind parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl CatalogQuery {
    fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Primary-key columns of a table, in index order.
///
/// Returns `name` and `attnum` rows; attnum is what the analyzer matches
/// resultset columns against.
pub fn primary_keys(table_oid: u32) -> CatalogQuery {
    CatalogQuery::new(
        "SELECT a.attname::text AS name, a.attnum::int2 AS attnum \
         FROM pg_index i \
         JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
         WHERE i.indisprimary AND i.indrelid = $1::oid \
         ORDER BY array_position(i.indkey, a.attnum)",
        vec![Value::Int(table_oid as i64)],
    )
}

/// Full column metadata for a table browse, including the typmod the
/// resolver needs for precision rendering.
pub fn table_columns(table_oid: u32) -> CatalogQuery {
    CatalogQuery::new(
        "SELECT a.attname::text AS name, a.atttypid::bigint AS type_oid, \
                t.typname::text AS type_name, a.attnotnull AS not_null, \
                a.atthasdef AS has_default, a.atttypmod AS type_modifier, \
                a.attnum::int2 AS attnum \
         FROM pg_attribute a \
         JOIN pg_type t ON t.oid = a.atttypid \
         WHERE a.attrelid = $1::oid AND a.attnum > 0 AND NOT a.attisdropped \
         ORDER BY a.attnum",
        vec![Value::Int(table_oid as i64)],
    )
}

/// Whether the table carries the legacy per-row object id.
///
/// Legacy engines only: at or past oid removal the `relhasoids` column
/// no longer exists, and the caller must not issue this query at all.
pub fn has_oids(table_oid: u32) -> CatalogQuery {
    CatalogQuery::new(
        "SELECT relhasoids FROM pg_class WHERE oid = $1::oid",
        vec![Value::Int(table_oid as i64)],
    )
}

/// Schema, name, and kind of the object behind an oid.
pub fn source_object(table_oid: u32) -> CatalogQuery {
    CatalogQuery::new(
        "SELECT n.nspname::text AS schema_name, c.relname::text AS object_name, \
                c.relkind::text AS kind \
         FROM pg_class c \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE c.oid = $1::oid",
        vec![Value::Int(table_oid as i64)],
    )
}

/// Dry-run wrapper used to validate a user filter fragment without
/// touching data. The fragment is interpolated, not bound: it is a
/// boolean SQL expression, and validation is exactly the point.
pub fn validate_filter(qualified_object: &str, filter: &str) -> CatalogQuery {
    CatalogQuery::new(
        format!(
            "EXPLAIN SELECT 1 FROM {} WHERE {}",
            qualified_object, filter
        ),
        Vec::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_keys_binds_table_oid() {
        let q = primary_keys(16384);
        assert!(q.sql.contains("indisprimary"));
        assert!(q.sql.contains("$1::oid"));
        assert_eq!(q.params, vec![Value::Int(16384)]);
    }

    #[test]
    fn has_oids_targets_the_legacy_catalog_column() {
        let legacy = has_oids(16384);
        assert!(legacy.sql.contains("relhasoids"));
        assert!(legacy.sql.contains("pg_class"));
        assert_eq!(legacy.params, vec![Value::Int(16384)]);
    }

    #[test]
    fn validate_filter_wraps_fragment_in_explain() {
        let q = validate_filter("\"public\".\"events\"", "id > 10");
        assert_eq!(
            q.sql,
            "EXPLAIN SELECT 1 FROM \"public\".\"events\" WHERE id > 10"
        );
    }

    #[test]
    fn table_columns_excludes_dropped_and_system_columns() {
        let q = table_columns(42);
        assert!(q.sql.contains("attnum > 0"));
        assert!(q.sql.contains("NOT a.attisdropped"));
    }
}
