// SPDX-License-Identifier: Apache-2.0

//! Diff-to-SQL Save Engine
//!
//! Replays a client change-set against the live connection as
//! parameterized INSERT/UPDATE/DELETE statements and reports per-row
//! outcomes. Values are never pre-validated client-side; a statement is
//! allowed to fail and the engine's own error text is captured for that
//! row.
//!
//! Transaction policy: one transaction per batch with a savepoint per
//! row. A failed row rolls back to its savepoint and the batch continues,
//! so later rows still execute and report. The batch commits only when
//! every row succeeded; otherwise the whole batch rolls back and the
//! overall status is false.

use std::collections::HashMap;

use tracing::instrument;

use crate::analyzer::ResultSetUpdatability;
use crate::changeset::{ClientRowId, RowChangeSet, SaveOutcome, SaveReport};
use crate::connection::{quote_ident, Connection};
use crate::error::{GridError, GridResult};
use crate::types::Value;

const ZERO_ROWS_AFFECTED: &str =
    "no rows were affected; the row may have been modified or deleted by another session";

/// Builds a parameterized INSERT over exactly the supplied columns.
/// Omitted columns take the table's defaults; an empty map inserts a
/// row of all defaults.
pub(crate) fn build_insert(
    qualified_object: &str,
    data: &HashMap<String, Value>,
    returning: Option<&str>,
) -> (String, Vec<Value>) {
    let mut keys: Vec<&String> = data.keys().collect();
    keys.sort();

    let mut sql = if keys.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", qualified_object)
    } else {
        let cols: Vec<String> = keys.iter().map(|k| quote_ident(k)).collect();
        let placeholders: Vec<String> = (1..=keys.len()).map(|i| format!("${}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            qualified_object,
            cols.join(", "),
            placeholders.join(", ")
        )
    };

    if let Some(column) = returning {
        sql.push_str(&format!(" RETURNING {}", quote_ident(column)));
    }

    let params = keys.iter().map(|k| data[*k].clone()).collect();
    (sql, params)
}

/// Builds a parameterized UPDATE keyed by the fetch-time snapshot.
pub(crate) fn build_update(
    qualified_object: &str,
    values: &HashMap<String, Value>,
    key_snapshot: &HashMap<String, Value>,
) -> (String, Vec<Value>) {
    let mut value_keys: Vec<&String> = values.keys().collect();
    value_keys.sort();
    let mut snapshot_keys: Vec<&String> = key_snapshot.keys().collect();
    snapshot_keys.sort();

    let mut index = 0usize;
    let set_clauses: Vec<String> = value_keys
        .iter()
        .map(|k| {
            index += 1;
            format!("{} = ${}", quote_ident(k), index)
        })
        .collect();
    let where_clauses: Vec<String> = snapshot_keys
        .iter()
        .map(|k| {
            index += 1;
            format!("{} = ${}", quote_ident(k), index)
        })
        .collect();

    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        qualified_object,
        set_clauses.join(", "),
        where_clauses.join(" AND ")
    );

    let params = value_keys
        .iter()
        .map(|k| values[*k].clone())
        .chain(snapshot_keys.iter().map(|k| key_snapshot[*k].clone()))
        .collect();
    (sql, params)
}

/// Builds a parameterized DELETE keyed by the fetch-time snapshot.
pub(crate) fn build_delete(
    qualified_object: &str,
    key_snapshot: &HashMap<String, Value>,
) -> (String, Vec<Value>) {
    let mut keys: Vec<&String> = key_snapshot.keys().collect();
    keys.sort();

    let where_clauses: Vec<String> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| format!("{} = ${}", quote_ident(k), i + 1))
        .collect();

    let sql = format!(
        "DELETE FROM {} WHERE {}",
        qualified_object,
        where_clauses.join(" AND ")
    );
    let params = keys.iter().map(|k| key_snapshot[*k].clone()).collect();
    (sql, params)
}

/// Replays the change-set: all added rows, then all updated, then all
/// deleted. The ordering is significant: a client may stage an add then
/// an immediate edit of the same temporary row in one batch, and the
/// edit must see the added row.
#[instrument(skip_all, fields(rows = changes.row_count()))]
pub async fn save(
    conn: &dyn Connection,
    updatability: &ResultSetUpdatability,
    changes: &RowChangeSet,
) -> GridResult<SaveReport> {
    if !updatability.is_updatable {
        // Precondition, checked before any SQL is issued.
        return Err(GridError::NotUpdatable);
    }
    if !conn.connected() {
        return Err(GridError::NotConnected);
    }

    let object = updatability
        .source_qualified_name
        .as_deref()
        .ok_or_else(|| GridError::internal("updatable resultset without a source object"))?;

    let mut report = SaveReport {
        status: true,
        rows: Default::default(),
    };
    if changes.is_empty() {
        return Ok(report);
    }

    let generated_key_column = single_unsupplied_key(updatability, changes);

    conn.begin().await?;

    let mut row_index = 0usize;
    for (id, data) in &changes.added {
        row_index += 1;
        let returning = generated_key_column
            .as_deref()
            .filter(|pk| !data.contains_key(*pk));
        let outcome = run_row(conn, row_index, || insert_row(conn, object, data, returning)).await;
        record(conn, &mut report, id, outcome).await?;
    }

    for (id, row) in &changes.updated {
        row_index += 1;
        let outcome = run_row(conn, row_index, || update_row(conn, object, row)).await;
        record(conn, &mut report, id, outcome).await?;
    }

    for (id, row) in &changes.deleted {
        row_index += 1;
        let outcome = run_row(conn, row_index, || delete_row(conn, object, &row.key_snapshot)).await;
        record(conn, &mut report, id, outcome).await?;
    }

    if report.status {
        conn.commit().await?;
    } else {
        conn.rollback().await?;
    }

    Ok(report)
}

/// The single primary-key column eligible for generated-key reporting,
/// when the table has exactly one key column and at least one added row
/// omits it.
fn single_unsupplied_key(
    updatability: &ResultSetUpdatability,
    changes: &RowChangeSet,
) -> Option<String> {
    if updatability.primary_key_columns.len() != 1 {
        return None;
    }
    let pk = &updatability.primary_key_columns[0].name;
    changes
        .added
        .values()
        .any(|data| !data.contains_key(pk))
        .then(|| pk.clone())
}

/// Runs one row inside its own savepoint. Execution failures become a
/// per-row outcome; transport failures abort the batch.
async fn run_row<F, Fut>(
    conn: &dyn Connection,
    row_index: usize,
    op: F,
) -> GridResult<SaveOutcome>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = GridResult<SaveOutcome>>,
{
    let savepoint = format!("grid_save_{}", row_index);
    conn.savepoint(&savepoint).await?;

    match op().await {
        Ok(outcome) => {
            if outcome.success {
                conn.release_savepoint(&savepoint).await?;
            } else {
                conn.rollback_to_savepoint(&savepoint).await?;
            }
            Ok(outcome)
        }
        Err(err) if err.is_transport() => Err(err),
        Err(err) => {
            conn.rollback_to_savepoint(&savepoint).await?;
            Ok(SaveOutcome::failed(err.message()))
        }
    }
}

/// Folds a row result into the report; transport errors roll the whole
/// batch back before propagating.
async fn record(
    conn: &dyn Connection,
    report: &mut SaveReport,
    id: &ClientRowId,
    outcome: GridResult<SaveOutcome>,
) -> GridResult<()> {
    match outcome {
        Ok(outcome) => {
            report.status &= outcome.success;
            report.rows.insert(id.clone(), outcome);
            Ok(())
        }
        Err(err) => {
            let _ = conn.rollback().await;
            Err(err)
        }
    }
}

async fn insert_row(
    conn: &dyn Connection,
    object: &str,
    data: &HashMap<String, Value>,
    returning: Option<&str>,
) -> GridResult<SaveOutcome> {
    let (sql, params) = build_insert(object, data, returning);

    if returning.is_some() {
        let generated = conn.execute_scalar(&sql, &params).await?;
        return Ok(match generated {
            Some(value) => SaveOutcome::ok_with_key(value),
            None => SaveOutcome::ok(),
        });
    }

    conn.execute(&sql, &params).await?;
    Ok(SaveOutcome::ok())
}

async fn update_row(
    conn: &dyn Connection,
    object: &str,
    row: &crate::changeset::UpdatedRow,
) -> GridResult<SaveOutcome> {
    if row.values.is_empty() {
        // Nothing staged for this row; trivially successful.
        return Ok(SaveOutcome::ok());
    }
    if row.key_snapshot.is_empty() {
        return Ok(SaveOutcome::failed("missing key snapshot for updated row"));
    }

    let (sql, params) = build_update(object, &row.values, &row.key_snapshot);
    let affected = conn.execute(&sql, &params).await?;
    if affected == 0 {
        return Ok(SaveOutcome::failed(ZERO_ROWS_AFFECTED));
    }
    Ok(SaveOutcome::ok())
}

async fn delete_row(
    conn: &dyn Connection,
    object: &str,
    key_snapshot: &HashMap<String, Value>,
) -> GridResult<SaveOutcome> {
    if key_snapshot.is_empty() {
        return Ok(SaveOutcome::failed("missing key snapshot for deleted row"));
    }

    let (sql, params) = build_delete(object, key_snapshot);
    let affected = conn.execute(&sql, &params).await?;
    if affected == 0 {
        return Ok(SaveOutcome::failed(ZERO_ROWS_AFFECTED));
    }
    Ok(SaveOutcome::ok())
}
