//! Filter/Sort Composer
//!
//! Validated row filters, user sort state, and composition of the final
//! fetch query. A filter fragment is only accepted after an EXPLAIN
//! dry-run against the live connection; rejection keeps the previous
//! filter and carries the first line of the engine's own error message.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog;
use crate::connection::{quote_ident, Connection};
use crate::error::{GridError, GridResult};
use crate::types::{GridPreferences, RowWindow, SortDirection, SortSpec};

/// The applied row filter for one session, replaced wholesale on
/// `set`, extended only by the explicit `append` operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterState {
    applied: Option<String>,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&str> {
        self.applied.as_deref()
    }

    pub fn is_set(&self) -> bool {
        self.applied.is_some()
    }

    /// Clears and replaces the filter after validating the fragment.
    /// On rejection the previous filter is retained unchanged.
    pub async fn set(
        &mut self,
        conn: &dyn Connection,
        qualified_object: &str,
        fragment: &str,
    ) -> GridResult<()> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            self.applied = None;
            return Ok(());
        }
        validate(conn, qualified_object, fragment).await?;
        self.applied = Some(fragment.to_string());
        Ok(())
    }

    /// AND-concatenates a new fragment onto the existing filter, so that
    /// applying A then B equals a single `set("(A) AND (B)")`.
    pub async fn append(
        &mut self,
        conn: &dyn Connection,
        qualified_object: &str,
        fragment: &str,
    ) -> GridResult<()> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Ok(());
        }
        let merged = match &self.applied {
            Some(existing) => format!("({}) AND ({})", existing, fragment),
            None => fragment.to_string(),
        };
        validate(conn, qualified_object, &merged).await?;
        self.applied = Some(merged);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.applied = None;
    }
}

async fn validate(
    conn: &dyn Connection,
    qualified_object: &str,
    predicate: &str,
) -> GridResult<()> {
    if !conn.connected() {
        return Err(GridError::NotConnected);
    }
    let query = catalog::validate_filter(qualified_object, predicate);
    match conn.execute_dict(&query.sql, &query.params).await {
        Ok(_) => Ok(()),
        Err(err) if err.is_transport() => Err(err),
        Err(err) => {
            debug!(predicate, "filter rejected by dry-run");
            Err(GridError::filter_validation(first_line(&err.message())))
        }
    }
}

/// Only the first line of the engine error; the rest is context the
/// client must not see.
fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().trim().to_string()
}

/// User sort state. `set_from_dialog` records that the user explicitly
/// chose an ordering in the filter dialog, which is distinct from a sort
/// merely being present: a dialog choice always wins over the
/// synthesized primary-key default, including the choice of no sort at
/// all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SortState {
    specs: Vec<SortSpec>,
    set_from_dialog: bool,
}

impl SortState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn specs(&self) -> &[SortSpec] {
        &self.specs
    }

    pub fn is_set_from_dialog(&self) -> bool {
        self.set_from_dialog
    }

    /// Replaces the sort wholesale as chosen in the filter dialog. An
    /// empty list is still an explicit choice and suppresses the
    /// default ordering.
    pub fn set_from_dialog(&mut self, specs: Vec<SortSpec>) {
        self.set_from_dialog = true;
        self.specs = specs;
    }

    pub fn clear(&mut self) {
        self.specs.clear();
        self.set_from_dialog = false;
    }
}

/// Everything the composer needs to build one fetch query.
#[derive(Debug)]
pub struct ComposeInput<'a> {
    /// Quoted, qualified object reference.
    pub qualified_object: &'a str,
    pub filter: &'a FilterState,
    pub sort: &'a SortState,
    pub window: RowWindow,
    /// Primary-key column names in key order, for the default sort.
    pub primary_keys: &'a [String],
    pub prefs: GridPreferences,
}

/// Builds the augmented SELECT for a base object query.
///
/// Default sort policy: a dialog-set sort always wins (an explicitly
/// empty one suppresses any ordering); otherwise
/// First/Last windows order by the primary key (ascending for First,
/// descending for Last), and All does so only under the
/// `sort_by_primary_key` preference. A negative window count means
/// unlimited.
pub fn compose(input: &ComposeInput<'_>) -> String {
    let mut sql = format!("SELECT * FROM {}", input.qualified_object);

    if let Some(filter) = input.filter.get() {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }

    let order_by = order_by_clause(input);
    if let Some(order_by) = order_by {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by);
    }

    match input.window {
        RowWindow::First(n) | RowWindow::Last(n) if n >= 0 => {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        _ => {}
    }

    sql
}

fn order_by_clause(input: &ComposeInput<'_>) -> Option<String> {
    // A dialog choice is authoritative either way: an explicit ordering
    // wins, and an explicitly empty one suppresses the key default.
    if input.sort.is_set_from_dialog() {
        if input.sort.specs().is_empty() {
            return None;
        }
        let cols: Vec<String> = input
            .sort
            .specs()
            .iter()
            .map(|s| format!("{} {}", quote_ident(&s.column), s.direction.as_sql()))
            .collect();
        return Some(cols.join(", "));
    }

    if input.primary_keys.is_empty() {
        return None;
    }

    let direction = match input.window {
        RowWindow::First(_) => SortDirection::Asc,
        RowWindow::Last(_) => SortDirection::Desc,
        RowWindow::All if input.prefs.sort_by_primary_key => SortDirection::Asc,
        RowWindow::All => return None,
    };

    let cols: Vec<String> = input
        .primary_keys
        .iter()
        .map(|name| format!("{} {}", quote_ident(name), direction.as_sql()))
        .collect();
    Some(cols.join(", "))
}
