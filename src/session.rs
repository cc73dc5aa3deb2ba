// SPDX-License-Identifier: Apache-2.0

//! Grid session state
//!
//! One [`GridSession`] per open grid: it tracks the target object, the
//! applied filter and sort, the resolved columns, and the updatability
//! verdict for the rows currently on screen. What a session may do is
//! fixed by its [`GridObjectKind`] at construction; there is no runtime
//! re-registration of behavior.

use tracing::{debug, instrument};

use crate::analyzer::{self, ResultSetUpdatability};
use crate::changeset::{RowChangeSet, SaveReport};
use crate::column::{self, ColumnDescriptor};
use crate::connection::{quote_qualified, Connection};
use crate::error::{GridError, GridResult};
use crate::filter::{compose, ComposeInput, FilterState, SortState};
use crate::save;
use crate::types::{GridPreferences, ResultSet, RowWindow, SessionId, SortSpec};

/// The closed set of objects a grid can be opened on. Each kind carries
/// fixed capabilities; dispatch is a match, not a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridObjectKind {
    Table,
    View,
    MaterializedView,
    ForeignTable,
    Catalog,
    QueryTool,
}

impl GridObjectKind {
    /// Whether resultsets of this kind may ever be edited. Tables are
    /// editable when keyed; query-tool resultsets when the analyzer
    /// proves single-table provenance. Views and catalogs never are.
    pub fn can_edit(self) -> bool {
        matches!(self, GridObjectKind::Table | GridObjectKind::QueryTool)
    }

    /// Whether a data filter can be applied on top of the object. The
    /// query tool owns its SQL text outright, so there is nothing to
    /// filter server-side.
    pub fn can_filter(self) -> bool {
        !matches!(self, GridObjectKind::QueryTool)
    }

    /// Whether a row window limit applies to composed queries.
    pub fn can_limit(self) -> bool {
        !matches!(self, GridObjectKind::QueryTool)
    }
}

/// What a session points at: a catalog-backed object, or free-form SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridTarget {
    Object {
        schema: String,
        name: String,
        oid: u32,
    },
    Query {
        sql: String,
    },
}

/// Running count of rows the client has pulled, across incremental
/// fetches of one resultset.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchCounter {
    fetched: i64,
}

impl FetchCounter {
    pub fn record(&mut self, rows: i64) {
        self.fetched += rows;
    }

    pub fn total(&self) -> i64 {
        self.fetched
    }

    pub fn reset(&mut self) {
        self.fetched = 0;
    }
}

#[derive(Debug)]
pub struct GridSession {
    id: SessionId,
    kind: GridObjectKind,
    target: GridTarget,
    prefs: GridPreferences,
    filter: FilterState,
    sort: SortState,
    fetched: FetchCounter,
    columns: Vec<ColumnDescriptor>,
    updatability: Option<ResultSetUpdatability>,
}

impl GridSession {
    /// Opens a session on a catalog-backed object.
    pub fn for_object(
        kind: GridObjectKind,
        schema: impl Into<String>,
        name: impl Into<String>,
        oid: u32,
        prefs: GridPreferences,
    ) -> GridResult<Self> {
        if kind == GridObjectKind::QueryTool {
            return Err(GridError::internal(
                "query-tool sessions are opened with for_query",
            ));
        }
        Ok(Self {
            id: SessionId::new(),
            kind,
            target: GridTarget::Object {
                schema: schema.into(),
                name: name.into(),
                oid,
            },
            prefs,
            filter: FilterState::new(),
            sort: SortState::new(),
            fetched: FetchCounter::default(),
            columns: Vec::new(),
            updatability: None,
        })
    }

    /// Opens a query-tool session over free-form SQL.
    pub fn for_query(sql: impl Into<String>, prefs: GridPreferences) -> Self {
        Self {
            id: SessionId::new(),
            kind: GridObjectKind::QueryTool,
            target: GridTarget::Query { sql: sql.into() },
            prefs,
            filter: FilterState::new(),
            sort: SortState::new(),
            fetched: FetchCounter::default(),
            columns: Vec::new(),
            updatability: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn kind(&self) -> GridObjectKind {
        self.kind
    }

    pub fn target(&self) -> &GridTarget {
        &self.target
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn updatability(&self) -> Option<&ResultSetUpdatability> {
        self.updatability.as_ref()
    }

    pub fn is_updatable(&self) -> bool {
        self.updatability
            .as_ref()
            .map(|u| u.is_updatable)
            .unwrap_or(false)
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn sort(&self) -> &SortState {
        &self.sort
    }

    pub fn fetched(&self) -> &FetchCounter {
        &self.fetched
    }

    pub fn record_fetched(&mut self, rows: i64) {
        self.fetched.record(rows);
    }

    /// Quoted, qualified reference to the session's object.
    pub fn qualified_object(&self) -> GridResult<String> {
        match &self.target {
            GridTarget::Object { schema, name, .. } => Ok(quote_qualified(schema, name)),
            GridTarget::Query { .. } => Err(GridError::not_supported(
                "a query-tool session has no underlying object",
            )),
        }
    }

    /// Resolves columns and the updatability verdict for an object
    /// session. Kinds that can never be edited keep their columns but
    /// are pinned read-only regardless of keys.
    #[instrument(skip(self, conn), fields(session = %self.id, kind = ?self.kind))]
    pub async fn analyze(&mut self, conn: &dyn Connection) -> GridResult<()> {
        let GridTarget::Object { oid, .. } = &self.target else {
            return Err(GridError::not_supported(
                "object analysis does not apply to a query-tool session",
            ));
        };
        let oid = *oid;

        let (mut columns, mut updatability) = analyzer::analyze_table(conn, oid).await?;
        if !self.kind.can_edit() {
            updatability = ResultSetUpdatability::not_updatable();
            for col in columns.iter_mut() {
                col.editable = false;
            }
        }

        debug!(
            updatable = updatability.is_updatable,
            columns = columns.len(),
            "object resultset analyzed"
        );
        self.columns = columns;
        self.updatability = Some(updatability);
        self.fetched.reset();
        Ok(())
    }

    /// Replaces the session state from a freshly executed query
    /// resultset. Every re-run re-derives columns and updatability from
    /// scratch; nothing carries over from the previous execution.
    #[instrument(skip(self, conn, result), fields(session = %self.id))]
    pub async fn on_query_executed(
        &mut self,
        conn: &dyn Connection,
        result: &ResultSet,
    ) -> GridResult<()> {
        if self.kind != GridObjectKind::QueryTool {
            return Err(GridError::not_supported(
                "resultset analysis applies to query-tool sessions only",
            ));
        }

        let mut columns = column::resolve(&result.columns);
        let updatability = analyzer::analyze_query(conn, &mut columns).await?;

        debug!(
            updatable = updatability.is_updatable,
            columns = columns.len(),
            "query resultset analyzed"
        );
        self.columns = columns;
        self.updatability = Some(updatability);
        self.fetched.reset();
        self.fetched.record(result.rows.len() as i64);
        Ok(())
    }

    /// Validates and applies a filter fragment, replacing any existing
    /// filter.
    pub async fn set_filter(&mut self, conn: &dyn Connection, fragment: &str) -> GridResult<()> {
        if !self.kind.can_filter() {
            return Err(GridError::not_supported(
                "filters do not apply to a query-tool session",
            ));
        }
        let object = self.qualified_object()?;
        self.filter.set(conn, &object, fragment).await
    }

    /// Validates and ANDs a fragment onto the existing filter.
    pub async fn append_filter(&mut self, conn: &dyn Connection, fragment: &str) -> GridResult<()> {
        if !self.kind.can_filter() {
            return Err(GridError::not_supported(
                "filters do not apply to a query-tool session",
            ));
        }
        let object = self.qualified_object()?;
        self.filter.append(conn, &object, fragment).await
    }

    pub fn clear_filter(&mut self) {
        self.filter.clear();
    }

    pub fn set_sort(&mut self, specs: Vec<SortSpec>) {
        self.sort.set_from_dialog(specs);
    }

    pub fn clear_sort(&mut self) {
        self.sort.clear();
    }

    /// Composes the SELECT used to (re)fetch the grid's rows.
    pub fn compose_fetch_query(&self, window: RowWindow) -> GridResult<String> {
        let object = self.qualified_object()?;
        let window = if self.kind.can_limit() {
            window
        } else {
            RowWindow::All
        };

        let primary_keys: Vec<String> = self
            .updatability
            .as_ref()
            .map(|u| u.primary_key_columns.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default();

        Ok(compose(&ComposeInput {
            qualified_object: &object,
            filter: &self.filter,
            sort: &self.sort,
            window,
            primary_keys: &primary_keys,
            prefs: self.prefs,
        }))
    }

    /// Replays a staged change-set against the session's source object.
    #[instrument(skip(self, conn, changes), fields(session = %self.id, rows = changes.row_count()))]
    pub async fn save(
        &self,
        conn: &dyn Connection,
        changes: &RowChangeSet,
    ) -> GridResult<SaveReport> {
        let updatability = self
            .updatability
            .as_ref()
            .ok_or(GridError::NotUpdatable)?;
        save::save(conn, updatability, changes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DriverCapabilities, Value};
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn row(pairs: Vec<(&str, Value)>) -> HashMap<String, Value> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    /// Canned catalog for one keyed table, `public.fixture(pk_col, normal_col)`.
    struct FixtureCatalog;

    #[async_trait]
    impl Connection for FixtureCatalog {
        fn connected(&self) -> bool {
            true
        }
        fn server_version_num(&self) -> u32 {
            150002
        }
        fn capabilities(&self) -> DriverCapabilities {
            DriverCapabilities::full()
        }
        async fn execute_dict(&self, sql: &str, _params: &[Value]) -> GridResult<ResultSet> {
            if sql.starts_with("EXPLAIN") {
                return Ok(ResultSet::empty());
            }
            if sql.contains("pg_index") {
                return Ok(ResultSet {
                    columns: Vec::new(),
                    rows: vec![row(vec![
                        ("name", Value::Text("pk_col".into())),
                        ("attnum", Value::Int(1)),
                    ])],
                });
            }
            if sql.contains("pg_attribute a") {
                return Ok(ResultSet {
                    columns: Vec::new(),
                    rows: vec![
                        row(vec![
                            ("name", Value::Text("pk_col".into())),
                            ("type_oid", Value::Int(23)),
                            ("type_name", Value::Text("int4".into())),
                            ("not_null", Value::Bool(true)),
                            ("has_default", Value::Bool(false)),
                            ("type_modifier", Value::Int(-1)),
                            ("attnum", Value::Int(1)),
                        ]),
                        row(vec![
                            ("name", Value::Text("normal_col".into())),
                            ("type_oid", Value::Int(1043)),
                            ("type_name", Value::Text("varchar".into())),
                            ("not_null", Value::Bool(false)),
                            ("has_default", Value::Bool(false)),
                            ("type_modifier", Value::Int(9)),
                            ("attnum", Value::Int(2)),
                        ]),
                    ],
                });
            }
            if sql.contains("pg_namespace") {
                return Ok(ResultSet {
                    columns: Vec::new(),
                    rows: vec![row(vec![
                        ("schema_name", Value::Text("public".into())),
                        ("object_name", Value::Text("fixture".into())),
                        ("kind", Value::Text("r".into())),
                    ])],
                });
            }
            Err(GridError::internal(format!("unexpected query: {}", sql)))
        }
        async fn execute_scalar(&self, sql: &str, _params: &[Value]) -> GridResult<Option<Value>> {
            if sql.contains("relhasoids") {
                return Ok(Some(Value::Bool(false)));
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

    #[tokio::test]
    async fn keyed_table_session_becomes_editable() {
        let mut session = GridSession::for_object(
            GridObjectKind::Table,
            "public",
            "fixture",
            16385,
            GridPreferences::default(),
        )
        .unwrap();
        session.analyze(&FixtureCatalog).await.unwrap();

        assert!(session.is_updatable());
        assert_eq!(session.columns().len(), 2);
        assert!(session.columns().iter().all(|c| c.editable));
    }

    #[tokio::test]
    async fn view_session_stays_read_only_even_when_keyed() {
        let mut session = GridSession::for_object(
            GridObjectKind::View,
            "public",
            "fixture",
            16385,
            GridPreferences::default(),
        )
        .unwrap();
        session.analyze(&FixtureCatalog).await.unwrap();

        assert!(!session.is_updatable());
        assert!(session.columns().iter().all(|c| !c.editable));
    }

    #[tokio::test]
    async fn query_tool_session_rejects_filters() {
        let mut session = GridSession::for_query("SELECT 1", GridPreferences::default());
        let err = session
            .set_filter(&FixtureCatalog, "pk_col = 1")
            .await
            .expect_err("query tool has no server-side filter");
        assert!(matches!(err, GridError::NotSupported { .. }));
    }

    #[tokio::test]
    async fn composed_fetch_uses_filter_sort_and_key_default() {
        let mut session = GridSession::for_object(
            GridObjectKind::Table,
            "public",
            "fixture",
            16385,
            GridPreferences::default(),
        )
        .unwrap();
        session.analyze(&FixtureCatalog).await.unwrap();
        session
            .set_filter(&FixtureCatalog, "normal_col <> ''")
            .await
            .unwrap();

        let sql = session.compose_fetch_query(RowWindow::First(100)).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM \"public\".\"fixture\" WHERE normal_col <> '' \
             ORDER BY \"pk_col\" ASC LIMIT 100"
        );
    }

    #[tokio::test]
    async fn save_without_analysis_is_not_updatable() {
        let session = GridSession::for_object(
            GridObjectKind::Table,
            "public",
            "fixture",
            16385,
            GridPreferences::default(),
        )
        .unwrap();
        let err = session
            .save(&FixtureCatalog, &RowChangeSet::default())
            .await
            .expect_err("no analysis yet");
        assert!(matches!(err, GridError::NotUpdatable));
    }

    #[test]
    fn fetch_counter_accumulates_and_resets() {
        let mut counter = FetchCounter::default();
        counter.record(100);
        counter.record(40);
        assert_eq!(counter.total(), 140);
        counter.reset();
        assert_eq!(counter.total(), 0);
    }

    #[test]
    fn query_tool_cannot_be_opened_as_an_object_session() {
        let err = GridSession::for_object(
            GridObjectKind::QueryTool,
            "public",
            "fixture",
            16385,
            GridPreferences::default(),
        )
        .expect_err("wrong constructor");
        assert!(matches!(err, GridError::Internal { .. }));
    }
}
