//! Universal data types for the editable-grid engine
//!
//! These types normalize driver metadata and values into one
//! representation shared by the analyzer, composer, and save engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::column::RawColumnInfo;

/// Unique identifier for a grid session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Universal value representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Result of a dict-style query execution: raw column metadata plus rows
/// keyed by column name.
///
/// Duplicate output names collapse in the row maps; the analyzer therefore
/// keys its duplicate detection off `(table_oid, attnum)` provenance in
/// [`RawColumnInfo`], never off the map keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<RawColumnInfo>,
    pub rows: Vec<HashMap<String, Value>>,
}

impl ResultSet {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }
}

/// Sort direction for composed queries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// One column of a user-specified sort
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortSpec {
    pub column: String,
    pub direction: SortDirection,
}

/// Row window for a fetch query.
///
/// A negative count means unlimited; [`DEFAULT_WINDOW_SIZE`] is the
/// canonical "first/last 100 rows" window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowWindow {
    All,
    First(i64),
    Last(i64),
}

/// Canonical window size for the first/last-rows commands.
pub const DEFAULT_WINDOW_SIZE: i64 = 100;

/// Reported capabilities for a driver connection.
///
/// `updatable_resultsets` is a hard gate: below the minimum driver feature
/// level the analyzer reports non-updatable without any catalog inspection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DriverCapabilities {
    pub updatable_resultsets: bool,
    pub transactions: bool,
}

impl DriverCapabilities {
    pub fn full() -> Self {
        Self {
            updatable_resultsets: true,
            transactions: true,
        }
    }
}

/// User preferences read once at session construction. The host
/// application owns the preference store; only the flags the grid core
/// consumes are carried here.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GridPreferences {
    /// Default table-view sort by primary key when no explicit sort is set.
    pub sort_by_primary_key: bool,
}
