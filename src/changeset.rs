//! Client change-set and per-row save outcomes
//!
//! The wire shapes exchanged with the grid client: a change-set keyed by
//! opaque client-row ids, and the per-row outcome map returned by the
//! save engine. A change-set exists only for the duration of one save
//! request and is never persisted.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::types::Value;

/// Opaque identifier assigned by the UI to a pending row. Unrelated to
/// any database key; only used to correlate outcomes back to edits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientRowId(pub String);

impl ClientRowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ClientRowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// An updated row: the partial column→value map to apply plus the
/// primary-key (or legacy object-id) values snapshotted at fetch time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatedRow {
    #[serde(default)]
    pub values: HashMap<String, Value>,
    #[serde(default)]
    pub key_snapshot: HashMap<String, Value>,
}

/// A deleted row, identified solely by its fetch-time key snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletedRow {
    #[serde(default)]
    pub key_snapshot: HashMap<String, Value>,
}

/// Client-submitted change-set. The four maps are disjoint by client-row
/// id; `staged_rows` mirrors `updated`/`deleted` for client-side undo and
/// carries no server semantics; it is accepted and ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowChangeSet {
    #[serde(default)]
    pub added: BTreeMap<ClientRowId, HashMap<String, Value>>,
    #[serde(default)]
    pub updated: BTreeMap<ClientRowId, UpdatedRow>,
    #[serde(default)]
    pub deleted: BTreeMap<ClientRowId, DeletedRow>,
    #[serde(default)]
    pub staged_rows: BTreeMap<ClientRowId, serde_json::Value>,
}

impl RowChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }
}

/// Per-row result of one save attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub success: bool,
    /// The engine's error message, verbatim, on failure.
    pub error: Option<String>,
    /// Generated key value for an added row whose serial/identity primary
    /// key was not supplied by the client.
    pub generated_primary_key: Option<Value>,
}

impl SaveOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            generated_primary_key: None,
        }
    }

    pub fn ok_with_key(key: Value) -> Self {
        Self {
            success: true,
            error: None,
            generated_primary_key: Some(key),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            generated_primary_key: None,
        }
    }
}

/// Aggregated save response: overall status plus per-row detail, keyed
/// the same way as the input change-set so the UI can mark individual
/// cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveReport {
    /// True only when every row succeeded.
    pub status: bool,
    pub rows: BTreeMap<ClientRowId, SaveOutcome>,
}

impl SaveReport {
    pub fn outcome(&self, id: &ClientRowId) -> Option<&SaveOutcome> {
        self.rows.get(id)
    }
}
