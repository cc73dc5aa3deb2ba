//! Column Type Resolver
//!
//! Pure transformation from the driver's raw per-column metadata into
//! [`ColumnDescriptor`]s: display type with precision, table provenance,
//! editability, and recognition of the legacy `oid` pseudo-column.
//! No network calls; malformed input clamps to "non-editable, unknown"
//! rather than raising.

use serde::{Deserialize, Serialize};

/// Type oid of the `oid` pseudo-type in the system catalogs.
const OID_TYPE_OID: u32 = 26;

/// Engines at or above this version have no per-row object ids.
pub const OID_REMOVAL_VERSION_NUM: u32 = 12_00_00;

/// Raw per-column metadata as reported by the driver after executing a
/// query, or by the catalog for a direct table browse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawColumnInfo {
    pub name: String,
    pub type_oid: u32,
    pub type_name: String,
    /// Known for catalog-sourced columns; drivers usually cannot report it.
    pub not_null: Option<bool>,
    pub has_default: Option<bool>,
    /// Originating table oid when the column maps directly to a stored
    /// column. Zero/None means derived or computed.
    pub table_oid: Option<u32>,
    /// Originating attribute number; positive for user columns, negative
    /// for system columns such as `oid`.
    pub attnum: Option<i16>,
    /// `atttypmod`: type-specific length/precision encoding, -1 if none.
    pub type_modifier: i32,
}

impl RawColumnInfo {
    /// Minimal constructor for driver metadata with no catalog extras.
    pub fn from_driver(
        name: impl Into<String>,
        type_oid: u32,
        type_name: impl Into<String>,
        table_oid: Option<u32>,
        attnum: Option<i16>,
    ) -> Self {
        Self {
            name: name.into(),
            type_oid,
            type_name: type_name.into(),
            not_null: None,
            has_default: None,
            table_oid,
            attnum,
            type_modifier: -1,
        }
    }
}

/// Resolved column metadata, immutable for the lifetime of one resultset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub display_name: String,
    pub position: usize,
    /// Human-readable type with precision, e.g. `numeric(12,2)`.
    pub declared_type: String,
    /// The engine's base type name, e.g. `numeric`.
    pub internal_type: String,
    pub is_primary_key: bool,
    pub is_nullable: bool,
    pub has_default: bool,
    pub is_array: bool,
    /// Set only after updatability analysis confirms single-table
    /// provenance; derived columns never become editable.
    pub editable: bool,
    /// Legacy whole-row object-id pseudo-column. Edit-irrelevant, but it
    /// participates in row identity on engines predating oid removal.
    pub is_row_id: bool,
    pub table_oid: Option<u32>,
    pub attnum: Option<i16>,
}

impl ColumnDescriptor {
    /// A column maps to a stored table column only with a non-zero table
    /// oid and a positive attribute number.
    pub fn is_table_backed(&self) -> bool {
        matches!(self.table_oid, Some(oid) if oid != 0)
            && matches!(self.attnum, Some(n) if n > 0)
    }
}

/// Resolves raw driver metadata into one descriptor per column.
pub fn resolve(metadata: &[RawColumnInfo]) -> Vec<ColumnDescriptor> {
    metadata
        .iter()
        .enumerate()
        .map(|(position, raw)| resolve_one(position, raw))
        .collect()
}

fn resolve_one(position: usize, raw: &RawColumnInfo) -> ColumnDescriptor {
    if raw.name.is_empty() || raw.type_name.is_empty() {
        // Clamp malformed metadata instead of raising.
        return ColumnDescriptor {
            name: raw.name.clone(),
            display_name: raw.name.clone(),
            position,
            declared_type: "unknown".to_string(),
            internal_type: "unknown".to_string(),
            is_primary_key: false,
            is_nullable: true,
            has_default: false,
            is_array: false,
            editable: false,
            is_row_id: false,
            table_oid: None,
            attnum: None,
        };
    }

    let (internal_type, is_array) = base_type(&raw.type_name);
    let is_row_id = raw.type_oid == OID_TYPE_OID
        && raw.name == "oid"
        && raw.attnum.map_or(true, |n| n < 0);

    let declared_type = declared_type(&internal_type, raw.type_modifier, is_array);

    ColumnDescriptor {
        name: raw.name.clone(),
        display_name: raw.name.clone(),
        position,
        declared_type,
        internal_type,
        is_primary_key: false,
        is_nullable: !raw.not_null.unwrap_or(false),
        has_default: raw.has_default.unwrap_or(false),
        is_array,
        editable: false,
        is_row_id,
        table_oid: raw.table_oid.filter(|oid| *oid != 0),
        attnum: raw.attnum,
    }
}

/// Strips the array marker from a catalog type name (`_int4` -> `int4`).
fn base_type(type_name: &str) -> (String, bool) {
    let lower = type_name.to_ascii_lowercase();
    match lower.strip_prefix('_') {
        Some(elem) => (elem.to_string(), true),
        None => {
            let is_array = lower.ends_with("[]");
            (lower.trim_end_matches("[]").to_string(), is_array)
        }
    }
}

/// Renders the human-readable declared type, applying the `atttypmod`
/// precision encoding where the type family carries one.
fn declared_type(internal: &str, typmod: i32, is_array: bool) -> String {
    // VARHDRSZ-adjusted length for varlena types.
    let varlena_len = typmod - 4;

    let rendered = match internal {
        "numeric" if typmod >= 4 => {
            let precision = (varlena_len >> 16) & 0xffff;
            let scale = varlena_len & 0xffff;
            format!("numeric({},{})", precision, scale)
        }
        "varchar" if typmod >= 4 => format!("character varying({})", varlena_len),
        "varchar" => "character varying".to_string(),
        "bpchar" if typmod >= 4 => format!("character({})", varlena_len),
        "bpchar" => "character".to_string(),
        "bit" if typmod >= 0 => format!("bit({})", typmod),
        "varbit" if typmod >= 0 => format!("bit varying({})", typmod),
        "varbit" => "bit varying".to_string(),
        "time" if typmod >= 0 => format!("time({}) without time zone", typmod),
        "time" => "time without time zone".to_string(),
        "timetz" if typmod >= 0 => format!("time({}) with time zone", typmod),
        "timetz" => "time with time zone".to_string(),
        "timestamp" if typmod >= 0 => format!("timestamp({}) without time zone", typmod),
        "timestamp" => "timestamp without time zone".to_string(),
        "timestamptz" if typmod >= 0 => format!("timestamp({}) with time zone", typmod),
        "timestamptz" => "timestamp with time zone".to_string(),
        "interval" if typmod >= 0 => format!("interval({})", typmod & 0xffff),
        other => other.to_string(),
    };

    if is_array {
        format!("{}[]", rendered)
    } else {
        rendered
    }
}
