// gridedit - Editable-resultset core for PostgreSQL grids
// Core library

pub mod analyzer;
pub mod catalog;
pub mod changeset;
pub mod column;
pub mod connection;
pub mod drivers;
pub mod error;
pub mod filter;
pub mod save;
pub mod session;
pub mod types;

pub use analyzer::{analyze_query, analyze_table, ResultSetUpdatability};
pub use changeset::{ClientRowId, RowChangeSet, SaveOutcome, SaveReport};
pub use column::{resolve, ColumnDescriptor, RawColumnInfo};
pub use connection::{quote_ident, quote_qualified, Connection};
pub use error::{GridError, GridResult};
pub use filter::{compose, ComposeInput, FilterState, SortState};
pub use save::save;
pub use session::{FetchCounter, GridObjectKind, GridSession, GridTarget};
pub use types::*;
