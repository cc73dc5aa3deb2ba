// SPDX-License-Identifier: Apache-2.0

//! Abstract database connection
//!
//! The grid engine consumes its host's driver through this trait: dict
//! and scalar execution, identifier quoting, and explicit transaction
//! control. All operations are serial on one live connection; the caller
//! is responsible for holding exclusive access for the duration of a call.

use async_trait::async_trait;

use crate::error::GridResult;
use crate::types::{DriverCapabilities, ResultSet, Value};

/// Quotes a PostgreSQL identifier by double-quote doubling.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quotes a `schema.name` pair into one qualified reference.
pub fn quote_qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Core abstraction over the live database connection.
///
/// Implementations must issue every call on the same session so that
/// transaction state started via [`begin`](Connection::begin) is visible
/// to subsequent statements until commit or rollback.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Whether the underlying connection is alive.
    fn connected(&self) -> bool;

    /// Numeric server version, e.g. `120005` for 12.5.
    fn server_version_num(&self) -> u32;

    /// Driver feature support, including the updatable-resultset gate.
    fn capabilities(&self) -> DriverCapabilities;

    /// Quotes an identifier for this engine.
    fn quote_ident(&self, ident: &str) -> String {
        quote_ident(ident)
    }

    /// Executes a statement returning rows keyed by column name.
    async fn execute_dict(&self, sql: &str, params: &[Value]) -> GridResult<ResultSet>;

    /// Executes a statement returning the first column of the first row.
    async fn execute_scalar(&self, sql: &str, params: &[Value]) -> GridResult<Option<Value>>;

    /// Executes a statement returning only its affected-row count.
    async fn execute(&self, sql: &str, params: &[Value]) -> GridResult<u64>;

    /// Opens a transaction pinned to this connection.
    async fn begin(&self) -> GridResult<()>;

    async fn commit(&self) -> GridResult<()>;

    async fn rollback(&self) -> GridResult<()>;

    /// Savepoint helpers run inside the pinned transaction, so the plain
    /// execute path is sufficient. Names are engine-generated identifiers,
    /// never user data.
    async fn savepoint(&self, name: &str) -> GridResult<()> {
        self.execute(&format!("SAVEPOINT {}", name), &[]).await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&self, name: &str) -> GridResult<()> {
        self.execute(&format!("ROLLBACK TO SAVEPOINT {}", name), &[])
            .await?;
        Ok(())
    }

    async fn release_savepoint(&self, name: &str) -> GridResult<()> {
        self.execute(&format!("RELEASE SAVEPOINT {}", name), &[])
            .await?;
        Ok(())
    }
}
