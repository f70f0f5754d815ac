//! Collaborator interfaces: SQL execution and bulk loading.
//!
//! A staging session talks to the database through two seams. The
//! [`SqlExecutor`] runs parameterized SQL text; the [`BulkLoader`] streams a
//! [`RowCursor`] into a table. Anything implementing both is a
//! [`Connection`].

use crate::cursor::RowCursor;
use crate::error::StageResult;

/// A named SQL parameter, referenced in statement text as `@name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlParam<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl<'a> SqlParam<'a> {
    pub fn new(name: &'a str, value: &'a str) -> Self {
        Self { name, value }
    }
}

/// Runs SQL text synchronously, optionally inside a caller's transaction.
pub trait SqlExecutor {
    /// Transaction handle accepted by this executor.
    type Transaction;

    /// Run `sql` and return the first column of the first row, if any.
    fn query_scalar(
        &self,
        sql: &str,
        params: &[SqlParam<'_>],
        tx: Option<&Self::Transaction>,
    ) -> StageResult<Option<String>>;

    /// Run `sql` and return the number of affected rows.
    fn execute(
        &self,
        sql: &str,
        params: &[SqlParam<'_>],
        tx: Option<&Self::Transaction>,
    ) -> StageResult<u64>;
}

/// Bulk-load behaviour flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkCopyOptions {
    /// Take a table lock for the duration of the load.
    pub table_lock: bool,
    /// Pull rows from the cursor as they are sent instead of buffering.
    pub streaming: bool,
}

impl Default for BulkCopyOptions {
    fn default() -> Self {
        Self {
            table_lock: true,
            streaming: true,
        }
    }
}

/// Source column to destination column mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub source_ordinal: usize,
    pub destination_ordinal: usize,
    pub source_column: String,
    pub destination_column: String,
}

impl ColumnMapping {
    /// Map ordinal 0 onto ordinal 0, both sides named `column`.
    pub fn identity(column: &str) -> Self {
        Self {
            source_ordinal: 0,
            destination_ordinal: 0,
            source_column: column.to_string(),
            destination_column: column.to_string(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.source_ordinal == 0 && self.destination_ordinal == 0
    }
}

/// One bulk-load invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkCopyRequest<'a> {
    /// Destination table, already quoted by the server.
    pub destination: &'a str,
    pub options: BulkCopyOptions,
    pub mappings: Vec<ColumnMapping>,
}

/// Streams the rows of a cursor into a table.
pub trait BulkLoader {
    /// Consume `cursor` until it reports no more rows and return how many
    /// rows were written. The cursor is not disposed here; its owner does
    /// that.
    fn write_to_server(
        &self,
        request: &BulkCopyRequest<'_>,
        cursor: &mut dyn RowCursor,
    ) -> StageResult<u64>;
}

/// A database connection usable by a staging session.
pub trait Connection: SqlExecutor + BulkLoader {}

impl<C: SqlExecutor + BulkLoader> Connection for C {}
