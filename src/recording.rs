//! In-process connection that records statements and keeps loaded rows.
//!
//! [`RecordingConnection`] answers the two name-resolution queries the
//! staging session issues the way SQL Server would (`quotename` and the
//! `tempdb.` prefix), tracks tables created, truncated and dropped through
//! DDL, and drains bulk-load cursors into memory. Tests use it to observe
//! what a session sends. The CLI's `--dry-run` uses
//! [`RecordingConnection::count_only`], which drains cursors without keeping
//! the keys.

use crate::connection::{BulkCopyRequest, BulkLoader, SqlExecutor, SqlParam};
use crate::cursor::RowCursor;
use crate::error::{StageError, StageResult};
use crate::primitive::{KeyValue, PrimitiveKind};

use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Longest identifier `quotename` accepts.
const MAX_IDENTIFIER_LEN: usize = 128;

/// A statement passed to [`SqlExecutor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<(String, String)>,
    pub in_transaction: bool,
}

/// A completed or failed bulk load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkLoadRecord {
    pub destination: String,
    pub table_lock: bool,
    pub streaming: bool,
    pub kind: PrimitiveKind,
    pub rows: u64,
}

/// Transaction handle for [`RecordingConnection`].
#[derive(Debug)]
pub struct RecordingTransaction {
    _private: (),
}

#[derive(Debug, Default)]
struct TableState {
    primary_key: bool,
    rows: Vec<KeyValue>,
    row_count: u64,
}

/// Connection double that never touches a server.
#[derive(Debug, Default)]
pub struct RecordingConnection {
    statements: RefCell<Vec<Statement>>,
    bulk_loads: RefCell<Vec<BulkLoadRecord>>,
    // Keyed by qualified name.
    tables: RefCell<BTreeMap<String, TableState>>,
    // Logical name -> qualified name, filled by name resolution.
    qualified_names: RefCell<HashMap<String, String>>,
    fail_patterns: RefCell<Vec<String>>,
    fail_bulk_after: Cell<Option<u64>>,
    count_only: bool,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection that counts bulk-loaded rows but keeps none of them.
    ///
    /// Memory stays flat however many keys are loaded. Primary keys are not
    /// enforced, since that would mean remembering every key.
    pub fn count_only() -> Self {
        Self {
            count_only: true,
            ..Self::default()
        }
    }

    /// Start a transaction. Statements run with it are flagged as such.
    pub fn begin(&self) -> RecordingTransaction {
        RecordingTransaction { _private: () }
    }

    /// Fail every statement whose text contains `pattern`.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.fail_patterns.borrow_mut().push(pattern.into());
    }

    /// Fail bulk loads after `rows` rows have been written.
    pub fn fail_bulk_after(&self, rows: u64) {
        self.fail_bulk_after.set(Some(rows));
    }

    /// Every statement executed so far, in order.
    pub fn statements(&self) -> Vec<Statement> {
        self.statements.borrow().clone()
    }

    /// SQL text of every statement executed so far.
    pub fn sql_log(&self) -> Vec<String> {
        self.statements.borrow().iter().map(|s| s.sql.clone()).collect()
    }

    pub fn bulk_loads(&self) -> Vec<BulkLoadRecord> {
        self.bulk_loads.borrow().clone()
    }

    /// Rows currently held by the table created for `table_name`.
    pub fn rows(&self, table_name: &str) -> Option<Vec<KeyValue>> {
        let qualified = self.qualified(table_name);
        self.tables.borrow().get(&qualified).map(|t| t.rows.clone())
    }

    /// Rows loaded into `table_name` since it was created or last truncated.
    pub fn row_count(&self, table_name: &str) -> Option<u64> {
        let qualified = self.qualified(table_name);
        self.tables.borrow().get(&qualified).map(|t| t.row_count)
    }

    pub fn table_exists(&self, table_name: &str) -> bool {
        let qualified = self.qualified(table_name);
        self.tables.borrow().contains_key(&qualified)
    }

    fn qualified(&self, table_name: &str) -> String {
        self.qualified_names
            .borrow()
            .get(table_name)
            .cloned()
            .unwrap_or_else(|| table_name.to_string())
    }

    fn record(&self, sql: &str, params: &[SqlParam<'_>], in_transaction: bool) -> StageResult<()> {
        self.statements.borrow_mut().push(Statement {
            sql: sql.to_string(),
            params: params
                .iter()
                .map(|p| (p.name.to_string(), p.value.to_string()))
                .collect(),
            in_transaction,
        });

        if let Some(pattern) = self
            .fail_patterns
            .borrow()
            .iter()
            .find(|p| sql.contains(p.as_str()))
        {
            return Err(StageError::Database(format!(
                "injected failure on '{}'",
                pattern
            )));
        }
        Ok(())
    }

    fn apply_ddl(&self, sql: &str) -> StageResult<u64> {
        let mut tables = self.tables.borrow_mut();

        if let Some(rest) = sql.strip_prefix("create table ") {
            let name = rest.split(" (").next().unwrap_or(rest).to_string();
            if tables.contains_key(&name) {
                return Err(StageError::Database(format!(
                    "There is already an object named '{}' in the database",
                    name
                )));
            }
            let state = TableState {
                primary_key: rest.contains("primary key"),
                ..TableState::default()
            };
            tables.insert(name, state);
            return Ok(0);
        }

        if let Some(rest) = sql.strip_prefix("truncate table ") {
            let name = rest.trim_end_matches(';');
            let table = tables
                .get_mut(name)
                .ok_or_else(|| invalid_object(name))?;
            table.rows.clear();
            table.row_count = 0;
            return Ok(0);
        }

        if let Some(rest) = sql.strip_prefix("drop table ") {
            let name = rest.trim_end_matches(';');
            tables.remove(name).ok_or_else(|| invalid_object(name))?;
            return Ok(0);
        }

        Ok(0)
    }
}

fn invalid_object(name: &str) -> StageError {
    StageError::Database(format!("Invalid object name '{}'", name))
}

/// SQL Server `quotename` with the default bracket delimiter.
pub fn quotename(name: &str) -> Option<String> {
    if name.chars().count() > MAX_IDENTIFIER_LEN {
        return None;
    }
    Some(format!("[{}]", name.replace(']', "]]")))
}

impl SqlExecutor for RecordingConnection {
    type Transaction = RecordingTransaction;

    fn query_scalar(
        &self,
        sql: &str,
        params: &[SqlParam<'_>],
        tx: Option<&RecordingTransaction>,
    ) -> StageResult<Option<String>> {
        self.record(sql, params, tx.is_some())?;

        let param = params
            .iter()
            .find(|p| sql.contains(&format!("quotename(@{})", p.name)))
            .ok_or_else(|| StageError::Database(format!("unsupported scalar query: {}", sql)))?;

        let Some(quoted) = quotename(param.value) else {
            return Ok(None);
        };

        if sql.contains("'tempdb.' +") {
            let qualified = format!("tempdb.{}", quoted);
            self.qualified_names
                .borrow_mut()
                .insert(param.value.to_string(), qualified.clone());
            return Ok(Some(qualified));
        }
        Ok(Some(quoted))
    }

    fn execute(
        &self,
        sql: &str,
        params: &[SqlParam<'_>],
        tx: Option<&RecordingTransaction>,
    ) -> StageResult<u64> {
        self.record(sql, params, tx.is_some())?;
        self.apply_ddl(sql)
    }
}

impl BulkLoader for RecordingConnection {
    fn write_to_server(
        &self,
        request: &BulkCopyRequest<'_>,
        cursor: &mut dyn RowCursor,
    ) -> StageResult<u64> {
        let qualified = self.qualified(request.destination);
        let mut tables = self.tables.borrow_mut();
        let table = tables
            .get_mut(&qualified)
            .ok_or_else(|| StageError::BulkLoad(format!("Invalid object name '{}'", request.destination)))?;

        let mapping = match request.mappings.as_slice() {
            [mapping] => mapping,
            _ => {
                return Err(StageError::BulkLoad(
                    "staging tables take exactly one column mapping".to_string(),
                ));
            }
        };
        let kind = cursor.get_field_type(mapping.source_ordinal)?;

        let enforce_key = table.primary_key && !self.count_only;
        let mut seen: HashSet<KeyValue> = if enforce_key {
            table.rows.iter().copied().collect()
        } else {
            HashSet::new()
        };

        let mut written = 0u64;
        let mut outcome = Ok(());
        while cursor.advance() {
            if self.fail_bulk_after.get() == Some(written) {
                outcome = Err(StageError::BulkLoad(format!(
                    "injected failure after {} rows",
                    written
                )));
                break;
            }

            let value = match cursor.get_value(mapping.source_ordinal) {
                Ok(value) => value,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            };
            if enforce_key && !seen.insert(value) {
                outcome = Err(StageError::BulkLoad(format!(
                    "Violation of PRIMARY KEY constraint: duplicate key ({})",
                    value
                )));
                break;
            }
            if !self.count_only {
                table.rows.push(value);
            }
            table.row_count += 1;
            written += 1;
        }
        debug!("Recorded bulk load of {} rows into {}", written, request.destination);

        self.bulk_loads.borrow_mut().push(BulkLoadRecord {
            destination: request.destination.to_string(),
            table_lock: request.options.table_lock,
            streaming: request.options.streaming,
            kind,
            rows: written,
        });

        outcome.map(|_| written)
    }
}
