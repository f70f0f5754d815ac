//! Staging table sessions.
//!
//! A [`StagingTable`] owns the lifecycle of one single-column temporary
//! table on a borrowed connection: it creates the table, bulk-loads key
//! sequences into it, truncates it, and finally drops it.
//!
//! ```rust,ignore
//! let conn = MssqlConnection::connect(&conn_str)?;
//! let ids = StagingTable::<i64, _>::create(&conn, "#ids")?;
//! ids.insert_keys(order_ids.iter().copied())?;
//! // ... join against #ids ...
//! ids.drop_table()?;
//! ```

use crate::connection::{BulkCopyOptions, BulkCopyRequest, ColumnMapping, Connection, SqlParam};
use crate::cursor::{KeyCursor, RowCursor};
use crate::error::{StageError, StageResult};
use crate::primitive::{Primitive, PrimitiveKind};

use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

const QUALIFY_TABLE_SQL: &str = "select 'tempdb.' + quotename(@tempTableName);";
const QUOTE_COLUMN_SQL: &str = "select quotename(@columnName);";

/// Default name of the staging column.
pub const DEFAULT_COLUMN: &str = "id";

/// One single-column temporary table bound to one connection.
pub struct StagingTable<'c, T: Primitive, C: Connection> {
    conn: &'c C,
    table_name: String,
    qualified_table: String,
    column_name: String,
    quoted_column: String,
    clustered: bool,
    _kind: PhantomData<T>,
}

impl<'c, T: Primitive, C: Connection> StagingTable<'c, T, C> {
    /// Create `table_name` with a clustered primary key on column `id`.
    pub fn create(conn: &'c C, table_name: &str) -> StageResult<Self> {
        Self::builder(conn, table_name).create()
    }

    /// Start configuring a staging table.
    pub fn builder<'t>(conn: &'c C, table_name: &str) -> StagingTableBuilder<'c, 't, T, C> {
        StagingTableBuilder {
            conn,
            table_name: table_name.to_string(),
            column_name: DEFAULT_COLUMN.to_string(),
            transaction: None,
            clustered: true,
            _kind: PhantomData,
        }
    }

    /// Bulk-load `keys` into the table and return the number of rows written.
    ///
    /// The keys are pulled one at a time by the connection's bulk loader.
    /// Nothing is rolled back on failure; rows already sent may remain.
    ///
    /// The loader is given the server-quoted name, since bulk-load
    /// transports splice the destination into SQL text.
    pub fn insert_keys<K>(&self, keys: K) -> StageResult<u64>
    where
        K: IntoIterator<Item = T>,
    {
        let mut cursor = KeyCursor::new(keys, self.column_name.as_str())?;
        let request = BulkCopyRequest {
            destination: &self.qualified_table,
            options: BulkCopyOptions {
                table_lock: true,
                streaming: true,
            },
            mappings: vec![ColumnMapping::identity(&self.column_name)],
        };

        let outcome = self.conn.write_to_server(&request, &mut cursor);
        cursor.dispose();

        match &outcome {
            Ok(rows) => info!("Loaded {} keys into {}", rows, self.table_name),
            Err(e) => warn!("Bulk load into {} failed: {}", self.table_name, e),
        }
        outcome
    }

    /// Remove every row, keeping the table.
    pub fn truncate(&self) -> StageResult<()> {
        let sql = format!("truncate table {};", self.qualified_table);
        debug!("{}", sql);
        self.conn.execute(&sql, &[], None)?;
        Ok(())
    }

    /// Drop the table. The session is consumed.
    pub fn drop_table(self) -> StageResult<()> {
        let sql = format!("drop table {};", self.qualified_table);
        debug!("{}", sql);
        self.conn.execute(&sql, &[], None)?;
        Ok(())
    }

    /// Table name as supplied by the caller.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Server-qualified table name, e.g. `tempdb.[#ids]`.
    pub fn qualified_name(&self) -> &str {
        &self.qualified_table
    }

    /// Column name as supplied by the caller.
    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    /// Server-quoted column identifier, e.g. `[id]`.
    pub fn quoted_column(&self) -> &str {
        &self.quoted_column
    }

    pub fn is_clustered(&self) -> bool {
        self.clustered
    }

    pub fn kind(&self) -> PrimitiveKind {
        T::KIND
    }
}

impl<T: Primitive, C: Connection> fmt::Debug for StagingTable<'_, T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingTable")
            .field("kind", &T::KIND)
            .field("table_name", &self.table_name)
            .field("qualified_table", &self.qualified_table)
            .field("column_name", &self.column_name)
            .field("clustered", &self.clustered)
            .finish()
    }
}

/// Builder for [`StagingTable`].
pub struct StagingTableBuilder<'c, 't, T: Primitive, C: Connection> {
    conn: &'c C,
    table_name: String,
    column_name: String,
    transaction: Option<&'t C::Transaction>,
    clustered: bool,
    _kind: PhantomData<T>,
}

impl<'c, 't, T: Primitive, C: Connection> StagingTableBuilder<'c, 't, T, C> {
    /// Set the column name (default `id`).
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column_name = name.into();
        self
    }

    /// Create a clustered primary key on the column (default `true`).
    pub fn clustered(mut self, clustered: bool) -> Self {
        self.clustered = clustered;
        self
    }

    /// Run the name lookups and the `create table` inside `tx`.
    pub fn transaction(mut self, tx: &'t C::Transaction) -> Self {
        self.transaction = Some(tx);
        self
    }

    /// Resolve names against the server and create the table.
    pub fn create(self) -> StageResult<StagingTable<'c, T, C>> {
        if self.table_name.is_empty() {
            return Err(StageError::MissingArgument("table_name"));
        }
        if self.column_name.is_empty() {
            return Err(StageError::MissingArgument("column_name"));
        }

        let tx = self.transaction;
        let qualified_table = resolve(
            self.conn,
            QUALIFY_TABLE_SQL,
            SqlParam::new("tempTableName", &self.table_name),
            tx,
        )?;
        let quoted_column = resolve(
            self.conn,
            QUOTE_COLUMN_SQL,
            SqlParam::new("columnName", &self.column_name),
            tx,
        )?;

        let probe = KeyCursor::new(std::iter::empty::<T>(), self.column_name.as_str())?;
        let sql_type = probe.get_data_type_name(0)?;
        let sql = create_table_sql(&qualified_table, &quoted_column, sql_type, self.clustered);

        debug!("{}", sql);
        self.conn.execute(&sql, &[], tx)?;

        Ok(StagingTable {
            conn: self.conn,
            table_name: self.table_name,
            qualified_table,
            column_name: self.column_name,
            quoted_column,
            clustered: self.clustered,
            _kind: PhantomData,
        })
    }
}

/// Run a name-resolution query; a NULL result means the server rejected the name.
fn resolve<C: Connection>(
    conn: &C,
    sql: &str,
    param: SqlParam<'_>,
    tx: Option<&C::Transaction>,
) -> StageResult<String> {
    debug!("{} [@{} = {}]", sql, param.name, param.value);
    let name = param.name;
    conn.query_scalar(sql, &[param], tx)?.ok_or_else(|| {
        StageError::Database(format!("server returned no identifier for @{}", name))
    })
}

/// DDL for a single-column staging table.
pub fn create_table_sql(
    qualified_table: &str,
    quoted_column: &str,
    sql_type: &str,
    clustered: bool,
) -> String {
    let mut sql = format!(
        "create table {} ({} {} not null",
        qualified_table, quoted_column, sql_type
    );
    if clustered {
        sql.push_str(" primary key clustered");
    }
    sql.push_str(");");
    sql
}
