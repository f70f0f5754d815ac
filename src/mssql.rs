//! SQL Server connection over tiberius.
//!
//! [`MssqlConnection`] drives an async tiberius client from a private
//! current-thread tokio runtime, so every call blocks until the server
//! answers. Bulk loads use the TDS `INSERT BULK` protocol and pull one row
//! from the cursor per `TokenRow` sent.

use crate::connection::{BulkCopyRequest, BulkLoader, SqlExecutor, SqlParam};
use crate::cursor::RowCursor;
use crate::error::{StageError, StageResult};
use crate::primitive::PrimitiveKind;

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use tiberius::{Client, ColumnData, Config, ToSql, TokenRow};
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

type MssqlClient = Client<Compat<TcpStream>>;

/// Transaction opened with [`MssqlConnection::begin`].
///
/// The server tracks the open transaction per session, so statements sent
/// on the same connection join it whether or not the handle is passed.
/// Finish it with [`MssqlConnection::commit`] or
/// [`MssqlConnection::rollback`].
#[derive(Debug)]
pub struct MssqlTransaction {
    _private: (),
}

/// A blocking SQL Server connection.
///
/// A bulk load that fails after `INSERT BULK` has started leaves the TDS
/// stream mid-request. The connection is then broken: every later call
/// fails with [`StageError::Connection`] and the caller must reconnect.
pub struct MssqlConnection {
    runtime: Runtime,
    client: RefCell<MssqlClient>,
    health: Health,
}

/// Whether the TDS stream can still carry requests.
#[derive(Debug, Default)]
struct Health {
    broken: Cell<bool>,
}

impl Health {
    fn check(&self) -> StageResult<()> {
        if self.broken.get() {
            return Err(StageError::Connection(
                "connection was left inside an unfinished bulk load; reconnect".to_string(),
            ));
        }
        Ok(())
    }

    fn mark_broken(&self) {
        self.broken.set(true);
    }
}

impl MssqlConnection {
    /// Connect using an ADO.NET style connection string, e.g.
    /// `server=tcp:localhost,1433;database=sometests;user=sa;password=...;TrustServerCertificate=true`.
    pub fn connect(connection_string: &str) -> StageResult<Self> {
        let config = Config::from_ado_string(connection_string)
            .map_err(|e| StageError::Config(e.to_string()))?;
        let runtime = Builder::new_current_thread().enable_all().build()?;

        let addr = config.get_addr();
        debug!("Connecting to {}", addr);
        let client = runtime.block_on(async {
            let tcp = TcpStream::connect(&addr)
                .await
                .map_err(|e| StageError::Connection(e.to_string()))?;
            tcp.set_nodelay(true)?;
            Client::connect(config, tcp.compat_write())
                .await
                .map_err(|e| StageError::Connection(e.to_string()))
        })?;
        info!("Connected to {}", addr);

        Ok(Self {
            runtime,
            client: RefCell::new(client),
            health: Health::default(),
        })
    }

    /// Open a transaction on this connection.
    pub fn begin(&self) -> StageResult<MssqlTransaction> {
        self.batch("begin tran;")?;
        Ok(MssqlTransaction { _private: () })
    }

    pub fn commit(&self, _tx: MssqlTransaction) -> StageResult<()> {
        self.batch("commit tran;")
    }

    pub fn rollback(&self, _tx: MssqlTransaction) -> StageResult<()> {
        self.batch("rollback tran;")
    }

    /// Send a parameterless batch. Unlike `sp_executesql`, a batch shares
    /// the session scope, so `#temp` tables it creates outlive the call.
    fn batch(&self, sql: &str) -> StageResult<()> {
        self.health.check()?;
        let mut client = self.client.borrow_mut();
        self.runtime.block_on(async {
            client
                .simple_query(sql)
                .await
                .map_err(db_err)?
                .into_results()
                .await
                .map_err(db_err)?;
            Ok(())
        })
    }
}

fn db_err(e: tiberius::error::Error) -> StageError {
    StageError::Database(e.to_string())
}

fn bulk_err(e: tiberius::error::Error) -> StageError {
    StageError::BulkLoad(e.to_string())
}

/// Rewrite `@name` references into tiberius' positional `@P1..@Pn`.
fn positional(sql: &str, params: &[SqlParam<'_>]) -> String {
    let mut indexed: Vec<(usize, &SqlParam<'_>)> = params.iter().enumerate().collect();
    // Longest names first so `@id` cannot clobber `@idx`.
    indexed.sort_by(|a, b| b.1.name.len().cmp(&a.1.name.len()));

    let mut sql = sql.to_string();
    for (i, param) in indexed {
        sql = sql.replace(&format!("@{}", param.name), &format!("@P{}", i + 1));
    }
    sql
}

fn column_data(cursor: &dyn RowCursor, kind: PrimitiveKind) -> StageResult<ColumnData<'static>> {
    let data = match kind {
        PrimitiveKind::Int32 => ColumnData::I32(Some(cursor.get_i32(0)?)),
        PrimitiveKind::Int64 => ColumnData::I64(Some(cursor.get_i64(0)?)),
        // binary(16) column: RFC 4122 byte order.
        PrimitiveKind::Guid => {
            let bytes = cursor.get_guid(0)?.as_bytes().to_vec();
            ColumnData::Binary(Some(Cow::Owned(bytes)))
        }
    };
    Ok(data)
}

impl SqlExecutor for MssqlConnection {
    type Transaction = MssqlTransaction;

    fn query_scalar(
        &self,
        sql: &str,
        params: &[SqlParam<'_>],
        _tx: Option<&MssqlTransaction>,
    ) -> StageResult<Option<String>> {
        self.health.check()?;
        let sql = positional(sql, params);
        let bound: Vec<&dyn ToSql> = params.iter().map(|p| &p.value as &dyn ToSql).collect();

        let mut client = self.client.borrow_mut();
        self.runtime.block_on(async {
            let row = client
                .query(sql.as_str(), &bound)
                .await
                .map_err(db_err)?
                .into_row()
                .await
                .map_err(db_err)?;

            match row {
                Some(row) => Ok(row.try_get::<&str, _>(0).map_err(db_err)?.map(str::to_string)),
                None => Ok(None),
            }
        })
    }

    fn execute(
        &self,
        sql: &str,
        params: &[SqlParam<'_>],
        _tx: Option<&MssqlTransaction>,
    ) -> StageResult<u64> {
        if params.is_empty() {
            // Batches report no row count.
            self.batch(sql)?;
            return Ok(0);
        }

        self.health.check()?;
        let sql = positional(sql, params);
        let bound: Vec<&dyn ToSql> = params.iter().map(|p| &p.value as &dyn ToSql).collect();

        let mut client = self.client.borrow_mut();
        self.runtime.block_on(async {
            let result = client.execute(sql.as_str(), &bound).await.map_err(db_err)?;
            Ok(result.total())
        })
    }
}

impl BulkLoader for MssqlConnection {
    fn write_to_server(
        &self,
        request: &BulkCopyRequest<'_>,
        cursor: &mut dyn RowCursor,
    ) -> StageResult<u64> {
        self.health.check()?;
        let mapping = match request.mappings.as_slice() {
            [mapping] if mapping.is_identity() => mapping,
            _ => {
                return Err(StageError::BulkLoad(
                    "only a single ordinal 0 -> 0 column mapping is supported".to_string(),
                ));
            }
        };
        let kind = cursor.get_field_type(mapping.source_ordinal)?;
        if request.options.table_lock {
            debug!("INSERT BULK into {} without TABLOCK hint", request.destination);
        }

        let mut client = self.client.borrow_mut();
        self.runtime.block_on(async {
            let mut load = client
                .bulk_insert(request.destination)
                .await
                .map_err(bulk_err)?;

            let mut sent = 0u64;
            let streamed: StageResult<()> = async {
                while cursor.advance() {
                    let mut row = TokenRow::new();
                    row.push(column_data(&*cursor, kind)?);
                    load.send(row).await.map_err(bulk_err)?;
                    sent += 1;
                }
                Ok(())
            }
            .await;
            if let Err(e) = streamed {
                self.health.mark_broken();
                return Err(e);
            }

            let total = match load.finalize().await {
                Ok(result) => result.total(),
                Err(e) => {
                    self.health.mark_broken();
                    return Err(bulk_err(e));
                }
            };
            debug!("Sent {} rows, server reported {}", sent, total);
            Ok(total)
        })
    }
}
