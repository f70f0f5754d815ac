//! # keystage — Primitive key staging tables
//!
//! > **Stop writing per-row INSERTs. Stream your keys.**
//!
//! keystage loads a sequence of `i32`, `i64` or `Uuid` keys into a
//! single-column temporary table through the database's bulk-load protocol,
//! one value at a time, so the table can be joined against afterwards.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use keystage::prelude::*;
//!
//! let conn = MssqlConnection::connect("server=tcp:localhost,1433;database=sometests;...")?;
//!
//! let ids = StagingTable::<i64, _>::builder(&conn, "#ids")
//!     .column("id")
//!     .clustered(true)
//!     .create()?;
//! ids.insert_keys(order_ids.iter().copied())?;
//! // select o.* from orders o join #ids i on i.id = o.id
//! ids.drop_table()?;
//! ```
//!
//! ## Column Types
//!
//! | Key    | Column       |
//! |--------|--------------|
//! | `i32`  | `int`        |
//! | `i64`  | `bigint`     |
//! | `Uuid` | `binary(16)` |

pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
#[cfg(feature = "mssql")]
pub mod mssql;
pub mod primitive;
pub mod recording;
pub mod staging;

pub mod prelude {
    pub use crate::config::KeystageConfig;
    pub use crate::connection::{
        BulkCopyOptions, BulkCopyRequest, BulkLoader, ColumnMapping, Connection, SqlExecutor,
        SqlParam,
    };
    pub use crate::cursor::{KeyCursor, RowCursor};
    pub use crate::error::*;
    #[cfg(feature = "mssql")]
    pub use crate::mssql::{MssqlConnection, MssqlTransaction};
    pub use crate::primitive::{KeyValue, Primitive, PrimitiveKind};
    pub use crate::recording::RecordingConnection;
    pub use crate::staging::{StagingTable, StagingTableBuilder};
}

/// Wrap a key sequence in a one-column cursor named `column_name`.
///
/// # Example
///
/// ```
/// use keystage::cursor::RowCursor;
///
/// let mut cursor = keystage::cursor_over(vec![1i64, 2, 3], "id").unwrap();
/// assert!(cursor.advance());
/// assert_eq!(cursor.get_i64(0).unwrap(), 1);
/// assert_eq!(cursor.get_data_type_name(0).unwrap(), "bigint");
/// ```
pub fn cursor_over<T, K>(
    keys: K,
    column_name: &str,
) -> Result<cursor::KeyCursor<T, K::IntoIter>, error::StageError>
where
    T: primitive::Primitive,
    K: IntoIterator<Item = T>,
{
    cursor::KeyCursor::new(keys, column_name)
}
