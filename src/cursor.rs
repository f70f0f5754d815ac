//! Single-column row cursor over a primitive key sequence.
//!
//! [`RowCursor`] is the pull-based protocol a bulk-load transport consumes:
//! advance, column metadata, typed reads and disposal. [`KeyCursor`] is the
//! one implementation, a lazy adapter over any iterator of a [`Primitive`]
//! type. It holds at most one value at a time; the sequence is never
//! buffered.
//!
//! ```
//! use keystage::cursor::{KeyCursor, RowCursor};
//!
//! let mut cursor = KeyCursor::new([10, 20, 30], "id").unwrap();
//! let mut seen = Vec::new();
//! while cursor.advance() {
//!     seen.push(cursor.get_i32(0).unwrap());
//! }
//! assert_eq!(seen, vec![10, 20, 30]);
//! assert!(cursor.get_i64(0).is_err());
//! ```

use crate::error::{StageError, StageResult};
use crate::primitive::{KeyValue, Primitive, PrimitiveKind};

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::convert::Infallible;
use std::fmt;
use uuid::Uuid;

/// Row-oriented, forward-only result set as seen by a bulk-load transport.
///
/// Every accessor takes a column ordinal or name and fails with a defined
/// [`StageError`] rather than coercing. The trait is object safe; transports
/// take `&mut dyn RowCursor`.
pub trait RowCursor {
    /// Move to the next row. Returns false once there are no more rows.
    fn advance(&mut self) -> bool;

    /// Move to the next result set. Single-result-set cursors return false.
    fn next_result(&mut self) -> bool;

    fn field_count(&self) -> usize;

    /// Nesting depth of the current row.
    fn depth(&self) -> usize;

    /// Rows changed by the statement that produced this cursor, -1 for reads.
    fn records_affected(&self) -> i64;

    fn is_closed(&self) -> bool;

    /// Release the underlying source. Idempotent; never fails.
    fn dispose(&mut self);

    /// Synonym for [`RowCursor::dispose`].
    fn close(&mut self) {
        self.dispose();
    }

    fn get_name(&self, ordinal: usize) -> StageResult<&str>;

    fn get_ordinal(&self, name: &str) -> StageResult<usize>;

    /// SQL-side type name of the column.
    fn get_data_type_name(&self, ordinal: usize) -> StageResult<&'static str>;

    fn get_field_type(&self, ordinal: usize) -> StageResult<PrimitiveKind>;

    fn get_value(&self, ordinal: usize) -> StageResult<KeyValue>;

    fn get_value_by_name(&self, name: &str) -> StageResult<KeyValue>;

    /// Copy the current row into `values`, returning how many were written.
    fn get_values(&self, values: &mut [Option<KeyValue>]) -> StageResult<usize>;

    fn get_string(&self, ordinal: usize) -> StageResult<String>;

    fn get_i32(&self, ordinal: usize) -> StageResult<i32>;

    fn get_i64(&self, ordinal: usize) -> StageResult<i64>;

    fn get_guid(&self, ordinal: usize) -> StageResult<Uuid>;

    fn is_null(&self, ordinal: usize) -> bool;

    /// Schema-table description of the columns. Key cursors carry no
    /// schema table, so this only ever fails.
    fn get_schema_table(&self) -> StageResult<Infallible>;

    fn get_bool(&self, ordinal: usize) -> StageResult<bool>;

    fn get_byte(&self, ordinal: usize) -> StageResult<u8>;

    fn get_bytes(&self, ordinal: usize, field_offset: u64, buffer: &mut [u8])
    -> StageResult<usize>;

    fn get_char(&self, ordinal: usize) -> StageResult<char>;

    fn get_chars(
        &self,
        ordinal: usize,
        field_offset: u64,
        buffer: &mut [char],
    ) -> StageResult<usize>;

    fn get_datetime(&self, ordinal: usize) -> StageResult<NaiveDateTime>;

    fn get_decimal(&self, ordinal: usize) -> StageResult<Decimal>;

    fn get_double(&self, ordinal: usize) -> StageResult<f64>;

    fn get_float(&self, ordinal: usize) -> StageResult<f32>;

    fn get_i16(&self, ordinal: usize) -> StageResult<i16>;

    /// Nested reader for the column.
    fn get_data(&self, ordinal: usize) -> StageResult<Box<dyn RowCursor>>;
}

/// Lazy single-column cursor over an iterator of `T`.
///
/// The iterator is owned and consumed exactly once. Reads return the value
/// made current by the last successful [`advance`](RowCursor::advance).
pub struct KeyCursor<T, I>
where
    T: Primitive,
    I: Iterator<Item = T>,
{
    source: Option<I>,
    column_name: String,
    current: Option<T>,
    // Past the end of data; set by exhaustion or next_result.
    eof: bool,
    closed: bool,
}

impl<T, I> KeyCursor<T, I>
where
    T: Primitive,
    I: Iterator<Item = T>,
{
    /// Wrap `keys` as a one-column cursor named `column_name`.
    pub fn new(
        keys: impl IntoIterator<Item = T, IntoIter = I>,
        column_name: impl Into<String>,
    ) -> StageResult<Self> {
        let column_name = column_name.into();
        if column_name.is_empty() {
            return Err(StageError::MissingArgument("column_name"));
        }

        Ok(Self {
            source: Some(keys.into_iter()),
            column_name,
            current: None,
            eof: false,
            closed: false,
        })
    }

    /// The type this cursor is committed to.
    pub fn kind(&self) -> PrimitiveKind {
        T::KIND
    }

    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    fn check_ordinal(&self, ordinal: usize) -> StageResult<()> {
        if ordinal != 0 {
            return Err(StageError::OrdinalOutOfRange(ordinal));
        }
        Ok(())
    }

    fn check_name(&self, name: &str) -> StageResult<()> {
        if self.column_name != name {
            return Err(StageError::UnknownColumn(name.to_string()));
        }
        Ok(())
    }

    fn check_kind(&self, requested: PrimitiveKind) -> StageResult<()> {
        if requested != T::KIND {
            return Err(StageError::type_not_supported(requested, T::KIND));
        }
        Ok(())
    }

    fn current(&self) -> StageResult<T> {
        self.current.ok_or(StageError::NoCurrentRow)
    }

    fn read_current(&self, ordinal: usize) -> StageResult<KeyValue> {
        self.check_ordinal(ordinal)?;
        Ok(self.current()?.into_value())
    }
}

impl<T, I> RowCursor for KeyCursor<T, I>
where
    T: Primitive,
    I: Iterator<Item = T>,
{
    fn advance(&mut self) -> bool {
        if self.eof {
            return false;
        }
        let Some(source) = self.source.as_mut() else {
            return false;
        };

        match source.next() {
            Some(value) => {
                self.current = Some(value);
                true
            }
            None => {
                // Stay exhausted even if the iterator is not fused.
                self.current = None;
                self.eof = true;
                false
            }
        }
    }

    fn next_result(&mut self) -> bool {
        self.eof = true;
        self.current = None;
        false
    }

    fn field_count(&self) -> usize {
        1
    }

    fn depth(&self) -> usize {
        0
    }

    fn records_affected(&self) -> i64 {
        -1
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn dispose(&mut self) {
        if !self.closed {
            self.closed = true;
            self.current = None;
            self.source = None;
        }
    }

    fn get_name(&self, ordinal: usize) -> StageResult<&str> {
        self.check_ordinal(ordinal)?;
        Ok(&self.column_name)
    }

    fn get_ordinal(&self, name: &str) -> StageResult<usize> {
        self.check_name(name)?;
        Ok(0)
    }

    fn get_data_type_name(&self, ordinal: usize) -> StageResult<&'static str> {
        self.check_ordinal(ordinal)?;
        Ok(T::KIND.sql_type_name())
    }

    fn get_field_type(&self, ordinal: usize) -> StageResult<PrimitiveKind> {
        self.check_ordinal(ordinal)?;
        Ok(T::KIND)
    }

    fn get_value(&self, ordinal: usize) -> StageResult<KeyValue> {
        self.read_current(ordinal)
    }

    fn get_value_by_name(&self, name: &str) -> StageResult<KeyValue> {
        self.check_name(name)?;
        Ok(self.current()?.into_value())
    }

    fn get_values(&self, values: &mut [Option<KeyValue>]) -> StageResult<usize> {
        let current = self.current()?;
        match values.first_mut() {
            Some(slot) => {
                *slot = Some(current.into_value());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn get_string(&self, ordinal: usize) -> StageResult<String> {
        Ok(self.read_current(ordinal)?.to_string())
    }

    fn get_i32(&self, ordinal: usize) -> StageResult<i32> {
        self.check_kind(PrimitiveKind::Int32)?;
        match self.read_current(ordinal)? {
            KeyValue::Int32(v) => Ok(v),
            other => Err(StageError::type_not_supported(
                PrimitiveKind::Int32,
                other.kind(),
            )),
        }
    }

    fn get_i64(&self, ordinal: usize) -> StageResult<i64> {
        self.check_kind(PrimitiveKind::Int64)?;
        match self.read_current(ordinal)? {
            KeyValue::Int64(v) => Ok(v),
            other => Err(StageError::type_not_supported(
                PrimitiveKind::Int64,
                other.kind(),
            )),
        }
    }

    fn get_guid(&self, ordinal: usize) -> StageResult<Uuid> {
        self.check_kind(PrimitiveKind::Guid)?;
        match self.read_current(ordinal)? {
            KeyValue::Guid(v) => Ok(v),
            other => Err(StageError::type_not_supported(
                PrimitiveKind::Guid,
                other.kind(),
            )),
        }
    }

    fn is_null(&self, _ordinal: usize) -> bool {
        false
    }

    fn get_schema_table(&self) -> StageResult<Infallible> {
        Err(StageError::NotImplemented("get_schema_table"))
    }

    fn get_bool(&self, _ordinal: usize) -> StageResult<bool> {
        Err(StageError::NotImplemented("get_bool"))
    }

    fn get_byte(&self, _ordinal: usize) -> StageResult<u8> {
        Err(StageError::NotImplemented("get_byte"))
    }

    fn get_bytes(
        &self,
        _ordinal: usize,
        _field_offset: u64,
        _buffer: &mut [u8],
    ) -> StageResult<usize> {
        Err(StageError::NotImplemented("get_bytes"))
    }

    fn get_char(&self, _ordinal: usize) -> StageResult<char> {
        Err(StageError::NotImplemented("get_char"))
    }

    fn get_chars(
        &self,
        _ordinal: usize,
        _field_offset: u64,
        _buffer: &mut [char],
    ) -> StageResult<usize> {
        Err(StageError::NotImplemented("get_chars"))
    }

    fn get_datetime(&self, _ordinal: usize) -> StageResult<NaiveDateTime> {
        Err(StageError::NotImplemented("get_datetime"))
    }

    fn get_decimal(&self, _ordinal: usize) -> StageResult<Decimal> {
        Err(StageError::NotImplemented("get_decimal"))
    }

    fn get_double(&self, _ordinal: usize) -> StageResult<f64> {
        Err(StageError::NotImplemented("get_double"))
    }

    fn get_float(&self, _ordinal: usize) -> StageResult<f32> {
        Err(StageError::NotImplemented("get_float"))
    }

    fn get_i16(&self, _ordinal: usize) -> StageResult<i16> {
        Err(StageError::NotImplemented("get_i16"))
    }

    fn get_data(&self, _ordinal: usize) -> StageResult<Box<dyn RowCursor>> {
        Err(StageError::NotImplemented("get_data"))
    }
}

impl<T, I> fmt::Debug for KeyCursor<T, I>
where
    T: Primitive,
    I: Iterator<Item = T>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCursor")
            .field("kind", &T::KIND)
            .field("column_name", &self.column_name)
            .field("current", &self.current)
            .field("eof", &self.eof)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn drain_i32<C: RowCursor>(cursor: &mut C) -> Vec<i32> {
        let mut out = Vec::new();
        while cursor.advance() {
            out.push(cursor.get_i32(0).unwrap());
        }
        out
    }

    #[test]
    fn test_advance_read_sequence() {
        let mut cursor = KeyCursor::new(vec![10, 20, 30], "id").unwrap();
        let mut steps = Vec::new();
        while cursor.advance() {
            steps.push((true, cursor.get_i32(0).unwrap()));
        }
        assert_eq!(steps, vec![(true, 10), (true, 20), (true, 30)]);
        assert!(!cursor.advance());
    }

    #[test]
    fn test_int32_enumeration() {
        let ins: Vec<i32> = (0..5000).collect();
        let mut cursor = KeyCursor::new(ins.iter().copied(), "id").unwrap();
        for idx in 0..ins.len() {
            assert!(cursor.advance());
            assert_eq!(cursor.get_i32(0).unwrap(), idx as i32);
        }
        assert!(!cursor.advance(), "When done, advance should be false");
    }

    #[test]
    fn test_int64_enumeration() {
        let mut cursor = KeyCursor::new((0..5000).map(|x| x as i64), "id").unwrap();
        for idx in 0..5000i64 {
            assert!(cursor.advance());
            assert_eq!(cursor.get_i64(0).unwrap(), idx);
        }
        assert!(!cursor.advance());
    }

    #[test]
    fn test_guid_enumeration() {
        let ins: Vec<Uuid> = (0..5000).map(|_| Uuid::new_v4()).collect();
        let mut cursor = KeyCursor::new(ins.clone(), "id").unwrap();
        for expected in &ins {
            assert!(cursor.advance());
            assert_eq!(cursor.get_guid(0).unwrap(), *expected);
        }
        assert!(!cursor.advance());
    }

    #[test]
    fn test_exhaustion_is_stable() {
        let mut cursor = KeyCursor::new([1, 2], "id").unwrap();
        assert_eq!(drain_i32(&mut cursor), vec![1, 2]);
        for _ in 0..5 {
            assert!(!cursor.advance());
        }
    }

    #[test]
    fn test_non_fused_iterator_stays_exhausted() {
        // Yields None on every other call.
        struct Flaky(u32);
        impl Iterator for Flaky {
            type Item = i32;
            fn next(&mut self) -> Option<i32> {
                self.0 += 1;
                if self.0 % 2 == 0 { None } else { Some(self.0 as i32) }
            }
        }

        let mut cursor = KeyCursor::new(Flaky(0), "id").unwrap();
        assert!(cursor.advance());
        assert!(!cursor.advance());
        assert!(!cursor.advance());
    }

    #[test]
    fn test_empty_sequence() {
        let mut cursor = KeyCursor::new(Vec::<i64>::new(), "id").unwrap();
        assert!(!cursor.is_closed());
        assert!(!cursor.advance());
        assert!(!cursor.next_result());
        cursor.dispose();
        assert!(cursor.is_closed());
    }

    #[test]
    fn test_oddballs() {
        let mut cursor = KeyCursor::new((0..5000).map(|x| x as i64), "id").unwrap();
        assert!(!cursor.next_result());
        assert!(!cursor.is_closed());
        assert_eq!(cursor.records_affected(), -1);
        assert_eq!(cursor.depth(), 0);
        assert_eq!(cursor.field_count(), 1);
        cursor.dispose();
        assert!(cursor.is_closed());
    }

    #[test]
    fn test_next_result_marks_terminal() {
        let mut cursor = KeyCursor::new([1, 2, 3], "id").unwrap();
        assert!(cursor.advance());
        assert!(!cursor.next_result());
        assert!(!cursor.advance());
        assert!(matches!(cursor.get_i32(0), Err(StageError::NoCurrentRow)));
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let mut cursor = KeyCursor::new([1], "id").unwrap();
        cursor.dispose();
        cursor.close();
        cursor.dispose();
        assert!(cursor.is_closed());
        assert!(!cursor.advance());
    }

    #[test]
    fn test_dispose_releases_source() {
        use std::cell::Cell;
        use std::rc::Rc;

        struct Tracked {
            inner: std::ops::Range<i32>,
            dropped: Rc<Cell<bool>>,
        }
        impl Iterator for Tracked {
            type Item = i32;
            fn next(&mut self) -> Option<i32> {
                self.inner.next()
            }
        }
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.dropped.set(true);
            }
        }

        let dropped = Rc::new(Cell::new(false));
        let source = Tracked {
            inner: 0..10,
            dropped: Rc::clone(&dropped),
        };
        let mut cursor = KeyCursor::new(source, "id").unwrap();
        assert!(cursor.advance());
        assert!(!dropped.get());

        cursor.dispose();
        assert!(dropped.get());
        assert!(!cursor.advance());
        assert!(matches!(cursor.get_i32(0), Err(StageError::NoCurrentRow)));
    }

    #[test]
    fn test_get_values_without_current_row() {
        let mut cursor = KeyCursor::new([1, 2], "id").unwrap();
        let mut values = [None];
        assert!(matches!(
            cursor.get_values(&mut values),
            Err(StageError::NoCurrentRow)
        ));
        assert_eq!(values, [None]);

        assert!(cursor.advance());
        assert_eq!(cursor.get_values(&mut values).unwrap(), 1);
    }

    #[test]
    fn test_read_without_current_row() {
        let mut cursor = KeyCursor::new([7], "id").unwrap();
        assert!(matches!(cursor.get_value(0), Err(StageError::NoCurrentRow)));
        assert!(cursor.advance());
        assert_eq!(cursor.get_value(0).unwrap(), KeyValue::Int32(7));
        assert!(!cursor.advance());
        assert!(matches!(cursor.get_i32(0), Err(StageError::NoCurrentRow)));
        assert!(matches!(
            cursor.get_value_by_name("id"),
            Err(StageError::NoCurrentRow)
        ));
    }

    #[test]
    fn test_wrong_type_fails_at_every_position() {
        let mut cursor = KeyCursor::new([1i64, 2], "id").unwrap();
        loop {
            for _ in 0..2 {
                match cursor.get_i32(0) {
                    Err(StageError::TypeNotSupported { requested, actual }) => {
                        assert_eq!(requested, PrimitiveKind::Int32);
                        assert_eq!(actual, PrimitiveKind::Int64);
                    }
                    other => panic!("expected TypeNotSupported, got {:?}", other),
                }
                assert!(matches!(
                    cursor.get_guid(0),
                    Err(StageError::TypeNotSupported { .. })
                ));
                // Even with a bad ordinal the type check wins.
                assert!(matches!(
                    cursor.get_guid(9),
                    Err(StageError::TypeNotSupported { .. })
                ));
            }
            if !cursor.advance() {
                break;
            }
        }
    }

    #[test]
    fn test_guid_cursor_rejects_integers() {
        let mut cursor = KeyCursor::new([Uuid::new_v4()], "id").unwrap();
        assert!(cursor.advance());
        let err = cursor.get_i64(0).unwrap_err();
        assert_eq!(err.to_string(), "Cannot read Int64 from this cursor: it only reads Guid");
        assert!(cursor.get_guid(0).is_ok());
    }

    #[test]
    fn test_ordinal_access() {
        let mut cursor = KeyCursor::new([5], "id").unwrap();
        assert!(cursor.advance());
        assert!(matches!(
            cursor.get_value(1),
            Err(StageError::OrdinalOutOfRange(1))
        ));
        assert!(matches!(cursor.get_name(2), Err(StageError::OrdinalOutOfRange(2))));
        assert!(matches!(
            cursor.get_data_type_name(1),
            Err(StageError::OrdinalOutOfRange(1))
        ));
        assert_eq!(cursor.get_name(0).unwrap(), "id");
        assert_eq!(cursor.get_field_type(0).unwrap(), PrimitiveKind::Int32);
    }

    #[test]
    fn test_name_access() {
        let mut cursor = KeyCursor::new([5i64], "key_id").unwrap();
        assert!(cursor.advance());
        assert_eq!(cursor.get_value_by_name("key_id").unwrap(), KeyValue::Int64(5));
        assert_eq!(cursor.get_ordinal("key_id").unwrap(), 0);
        assert!(matches!(
            cursor.get_value_by_name("KEY_ID"),
            Err(StageError::UnknownColumn(name)) if name == "KEY_ID"
        ));
        assert!(cursor.get_ordinal("id").is_err());
    }

    #[test]
    fn test_data_type_names() {
        let ints = KeyCursor::new(Vec::<i32>::new(), "id").unwrap();
        let longs = KeyCursor::new(Vec::<i64>::new(), "id").unwrap();
        let guids = KeyCursor::new(Vec::<Uuid>::new(), "id").unwrap();
        assert_eq!(ints.get_data_type_name(0).unwrap(), "int");
        assert_eq!(longs.get_data_type_name(0).unwrap(), "bigint");
        assert_eq!(guids.get_data_type_name(0).unwrap(), "binary(16)");
    }

    #[test]
    fn test_get_values_and_string() {
        let guid = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let mut cursor = KeyCursor::new([guid], "id").unwrap();
        assert!(cursor.advance());

        let mut values = [None, None];
        assert_eq!(cursor.get_values(&mut values).unwrap(), 1);
        assert_eq!(values, [Some(KeyValue::Guid(guid)), None]);
        assert_eq!(cursor.get_values(&mut []).unwrap(), 0);
        assert_eq!(
            cursor.get_string(0).unwrap(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
        assert!(!cursor.is_null(0));
    }

    #[test]
    fn test_unsupported_accessors() {
        let mut cursor = KeyCursor::new([1], "id").unwrap();
        assert!(cursor.advance());
        assert!(matches!(cursor.get_schema_table(), Err(StageError::NotImplemented(_))));
        assert!(matches!(cursor.get_bool(0), Err(StageError::NotImplemented("get_bool"))));
        assert!(cursor.get_byte(0).is_err());
        assert!(cursor.get_bytes(0, 0, &mut [0u8; 4]).is_err());
        assert!(cursor.get_char(0).is_err());
        assert!(cursor.get_chars(0, 0, &mut ['a'; 4]).is_err());
        assert!(cursor.get_datetime(0).is_err());
        assert!(cursor.get_decimal(0).is_err());
        assert!(cursor.get_double(0).is_err());
        assert!(cursor.get_float(0).is_err());
        assert!(cursor.get_i16(0).is_err());
        assert!(cursor.get_data(0).is_err());
    }

    #[test]
    fn test_empty_column_name_rejected() {
        let err = KeyCursor::new([1], "").unwrap_err();
        assert!(matches!(err, StageError::MissingArgument("column_name")));
    }

    #[test]
    fn test_usable_as_trait_object() {
        let mut cursor = KeyCursor::new([3, 4], "id").unwrap();
        let dyn_cursor: &mut dyn RowCursor = &mut cursor;
        assert!(dyn_cursor.advance());
        assert_eq!(dyn_cursor.get_value(0).unwrap(), KeyValue::Int32(3));
        dyn_cursor.close();
        assert!(dyn_cursor.is_closed());
    }
}
