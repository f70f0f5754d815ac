//! Primitive key types.
//!
//! A staging table holds exactly one of three primitive types. The
//! [`Primitive`] trait is sealed: `i32`, `i64` and [`Uuid`] are the only
//! implementors, so an unsupported key type is rejected at compile time.

use std::fmt;
use uuid::Uuid;

/// Tag for the primitive type a cursor or staging table is committed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Int32,
    Int64,
    Guid,
}

impl PrimitiveKind {
    /// SQL Server column type for this primitive.
    pub fn sql_type_name(self) -> &'static str {
        match self {
            PrimitiveKind::Int32 => "int",
            PrimitiveKind::Int64 => "bigint",
            PrimitiveKind::Guid => "binary(16)",
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveKind::Int32 => "Int32",
            PrimitiveKind::Int64 => "Int64",
            PrimitiveKind::Guid => "Guid",
        };
        f.write_str(name)
    }
}

/// Dynamically typed key, as returned by untyped cursor reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Int32(i32),
    Int64(i64),
    Guid(Uuid),
}

impl KeyValue {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            KeyValue::Int32(_) => PrimitiveKind::Int32,
            KeyValue::Int64(_) => PrimitiveKind::Int64,
            KeyValue::Guid(_) => PrimitiveKind::Guid,
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int32(v) => write!(f, "{}", v),
            KeyValue::Int64(v) => write!(f, "{}", v),
            KeyValue::Guid(v) => write!(f, "{}", v.hyphenated()),
        }
    }
}

mod sealed {
    pub trait Sealed {}

    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for uuid::Uuid {}
}

/// A primitive type that can be staged.
pub trait Primitive: Copy + fmt::Debug + sealed::Sealed + 'static {
    /// The tag for this type.
    const KIND: PrimitiveKind;

    /// Wrap into a [`KeyValue`].
    fn into_value(self) -> KeyValue;
}

impl Primitive for i32 {
    const KIND: PrimitiveKind = PrimitiveKind::Int32;

    fn into_value(self) -> KeyValue {
        KeyValue::Int32(self)
    }
}

impl Primitive for i64 {
    const KIND: PrimitiveKind = PrimitiveKind::Int64;

    fn into_value(self) -> KeyValue {
        KeyValue::Int64(self)
    }
}

impl Primitive for Uuid {
    const KIND: PrimitiveKind = PrimitiveKind::Guid;

    fn into_value(self) -> KeyValue {
        KeyValue::Guid(self)
    }
}

impl From<i32> for KeyValue {
    fn from(v: i32) -> Self {
        KeyValue::Int32(v)
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int64(v)
    }
}

impl From<Uuid> for KeyValue {
    fn from(v: Uuid) -> Self {
        KeyValue::Guid(v)
    }
}
