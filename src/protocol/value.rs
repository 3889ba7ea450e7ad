//! The tagged-union `Value` type, the `ColumnType` enum that drives textual
//! decoding, and the `ParamType` enum that drives parameter-literal encoding.
//!
//! Open Question 1 from the design notes (a synthetic `Etc/UTC±HH:MM` zone
//! name does not round-trip through an IANA zone lookup) is resolved here by
//! never constructing a zone name at all: `Value::TimestampTz` stores a
//! `chrono::DateTime<FixedOffset>`, which is already the canonical
//! `(utc_instant, offset_seconds)` pair the design notes recommend.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

/// The SQL column types the server can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int,
    TinyInt,
    SmallInt,
    BigInt,
    HugeInt,
    Oid,
    Serial,
    Double,
    Float,
    Real,
    Decimal,
    Boolean,
    Char,
    Varchar,
    Clob,
    Text,
    Json,
    Uuid,
    Blob,
    Time,
    Date,
    Timestamp,
    TimestampTz,
}

impl ColumnType {
    /// Parses the lowercase type names the server sends in the `%` type
    /// line of `&1`/`&5` responses.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "int" => ColumnType::Int,
            "tinyint" => ColumnType::TinyInt,
            "smallint" => ColumnType::SmallInt,
            "bigint" => ColumnType::BigInt,
            "hugeint" => ColumnType::HugeInt,
            "oid" => ColumnType::Oid,
            "serial" => ColumnType::Serial,
            "double" => ColumnType::Double,
            "float" => ColumnType::Float,
            "real" => ColumnType::Real,
            "decimal" => ColumnType::Decimal,
            "boolean" => ColumnType::Boolean,
            "char" => ColumnType::Char,
            "varchar" => ColumnType::Varchar,
            "clob" => ColumnType::Clob,
            "text" => ColumnType::Text,
            "json" => ColumnType::Json,
            "uuid" => ColumnType::Uuid,
            "blob" => ColumnType::Blob,
            "time" => ColumnType::Time,
            "date" => ColumnType::Date,
            "timestamp" => ColumnType::Timestamp,
            "timestamptz" => ColumnType::TimestampTz,
            _ => return None,
        })
    }

    /// `true` for the temporal types that also carry a sub-second precision
    /// in the `&5` parameter descriptor.
    pub fn is_temporal(self) -> bool {
        matches!(self, ColumnType::Time | ColumnType::Timestamp | ColumnType::TimestampTz)
    }
}

/// A temporal column type, stripped of its non-temporal siblings, used by
/// [`ParamType::Temporal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemporalKind {
    Time,
    Timestamp,
    TimestampTz,
}

impl TemporalKind {
    pub fn from_column_type(ty: ColumnType) -> Option<Self> {
        Some(match ty {
            ColumnType::Time => TemporalKind::Time,
            ColumnType::Timestamp => TemporalKind::Timestamp,
            ColumnType::TimestampTz => TemporalKind::TimestampTz,
            _ => return None,
        })
    }

    pub fn literal_keyword(self) -> &'static str {
        match self {
            TemporalKind::Time => "time",
            TemporalKind::Timestamp => "timestamp",
            TemporalKind::TimestampTz => "timestamptz",
        }
    }
}

/// A prepared-statement placeholder type. Plain types are encoded with a
/// bare literal; the three kinds here that require a literal prefix
/// (`blob`/`json`/`uuid`) and the temporal kinds (which additionally carry a
/// precision) get their own variants so the encoder never has to re-derive
/// "does this type need a prefix" from a `ColumnType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Plain(ColumnType),
    /// `precision` is one of 0, 3, 6 (seconds / milliseconds / microseconds).
    Temporal(TemporalKind, u8),
    Blob,
    Json,
    Uuid,
}

impl ParamType {
    /// Builds a `ParamType` from a decoded `ColumnType` and the raw
    /// precision value read from a `&5` descriptor (already adjusted for
    /// the server's off-by-one, see [`crate::protocol::result`]).
    pub fn from_column_type(ty: ColumnType, precision: Option<u8>) -> Self {
        match ty {
            ColumnType::Blob => ParamType::Blob,
            ColumnType::Json => ParamType::Json,
            ColumnType::Uuid => ParamType::Uuid,
            _ => {
                if let (Some(kind), Some(p)) = (TemporalKind::from_column_type(ty), precision) {
                    ParamType::Temporal(kind, p)
                } else {
                    ParamType::Plain(ty)
                }
            }
        }
    }
}

/// A single decoded (or to-be-encoded) SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    /// Covers tinyint through hugeint; hugeint needs the full 128 bits.
    Int(i128),
    Float(f64),
    Decimal(Decimal),
    Boolean(bool),
    Str(String),
    Blob(Vec<u8>),
    Date(NaiveDate),
    /// `precision` records whether the textual form should keep 0, 3 or 6
    /// sub-second digits when re-encoded as a literal.
    Time { value: NaiveTime, precision: u8 },
    Timestamp(NaiveDateTime),
    /// Carries its own offset; never round-tripped through an IANA zone.
    TimestampTz(DateTime<FixedOffset>),
    Uuid(Uuid),
    /// The string body is asserted to be valid JSON syntax by the server;
    /// the driver never builds a JSON DOM (that is a result-reshaping
    /// concern, out of scope for the core).
    Json(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}
