//! Server-side prepared statements: creation, parameter encoding, execution
//! and cleanup.

use crate::error::{Error, Result};
use crate::protocol::frame::Framer;
use crate::protocol::result::{self, QueryResult};
use crate::protocol::value::{ParamType, TemporalKind, Value};

/// A compiled statement on the server, identified by `id`. The id is only
/// meaningful against the [`crate::Connection`] that produced it.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    id: String,
    parameter_types: Vec<ParamType>,
}

impl PreparedStatement {
    /// Sends `prepare <sql>` and parses the resulting `&5` descriptor.
    pub fn new(framer: &mut Framer, sql: &str) -> Result<Self> {
        framer.send_text(&format!("prepare {sql}"))?;
        let payload = framer.receive()?;
        let parsed = result::parse_prepare(&payload)?;
        Ok(Self {
            id: parsed.id,
            parameter_types: parsed.parameter_types,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parameter_types(&self) -> &[ParamType] {
        &self.parameter_types
    }

    /// Encodes `values` against this statement's parameter descriptors. If
    /// fewer values than parameters are given, only the encodable prefix is
    /// emitted and the server is left to report the arity mismatch.
    pub fn encode_args(&self, values: &[Value]) -> Result<String> {
        let encoded: Vec<String> = values
            .iter()
            .zip(self.parameter_types.iter())
            .map(|(value, ty)| encode_value(value, *ty))
            .collect::<Result<_>>()?;
        Ok(encoded.join(","))
    }

    pub fn exec(&self, framer: &mut Framer, args: &[Value]) -> Result<QueryResult> {
        let encoded = self.encode_args(args)?;
        framer.send_text(&format!("exec {}({encoded})", self.id))?;
        let payload = framer.receive()?;
        result::parse(&payload)
    }

    /// Deallocates the statement. Server code 7003 (already dropped after a
    /// failed exec) is swallowed, matching [`Error::is_benign_deallocate_failure`].
    pub fn close(&self, framer: &mut Framer) -> Result<()> {
        framer.send_text(&format!("deallocate {}", self.id))?;
        match framer.receive() {
            Ok(_) => Ok(()),
            Err(err) if err.is_benign_deallocate_failure() => Ok(()),
            Err(err) => Err(err),
        }
    }
}

fn encode_value(value: &Value, ty: ParamType) -> Result<String> {
    if value.is_null() {
        return Ok("NULL".to_string());
    }

    match (value, ty) {
        (Value::Int(i), _) => Ok(i.to_string()),
        (Value::Float(f), _) => Ok(f.to_string()),
        (Value::Decimal(d), _) => Ok(d.to_string()),
        (Value::Boolean(b), _) => Ok(b.to_string()),
        (Value::Str(s), _) => Ok(format!("'{}'", escape_literal(s))),
        (Value::Blob(bytes), _) => Ok(format!("blob '{}'", hex::encode(bytes))),
        (Value::Json(s), _) => Ok(format!("json '{}'", escape_literal(s))),
        (Value::Uuid(u), _) => Ok(format!("uuid '{u}'")),
        (Value::Date(d), _) => Ok(format!("date '{}'", d.format("%Y-%m-%d"))),
        (Value::Time { value, .. }, ParamType::Temporal(TemporalKind::Time, precision)) => {
            Ok(format!("{} '{}'", time_keyword(precision), format_time(*value, precision)))
        }
        (Value::Timestamp(dt), ParamType::Temporal(TemporalKind::Timestamp, precision)) => Ok(format!(
            "{} '{}'",
            timestamp_keyword(precision),
            format_timestamp(*dt, precision)
        )),
        (Value::TimestampTz(dt), ParamType::Temporal(TemporalKind::TimestampTz, precision)) => Ok(format!(
            "{} '{}'",
            timestamptz_keyword(precision),
            format_timestamptz(*dt, precision)
        )),
        (value, ty) => Err(Error::Client(format!(
            "value {value:?} does not match parameter type {ty:?}"
        ))),
    }
}

fn escape_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || c == '\'' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn time_keyword(precision: u8) -> &'static str {
    match precision {
        3 => "time(3)",
        6 => "time(6)",
        _ => "time",
    }
}

fn timestamp_keyword(precision: u8) -> &'static str {
    match precision {
        3 => "timestamp(3)",
        6 => "timestamp(6)",
        _ => "timestamp",
    }
}

fn timestamptz_keyword(precision: u8) -> &'static str {
    match precision {
        3 => "timestamptz(3)",
        6 => "timestamptz(6)",
        _ => "timestamptz",
    }
}

fn format_time(value: chrono::NaiveTime, precision: u8) -> String {
    match precision {
        3 => value.format("%H:%M:%S%.3f").to_string(),
        6 => value.format("%H:%M:%S%.6f").to_string(),
        _ => value.format("%H:%M:%S").to_string(),
    }
}

fn format_timestamp(dt: chrono::NaiveDateTime, precision: u8) -> String {
    match precision {
        3 => dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        6 => dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        _ => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

fn format_timestamptz(dt: chrono::DateTime<chrono::FixedOffset>, precision: u8) -> String {
    let body = format_timestamp(dt.naive_local(), precision);
    let total_minutes = dt.offset().local_minus_utc() / 60;
    let sign = if total_minutes < 0 { '-' } else { '+' };
    let abs_minutes = total_minutes.abs();
    format!("{body}{sign}{:02}:{:02}", abs_minutes / 60, abs_minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::value::ColumnType;
    use chrono::{NaiveDate, NaiveTime};
    use uuid::Uuid;

    #[test]
    fn encodes_null_regardless_of_type() {
        assert_eq!(encode_value(&Value::Null, ParamType::Plain(ColumnType::Int)).unwrap(), "NULL");
    }

    #[test]
    fn encodes_plain_scalars() {
        assert_eq!(encode_value(&Value::Int(-7), ParamType::Plain(ColumnType::BigInt)).unwrap(), "-7");
        assert_eq!(encode_value(&Value::Boolean(true), ParamType::Plain(ColumnType::Boolean)).unwrap(), "true");
    }

    #[test]
    fn escapes_string_literal() {
        let encoded = encode_value(&Value::Str("it's \\".to_string()), ParamType::Plain(ColumnType::Varchar)).unwrap();
        assert_eq!(encoded, "'it\\'s \\\\'");
    }

    #[test]
    fn encodes_prefixed_literals() {
        assert_eq!(encode_value(&Value::Blob(vec![0xAB, 0xCD]), ParamType::Blob).unwrap(), "blob 'abcd'");
        assert_eq!(
            encode_value(&Value::Uuid(Uuid::nil()), ParamType::Uuid).unwrap(),
            "uuid '00000000-0000-0000-0000-000000000000'"
        );
        assert_eq!(encode_value(&Value::Json("{}".to_string()), ParamType::Json).unwrap(), "json '{}'");
    }

    #[test]
    fn encodes_date_literal() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(
            encode_value(&Value::Date(date), ParamType::Plain(ColumnType::Date)).unwrap(),
            "date '2024-01-02'"
        );
    }

    #[test]
    fn encodes_time_with_declared_precision() {
        let value = NaiveTime::from_hms_milli_opt(10, 11, 12, 500).unwrap();
        let encoded = encode_value(
            &Value::Time { value, precision: 3 },
            ParamType::Temporal(TemporalKind::Time, 3),
        )
        .unwrap();
        assert_eq!(encoded, "time(3) '10:11:12.500'");
    }

    #[test]
    fn encode_args_stops_at_shorter_value_list() {
        let stmt = PreparedStatement {
            id: "1".to_string(),
            parameter_types: vec![ParamType::Plain(ColumnType::Int), ParamType::Plain(ColumnType::Int)],
        };
        let encoded = stmt.encode_args(&[Value::Int(1)]).unwrap();
        assert_eq!(encoded, "1");
    }
}
