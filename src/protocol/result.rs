//! Parses server response payloads (dispatched by their `&1`..`&6` prefix)
//! into typed [`QueryResult`] / [`PrepareResult`] values.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::value::{ColumnType, ParamType, Value};

/// A decoded server response, excluding prepare results (see [`PrepareResult`]).
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Rows {
        meta: Vec<u8>,
        columns: Vec<String>,
        types: Vec<ColumnType>,
        rows: Vec<Vec<Value>>,
        row_count: u64,
    },
    Upsert {
        meta: Vec<u8>,
        row_count: u64,
        last_id: Option<i64>,
    },
    Meta {
        meta: Vec<u8>,
    },
    TxState {
        autocommit: bool,
    },
}

/// The outcome of `prepare <sql>`: the server-assigned statement id plus the
/// placeholder descriptors, already filtered down from the full set of
/// result-column descriptors the server echoes back.
#[derive(Debug, Clone, PartialEq)]
pub struct PrepareResult {
    pub id: String,
    pub parameter_types: Vec<ParamType>,
}

fn as_text(payload: &[u8]) -> Result<&str> {
    std::str::from_utf8(payload)
        .map_err(|_| Error::driver_with_details("response payload is not valid utf-8", payload.to_vec()))
}

fn malformed(context: impl Into<String>) -> Error {
    Error::driver(format!("malformed result payload: {}", context.into()))
}

fn malformed_value(raw: &str, ty: ColumnType) -> Error {
    Error::driver_with_details(format!("malformed {ty:?} value: {raw}"), raw.as_bytes().to_vec())
}

/// Dispatches on the 3-byte response prefix. `&5` is handled separately by
/// [`parse_prepare`] since `Prepared::new` is the only caller that expects it.
pub fn parse(payload: &[u8]) -> Result<QueryResult> {
    let text = as_text(payload)?;
    match text.get(0..2) {
        Some("&1") => parse_rows(payload, text),
        Some("&2") => parse_upsert(text),
        Some("&3") => parse_meta(text),
        Some("&4") => parse_tx_state(text),
        Some("&5") => Err(Error::driver("unexpected prepare result outside Prepared::new")),
        Some("&6") => Err(Error::driver("QBLOCK results are not supported")),
        _ => Err(Error::driver_with_details("unrecognised result prefix", payload.to_vec())),
    }
}

fn parse_percent_line(line: &str) -> Result<Vec<String>> {
    let body = line
        .strip_prefix("% ")
        .ok_or_else(|| malformed(format!("expected '%' section, got: {line}")))?;
    let (items, _label) = body
        .rsplit_once(" # ")
        .ok_or_else(|| malformed(format!("malformed '%' section: {line}")))?;
    Ok(items.split(",\t").map(str::to_string).collect())
}

fn parse_rows(raw_payload: &[u8], text: &str) -> Result<QueryResult> {
    let mut lines = text.lines();

    let header = lines.next().ok_or_else(|| malformed("missing &1 header"))?;
    let row_count = header
        .strip_prefix("&1 ")
        .and_then(|rest| rest.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| Error::driver_with_details(format!("malformed &1 header: {header}"), raw_payload.to_vec()))?;

    let _tables = lines.next();
    let columns_line = lines.next().ok_or_else(|| malformed("missing columns section"))?;
    let types_line = lines.next().ok_or_else(|| malformed("missing types section"))?;
    let _lengths = lines.next();

    let columns = parse_percent_line(columns_line)?;
    let type_names = parse_percent_line(types_line)?;
    let types = type_names
        .iter()
        .map(|name| {
            ColumnType::parse(name)
                .ok_or_else(|| Error::driver_with_details(format!("unknown column type: {name}"), raw_payload.to_vec()))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut rows = Vec::with_capacity(row_count as usize);
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        rows.push(parse_row(line, &types)?);
    }

    Ok(QueryResult::Rows {
        meta: raw_payload.to_vec(),
        columns,
        types,
        rows,
        row_count,
    })
}

fn parse_row(line: &str, types: &[ColumnType]) -> Result<Vec<Value>> {
    let line = line.trim_end_matches(['\n', '\r']);
    let body = line
        .strip_prefix("[ ")
        .and_then(|s| s.strip_suffix("\t]"))
        .ok_or_else(|| malformed(format!("malformed row: {line}")))?;

    let mut rest = body;
    let mut values = Vec::with_capacity(types.len());
    for ty in types {
        let (raw_value, remainder) = consume_column(rest, *ty)?;
        values.push(decode_value(raw_value, *ty)?);
        rest = remainder;
    }
    Ok(values)
}

/// Splits one column's textual value off the front of `rest`, returning the
/// value's raw text and whatever follows the column separator. String/blob/
/// uuid values are scanned with type-aware rules since they may contain the
/// literal bytes `,\t` inside their own body.
fn consume_column(rest: &str, ty: ColumnType) -> Result<(&str, &str)> {
    if let Some(after_null) = rest.strip_prefix("NULL") {
        if after_null.is_empty() || after_null.starts_with(",\t") {
            let remainder = after_null.strip_prefix(",\t").unwrap_or(after_null);
            return Ok(("NULL", remainder));
        }
    }

    match ty {
        ColumnType::Char | ColumnType::Varchar | ColumnType::Clob | ColumnType::Text | ColumnType::Json => {
            consume_quoted(rest)
        }
        ColumnType::Uuid => {
            if rest.len() < 36 {
                return Err(malformed(format!("truncated uuid column: {rest}")));
            }
            let (value, after) = rest.split_at(36);
            Ok((value, after.strip_prefix(",\t").unwrap_or(after)))
        }
        ColumnType::Blob => {
            let end = rest.find([',', '\t']).unwrap_or(rest.len());
            let (value, after) = rest.split_at(end);
            Ok((value, after.strip_prefix(",\t").unwrap_or(after)))
        }
        _ => {
            let end = rest.find(",\t").unwrap_or(rest.len());
            let (value, after) = rest.split_at(end);
            Ok((value, after.strip_prefix(",\t").unwrap_or(after)))
        }
    }
}

fn consume_quoted(rest: &str) -> Result<(&str, &str)> {
    let bytes = rest.as_bytes();
    if bytes.first() != Some(&b'"') {
        return Err(malformed(format!("expected quoted string: {rest}")));
    }

    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => {
                let value = &rest[..=i];
                let after = &rest[i + 1..];
                return Ok((value, after.strip_prefix(",\t").unwrap_or(after)));
            }
            _ => i += 1,
        }
    }
    Err(malformed(format!("unterminated string: {rest}")))
}

fn strip_quotes(raw: &str) -> Result<&str> {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        Ok(&raw[1..raw.len() - 1])
    } else {
        Err(malformed(format!("expected quoted string: {raw}")))
    }
}

/// Un-escapes `\e \f \n \r \t \v \\ \' \"` in a string body already stripped
/// of its surrounding quotes.
fn unescape_string(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('e') => out.push('\u{1B}'),
            Some('f') => out.push('\u{0C}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\u{0B}'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn decode_value(raw: &str, ty: ColumnType) -> Result<Value> {
    if raw == "NULL" {
        return Ok(Value::Null);
    }

    match ty {
        ColumnType::Int
        | ColumnType::TinyInt
        | ColumnType::SmallInt
        | ColumnType::BigInt
        | ColumnType::HugeInt
        | ColumnType::Oid
        | ColumnType::Serial => raw.parse::<i128>().map(Value::Int).map_err(|_| malformed_value(raw, ty)),

        ColumnType::Double | ColumnType::Float | ColumnType::Real => {
            raw.parse::<f64>().map(Value::Float).map_err(|_| malformed_value(raw, ty))
        }

        ColumnType::Decimal => raw.parse::<Decimal>().map(Value::Decimal).map_err(|_| malformed_value(raw, ty)),

        ColumnType::Boolean => match raw {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Err(malformed_value(raw, ty)),
        },

        ColumnType::Char | ColumnType::Varchar | ColumnType::Clob | ColumnType::Text => {
            Ok(Value::Str(unescape_string(strip_quotes(raw)?)))
        }

        ColumnType::Json => Ok(Value::Json(unescape_string(strip_quotes(raw)?))),

        ColumnType::Uuid => Uuid::parse_str(raw).map(Value::Uuid).map_err(|_| malformed_value(raw, ty)),

        ColumnType::Blob => hex::decode(raw).map(Value::Blob).map_err(|_| malformed_value(raw, ty)),

        ColumnType::Date => parse_date(raw).map(Value::Date),

        ColumnType::Time => parse_time(raw).map(|(value, precision)| Value::Time { value, precision }),

        ColumnType::Timestamp => parse_timestamp(raw).map(Value::Timestamp),

        ColumnType::TimestampTz => parse_timestamptz(raw).map(Value::TimestampTz),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    let mut parts = raw.splitn(3, '-');
    let year = parts.next().and_then(|s| s.parse::<i32>().ok());
    let month = parts.next().and_then(|s| s.parse::<u32>().ok());
    let day = parts.next().and_then(|s| s.parse::<u32>().ok());

    match (year, month, day) {
        (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d).ok_or_else(|| malformed_value(raw, ColumnType::Date)),
        _ => Err(malformed_value(raw, ColumnType::Date)),
    }
}

/// Returns the decoded time plus the sub-second precision implied by the
/// number of fractional digits present (0, 3 or 6).
fn parse_time(raw: &str) -> Result<(NaiveTime, u8)> {
    let (main, frac) = match raw.split_once('.') {
        Some((m, f)) => (m, Some(f)),
        None => (raw, None),
    };

    let mut parts = main.splitn(3, ':');
    let (h, m, s) = (
        parts.next().and_then(|x| x.parse::<u32>().ok()),
        parts.next().and_then(|x| x.parse::<u32>().ok()),
        parts.next().and_then(|x| x.parse::<u32>().ok()),
    );
    let (h, m, s) = match (h, m, s) {
        (Some(h), Some(m), Some(s)) => (h, m, s),
        _ => return Err(malformed_value(raw, ColumnType::Time)),
    };

    let (nanos, precision) = match frac {
        None => (0u32, 0u8),
        Some(f) if f.len() == 3 => (f.parse::<u32>().unwrap_or(0) * 1_000_000, 3u8),
        Some(f) if f.len() == 6 => (f.parse::<u32>().unwrap_or(0) * 1_000, 6u8),
        Some(f) => {
            let padded = format!("{f:0<9}");
            let nanos = padded.get(..9).and_then(|p| p.parse::<u32>().ok()).unwrap_or(0);
            (nanos, if f.len() > 3 { 6 } else { 3 })
        }
    };

    let value = NaiveTime::from_hms_nano_opt(h, m, s, nanos).ok_or_else(|| malformed_value(raw, ColumnType::Time))?;
    Ok((value, precision))
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let (date_part, time_part) = raw.split_once(' ').ok_or_else(|| malformed_value(raw, ColumnType::Timestamp))?;
    let date = parse_date(date_part)?;
    let (time, _precision) = parse_time(time_part)?;
    Ok(NaiveDateTime::new(date, time))
}

fn parse_timestamptz(raw: &str) -> Result<DateTime<FixedOffset>> {
    let (naive_part, offset_seconds) = if let Some(stripped) = raw.strip_suffix(['z', 'Z']) {
        (stripped, 0)
    } else {
        let sign_pos = raw
            .rfind(['+', '-'])
            .ok_or_else(|| malformed_value(raw, ColumnType::TimestampTz))?;
        let (naive_part, offset_str) = raw.split_at(sign_pos);
        let sign: i32 = if offset_str.starts_with('-') { -1 } else { 1 };
        let (hh, mm) = offset_str[1..]
            .split_once(':')
            .ok_or_else(|| malformed_value(raw, ColumnType::TimestampTz))?;
        let hh: i32 = hh.parse().map_err(|_| malformed_value(raw, ColumnType::TimestampTz))?;
        let mm: i32 = mm.parse().map_err(|_| malformed_value(raw, ColumnType::TimestampTz))?;
        (naive_part, sign * (hh * 3600 + mm * 60))
    };

    let naive = parse_timestamp(naive_part)?;
    let offset = FixedOffset::east_opt(offset_seconds).ok_or_else(|| malformed_value(raw, ColumnType::TimestampTz))?;
    offset
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| malformed_value(raw, ColumnType::TimestampTz))
}

fn parse_upsert(text: &str) -> Result<QueryResult> {
    let header = text.lines().next().unwrap_or(text);
    let rest = header.strip_prefix("&2 ").ok_or_else(|| malformed(format!("malformed &2 header: {header}")))?;
    let mut fields = rest.split_whitespace();
    let row_count = fields
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| malformed(format!("malformed &2 header: {header}")))?;
    let last_id = fields.next().and_then(|s| s.parse::<i64>().ok());

    Ok(QueryResult::Upsert {
        meta: text.as_bytes().to_vec(),
        row_count,
        last_id,
    })
}

fn parse_meta(text: &str) -> Result<QueryResult> {
    let mut lines = text.lines();
    let _header = lines.next();

    if let Some(second) = lines.next() {
        if let Some(stripped) = second.strip_prefix('!') {
            if let Some((code_str, message)) = stripped.split_once('!') {
                if let Ok(code) = code_str.parse::<i32>() {
                    return Err(Error::server(Some(code), message.to_string()));
                }
            }
            return Err(Error::server(None, stripped.to_string()));
        }
    }

    Ok(QueryResult::Meta {
        meta: text.trim().as_bytes().to_vec(),
    })
}

fn parse_tx_state(text: &str) -> Result<QueryResult> {
    let header = text.lines().next().unwrap_or(text);
    let rest = header
        .strip_prefix("&4 ")
        .ok_or_else(|| malformed(format!("malformed &4 header: {header}")))?
        .trim();
    let autocommit = match rest {
        "t" => true,
        "f" => false,
        _ => return Err(malformed(format!("malformed &4 header: {header}"))),
    };
    Ok(QueryResult::TxState { autocommit })
}

/// Parses a `&5` prepare response. Only the statement id and the placeholder
/// descriptors are kept; descriptors that describe a result column of the
/// prepared SELECT (not a parameter) are recognised by *not* ending in
/// `NULL,\tNULL,\tNULL` and are skipped.
pub fn parse_prepare(payload: &[u8]) -> Result<PrepareResult> {
    let text = as_text(payload)?;
    let mut lines = text.lines();

    let header = lines.next().ok_or_else(|| malformed("missing &5 header"))?;
    if !header.starts_with("&5") {
        return Err(Error::driver_with_details("expected &5 prepare result", payload.to_vec()));
    }
    let id = header
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| Error::driver_with_details(format!("malformed &5 header: {header}"), payload.to_vec()))?
        .to_string();

    let _tables = lines.next();
    let _columns = lines.next();
    let _types = lines.next();
    let _lengths = lines.next();

    let mut parameter_types = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let line = line.trim_end_matches(['\n', '\r']);
        let body = line
            .strip_prefix("[ ")
            .and_then(|s| s.strip_suffix("\t]"))
            .ok_or_else(|| malformed(format!("malformed &5 row: {line}")))?;

        if !body.ends_with("NULL,\tNULL,\tNULL") {
            continue;
        }

        let fields: Vec<&str> = body.split(",\t").collect();
        let type_name = fields.first().copied().ok_or_else(|| malformed(format!("empty &5 row: {line}")))?;
        let ty = ColumnType::parse(type_name)
            .ok_or_else(|| Error::driver_with_details(format!("unknown parameter type: {type_name}"), payload.to_vec()))?;

        let precision = if ty.is_temporal() {
            let raw_precision = fields
                .get(1)
                .and_then(|s| s.parse::<u8>().ok())
                .ok_or_else(|| malformed(format!("missing precision in &5 row: {line}")))?;
            Some(raw_precision.saturating_sub(1))
        } else {
            None
        };

        parameter_types.push(ParamType::from_column_type(ty, precision));
    }

    Ok(PrepareResult { id, parameter_types })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_select_result_matches_scenario_one() {
        let payload = b"&1 1 0 1 1\n% sys.L0 # table\n% L0 # name\n% int # type\n% 1 # length\n";
        let result = parse(payload).expect("parse");
        match result {
            QueryResult::Rows { columns, types, rows, row_count, .. } => {
                assert_eq!(row_count, 0);
                assert_eq!(columns, vec!["L0"]);
                assert_eq!(types, vec![ColumnType::Int]);
                assert!(rows.is_empty());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn two_column_rows_decode() {
        let payload = b"&1 1 2 2 10\n% sys.t,\tsys.t # table\n% id,\tname # name\n% int,\tvarchar # type\n% 1,\t10 # length\n[ 1,\t\"Leto\"\t]\n[ 2,\t\"Jessica\"\t]\n";
        let result = parse(payload).expect("parse");
        match result {
            QueryResult::Rows { rows, row_count, .. } => {
                assert_eq!(row_count, 2);
                assert_eq!(
                    rows,
                    vec![
                        vec![Value::Int(1), Value::Str("Leto".to_string())],
                        vec![Value::Int(2), Value::Str("Jessica".to_string())],
                    ]
                );
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn embedded_ddl_error_matches_scenario_six() {
        let err = parse(b"&3 72\n!201!er1").unwrap_err();
        match err {
            Error::Server { code, message } => {
                assert_eq!(code, Some(201));
                assert_eq!(message, "er1");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn upsert_parses_row_count_and_last_id() {
        let result = parse(b"&2 1 42\n").expect("parse");
        assert_eq!(
            result,
            QueryResult::Upsert {
                meta: b"&2 1 42\n".to_vec(),
                row_count: 1,
                last_id: Some(42),
            }
        );
    }

    #[test]
    fn tx_state_parses_autocommit_flag() {
        assert_eq!(parse(b"&4 t\n").unwrap(), QueryResult::TxState { autocommit: true });
        assert_eq!(parse(b"&4 f\n").unwrap(), QueryResult::TxState { autocommit: false });
    }

    #[test]
    fn qblock_is_a_driver_error() {
        let err = parse(b"&6 unsupported\n").unwrap_err();
        assert!(matches!(err, Error::Driver { .. }));
    }

    #[test]
    fn time_precision_is_derived_from_fraction_digits() {
        assert_eq!(decode_value("10:11:12", ColumnType::Time).unwrap(), Value::Time {
            value: NaiveTime::from_hms_opt(10, 11, 12).unwrap(),
            precision: 0,
        });
        assert_eq!(decode_value("10:11:12.500", ColumnType::Time).unwrap(), Value::Time {
            value: NaiveTime::from_hms_milli_opt(10, 11, 12, 500).unwrap(),
            precision: 3,
        });
        assert_eq!(decode_value("10:11:12.500000", ColumnType::Time).unwrap(), Value::Time {
            value: NaiveTime::from_hms_micro_opt(10, 11, 12, 500_000).unwrap(),
            precision: 6,
        });
    }

    #[test]
    fn timestamptz_preserves_explicit_offset() {
        let value = decode_value("2024-01-02 10:00:00+02:00", ColumnType::TimestampTz).unwrap();
        match value {
            Value::TimestampTz(dt) => assert_eq!(dt.offset().local_minus_utc(), 2 * 3600),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn blob_decodes_hex() {
        assert_eq!(decode_value("deadbeef", ColumnType::Blob).unwrap(), Value::Blob(vec![0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn null_decodes_regardless_of_type() {
        assert_eq!(decode_value("NULL", ColumnType::Int).unwrap(), Value::Null);
        assert_eq!(decode_value("NULL", ColumnType::Json).unwrap(), Value::Null);
    }

    #[test]
    fn prepare_result_filters_placeholders_and_adjusts_precision() {
        let payload = b"&5 7 1 1 1\n% sys. # table\n% arg # name\n% type # type\n% 0 # length\n[ timestamp,\t4,\tNULL,\tNULL,\tNULL\t]\n[ int,\tNULL,\tNULL,\tNULL,\tNULL\t]\n[ int,\t1,\t1,\tsys,\tt,\tc\t]\n";
        let result = parse_prepare(payload).expect("parse");
        assert_eq!(result.id, "7");
        assert_eq!(
            result.parameter_types,
            vec![
                ParamType::Temporal(crate::protocol::value::TemporalKind::Timestamp, 3),
                ParamType::Plain(ColumnType::Int),
            ]
        );
    }
}
