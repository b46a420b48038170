// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Header Values
//!
//! AMQP header tables hold values of many wire types. Callers work with the
//! smaller `HeaderValue` union instead, which converts into the AMQP field
//! table when publishing and back out of it when reading a delivery.

use lapin::types::{AMQPValue, ByteArray, FieldTable, LongString, ShortString};
use std::collections::BTreeMap;

/// A header value as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    String(String),
    Int(i64),
    Bool(bool),
    Bytes(Vec<u8>),
    Table(BTreeMap<String, HeaderValue>),
}

impl HeaderValue {
    /// Reads an AMQP value into a `HeaderValue`.
    ///
    /// Integer widths collapse to `Int`. Floats, decimals, arrays, timestamps
    /// that overflow `i64` and void values have no counterpart and yield `None`.
    pub fn from_amqp(value: &AMQPValue) -> Option<HeaderValue> {
        match value {
            AMQPValue::LongString(v) => Some(HeaderValue::String(
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )),
            AMQPValue::ShortString(v) => Some(HeaderValue::String(v.as_str().to_owned())),
            AMQPValue::Boolean(v) => Some(HeaderValue::Bool(*v)),
            AMQPValue::ShortShortInt(v) => Some(HeaderValue::Int(i64::from(*v))),
            AMQPValue::ShortShortUInt(v) => Some(HeaderValue::Int(i64::from(*v))),
            AMQPValue::ShortInt(v) => Some(HeaderValue::Int(i64::from(*v))),
            AMQPValue::ShortUInt(v) => Some(HeaderValue::Int(i64::from(*v))),
            AMQPValue::LongInt(v) => Some(HeaderValue::Int(i64::from(*v))),
            AMQPValue::LongUInt(v) => Some(HeaderValue::Int(i64::from(*v))),
            AMQPValue::LongLongInt(v) => Some(HeaderValue::Int(*v)),
            AMQPValue::Timestamp(v) => i64::try_from(*v).ok().map(HeaderValue::Int),
            AMQPValue::ByteArray(v) => Some(HeaderValue::Bytes(v.as_slice().to_vec())),
            AMQPValue::FieldTable(v) => Some(HeaderValue::Table(
                v.inner()
                    .iter()
                    .filter_map(|(key, value)| {
                        HeaderValue::from_amqp(value).map(|value| (key.to_string(), value))
                    })
                    .collect(),
            )),
            _ => None,
        }
    }

    /// Returns the string content for string values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<HeaderValue> for AMQPValue {
    fn from(value: HeaderValue) -> Self {
        match value {
            HeaderValue::String(v) => AMQPValue::LongString(LongString::from(v)),
            HeaderValue::Int(v) => AMQPValue::LongLongInt(v),
            HeaderValue::Bool(v) => AMQPValue::Boolean(v),
            HeaderValue::Bytes(v) => AMQPValue::ByteArray(ByteArray::from(v)),
            HeaderValue::Table(v) => AMQPValue::FieldTable(to_field_table(v)),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::String(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::String(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

impl From<Vec<u8>> for HeaderValue {
    fn from(value: Vec<u8>) -> Self {
        HeaderValue::Bytes(value)
    }
}

/// Converts caller headers into an AMQP field table.
pub fn to_field_table(headers: BTreeMap<String, HeaderValue>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        table.insert(ShortString::from(key), value.into());
    }
    table
}

/// Reads a single header from an optional AMQP header table.
pub fn header(headers: &Option<FieldTable>, key: &str) -> Option<HeaderValue> {
    headers
        .as_ref()
        .and_then(|table| table.inner().get(key))
        .and_then(HeaderValue::from_amqp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_integer_widths_as_int() {
        assert_eq!(
            HeaderValue::from_amqp(&AMQPValue::LongInt(60000)),
            Some(HeaderValue::Int(60000))
        );
        assert_eq!(
            HeaderValue::from_amqp(&AMQPValue::ShortShortUInt(9)),
            Some(HeaderValue::Int(9))
        );
    }

    #[test]
    fn unsupported_values_are_absent() {
        assert_eq!(HeaderValue::from_amqp(&AMQPValue::Double(1.5)), None);
        assert_eq!(HeaderValue::from_amqp(&AMQPValue::Void), None);
    }

    #[test]
    fn nested_tables_keep_supported_entries() {
        let mut inner = BTreeMap::new();
        inner.insert("count".to_owned(), HeaderValue::Int(3));
        inner.insert("reason".to_owned(), HeaderValue::from("rejected"));

        let mut headers = BTreeMap::new();
        headers.insert("x-death".to_owned(), HeaderValue::Table(inner.clone()));
        headers.insert("flag".to_owned(), HeaderValue::Bool(true));

        let table = Some(to_field_table(headers));

        assert_eq!(header(&table, "x-death"), Some(HeaderValue::Table(inner)));
        assert_eq!(header(&table, "flag"), Some(HeaderValue::Bool(true)));
        assert_eq!(header(&table, "missing"), None);
        assert_eq!(header(&None, "flag"), None);
    }
}
