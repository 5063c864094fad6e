//! Conversions between model values and SQL columns.
//!
//! Rows are first read into plain column structs inside the rusqlite
//! closure, then decoded here so decoding failures surface as
//! [`StoreError::CorruptRow`] instead of panics or opaque SQL errors.

use crate::error::{StoreError, StoreResult};
use calcsync_core::{format_timestamp, parse_timestamp, ModelError, Timestamp};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

pub(crate) fn ts(value: &Timestamp) -> String {
    format_timestamp(value)
}

pub(crate) fn opt_ts(value: &Option<Timestamp>) -> Option<String> {
    value.as_ref().map(format_timestamp)
}

pub(crate) fn parse_ts(table: &'static str, text: &str) -> StoreResult<Timestamp> {
    parse_timestamp(text).map_err(|e| StoreError::corrupt_row(table, e.to_string()))
}

pub(crate) fn parse_opt_ts(
    table: &'static str,
    text: Option<String>,
) -> StoreResult<Option<Timestamp>> {
    text.map(|t| parse_ts(table, &t)).transpose()
}

pub(crate) fn parse_enum<T>(table: &'static str, text: &str) -> StoreResult<T>
where
    T: FromStr<Err = ModelError>,
{
    text.parse()
        .map_err(|e: ModelError| StoreError::corrupt_row(table, e.to_string()))
}

pub(crate) fn parse_json(table: &'static str, column: &str, text: &str) -> StoreResult<Value> {
    serde_json::from_str(text)
        .map_err(|e| StoreError::corrupt_row(table, format!("{column} is not valid JSON: {e}")))
}

pub(crate) fn parse_uuid(table: &'static str, text: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(text)
        .map_err(|_| StoreError::corrupt_row(table, format!("invalid id {text:?}")))
}

pub(crate) fn to_json(value: &Value) -> StoreResult<String> {
    Ok(serde_json::to_string(value)?)
}
