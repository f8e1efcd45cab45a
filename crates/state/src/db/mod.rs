//! Runtime SQL queries, one module per table
//!
//! Every function runs inside a caller-owned transaction so the stores
//! decide the atomicity boundary.

pub mod downloads;
pub mod updates;

use chrono::{DateTime, Utc};
use orchard_errors::{Error, StateError};
use serde::{de::DeserializeOwned, Serialize};

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn encode_json<T: Serialize>(value: &T) -> Result<String, Error> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn decode_json<T: DeserializeOwned>(package: &str, raw: &str) -> Result<T, Error> {
    serde_json::from_str(raw).map_err(|e| {
        StateError::CorruptedRecord {
            package: package.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}
