//! Wire format of the store's JSON-RPC endpoint.
//!
//! Reads go through `db_get_values` and writes through `db_paste`. Both take an ordered list of
//! paths and report a per-path status code next to the payload; anything but [`DB_SUCCESS`]
//! means the corresponding path was not read or written.

use crate::schema::VariableKey;
use crate::value::RawValue;

pub const JSONRPC_VERSION: &str = "2.0";
pub const GET_VALUES: &str = "db_get_values";
pub const PASTE: &str = "db_paste";

/// Per-path status code reported for a successful access.
pub const DB_SUCCESS: i64 = 1;

#[derive(Debug, serde::Serialize)]
pub struct Request<P> {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: P,
    pub id: u64,
}

impl<P> Request<P> {
    pub fn new(method: &'static str, params: P, id: u64) -> Self {
        Self { jsonrpc: JSONRPC_VERSION, method, params, id }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct GetValuesParams<'a> {
    pub paths: &'a [VariableKey],
    pub omit_names: bool,
    pub omit_last_written: bool,
}

impl<'a> GetValuesParams<'a> {
    pub fn new(paths: &'a [VariableKey]) -> Self {
        Self { paths, omit_names: true, omit_last_written: true }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct PasteParams<'a> {
    pub paths: &'a [VariableKey],
    pub values: &'a [RawValue],
}

#[derive(Debug, serde::Deserialize)]
pub struct Response<R> {
    pub result: Option<R>,
    pub error: Option<RpcError>,
    pub id: Option<u64>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<RawValue>,
}

#[derive(Debug, serde::Deserialize)]
pub struct GetValuesResult {
    pub data: Vec<RawValue>,
    #[serde(default)]
    pub status: Vec<i64>,
}

#[derive(Debug, serde::Deserialize)]
pub struct PasteResult {
    #[serde(default)]
    pub status: Vec<i64>,
}

/// Find the first path whose status isn't [`DB_SUCCESS`].
///
/// Servers that omit the status list entirely are taken to have succeeded.
pub fn first_failure<'k>(
    keys: &'k [VariableKey],
    status: &[i64],
) -> Option<(&'k VariableKey, i64)> {
    keys.iter().zip(status).find(|(_, s)| **s != DB_SUCCESS).map(|(k, s)| (k, *s))
}
