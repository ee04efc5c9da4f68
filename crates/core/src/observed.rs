//! Encoding of the observed value stored in `status.data`.

use serde_json::Value;

use crate::EchoResult;

/// Canonical JSON bytes for `value`. Object keys are emitted sorted, so equal
/// values always encode to equal bytes.
pub fn encode(value: &Value) -> EchoResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode(bytes: &[u8]) -> EchoResult<Value> {
    Ok(serde_json::from_slice(bytes)?)
}

/// True when `stored` already holds `next`, i.e. no status write is needed.
pub fn unchanged(stored: Option<&Value>, next: &Value) -> EchoResult<bool> {
    match stored {
        Some(cur) => Ok(encode(cur)? == encode(next)?),
        None => Ok(false),
    }
}
