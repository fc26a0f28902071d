// SPDX-License-Identifier: MIT
//! Stop-payload normalization for the proprietary backend.
//!
//! Hosted providers do not agree on the shape of the stop-record reply: some
//! return base64 text, some a raw byte array, some a length-prefixed buffer.
//! No single shape is authoritative, so the decode order is configurable per
//! deployment (`[recording] payload_decode_order`) and attempted in fixed
//! priority; the first decoder that accepts the payload wins.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RecordError;

/// One recognised payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadShape {
    /// Base64 text, either the value itself or under a `data` field.
    Base64,
    /// A JSON array of byte values (0..=255).
    ByteArray,
    /// Raw bytes (carried as base64 or a byte array) where the first four
    /// bytes are a big-endian length of the remainder.
    LengthPrefixed,
}

/// Default decode priority.
pub const DEFAULT_DECODE_ORDER: [PayloadShape; 3] = [
    PayloadShape::Base64,
    PayloadShape::ByteArray,
    PayloadShape::LengthPrefixed,
];

/// Normalize a stop-record reply to raw bytes.
///
/// Attempts each shape in `order`; returns `UnsupportedPayload` when none
/// accepts. Zero-length output is legal here — the caller decides whether an
/// empty artifact is an error.
pub fn decode(value: &Value, order: &[PayloadShape]) -> Result<Vec<u8>, RecordError> {
    for shape in order {
        let decoded = match shape {
            PayloadShape::Base64 => try_base64(value),
            PayloadShape::ByteArray => try_byte_array(value),
            PayloadShape::LengthPrefixed => try_length_prefixed(value),
        };
        if let Some(bytes) = decoded {
            return Ok(bytes);
        }
    }
    Err(RecordError::UnsupportedPayload)
}

/// The payload proper may be nested under a conventional envelope field.
fn inner(value: &Value) -> &Value {
    for key in ["data", "value", "payload"] {
        if let Some(v) = value.get(key) {
            return v;
        }
    }
    value
}

fn try_base64(value: &Value) -> Option<Vec<u8>> {
    let text = inner(value).as_str()?;
    BASE64.decode(text.trim()).ok()
}

fn try_byte_array(value: &Value) -> Option<Vec<u8>> {
    let arr = inner(value).as_array()?;
    let mut bytes = Vec::with_capacity(arr.len());
    for v in arr {
        let n = v.as_u64()?;
        if n > 255 {
            return None;
        }
        bytes.push(n as u8);
    }
    Some(bytes)
}

fn try_length_prefixed(value: &Value) -> Option<Vec<u8>> {
    let raw = try_base64(value).or_else(|| try_byte_array(value))?;
    if raw.len() < 4 {
        return None;
    }
    let declared = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    if declared != raw.len() - 4 {
        return None;
    }
    Some(raw[4..].to_vec())
}
