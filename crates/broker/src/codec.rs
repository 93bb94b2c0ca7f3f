// SPDX-License-Identifier: Apache-2.0

//! Payload codec applied at the broker boundary (§4.3): an `encoding` (byte-level transport) layer
//! wrapping a `format` (structured decode/encode) layer.
//!
//! Decoding runs encoding first, then format: wire bytes -> transport-decoded bytes -> `Value`.
//! Encoding runs format first, then encoding: `Value` -> format-serialized bytes -> wire bytes.

use conduit_config::{PayloadEncoding, PayloadFormat};
use conduit_engine::{ComponentError, ComponentErrorKind};
use serde_json::Value;
use std::io::{Read, Write};

/// Decodes raw wire bytes into a `Value` per the given encoding/format pair.
pub fn decode_payload(bytes: &[u8], encoding: PayloadEncoding, format: PayloadFormat) -> Result<Value, ComponentError> {
    let transport_decoded = decode_encoding(bytes, encoding)?;
    parse_format(&transport_decoded, format)
}

/// Encodes a `Value` into raw wire bytes per the given encoding/format pair.
pub fn encode_payload(value: &Value, encoding: PayloadEncoding, format: PayloadFormat) -> Result<Vec<u8>, ComponentError> {
    let serialized = serialize_format(value, format)?;
    encode_encoding(&serialized, encoding)
}

fn decode_encoding(bytes: &[u8], encoding: PayloadEncoding) -> Result<Vec<u8>, ComponentError> {
    match encoding {
        PayloadEncoding::None => Ok(bytes.to_vec()),
        PayloadEncoding::Utf8 => {
            std::str::from_utf8(bytes).map_err(|e| ComponentError::decode(format!("payload is not valid utf-8: {e}")))?;
            Ok(bytes.to_vec())
        }
        PayloadEncoding::Base64 => base64::Engine::decode(&base64::engine::general_purpose::STANDARD, bytes)
            .map_err(|e| ComponentError::decode(format!("base64 decode failed: {e}"))),
        PayloadEncoding::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(bytes);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| ComponentError::decode(format!("gzip decode failed: {e}")))?;
            Ok(out)
        }
    }
}

fn encode_encoding(bytes: &[u8], encoding: PayloadEncoding) -> Result<Vec<u8>, ComponentError> {
    match encoding {
        PayloadEncoding::None => Ok(bytes.to_vec()),
        PayloadEncoding::Utf8 => {
            std::str::from_utf8(bytes).map_err(|e| ComponentError::decode(format!("payload is not valid utf-8: {e}")))?;
            Ok(bytes.to_vec())
        }
        PayloadEncoding::Base64 => Ok(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes).into_bytes()),
        PayloadEncoding::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(bytes)
                .map_err(|e| ComponentError::decode(format!("gzip encode failed: {e}")))?;
            encoder.finish().map_err(|e| ComponentError::decode(format!("gzip encode failed: {e}")))
        }
    }
}

fn parse_format(bytes: &[u8], format: PayloadFormat) -> Result<Value, ComponentError> {
    match format {
        PayloadFormat::Json => serde_json::from_slice(bytes).map_err(|e| ComponentError::decode(format!("invalid json payload: {e}"))),
        PayloadFormat::Yaml => {
            let text = std::str::from_utf8(bytes).map_err(|e| ComponentError::decode(format!("payload is not valid utf-8: {e}")))?;
            serde_yaml::from_str(text).map_err(|e| ComponentError::decode(format!("invalid yaml payload: {e}")))
        }
        PayloadFormat::Text => {
            let text = std::str::from_utf8(bytes).map_err(|e| ComponentError::decode(format!("payload is not valid utf-8: {e}")))?;
            Ok(Value::String(text.to_owned()))
        }
        PayloadFormat::Bytes => Ok(Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())),
    }
}

fn serialize_format(value: &Value, format: PayloadFormat) -> Result<Vec<u8>, ComponentError> {
    match format {
        PayloadFormat::Json => serde_json::to_vec(value).map_err(|e| ComponentError::decode(format!("failed to serialize json payload: {e}"))),
        PayloadFormat::Yaml => serde_yaml::to_string(value)
            .map(String::into_bytes)
            .map_err(|e| ComponentError::decode(format!("failed to serialize yaml payload: {e}"))),
        PayloadFormat::Text => match value {
            Value::String(s) => Ok(s.clone().into_bytes()),
            other => Err(ComponentError::new(
                ComponentErrorKind::Decode,
                format!("text format requires a string payload, got {other}"),
            )),
        },
        PayloadFormat::Bytes => {
            let array = value.as_array().ok_or_else(|| {
                ComponentError::new(ComponentErrorKind::Decode, "bytes format requires an array-of-numbers payload")
            })?;
            array
                .iter()
                .map(|v| {
                    v.as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or_else(|| ComponentError::new(ComponentErrorKind::Decode, "bytes format element out of range"))
                })
                .collect()
        }
    }
}
