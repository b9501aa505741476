use crate::domain::error::{Result, ScanDecodeError};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use common::garde::format_validation_errors;
use garde::Validate;
use serde::Deserialize;

/// A decoded scan observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    pub ip: String,
    pub port: u16,
    pub service: String,
    /// Observation time, decoded from Unix seconds
    pub observed_at: DateTime<Utc>,
    pub response: String,
}

/// Wire envelope of a scan message.
///
/// `data` is interpreted according to `data_version`:
/// - 1: `{"response_bytes_utf8": "<base64>"}`
/// - 2: `{"response_str": "<text>"}`
#[derive(Debug, Deserialize, Validate)]
struct ScanEnvelope {
    #[garde(ip)]
    ip: String,
    #[garde(range(min = 1, max = 65535))]
    port: u32,
    #[garde(length(min = 1))]
    service: String,
    #[garde(skip)]
    timestamp: i64,
    #[garde(skip)]
    data_version: i64,
    #[garde(skip)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ResponseBytesData {
    response_bytes_utf8: String,
}

#[derive(Debug, Deserialize)]
struct ResponseStrData {
    response_str: String,
}

/// Earliest instant a TIMESTAMPTZ column holds (4713-01-01 BC)
const MIN_STORABLE_TIMESTAMP: i64 = -210_866_803_200;

/// Latest instant a TIMESTAMPTZ column holds (294276-12-31)
const MAX_STORABLE_TIMESTAMP: i64 = 9_224_318_015_999;

/// Decode one message payload into a scan event.
///
/// Anything the scan table cannot store is rejected here so a single message
/// never fails the batch write.
pub fn decode_scan_event(payload: &[u8]) -> Result<ScanEvent> {
    let envelope: ScanEnvelope = serde_json::from_slice(payload)?;

    envelope
        .validate()
        .map_err(|report| ScanDecodeError::InvalidField(format_validation_errors(&report)))?;

    let port = u16::try_from(envelope.port)
        .map_err(|_| ScanDecodeError::InvalidField(format!("port: {}", envelope.port)))?;

    reject_nul("service", &envelope.service)?;

    if !(MIN_STORABLE_TIMESTAMP..=MAX_STORABLE_TIMESTAMP).contains(&envelope.timestamp) {
        return Err(ScanDecodeError::InvalidTimestamp(envelope.timestamp));
    }
    let observed_at = DateTime::<Utc>::from_timestamp(envelope.timestamp, 0)
        .ok_or(ScanDecodeError::InvalidTimestamp(envelope.timestamp))?;

    let response = decode_response(envelope.data_version, envelope.data)?;
    reject_nul("response", &response)?;

    Ok(ScanEvent {
        ip: envelope.ip,
        port,
        service: envelope.service,
        observed_at,
        response,
    })
}

// TEXT columns cannot hold 0x00
fn reject_nul(field: &'static str, value: &str) -> Result<()> {
    if value.contains('\0') {
        return Err(ScanDecodeError::NulByte(field));
    }
    Ok(())
}

fn decode_response(version: i64, data: serde_json::Value) -> Result<String> {
    match version {
        1 => {
            let data: ResponseBytesData = serde_json::from_value(data)
                .map_err(|source| ScanDecodeError::Data { version, source })?;
            let bytes = STANDARD.decode(data.response_bytes_utf8)?;
            Ok(String::from_utf8(bytes)?)
        }
        2 => {
            let data: ResponseStrData = serde_json::from_value(data)
                .map_err(|source| ScanDecodeError::Data { version, source })?;
            Ok(data.response_str)
        }
        other => Err(ScanDecodeError::UnknownDataVersion(other)),
    }
}
