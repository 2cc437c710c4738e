//! Event decoder: base64-encoded UTF-8 JSON → [`InboundEvent`]

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sdc_common::InboundEvent;

use crate::error::DecodeError;

/// Decode one stream record payload
///
/// Surrounding whitespace (e.g. a trailing newline from a fixture file) is ignored.
pub fn decode(raw: &str) -> Result<InboundEvent, DecodeError> {
    let bytes = STANDARD.decode(raw.trim())?;
    let text = String::from_utf8(bytes)?;
    Ok(serde_json::from_str(&text)?)
}

/// Encode an event the way producers put it on the stream
pub fn encode(event: &InboundEvent) -> Result<String, DecodeError> {
    let json = serde_json::to_vec(event)?;
    Ok(STANDARD.encode(json))
}
