use serde::Serialize;
use serde_json::Value;

use crate::error::TrackError;
use crate::handler::RawPayload;
use crate::models::TrackingInfo;

/// Decodes a carrier's final payload into the canonical record.
///
/// `Ok(None)` means the carrier reported no events for the identifier;
/// `Err(Decode)` means the payload did not have the expected shape at all.
/// Implementations must be pure so that decoding the same payload twice
/// yields equal records.
pub trait ResponseAdapter: Send + Sync {
    fn convert(&self, order_id: &str, raw: &RawPayload) -> Result<Option<TrackingInfo>, TrackError>;
}

pub(crate) fn to_raw_value<T: Serialize>(value: &T) -> Result<Value, TrackError> {
    serde_json::to_value(value).map_err(|e| TrackError::decode(e.to_string()))
}

/// String or number field of a JSON object, trimmed, `None` when blank.
pub(crate) fn json_text(object: &Value, key: &str) -> Option<String> {
    let text = match object.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
