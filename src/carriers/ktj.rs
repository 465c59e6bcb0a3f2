//! KTJ (大榮貨運): XHR endpoint answering with a JavaScript object literal
//! whose `msg` field is itself a JSON document.

use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, REFERER};
use serde_json::Value;
use std::time::Duration;

use crate::adapter::{ResponseAdapter, json_text};
use crate::error::TrackError;
use crate::handler::{RawPayload, RequestHandler};
use crate::models::{DeliveryKeywords, Platform, TrackingInfo};
use crate::session::{SessionConfig, TransportSession};
use crate::tracker::Tracker;

pub const DELIVERED: DeliveryKeywords =
    DeliveryKeywords(&["簽收", "配達", "已送達", "已完成配送", "已完成", "配送完成"]);

/// The handler endpoint is slow; shorter read timeouts cut real answers off.
pub const MIN_READ_TIMEOUT: Duration = Duration::from_secs(30);

static BARE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,]\s*)([A-Za-z_]\w*)(\s*:)").expect("valid key pattern"));

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub landing_url: String,
    pub query_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            landing_url: "http://www.express.com.tw/tools/positchecking_listForKtj.aspx".to_string(),
            query_url: "http://www.express.com.tw/Handler.aspx".to_string(),
        }
    }
}

pub fn tracker(session: SessionConfig, endpoints: Endpoints) -> Tracker {
    Tracker::new(
        Platform::Ktj,
        Box::new(KtjRequestHandler {
            session: with_slow_reads(session),
            endpoints,
        }),
        Box::new(KtjAdapter),
    )
}

fn with_slow_reads(mut session: SessionConfig) -> SessionConfig {
    session.read_timeout = session.read_timeout.max(MIN_READ_TIMEOUT);
    session
}

pub struct KtjRequestHandler {
    session: SessionConfig,
    endpoints: Endpoints,
}

impl KtjRequestHandler {
    fn headers(&self, order_id: &str) -> Result<HeaderMap, TrackError> {
        let referer = format!("{}?searchNumber={}", self.endpoints.landing_url, order_id);
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html, */*; q=0.01"));
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );
        headers.insert(
            REFERER,
            HeaderValue::from_str(&referer).map_err(|e| TrackError::unexpected(&referer, e.to_string()))?,
        );
        Ok(headers)
    }
}

#[async_trait]
impl RequestHandler for KtjRequestHandler {
    async fn fetch(&self, order_id: &str) -> Result<RawPayload, TrackError> {
        let session = TransportSession::new(self.session.clone())?;

        // Only the cookie matters here.
        if let Err(e) = session.get(&self.endpoints.landing_url, None).await {
            debug!("[{}] Warm-up request failed: {}", Platform::Ktj, e);
        }

        let form = [
            ("queryId".to_string(), format!("\"{}\"", order_id)),
            ("Action".to_string(), "getKtjData".to_string()),
        ];
        let body = session
            .post_form(&self.endpoints.query_url, &form, Some(self.headers(order_id)?))
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_envelope(&body).map(RawPayload::Json)
    }
}

/// Turns the `({success:true,msg:"..."})` envelope into the inner document.
fn parse_envelope(body: &str) -> Result<Value, TrackError> {
    let mut literal = body.trim();
    if let Some(inner) = literal.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        literal = inner.trim();
    }
    let quoted = BARE_KEY.replace_all(literal, r#"$1"$2"$3"#);
    let outer: Value = serde_json::from_str(&quoted)
        .map_err(|e| TrackError::decode(format!("KTJ envelope is not an object literal: {}", e)))?;

    let success = match outer.get("success") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(flag)) => matches!(flag.to_ascii_lowercase().as_str(), "true" | "1"),
        Some(Value::Number(flag)) => flag.as_i64() == Some(1),
        _ => false,
    };
    if !success {
        return Err(TrackError::decode(format!("KTJ reported failure: {}", outer)));
    }

    let msg = outer
        .get("msg")
        .and_then(Value::as_str)
        .filter(|msg| !msg.trim().is_empty())
        .ok_or_else(|| TrackError::decode("KTJ envelope without msg"))?;

    serde_json::from_str(msg).map_err(|e| TrackError::decode(format!("KTJ msg is not JSON: {}", e)))
}

pub struct KtjAdapter;

impl ResponseAdapter for KtjAdapter {
    fn convert(&self, order_id: &str, raw: &RawPayload) -> Result<Option<TrackingInfo>, TrackError> {
        let document = raw.as_json()?;
        let Some(item) = document.get("result").and_then(|r| r.get(0)) else {
            return Ok(None);
        };
        // Newest event first.
        let Some(latest) = item.get("course").and_then(|c| c.get(0)) else {
            return Ok(None);
        };

        let waybill = json_text(item, "bolNo")
            .or_else(|| json_text(latest, "bolNo"))
            .unwrap_or_else(|| order_id.to_string());

        let time = json_text(latest, "processCargoCrtDAteAndTime").or_else(|| {
            let date = json_text(latest, "processCargoCrtDate")?;
            let time = json_text(latest, "processCargoCrtTime")?;
            Some(format!("{}T{}", date, time))
        });

        let status = json_text(latest, "statusIdName").unwrap_or_default();

        Ok(Some(TrackingInfo::new(
            waybill,
            Platform::Ktj,
            status,
            time.as_deref(),
            &DELIVERED,
            document.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_object_literal_envelope() {
        let body = r#"({success:true,msg:"{\"result\":[{\"bolNo\":\"1234567890\"}]}"})"#;
        let inner = parse_envelope(body).unwrap();
        assert_eq!(inner["result"][0]["bolNo"], "1234567890");
    }

    #[test]
    fn string_success_flag_is_accepted() {
        let body = r#"{success:"true", msg:"{}"}"#;
        assert_eq!(parse_envelope(body).unwrap(), json!({}));
    }

    #[test]
    fn failure_flag_is_a_decode_error() {
        let err = parse_envelope(r#"({success:false,msg:""})"#).unwrap_err();
        assert!(matches!(err, TrackError::Decode(_)));
    }

    #[test]
    fn missing_msg_is_a_decode_error() {
        let err = parse_envelope("({success:true})").unwrap_err();
        assert!(matches!(err, TrackError::Decode(_)));
    }

    #[test]
    fn reads_latest_course_entry() {
        let raw = RawPayload::Json(json!({
            "result": [{
                "bolNo": "1234567890",
                "course": [
                    {"processCargoCrtDAteAndTime": "2025-12-16T09:14:33.000", "statusIdName": " 已簽收 "},
                    {"processCargoCrtDAteAndTime": "2025-12-15T18:02:00", "statusIdName": "配送中"}
                ]
            }]
        }));
        let info = KtjAdapter.convert("1234567890", &raw).unwrap().unwrap();
        assert_eq!(info.order_id(), "1234567890");
        assert_eq!(info.status(), "已簽收");
        assert_eq!(info.time(), Some("2025/12/16 09:14"));
        assert!(info.is_delivered());
    }

    #[test]
    fn time_falls_back_to_date_and_time_fields() {
        let raw = RawPayload::Json(json!({
            "result": [{
                "course": [{
                    "processCargoCrtDate": "2025-12-15",
                    "processCargoCrtTime": "18:02:00",
                    "statusIdName": "轉運中"
                }]
            }]
        }));
        let info = KtjAdapter.convert("1234567890", &raw).unwrap().unwrap();
        assert_eq!(info.order_id(), "1234567890");
        assert_eq!(info.time(), Some("2025/12/15 18:02"));
        assert!(!info.is_delivered());
    }

    #[test]
    fn empty_result_is_absent() {
        let raw = RawPayload::Json(json!({"result": []}));
        assert_eq!(KtjAdapter.convert("1234567890", &raw).unwrap(), None);
        let raw = RawPayload::Json(json!({"result": [{"course": []}]}));
        assert_eq!(KtjAdapter.convert("1234567890", &raw).unwrap(), None);
    }

    #[test]
    fn read_timeout_is_raised_but_never_lowered() {
        let mut session = crate::config::Config::default().session_config();
        session.read_timeout = Duration::from_secs(10);
        assert_eq!(with_slow_reads(session.clone()).read_timeout, MIN_READ_TIMEOUT);

        session.read_timeout = Duration::from_secs(60);
        assert_eq!(with_slow_reads(session).read_timeout, Duration::from_secs(60));
    }
}
