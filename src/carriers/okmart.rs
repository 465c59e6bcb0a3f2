//! OKMart (OK超商): the verification code is handed out in a cookie, so there
//! is no image to read. The result page echoes it back in the query string.

use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, SET_COOKIE};
use scraper::Html;
use std::collections::BTreeMap;

use crate::adapter::{ResponseAdapter, to_raw_value};
use crate::error::TrackError;
use crate::handler::{RawPayload, RequestHandler};
use crate::handshake::{selector, stripped_text};
use crate::models::{DeliveryKeywords, Platform, TrackingInfo};
use crate::session::{SessionConfig, TransportSession};
use crate::tracker::Tracker;

pub const DELIVERED: DeliveryKeywords = DeliveryKeywords(&["已送達", "已取貨"]);

static VALIDATE_COOKIE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ValidateNumber=code=(\w{5})").expect("valid cookie pattern"));

const FIELDS: &[&str] = &[
    "triNo", "odNo", "type", "status", "stNo", "stNm", "takeFrom", "takeTo", "takeAt", "taker",
];

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub validate_url: String,
    pub result_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            validate_url: "https://ecservice.okmart.com.tw/Tracking/ValidateNumber.ashx".to_string(),
            result_url: "https://ecservice.okmart.com.tw/Tracking/Result".to_string(),
        }
    }
}

pub fn tracker(session: SessionConfig, endpoints: Endpoints) -> Tracker {
    Tracker::new(
        Platform::OKMart,
        Box::new(OKMartRequestHandler { session, endpoints }),
        Box::new(OKMartAdapter),
    )
}

pub struct OKMartRequestHandler {
    session: SessionConfig,
    endpoints: Endpoints,
}

fn validate_code(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| VALIDATE_COOKIE.captures(cookie))
        .map(|caps| caps[1].to_string())
}

#[async_trait]
impl RequestHandler for OKMartRequestHandler {
    async fn fetch(&self, order_id: &str) -> Result<RawPayload, TrackError> {
        let session = TransportSession::new(self.session.clone())?;

        let response = session
            .get(&self.endpoints.validate_url, None)
            .await?
            .error_for_status()?;
        let code = validate_code(response.headers())
            .ok_or_else(|| TrackError::MissingRequiredToken("ValidateNumber".to_string()))?;
        debug!("[{}] Received validation code from cookie", Platform::OKMart);

        let url = url::Url::parse_with_params(
            &self.endpoints.result_url,
            [("inputOdNo", order_id), ("inputCode1", code.as_str())],
        )
        .map_err(|e| TrackError::unexpected(&self.endpoints.result_url, e.to_string()))?;

        let cookie = format!("ValidateNumber=code={}&odno={}&cutknm=&cutktl=", code, order_id);
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&cookie).map_err(|e| TrackError::unexpected(url.as_str(), e.to_string()))?,
        );

        let html = session
            .get(url.as_str(), Some(headers))
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(RawPayload::Html(html))
    }
}

pub struct OKMartAdapter;

impl OKMartAdapter {
    fn fields(html: &str) -> Result<BTreeMap<String, String>, TrackError> {
        let document = Html::parse_document(html);
        let mut fields = BTreeMap::new();
        for name in FIELDS {
            let by_class = selector(&format!(".{}", name))?;
            let mut matches = document.select(&by_class);
            if let Some(first) = matches.next() {
                fields.insert(name.to_string(), stripped_text(first));
            }
            // The second stNm cell is the store address.
            if *name == "stNm" {
                if let Some(second) = matches.next() {
                    fields.insert("stNm2".to_string(), stripped_text(second));
                }
            }
        }
        Ok(fields)
    }
}

impl ResponseAdapter for OKMartAdapter {
    fn convert(&self, _order_id: &str, raw: &RawPayload) -> Result<Option<TrackingInfo>, TrackError> {
        let fields = Self::fields(raw.as_html()?)?;
        let Some(waybill) = fields.get("odNo").filter(|id| !id.is_empty()) else {
            return Ok(None);
        };

        let status = fields.get("status").cloned().unwrap_or_default();
        let time = ["takeAt", "takeFrom"]
            .iter()
            .filter_map(|key| fields.get(*key))
            .find(|value| !value.is_empty());

        Ok(Some(TrackingInfo::new(
            waybill.clone(),
            Platform::OKMart,
            status,
            time.map(String::as_str),
            &DELIVERED,
            to_raw_value(&fields)?,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT: &str = r#"
        <html><body>
          <div class="result">
            <span class="triNo">R0021445</span>
            <span class="odNo">TW2512170001</span>
            <span class="type">取貨付款</span>
            <span class="status"> 已送達 </span>
            <span class="stNo">1234</span>
            <span class="stNm">新店中正店</span>
            <span class="stNm">新北市新店區中正路1號</span>
            <span class="takeFrom">2025/12/17 09:00</span>
            <span class="takeTo">2025/12/24 23:59</span>
            <span class="takeAt"></span>
          </div>
        </body></html>
    "#;

    #[test]
    fn extracts_code_from_set_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("ASP.NET_SessionId=abc; path=/"));
        headers.append(SET_COOKIE, HeaderValue::from_static("ValidateNumber=code=7Q2KD; path=/"));
        assert_eq!(validate_code(&headers).as_deref(), Some("7Q2KD"));
    }

    #[test]
    fn missing_cookie_yields_no_code() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("ASP.NET_SessionId=abc; path=/"));
        assert_eq!(validate_code(&headers), None);
    }

    #[test]
    fn decodes_result_fields() {
        let raw = RawPayload::Html(RESULT.to_string());
        let info = OKMartAdapter.convert("TW2512170001", &raw).unwrap().unwrap();
        assert_eq!(info.order_id(), "TW2512170001");
        assert_eq!(info.status(), "已送達");
        assert_eq!(info.time(), Some("2025/12/17 09:00"));
        assert!(info.is_delivered());
        assert_eq!(info.raw_data()["stNm2"], "新北市新店區中正路1號");
        assert!(info.raw_data().get("taker").is_none());
    }

    #[test]
    fn page_without_order_number_is_absent() {
        let raw = RawPayload::Html("<html><body><p>查無資料</p></body></html>".to_string());
        assert_eq!(OKMartAdapter.convert("123456789", &raw).unwrap(), None);
    }
}
