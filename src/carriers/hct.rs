//! HCT Logistics (新竹物流).
//!
//! Three requests after the challenge: the ASP.NET search form is posted with
//! the solved code, the reply is a stub carrying encrypted `no`/`chk` inputs,
//! and those are posted to the result page.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use std::sync::Arc;

use crate::adapter::{ResponseAdapter, to_raw_value};
use crate::error::TrackError;
use crate::handler::{ChallengeFlow, ChallengeRequestHandler, ContinuationStep, RawPayload, SubmissionForm};
use crate::handshake::{ImageLocator, joined_text, selector, stripped_text};
use crate::models::{DeliveryKeywords, EventOrder, Platform, StatusEvent, TrackingInfo};
use crate::oracle::ChallengeOracle;
use crate::session::SessionConfig;
use crate::solver::{ChallengeConfig, CodeShape, ResetPolicy, RetrySettings};
use crate::tracker::Tracker;

pub const DELIVERED: DeliveryKeywords = DeliveryKeywords(&["送達"]);
const ORDER: EventOrder = EventOrder::NewestFirst;

static TOOLTIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"'(.*?)'").expect("valid tooltip pattern"));

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub search_url: String,
    pub result_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            search_url: "https://www.hct.com.tw/Search/SearchGoods_n.aspx".to_string(),
            result_url: "https://www.hct.com.tw/Search/SearchGoods.aspx".to_string(),
        }
    }
}

pub fn flow(endpoints: &Endpoints, retry: RetrySettings) -> ChallengeFlow {
    ChallengeFlow {
        challenge: ChallengeConfig {
            page_url: endpoints.search_url.clone(),
            required_tokens: &["__VIEWSTATE"],
            optional_tokens: &["__VIEWSTATEGENERATOR", "__EVENTVALIDATION"],
            image_locator: ImageLocator::Selector(
                r#"img[name="imgCode"], img#imgCode, img[src*="imgCode"], img[src*="code"]"#,
            ),
            shape: CodeShape::ExactLength(4),
            reset_policy: ResetPolicy::Recreate,
            retry,
        },
        submit_url: endpoints.search_url.clone(),
        form: SubmissionForm {
            order_field: "ctl00$ContentFrame$txtpKey",
            code_field: "ctl00$ContentFrame$txt_chk",
            static_fields: &[("ctl00$ContentFrame$Button1", "查詢 >")],
        },
        rejection: None,
        continuation: Some(ContinuationStep {
            url: endpoints.result_url.clone(),
            fields: &["no", "chk"],
        }),
    }
}

/// The search page is always fetched without following redirects; the
/// submission and result posts follow them under `session`.
pub fn tracker(
    session: SessionConfig,
    retry: RetrySettings,
    oracle: Arc<dyn ChallengeOracle>,
    endpoints: Endpoints,
) -> Tracker {
    let handler = ChallengeRequestHandler::new(Platform::Hct, session, flow(&endpoints, retry), oracle);
    Tracker::new(Platform::Hct, Box::new(handler), Box::new(HctAdapter))
}

pub struct HctAdapter;

impl HctAdapter {
    fn events(html: &str) -> Result<Vec<(StatusEvent, String)>, TrackError> {
        let document = Html::parse_document(html);
        let row = selector("div.grid-container")?;
        let time = selector("div.col_optime")?;
        let state = selector("div.col_state span.linkInv")?;
        let count = selector("div.col_count")?;
        let office = selector("div.col_office")?;

        let mut events = Vec::new();
        for container in document.select(&row) {
            let time_text = container.select(&time).next().map(stripped_text).unwrap_or_default();
            if time_text.is_empty() {
                continue;
            }

            let state_span = container.select(&state).next();
            let state_text = state_span.map(stripped_text).unwrap_or_default();
            let tooltip = state_span
                .and_then(|span| span.value().attr("onmouseover"))
                .and_then(|attr| TOOLTIP.captures(attr))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();

            let pieces = container
                .select(&count)
                .next()
                .map(|el| joined_text(el, "").replace('件', ""))
                .unwrap_or_default();

            events.push((
                StatusEvent {
                    time: time_text,
                    status: format!("{}\n{}", state_text, tooltip).trim().to_string(),
                    description: tooltip,
                    station: container.select(&office).next().map(stripped_text).unwrap_or_default(),
                },
                pieces,
            ));
        }
        Ok(events)
    }
}

impl ResponseAdapter for HctAdapter {
    fn convert(&self, order_id: &str, raw: &RawPayload) -> Result<Option<TrackingInfo>, TrackError> {
        let events = Self::events(raw.as_html()?)?;
        let Some((latest, _)) = ORDER.latest(&events) else {
            return Ok(None);
        };

        let records: Vec<serde_json::Value> = events
            .iter()
            .map(|(event, pieces)| {
                serde_json::json!({
                    "time": event.time,
                    "status": event.status,
                    "pieces": pieces,
                    "office": event.station,
                })
            })
            .collect();

        Ok(Some(TrackingInfo::new(
            order_id,
            Platform::Hct,
            latest.status.clone(),
            Some(&latest.time),
            &DELIVERED,
            to_raw_value(&records)?,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT: &str = r#"
        <html><body>
          <div class="grid-container header"><div class="col_optime"></div></div>
          <div class="grid-container">
            <div class="col_optime">2025/12/18 16:20</div>
            <div class="col_state"><span class="linkInv" onmouseover="showTip('收件人：王**')">順利送達</span></div>
            <div class="col_count">1件</div>
            <div class="col_office">台北營業所</div>
          </div>
          <div class="grid-container">
            <div class="col_optime">2025/12/18 08:02</div>
            <div class="col_state"><span class="linkInv">配送中</span></div>
            <div class="col_count">1件</div>
            <div class="col_office">台北營業所</div>
          </div>
        </body></html>
    "#;

    #[test]
    fn picks_first_row_and_detects_delivery() {
        let raw = RawPayload::Html(RESULT.to_string());
        let info = HctAdapter.convert("6918034431", &raw).unwrap().unwrap();
        assert_eq!(info.order_id(), "6918034431");
        assert_eq!(info.status(), "順利送達\n收件人：王**");
        assert_eq!(info.time(), Some("2025/12/18 16:20"));
        assert!(info.is_delivered());
        assert_eq!(info.raw_data()[1]["status"], "配送中");
        assert_eq!(info.raw_data()[0]["pieces"], "1");
    }

    #[test]
    fn no_rows_is_absent() {
        let raw = RawPayload::Html("<html><body><p>查無資料</p></body></html>".to_string());
        assert_eq!(HctAdapter.convert("6918034431", &raw).unwrap(), None);
    }

    #[test]
    fn flow_has_three_steps() {
        let flow = flow(&Endpoints::default(), RetrySettings::default());
        assert_eq!(flow.challenge.shape, CodeShape::ExactLength(4));
        assert_eq!(flow.challenge.reset_policy, ResetPolicy::Recreate);
        assert_eq!(flow.continuation.unwrap().fields, ["no", "chk"]);
    }
}
