//! 7-Eleven e-tracking (交貨便).
//!
//! The search form is an ASP.NET page guarded by a numeric image code. The
//! answer to the form post is the result page itself; a wrong code comes back
//! as a script `alert`.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::adapter::{ResponseAdapter, to_raw_value};
use crate::error::TrackError;
use crate::handler::{ChallengeFlow, ChallengeRequestHandler, RawPayload, SubmissionForm};
use crate::handshake::{ImageLocator, selector, stripped_text};
use crate::models::{DeliveryKeywords, Platform, TrackingInfo};
use crate::oracle::ChallengeOracle;
use crate::session::SessionConfig;
use crate::solver::{ChallengeConfig, CodeShape, ResetPolicy, RetrySettings};
use crate::tracker::{IdShape, Tracker};

pub const DELIVERED: DeliveryKeywords = DeliveryKeywords(&["包裹配達取件門市", "已完成包裹成功取件"]);

/// 8 digits when shipping, 11 or 12 when picking up.
pub const ID_LENGTHS: &[usize] = &[8, 11, 12];

/// Character whitelist handed to the OCR program.
pub const CODE_CHARSET: &str = "0123456789";

const WRONG_CODE: &str = "驗證碼錯誤";

static BANNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^(.*)(\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2})").expect("valid banner pattern")
});

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub search_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            search_url: "https://eservice.7-11.com.tw/e-tracking/search.aspx".to_string(),
        }
    }
}

pub fn flow(endpoints: &Endpoints, retry: RetrySettings) -> ChallengeFlow {
    ChallengeFlow {
        challenge: ChallengeConfig {
            page_url: endpoints.search_url.clone(),
            required_tokens: &["__VIEWSTATE"],
            optional_tokens: &["__VIEWSTATEGENERATOR"],
            image_locator: ImageLocator::SrcPattern(r#"src="(ValidateImage\.aspx\?ts=[0-9]+)""#),
            shape: CodeShape::DigitsOnly,
            reset_policy: ResetPolicy::Reuse,
            retry,
        },
        submit_url: endpoints.search_url.clone(),
        form: SubmissionForm {
            order_field: "txtProductNum",
            code_field: "tbChkCode",
            static_fields: &[
                ("__EVENTTARGET", "submit"),
                ("__EVENTARGUMENT", ""),
                ("txtIMGName", ""),
                ("txtPage", "1"),
            ],
        },
        rejection: Some(wrong_code),
        continuation: None,
    }
}

pub fn tracker(
    session: SessionConfig,
    retry: RetrySettings,
    oracle: Arc<dyn ChallengeOracle>,
    endpoints: Endpoints,
) -> Tracker {
    let handler =
        ChallengeRequestHandler::new(Platform::SevenEleven, session, flow(&endpoints, retry), oracle);
    Tracker::new(Platform::SevenEleven, Box::new(handler), Box::new(SevenElevenAdapter))
        .with_id_shape(IdShape::Lengths(ID_LENGTHS))
}

fn alert_message(document: &Html) -> Result<Option<String>, TrackError> {
    let script = selector("script")?;
    Ok(document.select(&script).find_map(|tag| {
        let text: String = tag.text().collect();
        let (_, rest) = text.split_once("alert('")?;
        let message = rest.split("')").next().unwrap_or(rest);
        Some(message.to_string())
    }))
}

fn wrong_code(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    alert_message(&document)
        .ok()
        .flatten()
        .filter(|message| message.contains(WRONG_CODE))
}

pub struct SevenElevenAdapter;

impl ResponseAdapter for SevenElevenAdapter {
    fn convert(&self, order_id: &str, raw: &RawPayload) -> Result<Option<TrackingInfo>, TrackError> {
        let document = Html::parse_document(raw.as_html()?);

        // Alerts and lbMsg carry "no such parcel" style answers.
        if alert_message(&document)?.is_some() {
            return Ok(None);
        }
        let message = selector("span#lbMsg")?;
        if document
            .select(&message)
            .next()
            .is_some_and(|span| !stripped_text(span).is_empty())
        {
            return Ok(None);
        }

        let banner = selector("div.m_news")?;
        let Some(banner) = document.select(&banner).next() else {
            return Err(TrackError::decode("7-11 result page without status banner"));
        };
        let news: String = banner.text().collect();
        let Some(caps) = BANNER.captures(news.trim()) else {
            return Ok(None);
        };
        let status = caps[1].trim().to_string();
        let time = caps[2].to_string();

        let mut info = BTreeMap::new();
        let spans = selector("div.info span[id]")?;
        for span in document.select(&spans) {
            if let Some(id) = span.value().attr("id") {
                info.insert(id.to_string(), stripped_text(span));
            }
        }
        let service = selector("div.info h4#servicetype")?;
        if let Some(h4) = document.select(&service).next() {
            info.insert("servicetype".to_string(), stripped_text(h4));
        }

        let timeline = selector("div.shipping p")?;
        let shipping: Vec<String> = document.select(&timeline).map(stripped_text).collect();

        let canonical = info
            .get("query_no")
            .filter(|id| !id.is_empty())
            .cloned()
            .unwrap_or_else(|| order_id.to_string());

        let raw_data = json!({
            "m_news": news.trim(),
            "info": to_raw_value(&info)?,
            "shipping": shipping,
        });

        Ok(Some(TrackingInfo::new(
            canonical,
            Platform::SevenEleven,
            status,
            Some(&time),
            &DELIVERED,
            raw_data,
        )))
    }
}
