//! E-Can (宅配通): one form POST, result rendered as `table.sheetList`.
//!
//! The result page is Big5 and does not always say so in `Content-Type`.

use async_trait::async_trait;
use encoding_rs::BIG5;
use scraper::Html;

use crate::adapter::{ResponseAdapter, to_raw_value};
use crate::error::TrackError;
use crate::handler::{RawPayload, RequestHandler};
use crate::handshake::{joined_text, selector, stripped_text};
use crate::models::{DeliveryKeywords, EventOrder, Platform, StatusEvent, TrackingInfo};
use crate::session::{SessionConfig, TransportSession};
use crate::tracker::Tracker;

pub const DELIVERED: DeliveryKeywords =
    DeliveryKeywords(&["配達完成", "已送達", "完成配達", "貨件送達"]);

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub query_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            query_url: "https://query2.e-can.com.tw/ECAN_APP/DS_LINK.asp".to_string(),
        }
    }
}

pub fn tracker(session: SessionConfig, endpoints: Endpoints) -> Tracker {
    Tracker::new(
        Platform::Ecan,
        Box::new(EcanRequestHandler { session, endpoints }),
        Box::new(EcanAdapter::default()),
    )
}

pub struct EcanRequestHandler {
    session: SessionConfig,
    endpoints: Endpoints,
}

#[async_trait]
impl RequestHandler for EcanRequestHandler {
    async fn fetch(&self, order_id: &str) -> Result<RawPayload, TrackError> {
        let session = TransportSession::new(self.session.clone())?;
        let form = [
            ("txtMainID".to_string(), order_id.to_string()),
            ("B1".to_string(), "查詢".to_string()),
        ];
        let html = session
            .post_form(&self.endpoints.query_url, &form, None)
            .await?
            .error_for_status()?
            .text_with_fallback(BIG5)
            .await?;
        Ok(RawPayload::Html(html))
    }
}

/// The site has been observed newest-first, but this has not been confirmed
/// for every shipment type, so the ordering stays configurable.
pub struct EcanAdapter {
    pub order: EventOrder,
}

impl Default for EcanAdapter {
    fn default() -> Self {
        Self {
            order: EventOrder::NewestFirst,
        }
    }
}

fn waybill_from(label: &str) -> Option<String> {
    if !label.contains("單號") {
        return None;
    }
    let value = label.replace("單號：", "").replace("單號:", "");
    let waybill = value.trim().split('-').next().unwrap_or_default().trim().to_string();
    (!waybill.is_empty()).then_some(waybill)
}

impl ResponseAdapter for EcanAdapter {
    fn convert(&self, order_id: &str, raw: &RawPayload) -> Result<Option<TrackingInfo>, TrackError> {
        let document = Html::parse_document(raw.as_html()?);
        let sheet = selector("table.sheetList")?;
        let Some(table) = document.select(&sheet).next() else {
            return Ok(None);
        };

        let label = selector(r#"tbody.ListStyle01 td[colspan="4"]"#)?;
        let waybill = table
            .select(&label)
            .next()
            .and_then(|td| waybill_from(&stripped_text(td)));

        let row = selector("tbody.ListStyle01 tr")?;
        let cell = selector("td")?;
        let mut events = Vec::new();
        for tr in table.select(&row) {
            if tr.select(&label).next().is_some() {
                continue;
            }
            let tds: Vec<_> = tr.select(&cell).collect();
            if tds.len() < 4 {
                continue;
            }
            events.push(StatusEvent {
                time: joined_text(tds[0], " "),
                status: stripped_text(tds[1]),
                description: stripped_text(tds[2]),
                station: stripped_text(tds[3]),
            });
        }

        let Some(latest) = self.order.latest(&events) else {
            return Ok(None);
        };

        let status = format!("{}({}) - {}", latest.status, latest.station, latest.description)
            .trim_matches(|c: char| c == ' ' || c == '-')
            .to_string();
        let evidence = format!("{} {}", latest.status, latest.description);

        Ok(Some(TrackingInfo::with_evidence(
            waybill.unwrap_or_else(|| order_id.to_string()),
            Platform::Ecan,
            status,
            Some(&latest.time),
            &DELIVERED,
            &evidence,
            to_raw_value(&events)?,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT: &str = r#"
        <table class="sheetList">
          <tbody class="ListStyle01">
            <tr><td colspan="4">單號：577293125651-001</td></tr>
            <tr>
              <td><span class="date">2025/12/19 14:42</span></td>
              <td>已送達</td>
              <td>貨件已由收件人簽收</td>
              <td>台中站</td>
            </tr>
            <tr>
              <td><span class="date">2025/12/19 08:10</span></td>
              <td>取件通知</td>
              <td></td>
              <td>台中站</td>
            </tr>
          </tbody>
        </table>
    "#;

    #[test]
    fn selects_first_event_as_latest() {
        let raw = RawPayload::Html(RESULT.to_string());
        let info = EcanAdapter::default().convert("577293125651001", &raw).unwrap().unwrap();
        assert_eq!(info.order_id(), "577293125651");
        assert_eq!(info.status(), "已送達(台中站) - 貨件已由收件人簽收");
        assert_eq!(info.time(), Some("2025/12/19 14:42"));
        assert!(info.is_delivered());
    }

    #[test]
    fn ordering_is_configurable() {
        let raw = RawPayload::Html(RESULT.to_string());
        let adapter = EcanAdapter {
            order: EventOrder::OldestFirst,
        };
        let info = adapter.convert("577293125651", &raw).unwrap().unwrap();
        assert_eq!(info.status(), "取件通知(台中站)");
        assert_eq!(info.time(), Some("2025/12/19 08:10"));
        assert!(!info.is_delivered());
    }

    #[test]
    fn delivery_can_be_signalled_by_description() {
        let html = RESULT.replace("<td>已送達</td>", "<td>配送</td>").replace(
            "貨件已由收件人簽收",
            "貨件送達收件人",
        );
        let info = EcanAdapter::default()
            .convert("577293125651", &RawPayload::Html(html))
            .unwrap()
            .unwrap();
        assert!(info.is_delivered());
    }

    #[test]
    fn missing_sheet_is_absent() {
        let raw = RawPayload::Html("<html><body>查無資料</body></html>".to_string());
        assert_eq!(EcanAdapter::default().convert("577293125651", &raw).unwrap(), None);
    }

    #[test]
    fn waybill_label_variants() {
        assert_eq!(waybill_from("單號:123-002").as_deref(), Some("123"));
        assert_eq!(waybill_from("日期"), None);
    }
}
