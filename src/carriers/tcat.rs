//! T-Cat (黑貓宅急便): one GET with the waybill in the query string.

use async_trait::async_trait;
use scraper::Html;

use crate::adapter::{ResponseAdapter, to_raw_value};
use crate::error::TrackError;
use crate::handler::{RawPayload, RequestHandler};
use crate::handshake::{joined_text, selector, stripped_text};
use crate::models::{DeliveryKeywords, EventOrder, Platform, StatusEvent, TrackingInfo};
use crate::session::{SessionConfig, TransportSession};
use crate::tracker::Tracker;

pub const DELIVERED: DeliveryKeywords = DeliveryKeywords(&["配達完成", "送達"]);
const ORDER: EventOrder = EventOrder::NewestFirst;

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub trace_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            trace_url: "https://www.t-cat.com.tw/Inquire/TraceDetail.aspx".to_string(),
        }
    }
}

pub fn tracker(session: SessionConfig, endpoints: Endpoints) -> Tracker {
    Tracker::new(
        Platform::Tcat,
        Box::new(TcatRequestHandler { session, endpoints }),
        Box::new(TcatAdapter),
    )
}

pub struct TcatRequestHandler {
    session: SessionConfig,
    endpoints: Endpoints,
}

#[async_trait]
impl RequestHandler for TcatRequestHandler {
    async fn fetch(&self, order_id: &str) -> Result<RawPayload, TrackError> {
        let session = TransportSession::new(self.session.clone())?;
        let url = url::Url::parse_with_params(&self.endpoints.trace_url, [("BillID", order_id)])
            .map_err(|e| TrackError::unexpected(&self.endpoints.trace_url, e.to_string()))?;
        let html = session
            .get(url.as_str(), None)
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(RawPayload::Html(html))
    }
}

pub struct TcatAdapter;

impl ResponseAdapter for TcatAdapter {
    fn convert(&self, order_id: &str, raw: &RawPayload) -> Result<Option<TrackingInfo>, TrackError> {
        let document = Html::parse_document(raw.as_html()?);
        let table = selector(".tablelist")?;
        let Some(table) = document.select(&table).next() else {
            return Ok(None);
        };

        let row = selector("tr")?;
        let waybill_cell = selector("td .bl12")?;
        let column = selector("td.style1")?;

        let mut waybill = None;
        let mut events = Vec::new();
        for tr in table.select(&row).skip(1) {
            if let Some(cell) = tr.select(&waybill_cell).next() {
                waybill = Some(stripped_text(cell)).filter(|w| !w.is_empty());
            }

            let cols: Vec<_> = tr.select(&column).collect();
            if cols.len() < 3 {
                continue;
            }

            let status = stripped_text(cols[0]);
            let station = stripped_text(cols[2]);
            events.push(StatusEvent {
                time: joined_text(cols[1], " "),
                status: format!("{}({})", status, station),
                description: status,
                station,
            });
        }

        let Some(latest) = ORDER.latest(&events) else {
            return Ok(None);
        };

        Ok(Some(TrackingInfo::new(
            waybill.unwrap_or_else(|| order_id.to_string()),
            Platform::Tcat,
            latest.status.clone(),
            Some(&latest.time),
            &DELIVERED,
            to_raw_value(&events)?,
        )))
    }
}
