//! FamilyMart (全家): ASP.NET page method answering `{"d": "<json>"}`.
//!
//! The host only completes handshakes with the legacy TLS policy.
//!
//! `TlsPolicy::Legacy` only lowers the minimum protocol version to TLS 1.0.
//! It does not lower the cipher security level or enable legacy
//! renegotiation, so a server that also needs either of those will still
//! fail the handshake with a `TransportError`.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::adapter::{ResponseAdapter, json_text};
use crate::error::TrackError;
use crate::handler::{RawPayload, RequestHandler};
use crate::models::{DeliveryKeywords, Platform, TrackingInfo};
use crate::session::{SessionConfig, TlsPolicy, TransportSession};
use crate::tracker::Tracker;

pub const DELIVERED: DeliveryKeywords = DeliveryKeywords(&["貨件配達取件店舖", "已完成取件"]);

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub detail_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            detail_url: "https://ecfme.fme.com.tw/FMEDCFPWebV2_II/list.aspx/GetOrderDetail".to_string(),
        }
    }
}

pub fn tracker(session: SessionConfig, endpoints: Endpoints) -> Tracker {
    Tracker::new(
        Platform::FamilyMart,
        Box::new(FamilyMartRequestHandler {
            session: with_legacy_tls(session),
            endpoints,
        }),
        Box::new(FamilyMartAdapter),
    )
}

fn with_legacy_tls(mut session: SessionConfig) -> SessionConfig {
    session.tls = TlsPolicy::Legacy;
    session
}

pub struct FamilyMartRequestHandler {
    session: SessionConfig,
    endpoints: Endpoints,
}

#[async_trait]
impl RequestHandler for FamilyMartRequestHandler {
    async fn fetch(&self, order_id: &str) -> Result<RawPayload, TrackError> {
        let session = TransportSession::new(self.session.clone())?;
        let payload = json!({
            "EC_ORDER_NO": order_id,
            "ORDER_NO": order_id,
            "RCV_USER_NAME": null,
        });
        let body = session
            .post_json(&self.endpoints.detail_url, &payload, None)
            .await?
            .error_for_status()?
            .text()
            .await?;

        unwrap_page_method(&body).map(RawPayload::Json)
    }
}

/// Decodes the outer envelope and the JSON string it carries under `d`.
fn unwrap_page_method(body: &str) -> Result<Value, TrackError> {
    let outer: Value = serde_json::from_str(body.trim())
        .map_err(|e| TrackError::decode(format!("FamilyMart envelope is not JSON: {}", e)))?;
    let inner = outer
        .get("d")
        .and_then(Value::as_str)
        .ok_or_else(|| TrackError::decode("FamilyMart envelope without d"))?;
    serde_json::from_str(inner).map_err(|e| TrackError::decode(format!("FamilyMart d is not JSON: {}", e)))
}

pub struct FamilyMartAdapter;

impl ResponseAdapter for FamilyMartAdapter {
    fn convert(&self, order_id: &str, raw: &RawPayload) -> Result<Option<TrackingInfo>, TrackError> {
        let document = raw.as_json()?;
        let list = document
            .get("List")
            .and_then(Value::as_array)
            .ok_or_else(|| TrackError::decode("FamilyMart detail without List"))?;

        // Latest status first.
        let Some(latest) = list.first() else {
            return Ok(None);
        };

        let time = json_text(latest, "ORDER_DATE_R");
        Ok(Some(TrackingInfo::new(
            json_text(latest, "ORDER_NO").unwrap_or_else(|| order_id.to_string()),
            Platform::FamilyMart,
            json_text(latest, "STATUS_D").unwrap_or_default(),
            time.as_deref(),
            &DELIVERED,
            document.clone(),
        )))
    }
}
