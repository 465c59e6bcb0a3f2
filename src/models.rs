use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;
use strum::{Display, EnumIter, EnumString};

/// Supported carriers. Parsing accepts the display tag or a snake_case alias,
/// case-insensitively.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum Platform {
    #[serde(rename = "7-11")]
    #[strum(to_string = "7-11", serialize = "seven_eleven", serialize = "711")]
    SevenEleven,
    #[serde(rename = "FamilyMart")]
    #[strum(to_string = "FamilyMart", serialize = "family_mart")]
    FamilyMart,
    #[serde(rename = "OKMart")]
    #[strum(to_string = "OKMart", serialize = "ok_mart")]
    OKMart,
    #[serde(rename = "HCT")]
    #[strum(to_string = "HCT")]
    Hct,
    #[serde(rename = "T-CAT")]
    #[strum(to_string = "T-CAT", serialize = "tcat", serialize = "t_cat")]
    Tcat,
    #[serde(rename = "E-CAN")]
    #[strum(to_string = "E-CAN", serialize = "ecan", serialize = "e_can")]
    Ecan,
    #[serde(rename = "KTJ")]
    #[strum(to_string = "KTJ")]
    Ktj,
}

/// One row of a carrier's status history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub time: String,
    pub status: String,
    pub description: String,
    pub station: String,
}

/// Canonical result of one lookup. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingInfo {
    order_id: String,
    platform: Platform,
    status: String,
    time: Option<String>,
    is_delivered: bool,
    raw_data: Value,
}

impl TrackingInfo {
    /// Builds a record whose delivered flag is derived from `status`.
    pub fn new(
        order_id: impl Into<String>,
        platform: Platform,
        status: impl Into<String>,
        time: Option<&str>,
        keywords: &DeliveryKeywords,
        raw_data: Value,
    ) -> Self {
        let status = status.into();
        let is_delivered = keywords.matches(&status);
        Self::assemble(order_id.into(), platform, status, time, is_delivered, raw_data)
    }

    /// Like [`TrackingInfo::new`], but the delivered flag is evaluated against
    /// `evidence` (the latest event's status plus description) instead.
    pub fn with_evidence(
        order_id: impl Into<String>,
        platform: Platform,
        status: impl Into<String>,
        time: Option<&str>,
        keywords: &DeliveryKeywords,
        evidence: &str,
        raw_data: Value,
    ) -> Self {
        let is_delivered = keywords.matches(evidence);
        Self::assemble(order_id.into(), platform, status.into(), time, is_delivered, raw_data)
    }

    fn assemble(
        order_id: String,
        platform: Platform,
        status: String,
        time: Option<&str>,
        is_delivered: bool,
        raw_data: Value,
    ) -> Self {
        Self {
            order_id,
            platform,
            status,
            time: time.and_then(normalize_time),
            is_delivered,
            raw_data,
        }
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn time(&self) -> Option<&str> {
        self.time.as_deref()
    }

    pub fn is_delivered(&self) -> bool {
        self.is_delivered
    }

    /// Carrier-specific diagnostics. Opaque to generic callers.
    pub fn raw_data(&self) -> &Value {
        &self.raw_data
    }
}

/// Phrases that mark a final delivery or pickup, matched as case-sensitive substrings.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryKeywords(pub &'static [&'static str]);

impl DeliveryKeywords {
    pub fn matches(&self, text: &str) -> bool {
        !text.is_empty() && self.0.iter().any(|keyword| text.contains(keyword))
    }
}

/// Where a carrier puts its most recent event in the parsed list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrder {
    NewestFirst,
    OldestFirst,
}

impl EventOrder {
    pub fn latest<'a, T>(&self, events: &'a [T]) -> Option<&'a T> {
        match self {
            EventOrder::NewestFirst => events.first(),
            EventOrder::OldestFirst => events.last(),
        }
    }
}

const TIME_FORMATS: &[&str] = &[
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Normalizes a carrier timestamp to `YYYY/MM/DD HH:MM`.
///
/// Unknown formats are passed through trimmed; blank input yields `None`.
pub fn normalize_time(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&collapsed, format).ok())
        .map(|parsed| parsed.format("%Y/%m/%d %H:%M").to_string())
        .or_else(|| Some(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    const FINAL: DeliveryKeywords = DeliveryKeywords(&["已送達", "配達完成"]);

    #[test]
    fn platform_parses_tags_and_aliases() {
        assert_eq!(Platform::from_str("7-11").unwrap(), Platform::SevenEleven);
        assert_eq!(Platform::from_str("seven_eleven").unwrap(), Platform::SevenEleven);
        assert_eq!(Platform::from_str("hct").unwrap(), Platform::Hct);
        assert_eq!(Platform::from_str("T-CAT").unwrap(), Platform::Tcat);
        assert_eq!(Platform::from_str("familymart").unwrap(), Platform::FamilyMart);
        assert!(Platform::from_str("pelican").is_err());
    }

    #[test]
    fn platform_display_is_the_canonical_tag() {
        assert_eq!(Platform::SevenEleven.to_string(), "7-11");
        assert_eq!(Platform::Ecan.to_string(), "E-CAN");
        assert_eq!(serde_json::to_value(Platform::Ktj).unwrap(), json!("KTJ"));
    }

    #[test]
    fn keywords_match_substrings_case_sensitively() {
        let latin = DeliveryKeywords(&["Delivered"]);
        assert!(latin.matches("Parcel Delivered to store"));
        assert!(!latin.matches("parcel delivered to store"));
        assert!(FINAL.matches("貨件已送達收件人"));
        assert!(!FINAL.matches("配送中"));
        assert!(!FINAL.matches(""));
    }

    #[test]
    fn delivered_flag_follows_status() {
        let info = TrackingInfo::new("A1", Platform::Tcat, "配達完成(台北)", None, &FINAL, json!([]));
        assert!(info.is_delivered());

        let info = TrackingInfo::new("A1", Platform::Tcat, "", None, &FINAL, json!([]));
        assert!(!info.is_delivered());
    }

    #[test]
    fn evidence_can_differ_from_status() {
        let info = TrackingInfo::with_evidence(
            "A1",
            Platform::Ecan,
            "配送(台中)",
            Some("2025/12/19 14:42"),
            &FINAL,
            "配送 貨件已送達",
            json!([]),
        );
        assert!(info.is_delivered());
        assert_eq!(info.status(), "配送(台中)");
    }

    #[test]
    fn latest_respects_ordering() {
        let events = ["new", "old"];
        assert_eq!(EventOrder::NewestFirst.latest(&events), Some(&"new"));
        assert_eq!(EventOrder::OldestFirst.latest(&events), Some(&"old"));
        assert_eq!(EventOrder::NewestFirst.latest::<&str>(&[]), None);
    }

    #[test]
    fn normalizes_known_time_formats() {
        assert_eq!(normalize_time("2025/12/19 14:42").as_deref(), Some("2025/12/19 14:42"));
        assert_eq!(normalize_time("2025/12/19 14:42:07").as_deref(), Some("2025/12/19 14:42"));
        assert_eq!(normalize_time("2025-12-16T05:08:33.000").as_deref(), Some("2025/12/16 05:08"));
        assert_eq!(normalize_time("2025-12-16 09:14").as_deref(), Some("2025/12/16 09:14"));
        assert_eq!(normalize_time(" 2025/12/19\n 14:42 ").as_deref(), Some("2025/12/19 14:42"));
    }

    #[test]
    fn unknown_time_passes_through() {
        assert_eq!(normalize_time("12月19日 下午").as_deref(), Some("12月19日 下午"));
        assert_eq!(normalize_time("   "), None);
    }
}
