//! Shipment status lookup for Taiwanese carriers and convenience-store
//! logistics, including sites that gate their results behind an image code.

pub mod adapter;
pub mod carriers;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod handler;
pub mod handshake;
pub mod models;
pub mod oracle;
pub mod scheduler;
pub mod session;
pub mod solver;
pub mod tracker;

use std::str::FromStr;

pub use config::Config;
pub use error::{ErrorKind, OracleError, TrackError};
pub use models::{Platform, TrackingInfo};
pub use tracker::Tracker;

/// Looks up `order_id` with `platform`. Every failure is logged and reported
/// as `None`.
pub async fn track(platform: Platform, order_id: &str, config: &Config) -> Option<TrackingInfo> {
    carriers::tracker_for(platform, config).track_status(order_id).await
}

/// Same as [`track`], resolving the carrier from its tag or alias first.
pub async fn track_by_name(
    name: &str,
    order_id: &str,
    config: &Config,
) -> Result<Option<TrackingInfo>, TrackError> {
    let platform =
        Platform::from_str(name.trim()).map_err(|_| TrackError::UnknownCarrier(name.to_string()))?;
    Ok(track(platform, order_id, config).await)
}
