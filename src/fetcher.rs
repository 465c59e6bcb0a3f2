use futures::future::join_all;
use std::fmt;
use std::str::FromStr;
use tokio::sync::Mutex;

use crate::carriers::tracker_for;
use crate::config::Config;
use crate::error::TrackError;
use crate::models::{Platform, TrackingInfo};

/// A shipment under watch, written `carrier:order-id` on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shipment {
    pub platform: Platform,
    pub order_id: String,
}

impl FromStr for Shipment {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (carrier, order_id) = s
            .split_once(':')
            .ok_or_else(|| TrackError::UnknownCarrier(s.to_string()))?;
        let platform = Platform::from_str(carrier.trim())
            .map_err(|_| TrackError::UnknownCarrier(carrier.to_string()))?;
        let order_id = order_id.trim();
        if order_id.is_empty() {
            return Err(TrackError::InvalidIdentifier { length: 0 });
        }
        Ok(Self {
            platform,
            order_id: order_id.to_string(),
        })
    }
}

impl fmt::Display for Shipment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.order_id)
    }
}

/// Re-polls a list of shipments until each one is delivered.
pub struct ShipmentWatcher {
    config: Config,
    pending: Mutex<Vec<Shipment>>,
}

impl ShipmentWatcher {
    pub fn new(config: Config, shipments: Vec<Shipment>) -> Self {
        let mut pending: Vec<Shipment> = Vec::with_capacity(shipments.len());
        for shipment in shipments {
            if !pending.contains(&shipment) {
                pending.push(shipment);
            }
        }
        Self {
            config,
            pending: Mutex::new(pending),
        }
    }

    pub async fn pending(&self) -> Vec<Shipment> {
        self.pending.lock().await.clone()
    }

    pub async fn is_finished(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Looks up every pending shipment once, each with a fresh session, and
    /// drops the ones reported delivered.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut pending = self.pending.lock().await;

        let lookups = pending.iter().map(|shipment| async move {
            let tracker = tracker_for(shipment.platform, &self.config);
            tracker.track_status(&shipment.order_id).await
        });
        let results: Vec<Option<TrackingInfo>> = join_all(lookups).await;

        let mut remaining = Vec::with_capacity(pending.len());
        for (shipment, result) in pending.drain(..).zip(results) {
            println!("🚚 Carrier: {}", shipment.platform);
            println!("📦 Tracking: {}", shipment.order_id);
            match result {
                Some(info) => {
                    println!("📍 Status: {}", info.status());
                    if let Some(time) = info.time() {
                        println!("🕒 Time: {}", time);
                    }
                    if info.is_delivered() {
                        println!("✅ Delivered, no longer watching");
                    } else {
                        println!("ℹ️  Not delivered yet");
                        remaining.push(shipment);
                    }
                }
                None => {
                    println!("❔ No information available");
                    remaining.push(shipment);
                }
            }
            println!("================================");
        }

        *pending = remaining;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_carrier_and_order_id() {
        let shipment: Shipment = "hct:6918034431".parse().unwrap();
        assert_eq!(shipment.platform, Platform::Hct);
        assert_eq!(shipment.order_id, "6918034431");
        assert_eq!(shipment.to_string(), "HCT:6918034431");
    }

    #[test]
    fn rejects_unknown_carrier_and_empty_id() {
        assert!(matches!(
            "pelican:123".parse::<Shipment>(),
            Err(TrackError::UnknownCarrier(_))
        ));
        assert!(matches!(
            "123456".parse::<Shipment>(),
            Err(TrackError::UnknownCarrier(_))
        ));
        assert!(matches!(
            "7-11: ".parse::<Shipment>(),
            Err(TrackError::InvalidIdentifier { length: 0 })
        ));
    }

    #[tokio::test]
    async fn duplicate_shipments_are_watched_once() {
        let shipments = vec![
            "T-CAT:907012345678".parse().unwrap(),
            "tcat:907012345678".parse().unwrap(),
        ];
        let watcher = ShipmentWatcher::new(Config::default(), shipments);
        assert_eq!(watcher.pending().await.len(), 1);
        assert!(!watcher.is_finished().await);
    }

    #[tokio::test]
    async fn empty_watcher_is_finished() {
        let watcher = ShipmentWatcher::new(Config::default(), Vec::new());
        watcher.run().await.unwrap();
        assert!(watcher.is_finished().await);
    }
}
