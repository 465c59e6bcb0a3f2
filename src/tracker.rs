use log::{error, info, warn};

use crate::adapter::ResponseAdapter;
use crate::error::{ErrorKind, TrackError};
use crate::handler::RequestHandler;
use crate::models::{Platform, TrackingInfo};

/// Identifier shape checked before any network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdShape {
    Any,
    Lengths(&'static [usize]),
}

impl IdShape {
    pub fn check(&self, order_id: &str) -> Result<(), TrackError> {
        let length = order_id.chars().count();
        let valid = match self {
            IdShape::Any => length > 0,
            IdShape::Lengths(allowed) => allowed.contains(&length),
        };
        if valid {
            Ok(())
        } else {
            Err(TrackError::InvalidIdentifier { length })
        }
    }
}

/// Per-carrier façade: request handler plus response adapter behind one call.
pub struct Tracker {
    platform: Platform,
    id_shape: IdShape,
    handler: Box<dyn RequestHandler>,
    adapter: Box<dyn ResponseAdapter>,
}

impl Tracker {
    pub fn new(
        platform: Platform,
        handler: Box<dyn RequestHandler>,
        adapter: Box<dyn ResponseAdapter>,
    ) -> Self {
        Self {
            platform,
            id_shape: IdShape::Any,
            handler,
            adapter,
        }
    }

    pub fn with_id_shape(mut self, id_shape: IdShape) -> Self {
        self.id_shape = id_shape;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Full lookup with the failure kind preserved.
    pub async fn lookup(&self, order_id: &str) -> Result<Option<TrackingInfo>, TrackError> {
        let order_id = order_id.trim();
        self.id_shape.check(order_id)?;
        let raw = self.handler.fetch(order_id).await?;
        self.adapter.convert(order_id, &raw)
    }

    /// Lookup where every failure becomes "no information available".
    pub async fn track_status(&self, order_id: &str) -> Option<TrackingInfo> {
        let redacted = redact(order_id.trim());
        match self.lookup(order_id).await {
            Ok(Some(info)) => {
                info!("[{}] {} -> {}", self.platform, redacted, info.status());
                Some(info)
            }
            Ok(None) => {
                info!("[{}] {} -> no tracking events", self.platform, redacted);
                None
            }
            Err(e) if e.kind() == ErrorKind::InvalidIdentifier => {
                warn!("[{}] {} rejected ({}): {}", self.platform, redacted, e.kind(), e);
                None
            }
            Err(e) => {
                error!("[{}] {} lookup failed ({}): {}", self.platform, redacted, e.kind(), e);
                None
            }
        }
    }
}

/// Masks all but the last four characters of an identifier.
pub fn redact(order_id: &str) -> String {
    let chars: Vec<char> = order_id.chars().collect();
    let visible = if chars.len() > 4 { 4 } else { 0 };
    let masked = chars.len() - visible;
    std::iter::repeat('*')
        .take(masked)
        .chain(chars[masked..].iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_all_but_last_four() {
        assert_eq!(redact("577293125651"), "********5651");
        assert_eq!(redact("1234"), "****");
        assert_eq!(redact(""), "");
    }

    #[test]
    fn shape_checks_lengths() {
        let shape = IdShape::Lengths(&[8, 11, 12]);
        assert!(shape.check("12345678").is_ok());
        assert!(shape.check("87717609641").is_ok());
        assert!(matches!(
            shape.check("1234567890"),
            Err(TrackError::InvalidIdentifier { length: 10 })
        ));
    }

    #[test]
    fn any_shape_rejects_only_empty() {
        assert!(IdShape::Any.check("x").is_ok());
        assert!(IdShape::Any.check("").is_err());
    }
}
