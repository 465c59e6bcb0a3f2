//! One module per supported carrier. Each exposes its endpoints, its
//! delivered keywords and a `tracker` constructor; [`tracker_for`] wires them
//! to a [`Config`].

pub mod ecan;
pub mod family_mart;
pub mod hct;
pub mod ktj;
pub mod okmart;
pub mod seven_eleven;
pub mod tcat;

use std::sync::Arc;

use crate::config::Config;
use crate::models::Platform;
use crate::oracle::CommandOracle;
use crate::tracker::Tracker;

/// Builds the tracker for `platform` with production endpoints.
pub fn tracker_for(platform: Platform, config: &Config) -> Tracker {
    let session = config.session_config();
    match platform {
        Platform::SevenEleven => seven_eleven::tracker(
            session,
            config.retry_settings(),
            Arc::new(CommandOracle::new(&config.ocr_command, Some(seven_eleven::CODE_CHARSET))),
            seven_eleven::Endpoints::default(),
        ),
        Platform::Hct => hct::tracker(
            session,
            config.retry_settings(),
            Arc::new(CommandOracle::new(&config.ocr_command, None)),
            hct::Endpoints::default(),
        ),
        Platform::Tcat => tcat::tracker(session, tcat::Endpoints::default()),
        Platform::Ecan => ecan::tracker(session, ecan::Endpoints::default()),
        Platform::Ktj => ktj::tracker(session, ktj::Endpoints::default()),
        Platform::FamilyMart => family_mart::tracker(session, family_mart::Endpoints::default()),
        Platform::OKMart => okmart::tracker(session, okmart::Endpoints::default()),
    }
}
