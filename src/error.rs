use strum::{Display, EnumIter};
use thiserror::Error;

/// Failure raised by a challenge oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("failed to run classifier `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("classifier exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("classifier produced no output")]
    Empty,
}

/// Every way a lookup can fail below the tracker façade.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected response from {url}: {reason}")]
    UnexpectedResponse { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    ClientSetup(String),

    #[error("challenge oracle failed: {0}")]
    Oracle(#[from] OracleError),

    #[error("challenge unsolved after {attempts} attempts (last failure: {last_failure})")]
    ChallengeUnsolved { attempts: u32, last_failure: String },

    #[error("challenge code rejected by carrier: {0}")]
    ChallengeRejected(String),

    #[error("missing required token `{0}`")]
    MissingRequiredToken(String),

    #[error("missing continuation fields: {}", .0.join(", "))]
    MissingContinuationFields(Vec<String>),

    #[error("unrecognized payload: {0}")]
    Decode(String),

    /// The challenge page or the oracle's answer could not be used.
    #[error("malformed challenge at {url}: {reason}")]
    MalformedChallenge { url: String, reason: String },

    #[error("identifier of length {length} does not match the carrier's shape")]
    InvalidIdentifier { length: usize },

    #[error("unknown carrier `{0}`")]
    UnknownCarrier(String),
}

/// Stable, loggable name of a failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ErrorKind {
    TransportError,
    OracleError,
    ChallengeUnsolved,
    ChallengeRejected,
    MissingRequiredToken,
    MissingContinuationFields,
    DecodeError,
    InvalidIdentifier,
    UnknownCarrier,
}

impl TrackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrackError::Transport { .. }
            | TrackError::UnexpectedResponse { .. }
            | TrackError::ClientSetup(_) => ErrorKind::TransportError,
            TrackError::Oracle(_) => ErrorKind::OracleError,
            TrackError::ChallengeUnsolved { .. } => ErrorKind::ChallengeUnsolved,
            TrackError::ChallengeRejected(_) => ErrorKind::ChallengeRejected,
            TrackError::MissingRequiredToken(_) => ErrorKind::MissingRequiredToken,
            TrackError::MissingContinuationFields(_) => ErrorKind::MissingContinuationFields,
            TrackError::Decode(_) | TrackError::MalformedChallenge { .. } => ErrorKind::DecodeError,
            TrackError::InvalidIdentifier { .. } => ErrorKind::InvalidIdentifier,
            TrackError::UnknownCarrier(_) => ErrorKind::UnknownCarrier,
        }
    }

    pub(crate) fn unexpected(url: &str, reason: impl Into<String>) -> Self {
        TrackError::UnexpectedResponse {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(reason: impl Into<String>) -> Self {
        TrackError::Decode(reason.into())
    }

    pub(crate) fn malformed_challenge(url: &str, reason: impl Into<String>) -> Self {
        TrackError::MalformedChallenge {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}
