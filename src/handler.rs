use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;
use std::sync::Arc;

use crate::error::TrackError;
use crate::handshake::{self, TokenMap};
use crate::models::Platform;
use crate::oracle::ChallengeOracle;
use crate::session::{SessionConfig, TransportSession};
use crate::solver::{ChallengeConfig, RetryingChallengeSolver};

/// Undecoded final payload of a carrier exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Html(String),
    Json(Value),
}

impl RawPayload {
    pub fn as_html(&self) -> Result<&str, TrackError> {
        match self {
            RawPayload::Html(html) => Ok(html),
            RawPayload::Json(_) => Err(TrackError::decode("expected an HTML payload, got JSON")),
        }
    }

    pub fn as_json(&self) -> Result<&Value, TrackError> {
        match self {
            RawPayload::Json(value) => Ok(value),
            RawPayload::Html(_) => Err(TrackError::decode("expected a JSON payload, got HTML")),
        }
    }
}

/// Performs the network exchange for one lookup and returns the raw payload.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn fetch(&self, order_id: &str) -> Result<RawPayload, TrackError>;
}

/// Field names of the primary submission.
#[derive(Debug, Clone)]
pub struct SubmissionForm {
    pub order_field: &'static str,
    pub code_field: &'static str,
    pub static_fields: &'static [(&'static str, &'static str)],
}

impl SubmissionForm {
    /// Forwarded tokens first, then fixed fields, then the order id and code.
    pub fn build(&self, order_id: &str, code: &str, tokens: &TokenMap) -> Vec<(String, String)> {
        tokens
            .iter()
            .chain(self.static_fields.iter().copied())
            .chain([(self.order_field, order_id), (self.code_field, code)])
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// Third request of carriers whose primary response is a thin redirect stub.
#[derive(Debug, Clone)]
pub struct ContinuationStep {
    pub url: String,
    pub fields: &'static [&'static str],
}

/// Detects an explicit "wrong code" answer to the primary submission.
/// A hit is charged to the solver's attempt budget and the challenge is solved again.
pub type RejectionCheck = fn(&str) -> Option<String>;

/// Carrier-specific description of a challenge-gated exchange.
#[derive(Debug, Clone)]
pub struct ChallengeFlow {
    pub challenge: ChallengeConfig,
    pub submit_url: String,
    pub form: SubmissionForm,
    pub rejection: Option<RejectionCheck>,
    pub continuation: Option<ContinuationStep>,
}

/// Drives solve → submit → (continue) for any carrier described by a [`ChallengeFlow`].
pub struct ChallengeRequestHandler {
    platform: Platform,
    session: SessionConfig,
    flow: ChallengeFlow,
    oracle: Arc<dyn ChallengeOracle>,
}

impl ChallengeRequestHandler {
    pub fn new(
        platform: Platform,
        session: SessionConfig,
        flow: ChallengeFlow,
        oracle: Arc<dyn ChallengeOracle>,
    ) -> Self {
        Self {
            platform,
            session,
            flow,
            oracle,
        }
    }

    pub fn flow(&self) -> &ChallengeFlow {
        &self.flow
    }
}

#[async_trait]
impl RequestHandler for ChallengeRequestHandler {
    async fn fetch(&self, order_id: &str) -> Result<RawPayload, TrackError> {
        let mut session = TransportSession::new(self.session.clone())?;

        let mut solver = RetryingChallengeSolver::new(self.platform, &self.flow.challenge, self.oracle.as_ref());
        let primary = loop {
            let solved = solver.solve(&mut session).await?;
            debug!(
                "[{}] Submitting query with {} forwarded tokens after {} retries",
                self.platform,
                solved.tokens.len(),
                solved.retries
            );

            let form = self.flow.form.build(order_id, &solved.code, &solved.tokens);
            let primary = session
                .post_form(&self.flow.submit_url, &form, None)
                .await?
                .error_for_status()?
                .text()
                .await?;
            if primary.trim().is_empty() {
                return Err(TrackError::unexpected(&self.flow.submit_url, "empty response to primary query"));
            }

            match self.flow.rejection.and_then(|check| check(&primary)) {
                Some(message) => solver.reject(&mut session, message).await?,
                None => break primary,
            }
        };

        let Some(step) = &self.flow.continuation else {
            return Ok(RawPayload::Html(primary));
        };

        let fields = handshake::extract_continuation_fields(&primary, step.fields)?;
        let form: Vec<(String, String)> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        info!("[{}] Following continuation to final result", self.platform);
        let result = session
            .post_form(&step.url, &form, None)
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(RawPayload::Html(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_includes_tokens_fixed_fields_and_code() {
        let form = SubmissionForm {
            order_field: "txtProductNum",
            code_field: "tbChkCode",
            static_fields: &[("__EVENTTARGET", "submit"), ("txtPage", "1")],
        };
        let mut tokens = TokenMap::default();
        tokens.insert("__VIEWSTATE", "vs");

        let body = form.build("87717609641", "0412", &tokens);
        assert_eq!(
            body,
            vec![
                ("__VIEWSTATE".to_string(), "vs".to_string()),
                ("__EVENTTARGET".to_string(), "submit".to_string()),
                ("txtPage".to_string(), "1".to_string()),
                ("txtProductNum".to_string(), "87717609641".to_string()),
                ("tbChkCode".to_string(), "0412".to_string()),
            ]
        );
    }

    #[test]
    fn optional_tokens_only_when_present() {
        let form = SubmissionForm {
            order_field: "id",
            code_field: "code",
            static_fields: &[],
        };
        let tokens = TokenMap::default();
        let body = form.build("A", "B", &tokens);
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn payload_accessors_check_shape() {
        let html = RawPayload::Html("<p/>".to_string());
        assert!(html.as_html().is_ok());
        assert!(matches!(html.as_json(), Err(TrackError::Decode(_))));
    }
}
