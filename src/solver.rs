//! Bounded retry loop around an image challenge.
//!
//! One attempt walks `Fetching -> Extracting -> Classifying -> Validating`.
//! Any soft failure moves to `Retrying`, which either applies the reset policy
//! and a randomized backoff before the next attempt, or ends in `Exhausted`
//! once the attempt ceiling is reached. A code the carrier refuses after
//! submission counts as a failed attempt as well.

use log::{debug, info, warn};
use rand::Rng;
use std::time::Duration;
use strum::Display;
use url::Url;

use crate::error::TrackError;
use crate::handshake::{self, ImageLocator, TokenMap};
use crate::models::Platform;
use crate::oracle::ChallengeOracle;
use crate::session::TransportSession;

/// What happens to the session between two attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPolicy {
    /// Keep cookies; the challenge image is tied to the page that served it.
    Reuse,
    /// Start from a fresh session; the carrier poisons state after a miss.
    Recreate,
}

/// Expected form of a solved challenge code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeShape {
    ExactLength(usize),
    DigitsOnly,
    DigitsOfLength(usize),
}

impl CodeShape {
    pub fn accepts(&self, candidate: &str) -> bool {
        let digits = !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_digit());
        match self {
            CodeShape::ExactLength(len) => candidate.chars().count() == *len,
            CodeShape::DigitsOnly => digits,
            CodeShape::DigitsOfLength(len) => digits && candidate.len() == *len,
        }
    }
}

/// Uniformly sampled delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffWindow {
    min: Duration,
    max: Duration,
}

impl BackoffWindow {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let millis = rand::thread_rng().gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(millis as u64)
    }
}

impl Default for BackoffWindow {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_millis(1500))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff: BackoffWindow,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffWindow::default(),
        }
    }
}

/// Everything the solver needs to know about one carrier's challenge page.
#[derive(Debug, Clone)]
pub struct ChallengeConfig {
    pub page_url: String,
    pub required_tokens: &'static [&'static str],
    pub optional_tokens: &'static [&'static str],
    pub image_locator: ImageLocator,
    pub shape: CodeShape,
    pub reset_policy: ResetPolicy,
    pub retry: RetrySettings,
}

/// Tokens and code from the successful attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolvedChallenge {
    pub tokens: TokenMap,
    pub code: String,
    /// Reset/backoff cycles spent before success.
    pub retries: u32,
}

#[derive(Default)]
struct ChallengeAttempt {
    tokens: Option<TokenMap>,
    candidate: Option<String>,
}

/// Solves one carrier's challenge within a single attempt budget.
///
/// The budget covers the whole lookup: a code the carrier refuses after
/// submission is charged through [`RetryingChallengeSolver::reject`] and the
/// next [`RetryingChallengeSolver::solve`] continues from the same count.
pub struct RetryingChallengeSolver<'a> {
    platform: Platform,
    config: &'a ChallengeConfig,
    oracle: &'a dyn ChallengeOracle,
    attempts: u32,
}

impl<'a> RetryingChallengeSolver<'a> {
    pub fn new(platform: Platform, config: &'a ChallengeConfig, oracle: &'a dyn ChallengeOracle) -> Self {
        Self {
            platform,
            config,
            oracle,
            attempts: 0,
        }
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Runs attempts until one validates or the ceiling is reached.
    ///
    /// Only a failure to rebuild the session escapes early; every other
    /// failure is retried and reported as `ChallengeUnsolved` at the end.
    pub async fn solve(&mut self, session: &mut TransportSession) -> Result<SolvedChallenge, TrackError> {
        loop {
            self.attempts += 1;
            let mut attempt = ChallengeAttempt::default();

            let failure = match self.attempt(session, &mut attempt).await {
                Ok(()) => match (attempt.tokens.take(), attempt.candidate.take()) {
                    (Some(tokens), Some(code)) => {
                        info!("[{}] Challenge solved on attempt {}", self.platform, self.attempts);
                        return Ok(SolvedChallenge {
                            tokens,
                            code,
                            retries: self.attempts - 1,
                        });
                    }
                    _ => at(Stage::Validating)(TrackError::decode("attempt finished without a code")),
                },
                Err(failure) => failure,
            };

            self.recover(session, failure).await?;
        }
    }

    /// Records that the carrier refused the last solved code.
    ///
    /// Returns `ChallengeUnsolved` when no attempt is left; otherwise the
    /// session is prepared for the next [`solve`](Self::solve).
    pub async fn reject(&mut self, session: &mut TransportSession, message: String) -> Result<(), TrackError> {
        let failure = at(Stage::Submitting)(TrackError::ChallengeRejected(message));
        self.recover(session, failure).await
    }

    async fn recover(&self, session: &mut TransportSession, failure: StageFailure) -> Result<(), TrackError> {
        let max_attempts = self.config.retry.max_attempts.max(1);
        warn!(
            "[{}] Challenge attempt {}/{} failed while {} ({}): {}",
            self.platform,
            self.attempts,
            max_attempts,
            failure.stage,
            failure.error.kind(),
            failure.error
        );

        if self.attempts >= max_attempts {
            return Err(TrackError::ChallengeUnsolved {
                attempts: self.attempts,
                last_failure: failure.error.to_string(),
            });
        }

        if self.config.reset_policy == ResetPolicy::Recreate {
            session.reset()?;
        }

        let delay = self.config.retry.backoff.sample();
        debug!("[{}] Backing off for {:?}", self.platform, delay);
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn attempt(
        &self,
        session: &TransportSession,
        attempt: &mut ChallengeAttempt,
    ) -> Result<(), StageFailure> {
        let page_url = self.config.page_url.as_str();
        let html = fetch_page(session, page_url).await.map_err(at(Stage::Fetching))?;

        let tokens = handshake::extract_tokens(
            &html,
            self.config.required_tokens,
            self.config.optional_tokens,
        )
        .map_err(at(Stage::Extracting))?;
        let image_url = handshake::find_challenge_image_url(&html, page_url, &self.config.image_locator)
            .and_then(|url| require_image(page_url, url))
            .map_err(at(Stage::Extracting))?;
        attempt.tokens = Some(tokens);

        let image = fetch_image(session, image_url.as_str())
            .await
            .map_err(at(Stage::Fetching))?;

        let candidate = self
            .oracle
            .classify(&image)
            .await
            .map(|text| text.trim().to_string())
            .map_err(|e| at(Stage::Classifying)(e.into()))?;

        check_candidate(self.config.shape, image_url.as_str(), &candidate).map_err(at(Stage::Validating))?;

        attempt.candidate = Some(candidate);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Display)]
enum Stage {
    Fetching,
    Extracting,
    Classifying,
    Validating,
    Submitting,
}

struct StageFailure {
    stage: Stage,
    error: TrackError,
}

fn at(stage: Stage) -> impl Fn(TrackError) -> StageFailure {
    move |error| StageFailure { stage, error }
}

fn require_image(page_url: &str, image_url: Option<Url>) -> Result<Url, TrackError> {
    image_url.ok_or_else(|| TrackError::malformed_challenge(page_url, "challenge image not found"))
}

fn check_candidate(shape: CodeShape, image_url: &str, candidate: &str) -> Result<(), TrackError> {
    if shape.accepts(candidate) {
        Ok(())
    } else {
        Err(TrackError::malformed_challenge(
            image_url,
            format!("candidate {:?} does not match {:?}", candidate, shape),
        ))
    }
}

async fn fetch_page(session: &TransportSession, url: &str) -> Result<String, TrackError> {
    let page = session.get_without_redirects(url).await?;
    let status = page.status();
    if status.is_redirection() {
        return Err(TrackError::unexpected(url, format!("redirected with status {}", status)));
    }
    let html = page.error_for_status()?.text().await?;
    if html.trim().is_empty() {
        return Err(TrackError::unexpected(url, "empty challenge page"));
    }
    Ok(html)
}

async fn fetch_image(session: &TransportSession, url: &str) -> Result<Vec<u8>, TrackError> {
    let image = session.get(url, None).await?.error_for_status()?.bytes().await?;
    if image.is_empty() {
        return Err(TrackError::unexpected(url, "empty challenge image"));
    }
    Ok(image)
}
