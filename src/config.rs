use anyhow::{Context, Result, bail};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::session::{SessionConfig, TlsPolicy};
use crate::solver::{BackoffWindow, RetrySettings};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; ParcelTracker/1.0)";
const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-TW,zh;q=0.9,en;q=0.8";
const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub user_agent: String,
    pub accept_language: String,
    pub max_attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub ocr_command: String,
    pub cron_schedule: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(15),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            max_attempts: 5,
            backoff_min: Duration::from_millis(500),
            backoff_max: Duration::from_millis(1500),
            ocr_command: "tesseract".to_string(),
            cron_schedule: "0 */30 * * * *".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// # Environment Variables
    /// - `TRACKER_CONNECT_TIMEOUT_SECS`: Optional - connect timeout (default: 5)
    /// - `TRACKER_READ_TIMEOUT_SECS`: Optional - read timeout (default: 15)
    /// - `TRACKER_USER_AGENT`: Optional - User-Agent header
    /// - `TRACKER_ACCEPT_LANGUAGE`: Optional - Accept-Language header
    /// - `TRACKER_MAX_ATTEMPTS`: Optional - challenge attempt ceiling (default: 5)
    /// - `TRACKER_BACKOFF_MIN_MS`: Optional - lower bound of the retry delay (default: 500)
    /// - `TRACKER_BACKOFF_MAX_MS`: Optional - upper bound of the retry delay (default: 1500)
    /// - `OCR_COMMAND`: Optional - OCR program for image challenges (default: "tesseract")
    /// - `CRON_SCHEDULE`: Optional - watch-mode cron expression (default: "0 */30 * * * *")
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Config::from_env`], reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let connect_timeout = parse_var(&lookup, "TRACKER_CONNECT_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.connect_timeout);

        let read_timeout = parse_var(&lookup, "TRACKER_READ_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.read_timeout);

        if connect_timeout.is_zero() || read_timeout.is_zero() {
            bail!("TRACKER_CONNECT_TIMEOUT_SECS and TRACKER_READ_TIMEOUT_SECS must be positive");
        }

        let user_agent = text_var(&lookup, "TRACKER_USER_AGENT")?.unwrap_or(defaults.user_agent);

        let accept_language =
            text_var(&lookup, "TRACKER_ACCEPT_LANGUAGE")?.unwrap_or(defaults.accept_language);

        let max_attempts = parse_var(&lookup, "TRACKER_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts);

        if max_attempts == 0 {
            bail!("TRACKER_MAX_ATTEMPTS must be at least 1");
        }

        let backoff_min = parse_var(&lookup, "TRACKER_BACKOFF_MIN_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff_min);

        let backoff_max = parse_var(&lookup, "TRACKER_BACKOFF_MAX_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff_max);

        if backoff_min > backoff_max {
            bail!("TRACKER_BACKOFF_MIN_MS cannot exceed TRACKER_BACKOFF_MAX_MS");
        }

        let ocr_command = text_var(&lookup, "OCR_COMMAND")?.unwrap_or(defaults.ocr_command);

        let cron_schedule = text_var(&lookup, "CRON_SCHEDULE")?.unwrap_or(defaults.cron_schedule);

        Ok(Config {
            connect_timeout,
            read_timeout,
            user_agent,
            accept_language,
            max_attempts,
            backoff_min,
            backoff_max,
            ocr_command,
            cron_schedule,
        })
    }

    /// Transport settings shared by every carrier before carrier-specific tweaks.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            user_agent: self.user_agent.clone(),
            accept_language: self.accept_language.clone(),
            accept: DEFAULT_ACCEPT.to_string(),
            follow_redirects: true,
            tls: TlsPolicy::Default,
        }
    }

    pub fn retry_settings(&self) -> RetrySettings {
        RetrySettings {
            max_attempts: self.max_attempts,
            backoff: BackoffWindow::new(self.backoff_min, self.backoff_max),
        }
    }
}

fn text_var<F>(lookup: &F, key: &str) -> Result<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => bail!("{} cannot be empty", key),
        Some(value) => Ok(Some(value.trim().to_string())),
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    text_var(lookup, key)?
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("{} has an invalid value: {}", key, value))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.backoff_min, Duration::from_millis(500));
        assert_eq!(config.ocr_command, "tesseract");
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::from_lookup(lookup(&[
            ("TRACKER_MAX_ATTEMPTS", "3"),
            ("TRACKER_READ_TIMEOUT_SECS", "40"),
            ("OCR_COMMAND", "/opt/ocr/bin/tesseract"),
        ]))
        .unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.read_timeout, Duration::from_secs(40));
        assert_eq!(config.ocr_command, "/opt/ocr/bin/tesseract");
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(Config::from_lookup(lookup(&[("TRACKER_MAX_ATTEMPTS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("TRACKER_MAX_ATTEMPTS", "many")])).is_err());
        assert!(Config::from_lookup(lookup(&[("OCR_COMMAND", "  ")])).is_err());
        assert!(Config::from_lookup(lookup(&[
            ("TRACKER_BACKOFF_MIN_MS", "2000"),
            ("TRACKER_BACKOFF_MAX_MS", "100"),
        ]))
        .is_err());
    }

    #[test]
    fn session_config_carries_headers_and_timeouts() {
        let config = Config::default();
        let session = config.session_config();
        assert_eq!(session.user_agent, config.user_agent);
        assert_eq!(session.read_timeout, config.read_timeout);
        assert!(session.follow_redirects);
    }
}
