//! Bounded polling of the portal's result region.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::adapter::HostAdapter;
use crate::errors::LookupError;

/// A 9-digit MSISDN starting with 7, standing alone in the text.
///
/// Digits glued to other digits do not match, so `"255717711075"` (country code
/// prefixed) and the nine digits inside an echoed 20-digit ICCID are rejected.
pub const DEFAULT_FOUND_PATTERN: &str = r"\b7\d{8}\b";

pub const DEFAULT_NOT_FOUND_PHRASES: [&str; 3] = ["not found", "no record", "subscriber not found"];

static DEFAULT_FOUND_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_FOUND_PATTERN).expect("default found pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Deadline measured from the first probe.
    #[serde(with = "crate::duration_parser")]
    pub timeout: Duration,
    /// Pause between probe reads.
    #[serde(with = "crate::duration_parser")]
    pub interval: Duration,
    pub found_pattern: String,
    pub not_found_phrases: Vec<String>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(7),
            interval: Duration::from_millis(200),
            found_pattern: DEFAULT_FOUND_PATTERN.to_string(),
            not_found_phrases: DEFAULT_NOT_FOUND_PHRASES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> Result<(), LookupError> {
        if self.interval.is_zero() {
            return Err(LookupError::InvalidConfig(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.interval > self.timeout {
            return Err(LookupError::InvalidConfig(format!(
                "poll interval {:?} exceeds poll timeout {:?}",
                self.interval, self.timeout
            )));
        }
        Regex::new(&self.found_pattern).map_err(|e| {
            LookupError::InvalidConfig(format!(
                "found pattern {:?} does not compile: {e}",
                self.found_pattern
            ))
        })?;
        Ok(())
    }
}

/// Terminal state of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Found(String),
    NotFound,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ResultPoller {
    timeout: Duration,
    interval: Duration,
    found: Regex,
    not_found_phrases: Vec<String>,
}

impl Default for ResultPoller {
    fn default() -> Self {
        let config = PollerConfig::default();
        Self {
            timeout: config.timeout,
            interval: config.interval,
            found: DEFAULT_FOUND_REGEX.clone(),
            not_found_phrases: config.not_found_phrases,
        }
    }
}

impl ResultPoller {
    pub fn new(config: &PollerConfig) -> Result<Self, LookupError> {
        config.validate()?;
        let found = if config.found_pattern == DEFAULT_FOUND_PATTERN {
            DEFAULT_FOUND_REGEX.clone()
        } else {
            Regex::new(&config.found_pattern)
                .map_err(|e| LookupError::InvalidConfig(format!("found pattern: {e}")))?
        };
        let not_found_phrases = config
            .not_found_phrases
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        Ok(Self {
            timeout: config.timeout,
            interval: config.interval,
            found,
            not_found_phrases,
        })
    }

    /// Classify one observation. A negative phrase in either region wins over a
    /// value match in the same observation.
    pub fn classify(&self, result_text: &str, error_text: &str) -> Option<PollOutcome> {
        if self.is_not_found(result_text) || self.is_not_found(error_text) {
            return Some(PollOutcome::NotFound);
        }
        self.found
            .find(result_text)
            .map(|m| PollOutcome::Found(m.as_str().to_string()))
    }

    fn is_not_found(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let lowered = text.to_lowercase();
        self.not_found_phrases
            .iter()
            .any(|phrase| lowered.contains(phrase.as_str()))
    }

    async fn observe(adapter: &dyn HostAdapter) -> (String, String) {
        let result_text = adapter.read_result_probe().await;
        let error_text = adapter.read_error_probe().await;
        (result_text, error_text)
    }

    /// Probe the host until a terminal condition holds or the deadline passes.
    ///
    /// The task sleeps between reads and stops probing as soon as a terminal
    /// state is reached. Each read is bounded by the time left, so the call
    /// returns no later than the deadline however slow the host is.
    #[instrument(level = "debug", skip(self, adapter), fields(timeout = ?self.timeout))]
    pub async fn poll(&self, adapter: &dyn HostAdapter) -> PollOutcome {
        let started = Instant::now();
        let mut reads = 0usize;

        loop {
            // A read still pending at the deadline counts as an empty observation.
            let remaining = self.timeout.saturating_sub(started.elapsed());
            let (result_text, error_text) =
                match tokio::time::timeout(remaining, Self::observe(adapter)).await {
                    Ok(texts) => texts,
                    Err(_) => {
                        debug!(reads, "Probe still pending at the deadline");
                        (String::new(), String::new())
                    }
                };
            reads += 1;
            debug!(reads, result = %result_text, error = %error_text, "Probed result region");

            if let Some(outcome) = self.classify(&result_text, &error_text) {
                debug!(reads, elapsed = ?started.elapsed(), ?outcome, "Poll reached terminal state");
                return outcome;
            }

            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                debug!(reads, ?elapsed, "Poll deadline passed without a terminal state");
                return PollOutcome::TimedOut;
            }

            let remaining = self.timeout - elapsed;
            tokio::time::sleep(self.interval.min(remaining)).await;
        }
    }
}
