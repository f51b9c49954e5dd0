//! Emulator configuration
//!
//! Every knob the managed service leaves unspecified (matcher floor, retry
//! ceiling, hook timeout) lives here so scenario suites can pin them.

use std::time::Duration;

/// Default minimum confidence an intent needs to be recognized
pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.6;
/// Default number of re-prompts before falling back to intent elicitation
pub const DEFAULT_MAX_REPROMPTS: u32 = 3;
/// Default edit ratio for fuzzy enumerated slot resolution
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.8;
pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const DEFAULT_MAX_FOLLOW_UPS: u32 = 3;
pub const DEFAULT_FULFILLMENT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_LOCALE: &str = "en_US";
pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "Sorry, I didn't understand that. What would you like to do?";
pub const DEFAULT_FAILURE_MESSAGE: &str =
    "Sorry, something went wrong while handling your request. Please try again later.";

/// Configuration for the emulator
#[derive(Debug, Clone, PartialEq)]
pub struct EmulatorConfig {
    /// Locale directory to load from a bot export root
    pub locale: String,
    /// Minimum matcher confidence for an intent to be recognized
    pub confidence_floor: f64,
    /// Re-prompts allowed per slot before falling back (per-slot `maxRetries` wins)
    pub max_reprompts: u32,
    /// Edit ratio for fuzzy enumerated matches, `None` disables fuzzy resolution
    pub fuzzy_threshold: Option<f64>,
    /// Interpretation history entries kept per session
    pub history_limit: usize,
    /// Follow-up intents a single turn may chain through after fulfillment
    pub max_follow_ups: u32,
    /// Deadline for one fulfillment or dialog hook call
    pub fulfillment_timeout: Duration,
    /// Message used when the fallback intent has no closing response
    pub fallback_message: String,
    /// Message sent when a hook fails or the turn cannot be completed
    pub failure_message: String,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            locale: DEFAULT_LOCALE.to_string(),
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            max_reprompts: DEFAULT_MAX_REPROMPTS,
            fuzzy_threshold: Some(DEFAULT_FUZZY_THRESHOLD),
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_follow_ups: DEFAULT_MAX_FOLLOW_UPS,
            fulfillment_timeout: DEFAULT_FULFILLMENT_TIMEOUT,
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            failure_message: DEFAULT_FAILURE_MESSAGE.to_string(),
        }
    }
}

impl EmulatorConfig {
    /// Read overrides from `LEX_EMULATOR_*` environment variables.
    ///
    /// Unset or unparseable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<f64>().ok());

        let fuzzy_threshold = match lookup("LEX_EMULATOR_FUZZY_THRESHOLD").as_deref() {
            Some("off" | "none" | "") => None,
            Some(v) => v.trim().parse().ok().or(defaults.fuzzy_threshold),
            None => defaults.fuzzy_threshold,
        };

        Self {
            locale: lookup("LEX_EMULATOR_LOCALE").unwrap_or(defaults.locale),
            confidence_floor: parsed("LEX_EMULATOR_CONFIDENCE_FLOOR")
                .unwrap_or(defaults.confidence_floor),
            max_reprompts: lookup("LEX_EMULATOR_MAX_REPROMPTS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.max_reprompts),
            fuzzy_threshold,
            history_limit: lookup("LEX_EMULATOR_HISTORY_LIMIT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.history_limit),
            max_follow_ups: lookup("LEX_EMULATOR_MAX_FOLLOW_UPS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.max_follow_ups),
            fulfillment_timeout: lookup("LEX_EMULATOR_FULFILLMENT_TIMEOUT_MS")
                .and_then(|v| v.trim().parse().ok())
                .map_or(defaults.fulfillment_timeout, Duration::from_millis),
            fallback_message: lookup("LEX_EMULATOR_FALLBACK_MESSAGE")
                .unwrap_or(defaults.fallback_message),
            failure_message: lookup("LEX_EMULATOR_FAILURE_MESSAGE")
                .unwrap_or(defaults.failure_message),
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_confidence_floor(mut self, floor: f64) -> Self {
        self.confidence_floor = floor;
        self
    }

    pub fn with_max_reprompts(mut self, max: u32) -> Self {
        self.max_reprompts = max;
        self
    }

    pub fn with_fuzzy_threshold(mut self, threshold: Option<f64>) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_max_follow_ups(mut self, max: u32) -> Self {
        self.max_follow_ups = max;
        self
    }

    pub fn with_fulfillment_timeout(mut self, timeout: Duration) -> Self {
        self.fulfillment_timeout = timeout;
        self
    }

    pub fn with_failure_message(mut self, message: impl Into<String>) -> Self {
        self.failure_message = message.into();
        self
    }
}
