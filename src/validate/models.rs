//! Validated configuration types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default seconds between polls.
pub const DEFAULT_POLLING_FREQUENCY: u64 = 300;

/// Solax Cloud allows at most this many calls per minute per token.
pub const MAX_CALLS_PER_MINUTE: u32 = 10;

/// Solax Cloud allows at most this many calls per day per token.
pub const MAX_CALLS_PER_DAY: u32 = 10_000;

/// Smallest polling interval, in seconds, that respects both API rate limits.
pub fn min_polling_frequency() -> f64 {
    let per_minute = 60.0 / f64::from(MAX_CALLS_PER_MINUTE);
    let per_day = 86_400.0 / f64::from(MAX_CALLS_PER_DAY);
    per_minute.max(per_day)
}

/// One configured inverter.
///
/// Deserialization is the shape check: any object carrying string `name`
/// and `sn` fields qualifies, extra keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InverterEntry {
    pub name: String,
    pub sn: String,
}

/// Moving-average family used to smooth meter readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingMethod {
    /// Simple moving average
    #[default]
    Sma,
    /// Exponential moving average
    Ema,
}

impl SmoothingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmoothingMethod::Sma => "sma",
            SmoothingMethod::Ema => "ema",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sma" => Some(SmoothingMethod::Sma),
            "ema" => Some(SmoothingMethod::Ema),
            _ => None,
        }
    }
}

impl std::fmt::Display for SmoothingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration after defaults and legacy migration have been applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedConfig {
    pub token_id: String,
    /// Always at least one entry, names and serials unique.
    pub inverters: Vec<InverterEntry>,
    /// Seconds between polls.
    pub polling_frequency: u64,
    pub smooth_meters: bool,
    pub smoothing_method: SmoothingMethod,
    pub pure_home_app: bool,
}

/// Fatal configuration problems. Any of these keeps the platform from starting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration must be a JSON object")]
    NotAnObject,
    #[error("missing required field 'tokenId'")]
    MissingTokenId,
    #[error("'tokenId' must be a string")]
    InvalidTokenId,
    #[error("missing required field 'inverters' (or legacy 'name' and 'sn')")]
    MissingInverters,
    #[error("'inverters' must be an array")]
    InvertersNotArray,
    #[error("inverter at index {index} must have string 'name' and 'sn' fields")]
    MalformedInverter { index: usize },
    #[error("duplicate inverter name '{0}'")]
    DuplicateName(String),
    #[error("duplicate inverter serial number '{0}'")]
    DuplicateSerial(String),
}
