//! Validation and normalization of the user-supplied inverter configuration.
//!
//! [`check_config`] turns a loosely-typed JSON object into a
//! [`ValidatedConfig`]. Missing or malformed identity fields are fatal;
//! out-of-policy optional fields are replaced by defaults and logged.

mod models;

pub use models::*;

use serde_json::{Map, Value};
use std::collections::HashSet;

/// Validate a raw configuration object.
///
/// Mandatory checks fail fast on the first problem. The optional-field
/// checks each apply their own default independently.
pub fn check_config(raw: &Value) -> Result<ValidatedConfig, ConfigError> {
    let obj = raw.as_object().ok_or_else(|| reject(ConfigError::NotAnObject))?;

    let builder = ConfigBuilder::new(obj)
        .migrate_legacy()
        .require_token()?
        .require_inverters()?;

    Ok(builder
        .polling_frequency()
        .smooth_meters()
        .smoothing_method()
        .pure_home_app()
        .build())
}

fn reject(err: ConfigError) -> ConfigError {
    tracing::error!("Invalid configuration: {}", err);
    err
}

/// Working state threaded through each validation step.
struct ConfigBuilder<'a> {
    raw: &'a Map<String, Value>,
    legacy_inverters: Option<Value>,
    token_id: String,
    inverters: Vec<InverterEntry>,
    polling_frequency: u64,
    smooth_meters: bool,
    smoothing_method: SmoothingMethod,
    pure_home_app: bool,
}

impl<'a> ConfigBuilder<'a> {
    fn new(raw: &'a Map<String, Value>) -> Self {
        Self {
            raw,
            legacy_inverters: None,
            token_id: String::new(),
            inverters: Vec::new(),
            polling_frequency: DEFAULT_POLLING_FREQUENCY,
            smooth_meters: true,
            smoothing_method: SmoothingMethod::default(),
            pure_home_app: false,
        }
    }

    fn field(&self, key: &str) -> Option<&'a Value> {
        self.raw.get(key).filter(|v| !v.is_null())
    }

    /// Single top-level `name`/`sn` become a one-element `inverters` list.
    fn migrate_legacy(mut self) -> Self {
        if self.field("inverters").is_some() {
            return self;
        }

        if let (Some(name), Some(sn)) = (self.field("name"), self.field("sn")) {
            tracing::info!("Migrating legacy single-inverter configuration to 'inverters'");
            self.legacy_inverters = Some(Value::Array(vec![serde_json::json!({
                "name": name,
                "sn": sn,
            })]));
        }

        self
    }

    fn require_token(mut self) -> Result<Self, ConfigError> {
        match self.field("tokenId") {
            None => Err(reject(ConfigError::MissingTokenId)),
            Some(Value::String(token)) => {
                self.token_id = token.clone();
                Ok(self)
            }
            Some(_) => Err(reject(ConfigError::InvalidTokenId)),
        }
    }

    fn require_inverters(mut self) -> Result<Self, ConfigError> {
        let inverters = match self.legacy_inverters.take() {
            Some(migrated) => migrated,
            None => self
                .field("inverters")
                .cloned()
                .ok_or_else(|| reject(ConfigError::MissingInverters))?,
        };

        let items = match inverters {
            Value::Array(items) => items,
            _ => return Err(reject(ConfigError::InvertersNotArray)),
        };

        if items.is_empty() {
            return Err(reject(ConfigError::MissingInverters));
        }

        let mut entries = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let entry: InverterEntry = serde_json::from_value(item)
                .map_err(|_| reject(ConfigError::MalformedInverter { index }))?;
            entries.push(entry);
        }

        check_unique(&entries).map_err(reject)?;

        self.inverters = entries;
        Ok(self)
    }

    /// Out-of-policy values are replaced by the default, never clamped.
    fn polling_frequency(mut self) -> Self {
        let value = match self.field("pollingFrequency") {
            Some(v) => v,
            None => {
                tracing::info!(
                    "'pollingFrequency' not set, using default of {}s",
                    DEFAULT_POLLING_FREQUENCY
                );
                return self;
            }
        };

        let secs = match positive_integer(value) {
            Some(s) => s,
            None => {
                tracing::info!(
                    "'pollingFrequency' {} is not a positive integer, using default of {}s",
                    value,
                    DEFAULT_POLLING_FREQUENCY
                );
                return self;
            }
        };

        let floor = min_polling_frequency();
        if (secs as f64) < floor {
            tracing::info!(
                "'pollingFrequency' {}s exceeds the Solax Cloud rate limits (minimum {}s), using default of {}s",
                secs,
                floor,
                DEFAULT_POLLING_FREQUENCY
            );
            return self;
        }

        self.polling_frequency = secs;
        self
    }

    fn smooth_meters(mut self) -> Self {
        match self.field("smoothMeters").and_then(Value::as_bool) {
            Some(b) => self.smooth_meters = b,
            None => tracing::info!("'smoothMeters' missing or not a boolean, using default of true"),
        }
        self
    }

    fn smoothing_method(mut self) -> Self {
        match self
            .field("smoothingMethod")
            .and_then(Value::as_str)
            .and_then(SmoothingMethod::parse)
        {
            Some(m) => self.smoothing_method = m,
            None => tracing::info!(
                "'smoothingMethod' missing or not one of sma/ema, using default of {}",
                SmoothingMethod::default()
            ),
        }
        self
    }

    fn pure_home_app(mut self) -> Self {
        match self.field("pureHomeApp").and_then(Value::as_bool) {
            Some(b) => self.pure_home_app = b,
            None => tracing::info!("'pureHomeApp' missing or not a boolean, using default of false"),
        }
        self
    }

    fn build(self) -> ValidatedConfig {
        ValidatedConfig {
            token_id: self.token_id,
            inverters: self.inverters,
            polling_frequency: self.polling_frequency,
            smooth_meters: self.smooth_meters,
            smoothing_method: self.smoothing_method,
            pure_home_app: self.pure_home_app,
        }
    }
}

/// First duplicate wins; names are checked before serials.
fn check_unique(entries: &[InverterEntry]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    if let Some(dup) = entries.iter().find(|e| !names.insert(e.name.as_str())) {
        return Err(ConfigError::DuplicateName(dup.name.clone()));
    }

    let mut serials = HashSet::new();
    if let Some(dup) = entries.iter().find(|e| !serials.insert(e.sn.as_str())) {
        return Err(ConfigError::DuplicateSerial(dup.sn.clone()));
    }

    Ok(())
}

/// Positive whole number, accepting integral floats such as `300.0`.
fn positive_integer(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return (n > 0).then_some(n);
    }

    let f = value.as_f64()?;
    if f >= 1.0 && f.fract() == 0.0 && f <= u64::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}
