//! Per-inverter handles.
//!
//! A handle owns everything about one inverter: fetching its realtime data
//! from Solax Cloud, smoothing the meter readings and describing the devices
//! the host should expose for it.

mod api;
mod smoothing;

pub use api::*;
pub use smoothing::*;

use crate::config::ServiceConfig;
use crate::validate::ValidatedConfig;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;

/// Upper bound of the random delay before each fetch.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);

/// Errors raised while constructing a handle.
#[derive(Error, Debug)]
pub enum InverterError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("inverter {0} has an empty name or serial number")]
    InvalidIdentity(String),
}

/// State shared by every handle of one platform.
#[derive(Debug, Clone)]
pub struct PlatformContext {
    pub client: reqwest::Client,
    pub api_url: String,
    pub request_timeout: Duration,
    pub max_jitter: Duration,
}

impl PlatformContext {
    pub fn new(cfg: &ServiceConfig) -> Result<Self, InverterError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| InverterError::Client(e.to_string()))?;

        Ok(Self {
            client,
            api_url: cfg.api_url.clone(),
            request_timeout: cfg.request_timeout,
            max_jitter: DEFAULT_MAX_JITTER,
        })
    }
}

/// What a device descriptor measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessoryKind {
    PvPower,
    GridFeedIn,
    Consumption,
    BatteryLevel,
    BatteryPower,
    YieldToday,
    YieldTotal,
}

impl AccessoryKind {
    fn label(&self) -> &'static str {
        match self {
            AccessoryKind::PvPower => "PV",
            AccessoryKind::GridFeedIn => "Grid",
            AccessoryKind::Consumption => "Consumption",
            AccessoryKind::BatteryLevel => "Battery",
            AccessoryKind::BatteryPower => "Battery Power",
            AccessoryKind::YieldToday => "Yield Today",
            AccessoryKind::YieldTotal => "Yield Total",
        }
    }

    fn unit(&self) -> &'static str {
        match self {
            AccessoryKind::BatteryLevel => "%",
            AccessoryKind::YieldToday | AccessoryKind::YieldTotal => "kWh",
            _ => "W",
        }
    }
}

/// A device the host may expose. `value` is `None` until data is known.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accessory {
    pub name: String,
    pub serial: String,
    pub kind: AccessoryKind,
    pub value: Option<f64>,
    pub unit: &'static str,
}

/// A polled inverter.
#[async_trait]
pub trait InverterHandle: Send + Sync {
    /// Display name of the inverter.
    fn name(&self) -> &str;

    /// Refresh data from upstream. Failures are handled (and logged) by the
    /// handle itself.
    async fn update_inverter_data(&self);

    /// Devices for the host, reflecting the most recent data.
    fn get_accessories(&self) -> Vec<Accessory>;
}

/// Everything a handle is constructed with.
#[derive(Debug, Clone)]
pub struct InverterParams {
    /// Logging sink for this inverter.
    pub span: tracing::Span,
    pub config: Arc<ValidatedConfig>,
    pub platform: Arc<PlatformContext>,
    pub token_id: String,
    pub sn: String,
    pub name: String,
    pub smoothing_window: usize,
}

#[derive(Debug)]
struct InverterState {
    latest: Option<Sample>,
    smoothers: Option<MeterSmoothers>,
}

/// Inverter handle backed by the Solax Cloud realtime API.
pub struct CloudInverter {
    span: tracing::Span,
    config: Arc<ValidatedConfig>,
    platform: Arc<PlatformContext>,
    token_id: String,
    sn: String,
    name: String,
    state: Mutex<InverterState>,
}

impl CloudInverter {
    pub fn new(params: InverterParams) -> Result<Self, InverterError> {
        if params.name.trim().is_empty() || params.sn.trim().is_empty() {
            return Err(InverterError::InvalidIdentity(format!(
                "'{}'/'{}'",
                params.name, params.sn
            )));
        }

        let smoothers = params.config.smooth_meters.then(|| {
            MeterSmoothers::new(params.config.smoothing_method, params.smoothing_window)
        });

        tracing::info!(
            parent: &params.span,
            "Created inverter {} ({}), smoothing {} over {} samples",
            params.name,
            params.sn,
            if smoothers.is_some() { params.config.smoothing_method.as_str() } else { "off" },
            params.smoothing_window
        );

        Ok(Self {
            span: params.span,
            config: params.config,
            platform: params.platform,
            token_id: params.token_id,
            sn: params.sn,
            name: params.name,
            state: Mutex::new(InverterState {
                latest: None,
                smoothers,
            }),
        })
    }

    /// Store a sample unless a newer one has already landed.
    fn record(&self, mut sample: Sample) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(latest) = &state.latest {
            if latest.fetched_at > sample.fetched_at {
                tracing::debug!(parent: &self.span, "Discarding stale sample for {}", self.name);
                return;
            }
        }

        if let Some(smoothers) = state.smoothers.as_mut() {
            smoothers.apply(&mut sample);
        }
        state.latest = Some(sample);
    }

    fn accessory(&self, kind: AccessoryKind, value: Option<f64>) -> Accessory {
        Accessory {
            name: format!("{} {}", self.name, kind.label()),
            serial: self.sn.clone(),
            kind,
            value,
            unit: kind.unit(),
        }
    }
}

#[async_trait]
impl InverterHandle for CloudInverter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update_inverter_data(&self) {
        let ctx = &self.platform;

        // Spread requests from several inverters across the rate-limit window
        let jitter_ms = ctx.max_jitter.as_millis() as u64;
        if jitter_ms > 0 {
            let jitter = rand::random::<u64>() % jitter_ms;
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        let fetched_at = Utc::now();
        let result = fetch_realtime(
            &ctx.client,
            &ctx.api_url,
            &self.token_id,
            &self.sn,
            ctx.request_timeout,
        )
        .instrument(self.span.clone())
        .await;

        match result {
            Ok(info) => {
                let sample = Sample::from_realtime(&info, fetched_at);
                tracing::debug!(
                    parent: &self.span,
                    "Fetched realtime data for {} (uploaded {})",
                    self.name,
                    sample.upload_time.as_deref().unwrap_or("unknown")
                );
                self.record(sample);
            }
            Err(e) => {
                tracing::error!(parent: &self.span, "Fetch failed for {}: {}", self.name, e);
            }
        }
    }

    fn get_accessories(&self) -> Vec<Accessory> {
        let latest = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .clone();
        let s = latest.as_ref();

        let mut accessories = vec![
            self.accessory(AccessoryKind::PvPower, s.map(|s| s.pv_power)),
            self.accessory(AccessoryKind::GridFeedIn, s.map(|s| s.feed_in_power)),
            self.accessory(AccessoryKind::Consumption, s.map(|s| s.consumption_power)),
            self.accessory(AccessoryKind::BatteryLevel, s.and_then(|s| s.battery_soc)),
            self.accessory(AccessoryKind::BatteryPower, s.and_then(|s| s.battery_power)),
        ];

        // Energy counters need characteristics the stock Home app cannot show
        if !self.config.pure_home_app {
            accessories.push(self.accessory(AccessoryKind::YieldToday, s.map(|s| s.yield_today)));
            accessories.push(self.accessory(AccessoryKind::YieldTotal, s.map(|s| s.yield_total)));
        }

        accessories
    }
}
