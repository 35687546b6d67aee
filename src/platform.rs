//! Platform orchestration.
//!
//! Validates the raw configuration, builds one handle per inverter, starts
//! the scheduler and answers the host's request for devices. Any failure on
//! the way leaves the platform inert instead of taking the host down.

use crate::config::ServiceConfig;
use crate::inverter::{
    Accessory, CloudInverter, InverterError, InverterHandle, InverterParams, PlatformContext,
};
use crate::scheduler::Scheduler;
use crate::validate::{check_config, ConfigError, ValidatedConfig};

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Why a platform did not start.
#[derive(Error, Debug)]
pub enum StartError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to create inverter: {0}")]
    Inverter(#[from] InverterError),
}

/// Builds a handle from its construction parameters.
pub type HandleFactory =
    dyn Fn(InverterParams) -> Result<Arc<dyn InverterHandle>, InverterError> + Send + Sync;

struct Running {
    config: Arc<ValidatedConfig>,
    handles: Vec<Arc<dyn InverterHandle>>,
    scheduler: Scheduler,
}

/// A deployment of one or more inverters polled from Solax Cloud.
pub struct Platform {
    running: Option<Running>,
}

impl Platform {
    /// Start a platform backed by [`CloudInverter`] handles.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(raw: &Value, service: &ServiceConfig) -> Self {
        Self::with_factory(raw, service, &|params: InverterParams| {
            Ok(Arc::new(CloudInverter::new(params)?) as Arc<dyn InverterHandle>)
        })
    }

    /// Start a platform whose handles come from `factory`.
    pub fn with_factory(raw: &Value, service: &ServiceConfig, factory: &HandleFactory) -> Self {
        match start(raw, service, factory) {
            Ok(running) => Self {
                running: Some(running),
            },
            Err(e) => {
                tracing::error!("Platform not started: {}", e);
                Self { running: None }
            }
        }
    }

    /// The validated configuration, or `None` if the platform is inert.
    pub fn config(&self) -> Option<&ValidatedConfig> {
        self.running.as_ref().map(|r| r.config.as_ref())
    }

    /// Hand the host every device of every inverter. Never touches the network.
    pub fn accessories<F>(&self, callback: F)
    where
        F: FnOnce(Vec<Accessory>),
    {
        let accessories = match &self.running {
            Some(running) => running
                .handles
                .iter()
                .flat_map(|h| h.get_accessories())
                .collect(),
            None => Vec::new(),
        };

        callback(accessories);
    }

    /// Stop polling. An inert platform has nothing to stop.
    pub async fn shutdown(&self) {
        if let Some(running) = &self.running {
            running.scheduler.stop().await;
        }
    }
}

fn start(
    raw: &Value,
    service: &ServiceConfig,
    factory: &HandleFactory,
) -> Result<Running, StartError> {
    let config = Arc::new(check_config(raw)?);
    let scheduler = Scheduler::new(config.polling_frequency);
    let context = Arc::new(PlatformContext::new(service)?);

    let mut handles = Vec::with_capacity(config.inverters.len());
    for entry in &config.inverters {
        let params = InverterParams {
            span: tracing::info_span!("inverter", name = %entry.name, sn = %entry.sn),
            config: config.clone(),
            platform: context.clone(),
            token_id: config.token_id.clone(),
            sn: entry.sn.clone(),
            name: entry.name.clone(),
            smoothing_window: scheduler.smoothing_window(),
        };
        handles.push(factory(params)?);
    }

    scheduler.start(handles.clone());

    Ok(Running {
        config,
        handles,
        scheduler,
    })
}
