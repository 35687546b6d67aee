//! Moving-average smoothing of meter readings.
//!
//! A window of 0 or 1 samples disables smoothing: values pass through as-is.

use crate::validate::SmoothingMethod;
use std::collections::VecDeque;

/// Running smoother for a single series.
#[derive(Debug, Clone)]
pub struct Smoother {
    method: SmoothingMethod,
    window: usize,
    history: VecDeque<f64>,
    ema: Option<f64>,
}

impl Smoother {
    pub fn new(method: SmoothingMethod, window: usize) -> Self {
        Self {
            method,
            window,
            history: VecDeque::with_capacity(window),
            ema: None,
        }
    }

    /// Feed a new value and return the smoothed one.
    pub fn push(&mut self, value: f64) -> f64 {
        if self.window <= 1 {
            return value;
        }

        match self.method {
            SmoothingMethod::Sma => {
                if self.history.len() == self.window {
                    self.history.pop_front();
                }
                self.history.push_back(value);
                self.history.iter().sum::<f64>() / self.history.len() as f64
            }
            SmoothingMethod::Ema => {
                let alpha = 2.0 / (self.window as f64 + 1.0);
                let next = match self.ema {
                    Some(prev) => alpha * value + (1.0 - alpha) * prev,
                    None => value,
                };
                self.ema = Some(next);
                next
            }
        }
    }
}

/// Smoothers for the power readings of one inverter.
///
/// Energy counters and state of charge are never smoothed.
#[derive(Debug, Clone)]
pub struct MeterSmoothers {
    pv: Smoother,
    ac: Smoother,
    feed_in: Smoother,
    consumption: Smoother,
    battery: Smoother,
}

impl MeterSmoothers {
    pub fn new(method: SmoothingMethod, window: usize) -> Self {
        Self {
            pv: Smoother::new(method, window),
            ac: Smoother::new(method, window),
            feed_in: Smoother::new(method, window),
            consumption: Smoother::new(method, window),
            battery: Smoother::new(method, window),
        }
    }

    pub fn apply(&mut self, sample: &mut super::Sample) {
        sample.pv_power = self.pv.push(sample.pv_power);
        sample.ac_power = self.ac.push(sample.ac_power);
        sample.feed_in_power = self.feed_in.push(sample.feed_in_power);
        sample.consumption_power = self.consumption.push(sample.consumption_power);
        sample.battery_power = sample.battery_power.map(|p| self.battery.push(p));
    }
}
