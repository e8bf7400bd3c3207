//! Sensor providers
//!
//! The supervisor only ever asks a provider to open, refresh, answer for a
//! label, and close. How readings are obtained stays behind [`SensorProvider`].

mod file;
mod synthetic;

pub use file::FileSensorProvider;
pub use synthetic::SyntheticSensorProvider;

use async_trait::async_trait;
use midas_core::{Result, SensorReading};
use std::collections::HashMap;

/// Source of temperature readings
///
/// Failures are reported as [`midas_core::MidasError::Provider`].
#[async_trait]
pub trait SensorProvider: Send {
    /// Acquire the underlying sensors. Called again after every reconnect.
    async fn open(&mut self) -> Result<()>;

    /// Release the underlying sensors
    async fn close(&mut self) -> Result<()>;

    /// Refresh all readings
    async fn update(&mut self) -> Result<()>;

    /// Latest reading for `label`, if the provider knows it
    fn reading(&self, label: &str) -> Option<SensorReading>;
}

/// Record `value` for `label`, keeping the running maximum
fn record(readings: &mut HashMap<String, SensorReading>, label: &str, value: f32) {
    readings
        .entry(label.to_string())
        .and_modify(|r| {
            r.current = value;
            r.max = r.max.max(value);
        })
        .or_insert_with(|| SensorReading::new(label, value, value));
}
