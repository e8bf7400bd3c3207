//! Synthetic sensor provider for `--mock` runs
//!
//! Produces slowly oscillating temperatures so the display visibly changes
//! without any sensor hardware.

use super::{record, SensorProvider};
use async_trait::async_trait;
use midas_core::{MidasError, Result, SensorReading};
use std::collections::HashMap;

pub struct SyntheticSensorProvider {
    channels: Vec<(String, f32, f32)>,
    readings: HashMap<String, SensorReading>,
    tick: u32,
    is_open: bool,
}

impl SyntheticSensorProvider {
    /// Create a provider answering for the CPU and GPU labels
    pub fn new(cpu_label: &str, gpu_label: &str) -> Self {
        Self {
            channels: vec![
                (cpu_label.to_string(), 45.0, 10.0),
                (gpu_label.to_string(), 52.0, 8.0),
            ],
            readings: HashMap::new(),
            tick: 0,
            is_open: false,
        }
    }
}

#[async_trait]
impl SensorProvider for SyntheticSensorProvider {
    async fn open(&mut self) -> Result<()> {
        self.readings.clear();
        self.tick = 0;
        self.is_open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.is_open = false;
        Ok(())
    }

    async fn update(&mut self) -> Result<()> {
        if !self.is_open {
            return Err(MidasError::Provider(
                "Sensor provider is not open".to_string(),
            ));
        }

        let phase = self.tick as f32 * 0.3;
        for (index, (label, base, swing)) in self.channels.iter().enumerate() {
            let value = base + swing * (phase + index as f32).sin();
            record(&mut self.readings, label, value);
        }
        self.tick = self.tick.wrapping_add(1);

        Ok(())
    }

    fn reading(&self, label: &str) -> Option<SensorReading> {
        self.readings.get(label).cloned()
    }
}
