//! File-backed sensor provider
//!
//! Reads one number per configured file, e.g. Linux hwmon `temp*_input`
//! files, and tracks the maximum since the provider was opened.

use super::{record, SensorProvider};
use async_trait::async_trait;
use midas_core::{MidasError, Result, SensorInput, SensorReading};
use std::collections::HashMap;
use tokio::fs;
use tracing::{debug, info, warn};

pub struct FileSensorProvider {
    inputs: Vec<SensorInput>,
    readings: HashMap<String, SensorReading>,
    is_open: bool,
}

impl FileSensorProvider {
    pub fn new(inputs: Vec<SensorInput>) -> Self {
        Self {
            inputs,
            readings: HashMap::new(),
            is_open: false,
        }
    }

    async fn read_input(input: &SensorInput) -> Result<f32> {
        let raw = fs::read_to_string(&input.path).await.map_err(|e| {
            MidasError::Provider(format!(
                "Failed to read sensor '{}' from {}: {}",
                input.label,
                input.path.display(),
                e
            ))
        })?;

        let value: f32 = raw.trim().parse().map_err(|e| {
            MidasError::Provider(format!(
                "Invalid value {:?} for sensor '{}': {}",
                raw.trim(),
                input.label,
                e
            ))
        })?;

        Ok(value * input.scale)
    }
}

#[async_trait]
impl SensorProvider for FileSensorProvider {
    async fn open(&mut self) -> Result<()> {
        if self.inputs.is_empty() {
            warn!("No sensor inputs configured, temperatures will read 0.0");
        }

        for input in &self.inputs {
            if fs::metadata(&input.path).await.is_err() {
                return Err(MidasError::Provider(format!(
                    "Sensor '{}' not available at {}",
                    input.label,
                    input.path.display()
                )));
            }
        }

        self.readings.clear();
        self.is_open = true;
        info!("Opened {} sensor input(s)", self.inputs.len());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.is_open = false;
        self.readings.clear();
        Ok(())
    }

    async fn update(&mut self) -> Result<()> {
        if !self.is_open {
            return Err(MidasError::Provider(
                "Sensor provider is not open".to_string(),
            ));
        }

        for input in &self.inputs {
            let value = Self::read_input(input).await?;
            debug!("Sensor '{}' = {:.1}", input.label, value);
            record(&mut self.readings, &input.label, value);
        }

        Ok(())
    }

    fn reading(&self, label: &str) -> Option<SensorReading> {
        self.readings.get(label).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn input(label: &str, path: &Path, scale: f32) -> SensorInput {
        SensorInput {
            label: label.to_string(),
            path: path.to_path_buf(),
            scale,
        }
    }

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < 1e-3,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[tokio::test]
    async fn test_reads_scaled_values_and_tracks_max() {
        let temp_dir = TempDir::new().unwrap();
        let cpu_path = temp_dir.path().join("temp1_input");
        std::fs::write(&cpu_path, "45000\n").unwrap();

        let mut provider = FileSensorProvider::new(vec![input("CPU Package", &cpu_path, 0.001)]);
        provider.open().await.unwrap();

        provider.update().await.unwrap();
        let reading = provider.reading("CPU Package").unwrap();
        assert_close(reading.current, 45.0);
        assert_close(reading.max, 45.0);

        std::fs::write(&cpu_path, "60500").unwrap();
        provider.update().await.unwrap();
        std::fs::write(&cpu_path, "52000").unwrap();
        provider.update().await.unwrap();

        let reading = provider.reading("CPU Package").unwrap();
        assert_close(reading.current, 52.0);
        assert_close(reading.max, 60.5);
        assert!(provider.reading("GPU Core").is_none());
    }

    #[tokio::test]
    async fn test_open_fails_for_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut provider = FileSensorProvider::new(vec![input(
            "CPU Package",
            &temp_dir.path().join("missing"),
            1.0,
        )]);

        assert!(matches!(
            provider.open().await,
            Err(MidasError::Provider(_))
        ));
    }

    #[tokio::test]
    async fn test_update_requires_open() {
        let mut provider = FileSensorProvider::new(Vec::new());
        assert!(provider.update().await.is_err());

        provider.open().await.unwrap();
        assert!(provider.update().await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_content_is_provider_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("temp1_input");
        std::fs::write(&path, "n/a").unwrap();

        let mut provider = FileSensorProvider::new(vec![input("GPU Core", &path, 1.0)]);
        provider.open().await.unwrap();

        assert!(matches!(
            provider.update().await,
            Err(MidasError::Provider(_))
        ));
    }

    #[tokio::test]
    async fn test_reopen_resets_max() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("temp1_input");
        std::fs::write(&path, "80").unwrap();

        let mut provider = FileSensorProvider::new(vec![input("GPU Core", &path, 1.0)]);
        provider.open().await.unwrap();
        provider.update().await.unwrap();

        provider.close().await.unwrap();
        assert!(provider.reading("GPU Core").is_none());

        std::fs::write(&path, "40").unwrap();
        provider.open().await.unwrap();
        provider.update().await.unwrap();
        assert_close(provider.reading("GPU Core").unwrap().max, 40.0);
    }
}
