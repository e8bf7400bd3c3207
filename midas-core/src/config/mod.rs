//! Configuration types for Midas LCD
//!
//! The daemon reads a single TOML file at startup ([`StaticConfig`]). All
//! runtime state is re-derived from the live device and sensors, so nothing
//! is written back.

mod paths;
mod static_config;

pub use paths::default_config_path;
pub use static_config::{DeviceSettings, PollingConfig, ReconnectConfig, SensorInput, StaticConfig};
