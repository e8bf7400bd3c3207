//! Midas LCD Core Library
//!
//! Shared types, the display layout, and configuration for the Midas LCD
//! temperature display. Used by both the hardware crate and the daemon.

pub mod config;
pub mod device;
pub mod display;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    default_config_path, DeviceSettings, PollingConfig, ReconnectConfig, SensorInput,
    StaticConfig,
};
pub use device::*;
pub use display::{format_readings, DisplayLine, LINE_WIDTH};
pub use error::*;
pub use types::*;
