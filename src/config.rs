use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUD: u32 = 9600;
pub const DEFAULT_WARNING_VOLTAGE: f32 = 11.0;
pub const DEFAULT_MOTOR_HIGH_TEMP_C: f32 = 50.0;
pub const DEFAULT_INSIDE_HIGH_TEMP_C: f32 = 45.0;
pub const DEFAULT_TILT_WARNING_DEG: i32 = 25;
pub const DEFAULT_COMMAND_DELAY_MS: u64 = 20;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;
/// Servo-style PWM pulse width at which both drive motors stop.
pub const NEUTRAL_PULSE_US: u16 = 1500;

/// Settings for the command link.
///
/// Every field has a default, so a partial JSON file is enough:
///
/// ```json
/// { "port": "/dev/ttyAMA0", "warning_voltage": 10.5 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub port: String,
    pub baud: u32,
    /// Battery voltage below which motors are stopped and the operator is warned.
    pub warning_voltage: f32,
    pub motor_high_temp: f32,
    pub inside_high_temp: f32,
    pub tilt_warning_deg: i32,
    pub command_delay_ms: u64,
    pub read_timeout_ms: u64,
    pub neutral_us: u16,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud: DEFAULT_BAUD,
            warning_voltage: DEFAULT_WARNING_VOLTAGE,
            motor_high_temp: DEFAULT_MOTOR_HIGH_TEMP_C,
            inside_high_temp: DEFAULT_INSIDE_HIGH_TEMP_C,
            tilt_warning_deg: DEFAULT_TILT_WARNING_DEG,
            command_delay_ms: DEFAULT_COMMAND_DELAY_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            neutral_us: NEUTRAL_PULSE_US,
        }
    }
}

impl LinkConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: LinkConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baud == 0 {
            return Err(ConfigError::Invalid("baud must be positive".into()));
        }
        if self.port.trim().is_empty() {
            return Err(ConfigError::Invalid("port must not be empty".into()));
        }

        let thresholds = [
            ("warning_voltage", self.warning_voltage),
            ("motor_high_temp", self.motor_high_temp),
            ("inside_high_temp", self.inside_high_temp),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() {
                return Err(ConfigError::Invalid(format!("{name} must be a finite number")));
            }
        }

        // Zero would make the serial reader spin instead of waiting.
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("read_timeout_ms must be positive".into()));
        }

        if self.tilt_warning_deg < 0 {
            return Err(ConfigError::Invalid("tilt_warning_deg must not be negative".into()));
        }

        Ok(())
    }

    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
