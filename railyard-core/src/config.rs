/// Configuration structures that can be tested independently
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub ota: OtaConfig,
    pub railway: RailwayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub ssid: String,
    pub password: String,
    pub ip: [u8; 4],
    pub gateway: [u8; 4],
    pub netmask: [u8; 4],
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: "KKG_and_I".to_string(),
            password: "choochookchoo".to_string(),
            ip: [192, 168, 7, 1],
            gateway: [192, 168, 7, 1],
            netmask: [255, 255, 255, 0],
        }
    }
}

impl NetworkConfig {
    /// Applies build-time credentials; empty values keep the defaults.
    pub fn with_credentials(mut self, ssid: &str, password: &str) -> Self {
        if !ssid.is_empty() {
            self.ssid = ssid.to_string();
            self.password = password.to_string();
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OtaConfig {
    /// How long one enable keeps the update endpoints open.
    pub window_ms: u32,
    /// Time given to the success reply before restarting.
    pub reboot_delay_ms: u32,
    /// A writing session with no event for this long is aborted.
    pub session_idle_timeout_ms: u32,
    /// Multipart field carrying the image.
    pub upload_field: String,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            window_ms: crate::window::DEFAULT_WINDOW_MS,
            reboot_delay_ms: 250,
            session_idle_timeout_ms: 30_000,
            upload_field: "update".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RailwayConfig {
    pub track_address: u8,
    pub yard_address: u8,
    pub triple_address: u8,
    pub yard_pulse_ms: u32,
    pub triple_pulse_ms: u32,
    pub aux_settle_ms: u32,
    pub pwm_frequency_hz: u32,
}

impl Default for RailwayConfig {
    fn default() -> Self {
        Self {
            track_address: 0x20,
            yard_address: 0x24,
            triple_address: 0x22,
            yard_pulse_ms: 2000,
            triple_pulse_ms: 1000,
            aux_settle_ms: 10,
            pwm_frequency_hz: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Longest interval the wrapping millisecond clock can compare.
const MAX_INTERVAL_MS: u32 = i32::MAX as u32;

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ota.window_ms == 0 {
            return Err(ConfigError::Invalid("ota.window_ms must be non-zero"));
        }
        if self.ota.session_idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "ota.session_idle_timeout_ms must be non-zero",
            ));
        }
        if self.ota.window_ms > MAX_INTERVAL_MS {
            return Err(ConfigError::Invalid("ota.window_ms exceeds the clock range"));
        }
        if self.ota.session_idle_timeout_ms > MAX_INTERVAL_MS {
            return Err(ConfigError::Invalid(
                "ota.session_idle_timeout_ms exceeds the clock range",
            ));
        }
        if self.ota.reboot_delay_ms > 10_000 {
            return Err(ConfigError::Invalid("ota.reboot_delay_ms above 10 s"));
        }
        if self.ota.upload_field.is_empty() {
            return Err(ConfigError::Invalid("ota.upload_field is empty"));
        }
        Ok(())
    }
}
