use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

fn default_baudrate() -> u32 {
    metercal_lib::serial::SUPPLY_BAUD_RATE
}

fn default_timeout() -> Duration {
    metercal_lib::serial::SUPPLY_TIMEOUT
}

fn default_power_factor() -> String {
    String::from("1.0")
}

/// Supply serial link settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SerialSection {
    /// Serial port device name, e.g. "/dev/ttyUSB0".
    pub port: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    /// Read timeout, e.g. "1s".
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
}

/// The reference excitation to command before calibrating.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputSettings {
    /// Voltage in volts.
    pub voltage: f64,
    /// Current in amps.
    pub current: f64,
    /// Power factor label: 1.0, 0.5L, 0.5C, 0.8C or 0.8L.
    #[serde(default = "default_power_factor")]
    pub power_factor: String,
}

/// The calibration run configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub serial: SerialSection,
    pub settings: OutputSettings,
}

impl Config {
    pub const DEFAULT_CONFIG_FILE: &'static str = "metercal.yaml";

    pub fn load(path: &str) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Cannot open configuration file {path}"))?;
        serde_yaml::from_reader(file)
            .with_context(|| format!("Cannot parse configuration file {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let config: Config = serde_yaml::from_str(
            "serial:\n  port: /dev/ttyUSB0\n  baudrate: 9600\n  timeout: 1s\n\
             settings:\n  voltage: 220.0\n  current: 2.0\n  power_factor: \"0.5L\"\n",
        )
        .unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baudrate, 9600);
        assert_eq!(config.serial.timeout, Duration::from_secs(1));
        assert_eq!(config.settings.voltage, 220.0);
        assert_eq!(config.settings.power_factor, "0.5L");
    }

    #[test]
    fn defaults_apply_when_omitted() {
        let config: Config = serde_yaml::from_str(
            "serial:\n  port: COM3\nsettings:\n  voltage: 220.0\n  current: 2.0\n",
        )
        .unwrap();
        assert_eq!(config.serial.baudrate, 9600);
        assert_eq!(config.serial.timeout, Duration::from_secs(1));
        assert_eq!(config.settings.power_factor, "1.0");
    }
}
