//! Configuration file handling
//!
//! A reforming setup is described by a TOML file naming the instruments, the capacitor, and
//! optionally overriding the session constants:
//!
//! ```toml
//! [power_supply]
//! resource = "ASRL/dev/ttyUSB0"
//!
//! [meter]
//! resource = "ASRL/dev/ttyUSB1"
//! role = "advisory"
//!
//! [capacitor]
//! capacitance = 23000e-6
//! rated_voltage = 18.0
//! max_leakage_current = 6e-3
//! power_limit = 150e-3
//!
//! [reform]
//! max_settle_wait = 1800.0
//! ```

use std::{
    path::Path,
    time::Duration,
};
use serde::Deserialize;
use crate::{
    capacitor::Capacitor,
    devices::ConnectOptions,
    error::{ Error, Result },
    reform::{ self, MeterRole, ReformSettings },
    resource::{ Resource, DEFAULT_BAUD_RATE },
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InstrumentConfig
{
    /// VISA-style resource identifier, e.g. `ASRL/dev/ttyUSB0`
    pub resource: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Send `*RST` after identification
    #[serde(default = "default_reset")]
    pub reset: bool,
    /// Seconds allowed per transaction; absent waits forever
    #[serde(default, with = "optional_seconds")]
    pub timeout: Option<Duration>,
}

impl InstrumentConfig
{
    /// Default connection settings for the given resource
    pub fn new(resource: String) -> Self
    {
        Self {
            resource: resource,
            baud_rate: DEFAULT_BAUD_RATE,
            reset: true,
            timeout: None,
        }
    }

    pub fn resource(&self) -> Result<Resource>
    {
        self.resource.parse()
    }

    pub fn connect_options(&self) -> ConnectOptions
    {
        ConnectOptions {
            reset: self.reset,
            timeout: self.timeout,
            baud_rate: self.baud_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PowerSupplyConfig
{
    #[serde(flatten)]
    pub instrument: InstrumentConfig,
    /// Query `SYST:ERR?` after every setpoint write
    #[serde(default)]
    pub check_errors: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MeterConfig
{
    #[serde(flatten)]
    pub instrument: InstrumentConfig,
    #[serde(default)]
    pub role: MeterRole,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config
{
    pub power_supply: PowerSupplyConfig,
    #[serde(default)]
    pub meter: Option<MeterConfig>,
    pub capacitor: Capacitor,
    #[serde(default)]
    pub reform: ReformSettings,
}

impl Config
{
    /// Reads and validates a configuration file
    pub fn load(path: &Path) -> Result<Self>
    {
        let text = std::fs::read_to_string(path).map_err(|err| Error::Config {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;

        Self::parse(&text).map_err(|err| match err {
            Error::Config { reason, .. } => Error::Config { path: path.to_path_buf(), reason: reason },
            other => Error::Config { path: path.to_path_buf(), reason: other.to_string() },
        })
    }

    /// Parses and validates configuration text
    pub fn parse(text: &str) -> Result<Self>
    {
        let mut config: Config = toml::from_str(text).map_err(|err| Error::Config {
            path: Default::default(),
            reason: err.to_string(),
        })?;

        if let Some(meter) = &config.meter {
            config.reform.meter_role = meter.role;
        }

        config.capacitor.validate()?;
        config.reform.validate()?;
        reform::step_count(&config.capacitor, &config.reform)?;
        config.power_supply.instrument.resource()?;

        if let Some(meter) = &config.meter {
            meter.instrument.resource()?;
        }

        Ok(config)
    }
}

fn default_baud_rate() -> u32
{
    DEFAULT_BAUD_RATE
}

fn default_reset() -> bool
{
    true
}

/// (De)serializes a `Duration` as a floating point number of seconds
pub(crate) mod seconds
{
    use std::time::Duration;
    use serde::{ de::Error, Deserialize, Deserializer, Serializer };

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error>
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

/// (De)serializes an `Option<Duration>` as an optional floating point number of seconds
pub(crate) mod optional_seconds
{
    use std::time::Duration;
    use serde::{ de::Error, Deserialize, Deserializer, Serializer };

    pub fn serialize<S: Serializer>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    {
        match duration {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error>
    {
        match Option::<f64>::deserialize(deserializer)? {
            Some(secs) => Duration::try_from_secs_f64(secs).map(Some).map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::Config;
    use crate::{
        error::Error,
        reform::MeterRole,
        resource::Resource,
        units::{ Ampere, Volt },
    };
    use std::{ io::Write, time::Duration };

    const VARIAN_C8: &str = r#"
        [power_supply]
        resource = "ASRL/dev/ttyUSB0"
        timeout = 2.5

        [meter]
        resource = "ASRL/dev/ttyUSB1::INSTR"
        role = "authoritative"

        [capacitor]
        capacitance = 23000e-6
        rated_voltage = 18.0
        max_leakage_current = 6e-3
        power_limit = 150e-3

        [reform]
        voltage_step = 0.25
        max_settle_wait = 1800.0
    "#;

    #[test]
    fn full_config()
    {
        let config = Config::parse(VARIAN_C8).unwrap();

        assert_eq!(
            config.power_supply.instrument.resource().unwrap(),
            Resource::Serial { port: "/dev/ttyUSB0".to_string() }
        );
        assert_eq!(config.power_supply.instrument.baud_rate, 9600);
        assert!(config.power_supply.instrument.reset);
        assert!(!config.power_supply.check_errors);
        assert_eq!(config.power_supply.instrument.timeout, Some(Duration::from_millis(2500)));

        assert_eq!(config.capacitor.rated_voltage, Volt::new(18.0));
        assert_eq!(config.capacitor.max_leakage_current, Ampere::new(0.006));

        assert_eq!(config.reform.voltage_step, Volt::new(0.25));
        assert_eq!(config.reform.voltage_tolerance, Volt::new(0.05));
        assert_eq!(config.reform.poll_interval, Duration::from_secs(1));
        assert_eq!(config.reform.max_settle_wait, Some(Duration::from_secs(1800)));
        assert_eq!(config.reform.meter_role, MeterRole::Authoritative);
    }

    #[test]
    fn minimal_config_uses_defaults()
    {
        let config = Config::parse(r#"
            [power_supply]
            resource = "ASRL/dev/ttyUSB0"

            [capacitor]
            capacitance = 0.0047
            rated_voltage = 30.0
            max_leakage_current = 0.006
            power_limit = 0.15
        "#).unwrap();

        assert!(config.meter.is_none());
        assert_eq!(config.reform.voltage_step, Volt::new(0.5));
        assert_eq!(config.reform.max_settle_wait, None);
        assert_eq!(config.reform.meter_role, MeterRole::Advisory);
        assert_eq!(config.power_supply.instrument.timeout, None);
    }

    #[test]
    fn invalid_capacitor_is_rejected()
    {
        let result = Config::parse(r#"
            [power_supply]
            resource = "ASRL/dev/ttyUSB0"

            [capacitor]
            capacitance = 0.0047
            rated_voltage = -30.0
            max_leakage_current = 0.006
            power_limit = 0.15
        "#);

        assert!(matches!(result, Err(Error::InvalidProfile(_))));
    }

    #[test]
    fn tiny_step_is_rejected()
    {
        let result = Config::parse(r#"
            [power_supply]
            resource = "ASRL/dev/ttyUSB0"

            [capacitor]
            capacitance = 0.0047
            rated_voltage = 450.0
            max_leakage_current = 0.006
            power_limit = 0.15

            [reform]
            voltage_step = 1e-6
        "#);

        assert!(matches!(result, Err(Error::InvalidSettings(_))));
    }

    #[test]
    fn unknown_key_is_rejected()
    {
        let result = Config::parse(r#"
            [power_supply]
            resource = "ASRL/dev/ttyUSB0"

            [capacitor]
            capacitance = 0.0047
            rated_voltage = 30.0
            max_leakage_current = 0.006
            power_limit = 0.15

            [reform]
            poll_seconds = 2.0
        "#);

        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn load_names_the_file()
    {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[capacitor]\n").unwrap();

        match Config::load(file.path()) {
            Err(Error::Config { path, .. }) => assert_eq!(path, file.path()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
