//! Device definitions and APIs
//!
//! # Purpose
//! This module defines handles to an active I/O stream for the two kinds of instrument used while
//! reforming:
//!   - a programmable DC power supply, which applies and limits the reforming voltage
//!   - a digital multimeter, which optionally provides independent readings across the capacitor
//!
//! Both speak plain SCPI and share the identification and reset handling in
//! [`Instrument`].
//!
//! # Cancel Safety
//! **The device RPCs are not cancel safe,** i.e. they should not be raced in a `tokio::select!`.
//! Queries have both a write and a read, so cancelling after the write but before the read leaves
//! a stale response in the stream which the next query will take as its own answer.

use std::time::Duration;
use tokio::io::{ AsyncWriteExt, AsyncReadExt };
use tokio_serial::SerialStream;
use tracing::info;
use crate::{
    capability::{ Meter, PowerSource },
    cmd::CmdSet,
    error::{ Error, Result },
    executor::Executor,
    resource::Resource,
    units::{ Ampere, Volt },
};

/// How to bring up an instrument connection
#[derive(Debug, Clone)]
pub struct ConnectOptions
{
    /// Send `*RST` once the instrument has identified itself
    pub reset: bool,
    /// Time limit for each command or query, `None` to wait forever
    pub timeout: Option<Duration>,
    /// Serial line speed, ignored for non-serial streams
    pub baud_rate: u32,
}

impl Default for ConnectOptions
{
    fn default() -> Self
    {
        Self {
            reset: true,
            timeout: None,
            baud_rate: crate::resource::DEFAULT_BAUD_RATE,
        }
    }
}

/// A named SCPI instrument on some byte stream
pub struct Instrument<T>
{
    name: String,
    id: Option<String>,
    exec: Executor<T>,
}

impl <T> Instrument<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    /// Wrap an already-open stream
    ///
    /// Creating I/O handles is not handled here so that you are not restricted to a particular
    /// hardware interface. A USB-TMC or LAN bridge exposing a byte stream works as well as a
    /// local serial line.
    pub fn with(name: &str, io_handle: T) -> Self
    {
        Self {
            name: name.to_string(),
            id: None,
            exec: Executor::with("\n", io_handle),
        }
    }

    pub fn name(&self) -> &str
    {
        &self.name
    }

    /// The `*IDN?` reply, once connected
    pub fn id(&self) -> Option<&str>
    {
        self.id.as_deref()
    }

    /// Ask the instrument to identify itself and optionally reset it
    ///
    /// Failing to get an identification means nothing useful is listening on the stream, so the
    /// error is reported as [`Error::InstrumentUnavailable`].
    pub async fn connect(&mut self, resource: &str, options: &ConnectOptions) -> Result<()>
    {
        self.exec.set_timeout(options.timeout);

        let id = self
            .exec
            .query(CmdSet::Identify)
            .await
            .map_err(|err| Error::InstrumentUnavailable {
                name: self.name.clone(),
                resource: resource.to_string(),
                reason: err.to_string(),
            })?;

        info!(instrument = %self.name, id = %id, "connected");
        self.id = Some(id);

        if options.reset {
            self.exec.exec_cmd(CmdSet::Reset).await?;
        }

        Ok(())
    }
}

/// A programmable DC power supply
pub struct PowerSupply<T>
{
    delegate: Instrument<T>,
    check_errors: bool,
}

impl <T> PowerSupply<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    pub fn with(io_handle: T) -> Self
    {
        Self {
            delegate: Instrument::with("PS", io_handle),
            check_errors: false,
        }
    }

    /// Query the instrument's error queue after every setting so that a rejected setpoint fails
    /// the call that sent it instead of going unnoticed
    pub fn check_errors(mut self, check: bool) -> Self
    {
        self.check_errors = check;
        self
    }

    pub fn instrument(&self) -> &Instrument<T>
    {
        &self.delegate
    }

    pub async fn connect(&mut self, resource: &str, options: &ConnectOptions) -> Result<()>
    {
        self.delegate.connect(resource, options).await
    }

    async fn write_setting(&mut self, cmd: CmdSet) -> Result<()>
    {
        self.delegate.exec.exec_cmd(cmd).await?;

        if self.check_errors {
            self.delegate.exec.check_error().await?;
        }

        Ok(())
    }
}

impl <T> PowerSource for PowerSupply<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    async fn set_remote(&mut self, enabled: bool) -> Result<()>
    {
        self.write_setting(CmdSet::Remote(enabled)).await
    }

    async fn set_voltage_limit(&mut self, volts: Volt) -> Result<()>
    {
        self.write_setting(CmdSet::SetVoltage(volts)).await
    }

    async fn voltage_limit(&mut self) -> Result<Volt>
    {
        Ok(Volt::new(self.delegate.exec.query_f64(CmdSet::QueryVoltage).await?))
    }

    async fn set_current_limit(&mut self, amps: Ampere) -> Result<()>
    {
        self.write_setting(CmdSet::SetCurrent(amps)).await
    }

    async fn current_limit(&mut self) -> Result<Ampere>
    {
        Ok(Ampere::new(self.delegate.exec.query_f64(CmdSet::QueryCurrent).await?))
    }

    async fn set_output_enable(&mut self, enabled: bool) -> Result<()>
    {
        self.write_setting(CmdSet::SetOutput(enabled)).await
    }

    async fn output_enable(&mut self) -> Result<bool>
    {
        self.delegate.exec.query_bool(CmdSet::QueryOutput).await
    }

    async fn measure_voltage(&mut self) -> Result<Volt>
    {
        Ok(Volt::new(self.delegate.exec.query_f64(CmdSet::MeasureVoltage).await?))
    }

    async fn measure_current(&mut self) -> Result<Ampere>
    {
        Ok(Ampere::new(self.delegate.exec.query_f64(CmdSet::MeasureCurrent).await?))
    }
}

/// A digital multimeter
pub struct Multimeter<T>
{
    delegate: Instrument<T>,
}

impl <T> Multimeter<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    pub fn with(io_handle: T) -> Self
    {
        Self {
            delegate: Instrument::with("DMM", io_handle),
        }
    }

    pub fn instrument(&self) -> &Instrument<T>
    {
        &self.delegate
    }

    pub async fn connect(&mut self, resource: &str, options: &ConnectOptions) -> Result<()>
    {
        self.delegate.connect(resource, options).await
    }

    /// DC current on a fixed range, optionally with a requested resolution
    ///
    /// Leakage currents of a few microamps read far better on a fixed low range than on autorange.
    pub async fn dc_current_ranged(&mut self, range: Ampere, resolution: Option<Ampere>) -> Result<Ampere>
    {
        let cmd = CmdSet::MeasureDcCurrent { range: Some(range), resolution: resolution };
        Ok(Ampere::new(self.delegate.exec.query_f64(cmd).await?))
    }
}

impl <T> Meter for Multimeter<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    async fn measure_voltage(&mut self) -> Result<Volt>
    {
        Ok(Volt::new(self.delegate.exec.query_f64(CmdSet::MeasureDcVoltage).await?))
    }

    async fn measure_current(&mut self) -> Result<Ampere>
    {
        let cmd = CmdSet::MeasureDcCurrent { range: None, resolution: None };
        Ok(Ampere::new(self.delegate.exec.query_f64(cmd).await?))
    }
}

/// Opens and identifies the power supply at the given resource
pub async fn open_power_supply(
    resource: &Resource,
    options: &ConnectOptions,
    check_errors: bool,
)
    -> Result<PowerSupply<SerialStream>>
{
    let stream = resource.open("PS", options.baud_rate)?;
    let mut supply = PowerSupply::with(stream).check_errors(check_errors);
    supply.connect(&resource.to_string(), options).await?;

    Ok(supply)
}

/// Opens and identifies the multimeter at the given resource
pub async fn open_multimeter(resource: &Resource, options: &ConnectOptions) -> Result<Multimeter<SerialStream>>
{
    let stream = resource.open("DMM", options.baud_rate)?;
    let mut meter = Multimeter::with(stream);
    meter.connect(&resource.to_string(), options).await?;

    Ok(meter)
}
