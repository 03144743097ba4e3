//! What the reforming controller needs from the instruments on the bench
//!
//! The controller is written against these traits rather than against a particular driver so that
//! any programmable supply can be used and so that sessions can be exercised against fakes. Every
//! operation is a single blocking transaction from the controller's point of view; none of them
//! is retried.
#![allow(async_fn_in_trait)]

use crate::{
    error::Result,
    units::{ Ampere, Volt },
};

/// A programmable DC source with voltage and current limits, a switchable output, and readback of
/// the delivered terminal values
pub trait PowerSource
{
    /// Take the source out of front panel control (or hand it back). Idempotent.
    async fn set_remote(&mut self, enabled: bool) -> Result<()>;

    async fn set_voltage_limit(&mut self, volts: Volt) -> Result<()>;

    async fn voltage_limit(&mut self) -> Result<Volt>;

    async fn set_current_limit(&mut self, amps: Ampere) -> Result<()>;

    async fn current_limit(&mut self) -> Result<Ampere>;

    /// Connect or disconnect the output stage
    async fn set_output_enable(&mut self, enabled: bool) -> Result<()>;

    async fn output_enable(&mut self) -> Result<bool>;

    /// Voltage actually present on the terminals, not the setpoint
    async fn measure_voltage(&mut self) -> Result<Volt>;

    /// Current actually delivered, not the limit
    async fn measure_current(&mut self) -> Result<Ampere>;
}

/// An independent, usually more precise, measuring instrument wired across the capacitor
pub trait Meter
{
    async fn measure_voltage(&mut self) -> Result<Volt>;

    async fn measure_current(&mut self) -> Result<Ampere>;
}

/// Stands in for the meter type when no meter is attached
///
/// It has no values, so a controller holding `Option<NoMeter>` can only ever hold `None`.
#[derive(Debug)]
pub enum NoMeter {}

impl Meter for NoMeter
{
    async fn measure_voltage(&mut self) -> Result<Volt>
    {
        match *self {}
    }

    async fn measure_current(&mut self) -> Result<Ampere>
    {
        match *self {}
    }
}

impl <P: PowerSource> PowerSource for &mut P
{
    async fn set_remote(&mut self, enabled: bool) -> Result<()>
    {
        (**self).set_remote(enabled).await
    }

    async fn set_voltage_limit(&mut self, volts: Volt) -> Result<()>
    {
        (**self).set_voltage_limit(volts).await
    }

    async fn voltage_limit(&mut self) -> Result<Volt>
    {
        (**self).voltage_limit().await
    }

    async fn set_current_limit(&mut self, amps: Ampere) -> Result<()>
    {
        (**self).set_current_limit(amps).await
    }

    async fn current_limit(&mut self) -> Result<Ampere>
    {
        (**self).current_limit().await
    }

    async fn set_output_enable(&mut self, enabled: bool) -> Result<()>
    {
        (**self).set_output_enable(enabled).await
    }

    async fn output_enable(&mut self) -> Result<bool>
    {
        (**self).output_enable().await
    }

    async fn measure_voltage(&mut self) -> Result<Volt>
    {
        (**self).measure_voltage().await
    }

    async fn measure_current(&mut self) -> Result<Ampere>
    {
        (**self).measure_current().await
    }
}

impl <M: Meter> Meter for &mut M
{
    async fn measure_voltage(&mut self) -> Result<Volt>
    {
        (**self).measure_voltage().await
    }

    async fn measure_current(&mut self) -> Result<Ampere>
    {
        (**self).measure_current().await
    }
}
