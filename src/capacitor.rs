//! The device under reforming

use serde::{ Deserialize, Serialize };
use crate::{
    error::{ Error, Result },
    units::{ Ampere, Farad, Volt, Watt },
};

/// Static description of the capacitor being reformed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Capacitor
{
    pub capacitance: Farad,
    /// Terminal voltage the capacitor must eventually reach and never exceed
    pub rated_voltage: Volt,
    /// Steady-state current below which the capacitor counts as settled at a voltage
    pub max_leakage_current: Ampere,
    /// Most power the supply may deliver; sets the current limit at every step
    pub power_limit: Watt,
}

impl Capacitor
{
    pub fn new(
        capacitance: Farad,
        rated_voltage: Volt,
        max_leakage_current: Ampere,
        power_limit: Watt,
    )
        -> Result<Self>
    {
        let capacitor = Self {
            capacitance: capacitance,
            rated_voltage: rated_voltage,
            max_leakage_current: max_leakage_current,
            power_limit: power_limit,
        };
        capacitor.validate()?;

        Ok(capacitor)
    }

    /// Checks that every quantity is finite and strictly positive
    pub fn validate(&self) -> Result<()>
    {
        if !(self.capacitance.is_finite() && self.capacitance > Farad::ZERO) {
            return Err(Error::InvalidProfile("capacitance must be a positive number of farads"));
        }
        if !(self.rated_voltage.is_finite() && self.rated_voltage > Volt::ZERO) {
            return Err(Error::InvalidProfile("rated voltage must be a positive number of volts"));
        }
        if !(self.max_leakage_current.is_finite() && self.max_leakage_current > Ampere::ZERO) {
            return Err(Error::InvalidProfile("maximum leakage current must be a positive number of amperes"));
        }
        if !(self.power_limit.is_finite() && self.power_limit > Watt::ZERO) {
            return Err(Error::InvalidProfile("power limit must be a positive number of watts"));
        }

        Ok(())
    }

    /// Current limit that keeps the supply within the power limit at the given voltage
    ///
    /// Undefined at zero volts; callers use a fixed floor there instead.
    pub fn current_limit_at(&self, voltage: Volt) -> Ampere
    {
        self.power_limit / voltage
    }
}
