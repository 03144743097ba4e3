//! Instrument command definition and serialization
//!
//! Both the power supply and the multimeter speak SCPI over a line-oriented link. Commands ending
//! in `?` are queries and produce exactly one response line; all others are silent.

use std::fmt;
use crate::units::{ Ampere, Volt, write_scpi_number };

#[derive(Debug, Clone, PartialEq)]
pub enum CmdSet
{
    /// Ask the instrument to identify itself
    ///
    /// Command: `*IDN?`
    Identify,
    /// Return the instrument to its power-on state
    ///
    /// Command: `*RST`
    Reset,
    /// Take the instrument out of (or give it back to) front panel control
    ///
    /// Command: `SYST:REM` / `SYST:LOC`
    Remote(bool),
    /// Command: `VOLT <volts>`
    SetVoltage(Volt),
    /// Command: `VOLT?`
    QueryVoltage,
    /// Command: `CURR <amps>`
    SetCurrent(Ampere),
    /// Command: `CURR?`
    QueryCurrent,
    /// Connect or disconnect the output stage
    ///
    /// Command: `OUTPUT:STATE <ON|OFF>`
    SetOutput(bool),
    /// Command: `OUTPUT:STATE?`
    QueryOutput,
    /// Voltage actually present on a power supply's terminals
    ///
    /// Command: `MEAS:VOLT?`
    MeasureVoltage,
    /// Current actually delivered by a power supply
    ///
    /// Command: `MEAS:CURR?`
    MeasureCurrent,
    /// Command: `MEASURE:VOLTAGE:DC?`
    MeasureDcVoltage,
    /// Multimeter DC current reading, optionally with a fixed range and resolution
    ///
    /// Command: `MEASURE:CURRENT:DC? [<range>[,<resolution>]]`. A resolution without a range is
    /// not expressible in SCPI and is dropped.
    MeasureDcCurrent
    {
        range: Option<Ampere>,
        resolution: Option<Ampere>,
    },
    /// Pop the oldest entry from the instrument's error queue
    ///
    /// Command: `SYST:ERR?`
    QueryError,
}

impl CmdSet
{
    /// Whether the instrument answers this command with a response line
    pub fn is_query(&self) -> bool
    {
        match self {
            CmdSet::Identify
            | CmdSet::QueryVoltage
            | CmdSet::QueryCurrent
            | CmdSet::QueryOutput
            | CmdSet::MeasureVoltage
            | CmdSet::MeasureCurrent
            | CmdSet::MeasureDcVoltage
            | CmdSet::MeasureDcCurrent { .. }
            | CmdSet::QueryError => true,
            CmdSet::Reset
            | CmdSet::Remote(_)
            | CmdSet::SetVoltage(_)
            | CmdSet::SetCurrent(_)
            | CmdSet::SetOutput(_) => false,
        }
    }
}

impl fmt::Display for CmdSet
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            CmdSet::Identify => f.write_str("*IDN?"),
            CmdSet::Reset => f.write_str("*RST"),
            CmdSet::Remote(remote) => f.write_str(if *remote { "SYST:REM" } else { "SYST:LOC" }),
            CmdSet::SetVoltage(volts) => {
                f.write_str("VOLT ")?;
                write_scpi_number(f, volts.value())
            },
            CmdSet::QueryVoltage => f.write_str("VOLT?"),
            CmdSet::SetCurrent(amps) => {
                f.write_str("CURR ")?;
                write_scpi_number(f, amps.value())
            },
            CmdSet::QueryCurrent => f.write_str("CURR?"),
            CmdSet::SetOutput(enabled) => write!(f, "OUTPUT:STATE {}", if *enabled { "ON" } else { "OFF" }),
            CmdSet::QueryOutput => f.write_str("OUTPUT:STATE?"),
            CmdSet::MeasureVoltage => f.write_str("MEAS:VOLT?"),
            CmdSet::MeasureCurrent => f.write_str("MEAS:CURR?"),
            CmdSet::MeasureDcVoltage => f.write_str("MEASURE:VOLTAGE:DC?"),
            CmdSet::MeasureDcCurrent { range, resolution } => {
                f.write_str("MEASURE:CURRENT:DC?")?;

                if let Some(range) = range {
                    f.write_str(" ")?;
                    write_scpi_number(f, range.value())?;

                    if let Some(resolution) = resolution {
                        f.write_str(",")?;
                        write_scpi_number(f, resolution.value())?;
                    }
                }

                Ok(())
            },
            CmdSet::QueryError => f.write_str("SYST:ERR?"),
        }
    }
}
