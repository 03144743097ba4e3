//! Instrument resource identifiers and transport setup
//!
//! Resources are named with VISA-style identifiers so the same strings work with other tooling on
//! the bench. Only serial resources are opened here. Any other transport can be used by handing
//! an already-open stream to the device handles' `with()` constructors.

use std::{ fmt, str::FromStr };
use tokio_serial::{ SerialPortBuilderExt, SerialStream };
use crate::error::Error;

pub const DEFAULT_BAUD_RATE: u32 = 9600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource
{
    /// A serial port, e.g. `ASRL/dev/ttyUSB0` or `ASRL/dev/ttyUSB0::INSTR`
    Serial
    {
        port: String,
    },
}

impl FromStr for Resource
{
    type Err = Error;

    fn from_str(res_id: &str) -> Result<Self, Self::Err>
    {
        let trimmed = res_id.trim();
        let without_class = trimmed.strip_suffix("::INSTR").unwrap_or(trimmed);

        match without_class.strip_prefix("ASRL") {
            Some(port) if !port.is_empty() && !port.contains("::") => Ok(Resource::Serial { port: port.to_string() }),
            _ => Err(Error::InvalidResource(res_id.to_string())),
        }
    }
}

impl fmt::Display for Resource
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Resource::Serial { port } => write!(f, "ASRL{}::INSTR", port),
        }
    }
}

impl Resource
{
    /// Opens the transport for this resource
    ///
    /// Serial lines are opened 8N1 without flow control, which is what bench supplies and meters
    /// ship configured for.
    pub fn open(&self, name: &str, baud_rate: u32) -> Result<SerialStream, Error>
    {
        match self {
            Resource::Serial { port } => tokio_serial::new(port.as_str(), baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
                .map_err(|err| Error::InstrumentUnavailable {
                    name: name.to_string(),
                    resource: self.to_string(),
                    reason: err.to_string(),
                }),
        }
    }
}
