//! Error types for instrument communication and reforming sessions

use std::{
    io,
    path::PathBuf,
    time::Duration,
};
use thiserror::Error;
use crate::units::Volt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A failure on the line between the host and an instrument
#[derive(Debug, Error)]
pub enum CommError
{
    /// Reading or writing the stream failed, e.g. the serial adapter was unplugged
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),
    /// The instrument did not complete the transaction in time
    #[error("no response within {0:?}")]
    Timeout(Duration),
    /// The stream closed before a full response line arrived
    #[error("connection closed by instrument")]
    Closed,
    /// The response could not be interpreted as an answer to the query
    #[error("unexpected response {response:?} to `{query}`")]
    Malformed
    {
        query: String,
        response: String,
    },
    /// The response was not valid UTF-8
    ///
    /// This usually means a wrong baud rate or a serial hotplug mid-transfer.
    #[error("response is not valid text: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Anything that can go wrong while connecting to instruments or reforming a capacitor
#[derive(Debug, Error)]
pub enum Error
{
    /// The instrument could not be opened or did not identify itself
    #[error("no {name} at `{resource}`: {reason}")]
    InstrumentUnavailable
    {
        name: String,
        resource: String,
        reason: String,
    },
    #[error("communication error: {0}")]
    Communication(#[from] CommError),
    /// The instrument reported an entry in its error queue
    #[error("instrument fault {code}: {message}")]
    InstrumentFault
    {
        code: i32,
        message: String,
    },
    /// The capacitor did not settle at a voltage step within the configured limit
    #[error("capacitor did not settle at {voltage} within {waited:?}")]
    SettleTimeout
    {
        voltage: Volt,
        waited: Duration,
    },
    /// The session was stopped from outside before reaching rated voltage
    #[error("reforming interrupted")]
    Interrupted,
    #[error("invalid capacitor profile: {0}")]
    InvalidProfile(&'static str),
    #[error("invalid reforming settings: {0}")]
    InvalidSettings(&'static str),
    #[error("unsupported resource identifier `{0}`")]
    InvalidResource(String),
    #[error("configuration {path}: {reason}")]
    Config
    {
        path: PathBuf,
        reason: String,
    },
}

impl From<io::Error> for Error
{
    fn from(this: io::Error) -> Self
    {
        Error::Communication(CommError::Io(this))
    }
}

impl Error
{
    /// Whether this error came from the instrument link or the instrument itself rather than from
    /// the reforming logic
    pub fn is_instrument_error(&self) -> bool
    {
        matches!(
            self,
            Error::InstrumentUnavailable { .. } | Error::Communication(_) | Error::InstrumentFault { .. }
        )
    }
}
