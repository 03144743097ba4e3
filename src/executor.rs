//! Line protocol handling and command execution

use std::time::Duration;
use tokio::io::{ AsyncWriteExt, AsyncReadExt };
use tracing::trace;
use crate::{
    cmd::CmdSet,
    error::{ CommError, Error, Result },
};

/// Sends commands to an instrument over any byte stream and collects the response lines
pub struct Executor<T>
{
    line_ending: &'static str,
    io_handle: T,
    read_buf: Vec<u8>,
    timeout: Option<Duration>,
}

impl <T> Executor<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    pub fn with(line_ending: &'static str, io_handle: T) -> Self
    {
        Self {
            line_ending: line_ending,
            io_handle: io_handle,
            read_buf: Vec::with_capacity(128),
            timeout: None,
        }
    }

    /// Bound every write and every query with the given time limit
    ///
    /// `None` waits forever, which means a hung transport hangs the caller.
    pub fn set_timeout(&mut self, timeout: Option<Duration>)
    {
        self.timeout = timeout;
    }

    /// Drops the first `n` bytes from the read buffer
    ///
    /// Drops all bytes if `n >= self.read_buf.len()`
    fn drop_first(&mut self, n: usize)
    {
        if n >= self.read_buf.len() {
            self.read_buf.clear();
        }
        else {
            self.read_buf.drain(..n);
            // shrink the buffer's allocation to keep memory usage down
            self.read_buf.shrink_to(128);
        }
    }

    /// Returns the index of the first linefeed in the read buffer if any, starting the search at
    /// the suggested index.
    fn find_line_ending(&self, start_hint: usize) -> Option<usize>
    {
        self.read_buf
            .iter()
            .skip(start_hint)
            .position(|byte| *byte == 0x0A)
            .map(|offset| offset + start_hint)
    }

    /// Reads a line (series of bytes terminated by `LF` / 0x0A) into the read buffer and returns
    /// how many bytes are in the line, terminator included
    ///
    /// # Cancel Safety
    /// This function is cancel safe. It never destroys contents of the read buffer, only appends.
    async fn read_line(&mut self) -> Result<usize, CommError>
    {
        let mut end_index = self.find_line_ending(0);

        while end_index.is_none() {
            let mut temp_buf = [0u8; 64];
            let prior_end = self.read_buf.len();
            let bytes_read = self.io_handle.read(&mut temp_buf[..]).await?;

            if bytes_read == 0 {
                return Err(CommError::Closed);
            }

            self.read_buf.extend_from_slice(&temp_buf[..bytes_read]);
            end_index = self.find_line_ending(prior_end);
        }

        Ok(end_index.map_or(0, |index| index + 1))
    }

    /// Removes a full line from the read buffer and returns it without its line ending
    fn take_line(&mut self, size: usize) -> Result<String, CommError>
    {
        let line = String::from_utf8(self.read_buf[..size].to_vec())?;
        self.drop_first(size);

        Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
    }

    async fn write_cmd(&mut self, cmd: &CmdSet) -> Result<(), CommError>
    {
        let serialized = format!("{}{}", cmd, self.line_ending);
        trace!(cmd = %cmd, "write");
        self.io_handle.write_all(serialized.as_bytes()).await?;
        self.io_handle.flush().await?;

        Ok(())
    }

    async fn transact(&mut self, cmd: &CmdSet) -> Result<Option<String>, CommError>
    {
        self.write_cmd(cmd).await?;

        if cmd.is_query() {
            let response_len = self.read_line().await?;
            let response = self.take_line(response_len)?;
            trace!(cmd = %cmd, response = %response, "read");
            Ok(Some(response))
        }
        else {
            Ok(None)
        }
    }

    async fn transact_timed(&mut self, cmd: &CmdSet) -> Result<Option<String>, CommError>
    {
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.transact(cmd)).await {
                Ok(result) => result,
                Err(_) => Err(CommError::Timeout(limit)),
            },
            None => self.transact(cmd).await,
        }
    }

    /// Sends a command which produces no response
    pub async fn exec_cmd(&mut self, cmd: CmdSet) -> Result<()>
    {
        self.transact_timed(&cmd).await?;
        Ok(())
    }

    /// Sends a query and returns the response line
    pub async fn query(&mut self, cmd: CmdSet) -> Result<String>
    {
        let response = self.transact_timed(&cmd).await?;

        response.ok_or_else(|| {
            CommError::Malformed { query: cmd.to_string(), response: String::new() }.into()
        })
    }

    /// Sends a query and parses the first of the comma separated ASCII values in the response
    pub async fn query_f64(&mut self, cmd: CmdSet) -> Result<f64>
    {
        let response = self.query(cmd.clone()).await?;
        parse_first_f64(&response).ok_or_else(|| malformed(&cmd, response))
    }

    /// Sends a query whose response is a boolean state, either `1`/`0` or `ON`/`OFF`
    pub async fn query_bool(&mut self, cmd: CmdSet) -> Result<bool>
    {
        let response = self.query(cmd.clone()).await?;

        match response.trim().to_ascii_uppercase().as_str() {
            "1" | "ON" => Ok(true),
            "0" | "OFF" => Ok(false),
            _ => Err(malformed(&cmd, response)),
        }
    }

    /// Pops the instrument's error queue and fails if it held an error
    pub async fn check_error(&mut self) -> Result<()>
    {
        let response = self.query(CmdSet::QueryError).await?;

        match parse_error_entry(&response) {
            Some((0, _)) => Ok(()),
            Some((code, message)) => Err(Error::InstrumentFault { code: code, message: message }),
            None => Err(malformed(&CmdSet::QueryError, response)),
        }
    }
}

fn malformed(cmd: &CmdSet, response: String) -> Error
{
    CommError::Malformed { query: cmd.to_string(), response: response }.into()
}

/// Parses responses such as `+1.48000E+00` or `1.48,0.002`
fn parse_first_f64(response: &str) -> Option<f64>
{
    response
        .split(',')
        .next()
        .and_then(|token| token.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

/// Parses an error queue entry such as `-113,"Undefined header"` or `+0,"No error"`
fn parse_error_entry(response: &str) -> Option<(i32, String)>
{
    let (code, message) = match response.split_once(',') {
        Some((code, message)) => (code, message),
        None => (response, ""),
    };
    let code = code.trim().parse::<i32>().ok()?;
    let message = message.trim().trim_matches('"').to_string();

    Some((code, message))
}

#[cfg(test)]
mod tests
{
    use super::{ Executor, parse_first_f64, parse_error_entry };
    use crate::{ cmd::CmdSet, error::{ CommError, Error }, units::Volt };
    use std::time::Duration;
    use tokio::io::{ AsyncBufReadExt, AsyncWriteExt, BufReader };

    #[test]
    fn parses_scientific_readback()
    {
        assert_eq!(parse_first_f64("+1.48000E+00"), Some(1.48));
        assert_eq!(parse_first_f64("2.0E-03,1"), Some(0.002));
        assert_eq!(parse_first_f64("garbage"), None);
        assert_eq!(parse_first_f64("9.9E+37x"), None);
    }

    #[test]
    fn parses_error_queue()
    {
        assert_eq!(parse_error_entry("+0,\"No error\""), Some((0, "No error".to_string())));
        assert_eq!(parse_error_entry("-113,\"Undefined header\""), Some((-113, "Undefined header".to_string())));
        assert_eq!(parse_error_entry("0"), Some((0, String::new())));
        assert_eq!(parse_error_entry("No error"), None);
    }

    #[tokio::test]
    async fn write_then_query()
    {
        let (host, device) = tokio::io::duplex(256);
        let mut exec = Executor::with("\n", host);

        let instrument = tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(device);
            let mut lines = BufReader::new(read_half).lines();
            let mut seen = Vec::new();

            while let Some(line) = lines.next_line().await.unwrap() {
                if line == "MEAS:VOLT?" {
                    write_half.write_all(b"+1.48000E+00\r\n").await.unwrap();
                }
                seen.push(line);
            }

            seen
        });

        exec.exec_cmd(CmdSet::SetVoltage(Volt::new(1.5))).await.unwrap();
        let volts = exec.query_f64(CmdSet::MeasureVoltage).await.unwrap();
        assert_eq!(volts, 1.48);

        drop(exec);
        let seen = instrument.await.unwrap();
        assert_eq!(seen, vec!["VOLT 1.5".to_string(), "MEAS:VOLT?".to_string()]);
    }

    #[tokio::test]
    async fn split_response_is_reassembled()
    {
        let (host, mut device) = tokio::io::duplex(256);
        let mut exec = Executor::with("\n", host);

        device.write_all(b"ON").await.unwrap();
        let writer = tokio::spawn(async move {
            tokio::task::yield_now().await;
            device.write_all(b"\n1\n").await.unwrap();
            device
        });

        assert!(exec.query_bool(CmdSet::QueryOutput).await.unwrap());
        let _device = writer.await.unwrap();
        // the second line is still buffered for the next query
        assert!(exec.query_bool(CmdSet::QueryOutput).await.unwrap());
    }

    #[tokio::test]
    async fn instrument_fault_is_reported()
    {
        let (host, mut device) = tokio::io::duplex(256);
        let mut exec = Executor::with("\n", host);
        device.write_all(b"-222,\"Data out of range\"\n").await.unwrap();

        match exec.check_error().await {
            Err(Error::InstrumentFault { code, message }) => {
                assert_eq!(code, -222);
                assert_eq!(message, "Data out of range");
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_readback_is_rejected()
    {
        let (host, mut device) = tokio::io::duplex(256);
        let mut exec = Executor::with("\n", host);
        device.write_all(b"OVP\n").await.unwrap();

        match exec.query_f64(CmdSet::MeasureCurrent).await {
            Err(Error::Communication(CommError::Malformed { query, response })) => {
                assert_eq!(query, "MEAS:CURR?");
                assert_eq!(response, "OVP");
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_instrument_times_out()
    {
        let (host, _device) = tokio::io::duplex(256);
        let mut exec = Executor::with("\n", host);
        exec.set_timeout(Some(Duration::from_secs(2)));

        match exec.query_f64(CmdSet::MeasureVoltage).await {
            Err(Error::Communication(CommError::Timeout(limit))) => assert_eq!(limit, Duration::from_secs(2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn closed_stream_is_reported()
    {
        let (host, device) = tokio::io::duplex(256);
        let mut exec = Executor::with("\n", host);
        drop(device);

        assert!(matches!(
            exec.query(CmdSet::Identify).await,
            Err(Error::Communication(_))
        ));
    }
}
