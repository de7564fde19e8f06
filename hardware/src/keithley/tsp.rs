//! TSP-over-TCP transport for Keithley Touch/Test Script Processor instruments.
//!
//! TSP instruments accept newline-terminated script statements on a raw TCP
//! socket. Statements produce no reply; query responses are obtained by
//! wrapping the expression in `print(...)` and reading one line back. This
//! module provides the line-oriented transport; instrument-specific command
//! vocabularies live in the drivers built on top of it (e.g. [`super::Smu2450`]).

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Default raw-socket port for Keithley TSP instruments.
pub const DEFAULT_TSP_PORT: u16 = 5025;

/// Default I/O timeout. Matches the 5 s instrument timeout used on the bench.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors produced by the TSP transport.
#[derive(Error, Debug)]
pub enum TspError {
    /// Socket-level failure (connect, read, write, timeout).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The instrument closed the connection mid-response.
    #[error("connection closed by instrument")]
    ConnectionClosed,

    /// A reply was received but could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A numeric reply failed to parse.
    #[error("could not parse '{response}' as a number")]
    ParseError { response: String },
}

/// Result type for TSP transport operations.
pub type TspResult<T> = Result<T, TspError>;

/// Line-oriented connection to a TSP instrument.
pub struct TspDevice {
    addr: String,
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    timeout: Duration,
}

impl TspDevice {
    /// Connect to an instrument at the given socket address.
    ///
    /// For a bare IP, use [`connect_ip`](Self::connect_ip) which applies the
    /// default TSP port (5025).
    pub fn connect<A: ToSocketAddrs + ToString>(addr: A) -> TspResult<Self> {
        let addr_string = addr.to_string();
        let stream = TcpStream::connect(&addr)?;
        Self::from_stream(addr_string, stream, DEFAULT_TIMEOUT)
    }

    /// Connect using the default TSP port.
    pub fn connect_ip(ip: &str) -> TspResult<Self> {
        Self::connect(format!("{ip}:{DEFAULT_TSP_PORT}"))
    }

    fn from_stream(addr: String, stream: TcpStream, timeout: Duration) -> TspResult<Self> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            addr,
            stream,
            reader,
            timeout,
        })
    }

    /// Set the I/O timeout for subsequent operations.
    pub fn set_timeout(&mut self, timeout: Duration) -> TspResult<()> {
        self.timeout = timeout;
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    /// Re-establish the connection after a socket error or timeout.
    pub fn reconnect(&mut self) -> TspResult<()> {
        let stream = TcpStream::connect(&self.addr)?;
        let fresh = Self::from_stream(self.addr.clone(), stream, self.timeout)?;
        *self = fresh;
        Ok(())
    }

    /// Send a TSP statement. Statements do not produce a reply.
    pub fn write(&mut self, statement: &str) -> TspResult<()> {
        debug!("tsp> {statement}");
        self.stream.write_all(statement.as_bytes())?;
        self.stream.write_all(b"\n")?;
        Ok(())
    }

    /// Read one newline-terminated reply line.
    pub fn read_line(&mut self) -> TspResult<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Err(TspError::ConnectionClosed);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
        debug!("tsp< {trimmed}");
        Ok(trimmed)
    }

    /// Evaluate a TSP expression on the instrument and return its printed value.
    ///
    /// Wraps the expression in `print(...)` unless it already is a full
    /// statement that prints (e.g. `*IDN?` on SCPI-compatible firmware).
    pub fn query(&mut self, expression: &str) -> TspResult<String> {
        if expression.ends_with('?') {
            self.write(expression)?;
        } else {
            self.write(&format!("print({expression})"))?;
        }
        self.read_line()
    }

    /// Query an expression and parse the reply as a float.
    pub fn query_value(&mut self, expression: &str) -> TspResult<f64> {
        let response = self.query(expression)?;
        Self::parse_value(&response)
    }

    /// Parse a single numeric reply, tolerating surrounding whitespace.
    pub fn parse_value(response: &str) -> TspResult<f64> {
        let trimmed = response.trim();
        if trimmed.is_empty() {
            return Err(TspError::InvalidResponse("empty reply".to_string()));
        }
        trimmed.parse::<f64>().map_err(|_| TspError::ParseError {
            response: trimmed.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_value() {
        assert_eq!(TspDevice::parse_value("10.0123\r\n").unwrap(), 10.0123);
        assert_eq!(TspDevice::parse_value("  -3.2e-05 ").unwrap(), -3.2e-05);
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(matches!(
            TspDevice::parse_value("   "),
            Err(TspError::InvalidResponse(_))
        ));
    }

    #[test]
    fn parse_rejects_garbage() {
        match TspDevice::parse_value("nil") {
            Err(TspError::ParseError { response }) => assert_eq!(response, "nil"),
            other => panic!("expected ParseError, got {other:?}"),
        }
    }
}
