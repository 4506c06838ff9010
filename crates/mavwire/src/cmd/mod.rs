use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use mavwire_frame::SigningKey;
use mavwire_transport::{Endpoint, TcpClient, TcpServer};

use crate::exit::{transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and print channel events.
    Listen(ListenArgs),
    /// Connect, send a single message and exit.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to listen on: `host:port`, `tcp:host:port` or `unix:/path`.
    pub addr: String,
    /// Only print frames carrying these message ids (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub msg_ids: Option<Vec<u32>>,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
    /// System id of this node.
    #[arg(long, default_value = "255")]
    pub system_id: u8,
    /// Send a heartbeat on every channel at this period (e.g. 1s, 500ms).
    #[arg(long, value_name = "PERIOD")]
    pub heartbeat: Option<String>,
    /// Request telemetry streams from ArduPilot autopilots.
    #[arg(long)]
    pub stream_requests: bool,
    /// Rate requested for every stream, in Hz.
    #[arg(long, default_value = "4", requires = "stream_requests")]
    pub stream_frequency: u16,
    /// Accept any message id without checksum verification.
    #[arg(long, conflicts_with_all = ["heartbeat", "stream_requests"])]
    pub unchecked: bool,
    /// Require incoming frames to be signed with this key (64 hex digits).
    #[arg(long, value_name = "HEX", env = "MAVWIRE_SIGNING_KEY")]
    pub signing_key: Option<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Address to connect to: `host:port`, `tcp:host:port` or `unix:/path`.
    pub addr: String,
    /// Message id.
    #[arg(long)]
    pub msg_id: u32,
    /// Message payload as hex.
    #[arg(long, default_value = "")]
    pub payload: String,
    /// CRC extra of a message outside the built-in dialect.
    #[arg(long)]
    pub crc_extra: Option<u8>,
    /// System id stamped on the frame.
    #[arg(long, default_value = "255")]
    pub system_id: u8,
    /// Component id stamped on the frame.
    #[arg(long, default_value = "1")]
    pub component_id: u8,
    /// Send a v1 frame instead of v2.
    #[arg(long, conflicts_with = "signing_key")]
    pub v1: bool,
    /// Sign the frame with this key (64 hex digits).
    #[arg(long, value_name = "HEX", env = "MAVWIRE_SIGNING_KEY")]
    pub signing_key: Option<String>,
    /// Maximum time to wait for the channel to open (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Debug)]
enum Address<'a> {
    Tcp(&'a str),
    #[cfg_attr(not(unix), allow(dead_code))]
    Unix(&'a str),
}

fn parse_address(addr: &str) -> CliResult<Address<'_>> {
    if let Some(path) = addr.strip_prefix("unix:") {
        if path.is_empty() {
            return Err(CliError::new(USAGE, "unix address needs a path"));
        }
        return Ok(Address::Unix(path));
    }
    let host_port = addr.strip_prefix("tcp:").unwrap_or(addr);
    if !host_port.contains(':') {
        return Err(CliError::new(
            USAGE,
            format!("address must be host:port, tcp:host:port or unix:/path, got {addr}"),
        ));
    }
    Ok(Address::Tcp(host_port))
}

pub(crate) fn server_endpoint(addr: &str) -> CliResult<Arc<dyn Endpoint>> {
    match parse_address(addr)? {
        Address::Tcp(host_port) => {
            let server =
                TcpServer::bind(host_port).map_err(|err| transport_error("bind failed", err))?;
            Ok(Arc::new(server))
        }
        #[cfg(unix)]
        Address::Unix(path) => {
            let server = mavwire_transport::UnixServer::bind(path)
                .map_err(|err| transport_error("bind failed", err))?;
            Ok(Arc::new(server))
        }
        #[cfg(not(unix))]
        Address::Unix(_) => Err(CliError::new(
            USAGE,
            "unix sockets are not supported on this platform",
        )),
    }
}

pub(crate) fn client_endpoint(addr: &str) -> CliResult<Arc<dyn Endpoint>> {
    match parse_address(addr)? {
        Address::Tcp(host_port) => Ok(Arc::new(TcpClient::new(host_port))),
        #[cfg(unix)]
        Address::Unix(path) => Ok(Arc::new(mavwire_transport::UnixClient::new(path))),
        #[cfg(not(unix))]
        Address::Unix(_) => Err(CliError::new(
            USAGE,
            "unix sockets are not supported on this platform",
        )),
    }
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

pub(crate) fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: Vec<u8> = input
        .trim()
        .trim_start_matches("0x")
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::new(USAGE, "hex input must have an even number of digits"));
    }

    digits
        .chunks(2)
        .map(|pair| {
            let high = hex_value(pair[0]);
            let low = hex_value(pair[1]);
            match (high, low) {
                (Some(high), Some(low)) => Ok(high << 4 | low),
                _ => Err(CliError::new(
                    USAGE,
                    format!("invalid hex digits: {}", String::from_utf8_lossy(pair)),
                )),
            }
        })
        .collect()
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

pub(crate) fn parse_key(input: &str) -> CliResult<SigningKey> {
    let bytes = parse_hex(input)?;
    SigningKey::try_from(bytes.as_slice()).map_err(|_| {
        CliError::new(
            USAGE,
            format!("signing key must be 32 bytes, got {}", bytes.len()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }

    #[test]
    fn parse_hex_accepts_prefix_and_spaces() {
        assert_eq!(parse_hex("0x01 ff").unwrap(), vec![0x01, 0xff]);
        assert_eq!(parse_hex("").unwrap(), Vec::<u8>::new());
        assert_eq!(parse_hex("abc").unwrap_err().code, USAGE);
        assert_eq!(parse_hex("zz").unwrap_err().code, USAGE);
    }

    #[test]
    fn parse_key_requires_32_bytes() {
        assert_eq!(parse_key(&"ab".repeat(32)).unwrap(), [0xab; 32]);
        assert!(parse_key("abcd").is_err());
    }

    #[test]
    fn addresses() {
        assert!(matches!(
            parse_address("127.0.0.1:5760").unwrap(),
            Address::Tcp("127.0.0.1:5760")
        ));
        assert!(matches!(
            parse_address("tcp:0.0.0.0:14550").unwrap(),
            Address::Tcp("0.0.0.0:14550")
        ));
        assert!(matches!(
            parse_address("unix:/tmp/mav.sock").unwrap(),
            Address::Unix("/tmp/mav.sock")
        ));
        assert_eq!(parse_address("localhost").unwrap_err().code, USAGE);
        assert_eq!(parse_address("unix:").unwrap_err().code, USAGE);
    }
}
