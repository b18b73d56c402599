//! Transport URI parsing: `local://`, `tcp://host:port`, `tcp://:port`,
//! `serial:///dev/path?baud=N`, `shm://name`.

use std::time::Duration;

use crate::error::TransportError;

const DEFAULT_TCP_TIMEOUT_MS: u64 = 5000;
const SUPPORTED_BAUD_RATES: [u32; 8] =
    [9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600];

/// A parsed transport URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportUri {
    /// `local://` or an empty URI: paired local file descriptors.
    Local,
    /// `tcp://host:port`: harness-side TCP client.
    TcpClient { host: String, port: u16, timeout: Duration },
    /// `tcp://:port`: adapter-side TCP server.
    TcpServer { port: u16, accept_timeout: Duration },
    /// `serial:///dev/path?baud=N`.
    Serial { device_path: String, baud: u32 },
    /// `shm://name`.
    Shm { name: String },
}

/// Parse a transport URI string, defaulting to [`TransportUri::Local`] when
/// empty.
pub fn parse(uri: &str) -> Result<TransportUri, TransportError> {
    if uri.is_empty() || uri == "local://" {
        return Ok(TransportUri::Local);
    }

    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| TransportError::Io(format!("malformed transport uri: {uri}")))?;

    match scheme {
        "local" => Ok(TransportUri::Local),
        "tcp" => parse_tcp(rest),
        "serial" => parse_serial(rest),
        "shm" => Ok(TransportUri::Shm { name: rest.to_string() }),
        other => Err(TransportError::Io(format!("unknown transport scheme: {other}"))),
    }
}

fn split_query(rest: &str) -> (&str, Vec<(&str, &str)>) {
    match rest.split_once('?') {
        None => (rest, Vec::new()),
        Some((path, query)) => {
            let params = query
                .split('&')
                .filter_map(|kv| kv.split_once('='))
                .collect();
            (path, params)
        }
    }
}

fn parse_tcp(rest: &str) -> Result<TransportUri, TransportError> {
    let (authority, params) = split_query(rest);
    let timeout_ms = params
        .iter()
        .find(|(k, _)| *k == "timeout_ms")
        .and_then(|(_, v)| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_TCP_TIMEOUT_MS);
    let accept_timeout_ms = params
        .iter()
        .find(|(k, _)| *k == "accept_timeout_ms")
        .and_then(|(_, v)| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_TCP_TIMEOUT_MS);

    if let Some(port_str) = authority.strip_prefix(':') {
        // Server form must not carry a host.
        let port = port_str
            .parse::<u16>()
            .map_err(|_| TransportError::Io(format!("invalid tcp server port: {port_str}")))?;
        return Ok(TransportUri::TcpServer {
            port,
            accept_timeout: Duration::from_millis(accept_timeout_ms),
        });
    }

    let (host, port_str) = authority
        .rsplit_once(':')
        .ok_or_else(|| TransportError::Io(format!("tcp client uri missing port: {authority}")))?;
    if host.is_empty() {
        return Err(TransportError::Io("tcp server uri must omit host".to_string()));
    }
    let port = port_str
        .parse::<u16>()
        .map_err(|_| TransportError::Io(format!("invalid tcp client port: {port_str}")))?;
    Ok(TransportUri::TcpClient {
        host: host.to_string(),
        port,
        timeout: Duration::from_millis(timeout_ms),
    })
}

fn parse_serial(rest: &str) -> Result<TransportUri, TransportError> {
    let (path, params) = split_query(rest);
    let device_path = format!("/{path}");
    let requested_baud = params
        .iter()
        .find(|(k, _)| *k == "baud")
        .and_then(|(_, v)| v.parse::<u32>().ok())
        .unwrap_or(115_200);
    let baud = if SUPPORTED_BAUD_RATES.contains(&requested_baud) {
        requested_baud
    } else {
        let nearest = SUPPORTED_BAUD_RATES
            .iter()
            .min_by_key(|rate| rate.abs_diff(requested_baud))
            .copied()
            .unwrap_or(115_200);
        tracing::warn!(
            requested_baud,
            nearest_supported = nearest,
            "unsupported baud rate, degrading to nearest supported value"
        );
        nearest
    };
    Ok(TransportUri::Serial { device_path, baud })
}
