//! Discovery of the node's internet-facing address.
//!
//! The node asks a plain-HTTP "what is my IP" service. Local test setups
//! skip the lookup entirely and advertise loopback.

use crate::error::{PeerError, Result};
use log::{debug, info};
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpStream, ToSocketAddrs};
use std::time::Duration;

const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);
/// Echo responses are one short line; anything longer is not an address
const MAX_RESPONSE_LEN: u64 = 16 * 1024;

pub trait AddressResolver: Send + Sync {
    fn resolve(&self) -> Result<IpAddr>;
}

/// Always answers 127.0.0.1
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopbackResolver;

impl AddressResolver for LoopbackResolver {
    fn resolve(&self) -> Result<IpAddr> {
        Ok(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

/// Asks an HTTP echo service (e.g. `icanhazip.com:80`) for our address
#[derive(Debug, Clone)]
pub struct EchoServiceResolver {
    service: String,
    timeout: Duration,
}

impl EchoServiceResolver {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn host_header(&self) -> &str {
        match self.service.rsplit_once(':') {
            Some((host, _port)) => host,
            None => &self.service,
        }
    }

    fn connect(&self) -> Result<TcpStream> {
        let addrs = self.service.to_socket_addrs().map_err(|e| {
            PeerError::AddressResolution(format!("Cannot resolve {}: {e}", self.service))
        })?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(PeerError::AddressResolution(match last_error {
            Some(e) => format!("Cannot reach {}: {e}", self.service),
            None => format!("{} resolved to no addresses", self.service),
        }))
    }
}

impl AddressResolver for EchoServiceResolver {
    fn resolve(&self) -> Result<IpAddr> {
        let mut stream = self.connect()?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        if let Ok(local) = stream.local_addr() {
            debug!("Internal address is {}", local.ip());
        }

        let request = format!("GET / HTTP/1.0\r\nHost: {}\r\n\r\n", self.host_header());
        stream.write_all(request.as_bytes())?;

        let mut response = Vec::new();
        stream.take(MAX_RESPONSE_LEN).read_to_end(&mut response)?;

        let ip = parse_echo_response(&response)?;
        info!("External address reported by {} is {ip}", self.service);
        Ok(ip)
    }
}

/// Extract the address from a raw HTTP response (headers optional)
pub fn parse_echo_response(response: &[u8]) -> Result<IpAddr> {
    let text = String::from_utf8_lossy(response);
    let body = match text.split_once("\r\n\r\n") {
        Some((_headers, body)) => body,
        None => text.as_ref(),
    };
    body.trim().parse::<IpAddr>().map_err(|e| {
        PeerError::AddressResolution(format!("Echo service returned {:?}: {e}", body.trim()))
    })
}
