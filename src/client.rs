//! A small client for talking to an aggregation node over the wire
//! protocol. Used by the producer and reader binaries and by tests.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use crate::clock::LamportClock;
use crate::error::{AggError, Result};
use crate::protocol::{self, Response};
use crate::record::Record;

// agent name presented in the User-Agent header
const AGENT: &str = "wxagg/0.1";

/// `AggClient` holds the server address and a local Lamport clock.
///
/// The protocol is stateless, so every request opens a fresh connection,
/// reads the response until the server closes, and merges the server's
/// clock back into the local one.
pub struct AggClient {
    addr: SocketAddr,
    agent: String,
    clock: LamportClock,
}

impl AggClient {
    /// creates a client for the server at the given address
    pub fn new<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| AggError::Parsing("server address did not resolve".to_string()))?;
        Ok(AggClient {
            addr,
            agent: AGENT.to_string(),
            clock: LamportClock::new(),
        })
    }

    /// the client's current Lamport clock value
    pub fn lamport(&self) -> u64 {
        self.clock.now()
    }

    /// pushes `record` under this client's producer id and returns the
    /// server's response
    pub fn push(&self, producer_id: &str, record: &Record) -> Result<Response> {
        let request = protocol::encode_push(&self.agent, producer_id, self.clock.now(), record)?;
        self.clock.tick();
        let response = self.roundtrip(&request)?;
        self.clock.merge(response.lamport_clock);
        Ok(response)
    }

    /// fetches the latest record for `id` and returns the server's response
    pub fn fetch(&self, id: &str) -> Result<Response> {
        let request = protocol::encode_fetch(&self.agent, id, self.clock.now());
        self.clock.tick();
        let response = self.roundtrip(&request)?;
        self.clock.merge(response.lamport_clock);
        Ok(response)
    }

    // one connection per request; the server closes after writing
    fn roundtrip(&self, request: &str) -> Result<Response> {
        let mut stream = TcpStream::connect(self.addr)?;
        stream.write_all(request.as_bytes())?;
        stream.flush()?;
        let mut raw = String::new();
        stream.read_to_string(&mut raw)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Parses a `host:port` server address, tolerating an `http://` or
/// `https://` prefix.
///
/// # Errors
///
/// Returns [`AggError::Parsing`] when the shape is wrong, the port is not
/// in range, or the host does not resolve.
pub fn parse_server_addr(url: &str) -> Result<SocketAddr> {
    let trimmed = url
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    let (host, port) = trimmed
        .rsplit_once(':')
        .ok_or_else(|| AggError::Parsing(format!("invalid server address {}: expected host:port", url)))?;
    if host.is_empty() {
        return Err(AggError::Parsing("server host cannot be empty".to_string()));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| AggError::Parsing(format!("invalid port number: {}", port)))?;
    if port == 0 {
        return Err(AggError::Parsing("port must be between 1 and 65535".to_string()));
    }
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| AggError::Parsing(format!("server address {} did not resolve", url)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_addr_accepts_plain_and_prefixed_forms() {
        assert_eq!(
            parse_server_addr("127.0.0.1:4567").unwrap(),
            "127.0.0.1:4567".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_server_addr("http://127.0.0.1:4567").unwrap(),
            "127.0.0.1:4567".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn server_addr_rejects_bad_shapes() {
        assert!(parse_server_addr("localhost").is_err());
        assert!(parse_server_addr(":4567").is_err());
        assert!(parse_server_addr("127.0.0.1:notaport").is_err());
        assert!(parse_server_addr("127.0.0.1:0").is_err());
    }
}
