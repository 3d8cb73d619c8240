//! Transport sockets
//!
//! Capability abstraction over the byte/message channel to the vehicle.
//! A [`Connector`] opens a transport and hands back its two halves: the
//! [`TransportSink`] owned by the connection manager and the
//! [`TransportSource`] driven by the read loop.

mod framed;
mod stream;

pub use framed::{FramedConnector, FramedSink, FramedSource};
pub use stream::{StreamConnector, StreamSink, StreamSource};

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};
use crate::link::OutgoingMessage;

/// Host and port of the vehicle's control channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolve to a socket address, skipping DNS for literal IPs
    pub async fn resolve(&self) -> std::io::Result<SocketAddr> {
        if let Ok(ip) = self.host.parse::<std::net::IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no addresses found for {}", self),
                )
            })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got {:?}", s))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(format!("missing host in {:?}", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("invalid port in {:?}: {}", s, e))?;
        Ok(Self::new(host, port))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// One unit read from a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Application data
    Message(String),
    /// Remote end closed the channel cleanly
    Closed { reason: String },
}

/// Opens transports of one variant
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a transport to `endpoint`.
    ///
    /// Failures are reported as connect failures. The connect timeout is
    /// applied by the caller.
    async fn open(
        &self,
        endpoint: &Endpoint,
    ) -> LinkResult<(Box<dyn TransportSink>, Box<dyn TransportSource>)>;

    /// Reject payloads this variant cannot frame
    fn validate(&self, _message: &OutgoingMessage) -> LinkResult<()> {
        Ok(())
    }

    fn kind(&self) -> TransportKind;
}

/// Outbound half of an open transport
#[async_trait]
pub trait TransportSink: Send + 'static {
    /// Write one message
    async fn transmit(&mut self, message: &OutgoingMessage) -> LinkResult<()>;

    /// Close the transport. Errors are swallowed.
    async fn close(&mut self);
}

/// Inbound half of an open transport
#[async_trait]
pub trait TransportSource: Send + 'static {
    /// Wait for the next inbound unit
    async fn next(&mut self) -> LinkResult<Inbound>;
}

/// Transport variant selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Raw TCP byte stream, newline-delimited
    Stream,
    /// WebSocket with native framing and keep-alive
    Framed,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => f.write_str("stream"),
            Self::Framed => f.write_str("framed"),
        }
    }
}

/// Build the connector for the configured variant
pub fn connector_for(config: &LinkConfig) -> Arc<dyn Connector> {
    match config.transport {
        TransportKind::Stream => Arc::new(StreamConnector::new()),
        TransportKind::Framed => Arc::new(FramedConnector::new(
            config.framed_path.clone(),
            config.keepalive_interval,
        )),
    }
}

/// Map an error from the open path to a connect failure
pub(crate) fn connect_error(endpoint: &Endpoint, err: impl fmt::Display) -> LinkError {
    LinkError::Connect {
        endpoint: endpoint.clone(),
        reason: err.to_string(),
    }
}
