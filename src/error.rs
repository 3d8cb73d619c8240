//! Link error types

use std::time::Duration;
use thiserror::Error;

use crate::transport::Endpoint;

/// Errors produced by transports and the connection manager
#[derive(Debug, Error)]
pub enum LinkError {
    /// Endpoint unreachable, refused, or handshake rejected
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: Endpoint, reason: String },

    /// Transport did not open within the connect timeout
    #[error("timed out connecting to {endpoint} after {timeout:?}")]
    ConnectTimeout { endpoint: Endpoint, timeout: Duration },

    /// Mid-session read or write failure on the stream variant
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Mid-session failure on the framed variant
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// No inbound frame arrived between two keep-alive pings
    #[error("keep-alive ping unanswered within {0:?}")]
    KeepAliveTimeout(Duration),

    /// A write did not finish within the write timeout
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),

    /// Inbound line longer than the stream transport accepts
    #[error("inbound line exceeds {0} bytes")]
    LineTooLong(usize),

    /// Outbound payload embeds the stream delimiter
    #[error("payload must not contain a line break on a stream transport")]
    EmbeddedDelimiter,

    /// A write was interrupted by a local stop
    #[error("link stopped")]
    Stopped,
}

impl LinkError {
    /// True for failures raised while opening a transport
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::ConnectTimeout { .. })
    }
}

pub type LinkResult<T> = Result<T, LinkError>;
