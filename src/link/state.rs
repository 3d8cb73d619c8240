//! Link state and failure classification

use std::fmt;

use crate::error::LinkError;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport; a reconnect may be armed
    Disconnected,
    /// A transport open is in flight
    Connecting,
    /// Transport open and ready
    Connected,
    /// Local stop in progress
    Closing,
}

impl ConnectionState {
    /// True while a connect attempt or live transport exists
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Why the link left `Connecting` or `Connected`
#[derive(Debug)]
pub enum DisconnectCause {
    /// Transport could not be opened
    ConnectFailure(LinkError),
    /// Read or write failed mid-session
    TransientIo(LinkError),
    /// Remote end closed cleanly
    ProtocolClose(String),
    /// Local `stop()`
    ManualClose,
}

impl DisconnectCause {
    /// Classify an error raised on the open path or on a live transport
    pub fn from_error(err: LinkError) -> Self {
        if err.is_connect_failure() {
            Self::ConnectFailure(err)
        } else {
            Self::TransientIo(err)
        }
    }

    /// Status narration for the subscriber
    pub fn status_text(&self) -> String {
        match self {
            Self::ConnectFailure(e) => format!("Connection failed: {}", e),
            Self::TransientIo(e) => format!("Error: {}", e),
            Self::ProtocolClose(reason) => format!("Closed: {}", reason),
            Self::ManualClose => "Stopped".to_string(),
        }
    }

    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::ConnectFailure(_) => "connect_failure",
            Self::TransientIo(_) => "transient_io",
            Self::ProtocolClose(_) => "protocol_close",
            Self::ManualClose => "manual_close",
        }
    }
}
