//! Framed transport
//!
//! WebSocket channel: message boundaries come from the protocol, and a ping
//! goes out every keep-alive interval. If nothing at all has been heard from
//! the vehicle between two pings the read loop fails, which catches links that
//! die silently on the wireless side.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use super::{connect_error, Connector, Endpoint, Inbound, TransportKind, TransportSink, TransportSource};
use crate::error::{LinkError, LinkResult};
use crate::link::{OutgoingMessage, Payload};

/// Default keep-alive ping interval
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(15);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = Arc<Mutex<SplitSink<WsStream, Message>>>;

/// Opens WebSocket transports
#[derive(Debug, Clone)]
pub struct FramedConnector {
    path: String,
    keepalive: Duration,
}

impl FramedConnector {
    pub fn new(path: impl Into<String>, keepalive: Duration) -> Self {
        Self {
            path: path.into(),
            keepalive,
        }
    }

    /// URL requested for `endpoint`
    pub fn url(&self, endpoint: &Endpoint) -> String {
        format!("ws://{}{}", endpoint, self.path)
    }
}

impl Default for FramedConnector {
    fn default() -> Self {
        Self::new("/", DEFAULT_KEEPALIVE)
    }
}

#[async_trait]
impl Connector for FramedConnector {
    async fn open(
        &self,
        endpoint: &Endpoint,
    ) -> LinkResult<(Box<dyn TransportSink>, Box<dyn TransportSource>)> {
        let url = self.url(endpoint);
        let (ws, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| connect_error(endpoint, e))?;

        debug!(%url, status = %response.status(), "Framed transport open");

        let (writer, reader) = ws.split();
        let writer: WsWriter = Arc::new(Mutex::new(writer));
        let liveness = Arc::new(Liveness::default());

        let keepalive = tokio::spawn(keep_alive(writer.clone(), self.keepalive, liveness.clone()));

        Ok((
            Box::new(FramedSink {
                writer,
                keepalive: Some(keepalive),
            }),
            Box::new(FramedSource {
                reader,
                liveness,
                interval: self.keepalive,
            }),
        ))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Framed
    }
}

/// Shared between the keep-alive task and the read loop
#[derive(Default)]
struct Liveness {
    /// Set when a ping goes out, cleared by any inbound frame
    awaiting: AtomicBool,
    /// Signalled when a ping goes unanswered or cannot be sent
    dead: Notify,
}

impl Liveness {
    fn heard(&self) {
        self.awaiting.store(false, Ordering::Release);
    }
}

async fn keep_alive(writer: WsWriter, interval: Duration, liveness: Arc<Liveness>) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        ticker.tick().await;

        if liveness.awaiting.swap(true, Ordering::AcqRel) {
            warn!(interval_ms = interval.as_millis() as u64, "Keep-alive ping unanswered");
            liveness.dead.notify_one();
            return;
        }

        trace!("Sending keep-alive ping");
        let ping = async { writer.lock().await.send(Message::Ping(Vec::new())).await };
        match tokio::time::timeout(interval, ping).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "Keep-alive ping failed");
                liveness.dead.notify_one();
                return;
            }
            Err(_) => {
                warn!(interval_ms = interval.as_millis() as u64, "Keep-alive ping stalled");
                liveness.dead.notify_one();
                return;
            }
        }
    }
}

/// Write half of a WebSocket transport
pub struct FramedSink {
    writer: WsWriter,
    keepalive: Option<JoinHandle<()>>,
}

#[async_trait]
impl TransportSink for FramedSink {
    async fn transmit(&mut self, message: &OutgoingMessage) -> LinkResult<()> {
        let frame = match &message.payload {
            Payload::Text(text) => Message::Text(text.clone()),
            Payload::Binary(bytes) => Message::Binary(bytes.to_vec()),
        };
        self.writer.lock().await.send(frame).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.abort();
        }

        let mut writer = self.writer.lock().await;
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "Client closing".into(),
        };
        if let Err(e) = writer.send(Message::Close(Some(frame))).await {
            debug!(error = %e, "Close frame not sent");
        }
        if let Err(e) = writer.close().await {
            debug!(error = %e, "WebSocket close failed");
        }
    }
}

impl Drop for FramedSink {
    fn drop(&mut self) {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.abort();
        }
    }
}

/// Read half of a WebSocket transport
pub struct FramedSource {
    reader: SplitStream<WsStream>,
    liveness: Arc<Liveness>,
    interval: Duration,
}

#[async_trait]
impl TransportSource for FramedSource {
    async fn next(&mut self) -> LinkResult<Inbound> {
        loop {
            let frame = tokio::select! {
                frame = self.reader.next() => frame,
                _ = self.liveness.dead.notified() => {
                    return Err(LinkError::KeepAliveTimeout(self.interval));
                }
            };

            let message = match frame {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Ok(Inbound::Closed {
                        reason: "stream ended".to_string(),
                    })
                }
            };
            self.liveness.heard();

            match message {
                Message::Text(text) => return Ok(Inbound::Message(text)),
                Message::Binary(bytes) => return Ok(Inbound::Message(to_hex(&bytes))),
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| f.reason.into_owned())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "no reason given".to_string());
                    return Ok(Inbound::Closed { reason });
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}

/// Lowercase hex rendering of a binary frame
fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
