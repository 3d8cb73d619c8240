//! Stream transport
//!
//! Raw TCP byte stream carrying newline-delimited text. There is no liveness
//! check; a closed stream or a read/write error is the only loss signal.
//! Inbound bytes that are not valid UTF-8 are replaced, not rejected.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use super::{connect_error, Connector, Endpoint, Inbound, TransportKind, TransportSink, TransportSource};
use crate::error::{LinkError, LinkResult};
use crate::link::OutgoingMessage;
use crate::util::create_control_socket;

const DELIMITER: u8 = b'\n';

/// Longest inbound line accepted, delimiter excluded
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Opens newline-delimited TCP transports
#[derive(Debug, Default, Clone)]
pub struct StreamConnector;

impl StreamConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for StreamConnector {
    async fn open(
        &self,
        endpoint: &Endpoint,
    ) -> LinkResult<(Box<dyn TransportSink>, Box<dyn TransportSource>)> {
        let addr = endpoint
            .resolve()
            .await
            .map_err(|e| connect_error(endpoint, e))?;

        let socket = create_control_socket(addr).map_err(|e| connect_error(endpoint, e))?;
        let stream = socket
            .connect(addr)
            .await
            .map_err(|e| connect_error(endpoint, e))?;

        debug!(%endpoint, %addr, "Stream transport open");

        let (read_half, write_half) = stream.into_split();
        Ok((
            Box::new(StreamSink { writer: write_half }),
            Box::new(StreamSource::new(read_half)),
        ))
    }

    fn validate(&self, message: &OutgoingMessage) -> LinkResult<()> {
        if message
            .payload
            .as_bytes()
            .iter()
            .any(|b| *b == DELIMITER || *b == b'\r')
        {
            return Err(LinkError::EmbeddedDelimiter);
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }
}

/// Write half of a stream transport
pub struct StreamSink {
    writer: OwnedWriteHalf,
}

#[async_trait]
impl TransportSink for StreamSink {
    async fn transmit(&mut self, message: &OutgoingMessage) -> LinkResult<()> {
        let payload = message.payload.as_bytes();
        let mut line = Vec::with_capacity(payload.len() + 1);
        line.extend_from_slice(payload);
        line.push(DELIMITER);

        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!(error = %e, "Stream shutdown failed");
        }
    }
}

/// Read half of a stream transport
pub struct StreamSource {
    reader: BufReader<OwnedReadHalf>,
    line: Vec<u8>,
}

impl StreamSource {
    fn new(read_half: OwnedReadHalf) -> Self {
        Self {
            reader: BufReader::new(read_half),
            line: Vec::new(),
        }
    }
}

#[async_trait]
impl TransportSource for StreamSource {
    async fn next(&mut self) -> LinkResult<Inbound> {
        self.line.clear();
        let read = (&mut self.reader)
            .take(MAX_LINE_LEN as u64 + 1)
            .read_until(DELIMITER, &mut self.line)
            .await?;
        if read == 0 {
            return Ok(Inbound::Closed {
                reason: "end of stream".to_string(),
            });
        }

        if self.line.last() == Some(&DELIMITER) {
            self.line.pop();
            if self.line.last() == Some(&b'\r') {
                self.line.pop();
            }
        } else if self.line.len() > MAX_LINE_LEN {
            return Err(LinkError::LineTooLong(MAX_LINE_LEN));
        }
        // Otherwise a final unterminated line before end of stream

        Ok(Inbound::Message(String::from_utf8_lossy(&self.line).into_owned()))
    }
}
