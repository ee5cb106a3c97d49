//! Transport abstraction module
//!
//! Provides one byte-stream interface over TCP and WebSocket connections so
//! the replication handler does not care which one a client used. WebSocket
//! binary messages are concatenated into the same stream of frames a TCP
//! client would send.

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::error::{NetworkError, Result};

/// TCP transport for native clients
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Create a new TCP transport
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Read data from the stream
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream
            .read(buf)
            .await
            .map_err(|e| NetworkError::ReadError(e.to_string()).into())
    }

    /// Write all data to the stream
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.stream
            .write_all(buf)
            .await
            .map_err(|e| NetworkError::WriteError(e.to_string()).into())
    }

    /// Flush the stream
    pub async fn flush(&mut self) -> Result<()> {
        self.stream
            .flush()
            .await
            .map_err(|e| NetworkError::WriteError(e.to_string()).into())
    }

    /// Shutdown the stream
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| NetworkError::WriteError(e.to_string()).into())
    }
}

/// WebSocket transport for browser clients
pub struct WebSocketTransport {
    stream: WebSocketStream<TcpStream>,
    /// Part of the last message that did not fit the caller's buffer
    read_buffer: BytesMut,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport from an already-upgraded WebSocket stream
    pub fn new(stream: WebSocketStream<TcpStream>) -> Self {
        Self {
            stream,
            read_buffer: BytesMut::new(),
        }
    }

    /// Upgrade a TCP stream to a WebSocket connection
    pub async fn accept(stream: TcpStream) -> Result<Self> {
        let ws_stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| NetworkError::WebSocket(e.to_string()))?;

        Ok(Self::new(ws_stream))
    }

    /// Read the next data message. `None` when the peer closed.
    pub async fn read_message(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.stream.next().await {
                Some(Ok(message)) => match message {
                    Message::Binary(data) => {
                        trace!(len = data.len(), "Received binary WebSocket message");
                        return Ok(Some(data));
                    }
                    Message::Text(text) => return Ok(Some(text.into_bytes())),
                    Message::Close(_) => {
                        debug!("WebSocket close message received");
                        return Ok(None);
                    }
                    Message::Ping(data) => {
                        if let Err(e) = self.stream.send(Message::Pong(data)).await {
                            warn!(error = %e, "Failed to send pong");
                        }
                    }
                    Message::Pong(_) | Message::Frame(_) => {}
                },
                Some(Err(e)) => return Err(NetworkError::WebSocket(e.to_string()).into()),
                None => return Ok(None),
            }
        }
    }

    /// Read stream bytes into `buf`
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.read_buffer.is_empty() {
            match self.read_message().await? {
                Some(data) => self.read_buffer.extend_from_slice(&data),
                None => return Ok(0),
            }
        }

        let len = self.read_buffer.len().min(buf.len());
        buf[..len].copy_from_slice(&self.read_buffer.split_to(len));
        Ok(len)
    }

    /// Send bytes as one binary message
    pub async fn write_message(&mut self, data: &[u8]) -> Result<()> {
        trace!(len = data.len(), "Sending binary WebSocket message");
        self.stream
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| NetworkError::WebSocket(e.to_string()).into())
    }

    /// Close the WebSocket connection gracefully
    pub async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| NetworkError::WebSocket(e.to_string()).into())
    }
}

/// Unified transport enum for handling both TCP and WebSocket connections
pub enum UnifiedTransport {
    Tcp(TcpTransport),
    WebSocket(WebSocketTransport),
}

impl UnifiedTransport {
    /// Create a TCP transport
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(TcpTransport::new(stream))
    }

    /// Check if this is a WebSocket transport
    pub fn is_websocket(&self) -> bool {
        matches!(self, Self::WebSocket(_))
    }

    /// Read data from the transport. `Ok(0)` means the peer closed.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::Tcp(tcp) => tcp.read(buf).await,
            Self::WebSocket(ws) => ws.read(buf).await,
        }
    }

    /// Write all data to the transport
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Self::Tcp(tcp) => tcp.write_all(buf).await,
            Self::WebSocket(ws) => ws.write_message(buf).await,
        }
    }

    /// Flush any buffered data
    pub async fn flush(&mut self) -> Result<()> {
        match self {
            Self::Tcp(tcp) => tcp.flush().await,
            Self::WebSocket(_) => Ok(()),
        }
    }

    /// Shutdown the transport
    pub async fn shutdown(&mut self) -> Result<()> {
        match self {
            Self::Tcp(tcp) => tcp.shutdown().await,
            Self::WebSocket(ws) => ws.close().await,
        }
    }
}
