//! Connection handler module
//!
//! Handles the lifecycle of replication connections:
//! - Connection setup (TCP or WebSocket)
//! - Frame decoding as bytes arrive
//! - Request handling against the shared authority store
//! - Idle timeout and graceful disconnection

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::error::{NetworkError, Result};
use crate::net::codec::FrameDecoder;
use crate::net::session::Session;
use crate::net::transport::{UnifiedTransport, WebSocketTransport};
use crate::protocol::messages::ClientMessage;
use crate::AppState;

/// Connection handler for processing client connections
pub struct ConnectionHandler {
    /// Shared application state
    state: Arc<AppState>,
    /// Whether this handler expects WebSocket connections
    is_websocket: bool,
}

impl ConnectionHandler {
    /// Create a new connection handler
    pub fn new(state: Arc<AppState>, is_websocket: bool) -> Self {
        Self {
            state,
            is_websocket,
        }
    }

    /// Handle a connection accepted on this handler's listener
    pub async fn handle(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        if self.is_websocket {
            self.handle_websocket(stream, addr).await
        } else {
            self.handle_tcp(stream, addr).await
        }
    }

    /// Handle a TCP connection (native client)
    pub async fn handle_tcp(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(address = %addr, "Handling TCP connection");

        stream.set_nodelay(true)?;

        let session = self.state.session_manager.create_session(addr, false)?;
        let transport = UnifiedTransport::tcp(stream);

        self.handle_connection(transport, session).await
    }

    /// Handle a WebSocket connection (browser client)
    pub async fn handle_websocket(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(address = %addr, "Handling WebSocket connection");

        stream.set_nodelay(true)?;

        let transport = UnifiedTransport::WebSocket(WebSocketTransport::accept(stream).await?);

        info!(address = %addr, "WebSocket connection established");

        let session = self.state.session_manager.create_session(addr, true)?;

        self.handle_connection(transport, session).await
    }

    /// Run a session to completion and clean up after it
    async fn handle_connection(
        &self,
        mut transport: UnifiedTransport,
        session: Arc<Session>,
    ) -> Result<()> {
        let session_id = session.id;
        debug!(
            session_id = session_id,
            address = %session.address,
            "Starting connection handler"
        );

        let result = self.process_connection(&mut transport, &session).await;

        match &result {
            Ok(()) => debug!(session_id = session_id, "Connection handler ending"),
            Err(e) if e.is_disconnect() => {
                debug!(session_id = session_id, reason = %e, "Connection closed")
            }
            Err(e) => warn!(session_id = session_id, error = %e, "Connection error"),
        }

        self.state.session_manager.remove(session_id);

        if let Err(e) = transport.shutdown().await {
            trace!(session_id = session_id, error = %e, "Error during transport shutdown");
        }

        Ok(())
    }

    /// Read frames, answer them, and write the replies back
    async fn process_connection(
        &self,
        transport: &mut UnifiedTransport,
        session: &Session,
    ) -> Result<()> {
        let config = &self.state.config;
        let idle_timeout = self.state.session_manager.max_idle_time();
        let mut decoder = FrameDecoder::new(config.max_frame_size);
        let mut read_buf = vec![0u8; config.read_buffer_size];
        let mut shutdown_rx = self.state.shutdown_tx.subscribe();

        loop {
            if !session.is_active() {
                debug!(session_id = session.id, state = %session.state(), "Session no longer active");
                return Ok(());
            }

            let read = tokio::select! {
                read = timeout(idle_timeout, transport.read(&mut read_buf)) => read,
                _ = shutdown_rx.recv() => {
                    debug!(session_id = session.id, "Shutdown signal received");
                    return Ok(());
                }
            };

            let n = read.map_err(|_| NetworkError::Timeout)??;
            if n == 0 {
                return Err(NetworkError::ConnectionClosed.into());
            }
            session.record_received(n);
            decoder.extend(&read_buf[..n]);

            // Replies to frames handled before a bad one still go out
            let mut replies = BytesMut::new();
            let answered = self.answer_frames(&mut decoder, session, &mut replies);
            if !replies.is_empty() {
                transport.write_all(&replies).await?;
                transport.flush().await?;
            }
            answered?;
        }
    }

    /// Answer every complete frame in the decoder into `replies`; partial
    /// frames stay buffered. On error, `replies` holds the answers to every
    /// frame before the failing one.
    fn answer_frames(
        &self,
        decoder: &mut FrameDecoder,
        session: &Session,
        replies: &mut BytesMut,
    ) -> Result<()> {
        while let Some(frame) = decoder.next_frame()? {
            let message = ClientMessage::decode(&frame)?;
            trace!(
                session_id = session.id,
                entity_id = %message.entity_id(),
                message_type = %message.message_type(),
                "Request received"
            );

            let reply = self.state.store.lock().handle(message)?;
            reply.encode(replies)?;
            session.record_request();
        }

        Ok(())
    }
}
