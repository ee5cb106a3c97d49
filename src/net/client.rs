//! Async client driver
//!
//! Connects a [`ReplicaClient`] to a server over TCP. The game loop can call
//! [`ReplicaConnection::poll`] once per tick, which only consumes bytes that
//! have already arrived, or await [`ReplicaConnection::recv`] when it has
//! nothing better to do.

use std::io::ErrorKind;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, trace};

use crate::config::ClientConfig;
use crate::error::{NetworkError, Result};
use crate::replication::client::ReplicaClient;
use crate::replication::types::TypeRegistry;

/// A replication client bound to a TCP connection
pub struct ReplicaConnection {
    stream: TcpStream,
    client: ReplicaClient,
    read_buf: Vec<u8>,
}

impl ReplicaConnection {
    /// Connect to the server named in `config`
    pub async fn connect(config: &ClientConfig, types: Arc<TypeRegistry>) -> Result<Self> {
        let address = config.address();
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|e| NetworkError::InvalidAddress(format!("{}: {}", address, e)))?;
        stream.set_nodelay(true)?;

        info!(address = %address, "Connected to replication server");

        Ok(Self {
            stream,
            client: match config.max_frame_size {
                Some(max_frame_size) => ReplicaClient::with_max_frame_size(types, max_frame_size),
                None => ReplicaClient::new(types),
            },
            read_buf: vec![0u8; config.read_buffer_size.max(1)],
        })
    }

    /// The replica manager
    pub fn client(&self) -> &ReplicaClient {
        &self.client
    }

    /// The replica manager, mutably; requests it queues go out on the next flush
    pub fn client_mut(&mut self) -> &mut ReplicaClient {
        &mut self.client
    }

    /// Send every queued request
    pub async fn flush(&mut self) -> Result<()> {
        if !self.client.has_outbound() {
            return Ok(());
        }
        let outbound = self.client.take_outbound();
        trace!(len = outbound.len(), "Sending requests");
        self.stream
            .write_all(&outbound)
            .await
            .map_err(|e| NetworkError::WriteError(e.to_string()))?;
        Ok(())
    }

    /// Flush, then apply whatever replies are already readable without waiting.
    /// Returns the number of replies applied; zero means nothing to do this tick.
    pub async fn poll(&mut self) -> Result<usize> {
        self.flush().await?;

        let mut applied = 0;
        loop {
            match self.stream.try_read(&mut self.read_buf) {
                Ok(0) => return Err(NetworkError::ConnectionClosed.into()),
                Ok(n) => applied += self.client.receive(&self.read_buf[..n])?,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(NetworkError::ReadError(e.to_string()).into()),
            }
        }
        Ok(applied)
    }

    /// Flush, then wait until at least one reply has been applied
    pub async fn recv(&mut self) -> Result<usize> {
        self.flush().await?;

        loop {
            self.stream
                .readable()
                .await
                .map_err(|e| NetworkError::ReadError(e.to_string()))?;
            let applied = self.poll().await?;
            if applied > 0 {
                return Ok(applied);
            }
        }
    }

    /// Keep receiving until `done` holds for the client
    pub async fn recv_until<F>(&mut self, done: F) -> Result<()>
    where
        F: Fn(&ReplicaClient) -> bool,
    {
        while !done(&self.client) {
            self.recv().await?;
        }
        Ok(())
    }

    /// Close the connection
    pub async fn shutdown(mut self) -> Result<()> {
        self.flush().await?;
        self.stream
            .shutdown()
            .await
            .map_err(|e| NetworkError::WriteError(e.to_string()))?;
        debug!("Replication connection closed");
        Ok(())
    }
}
