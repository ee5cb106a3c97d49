//! Session management module
//!
//! Tracks the replication connections the server is currently serving:
//! - Session lifecycle (creation, tracking, cleanup)
//! - Per-session counters for the management API
//! - Per-IP connection limits
//! - Idle detection

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{NetworkError, Result};

/// Unique session identifier
pub type SessionId = u64;

/// Session state in the connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Connected, nothing received yet
    Connected,
    /// At least one request handled
    Replicating,
    /// Session is disconnecting
    Disconnecting,
    /// Session has been disconnected
    Disconnected,
}

impl SessionState {
    /// Check if the session is still active (not disconnecting/disconnected)
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            SessionState::Disconnecting | SessionState::Disconnected
        )
    }

    /// Get a human-readable name for the state
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Connected => "Connected",
            SessionState::Replicating => "Replicating",
            SessionState::Disconnecting => "Disconnecting",
            SessionState::Disconnected => "Disconnected",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A connected replication client
pub struct Session {
    /// Unique session identifier
    pub id: SessionId,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Current session state
    state: RwLock<SessionState>,
    /// Whether this is a WebSocket connection
    pub is_websocket: bool,
    /// Time of session creation
    pub created_at: Instant,
    /// Time of last activity
    last_activity: RwLock<Instant>,
    /// Requests answered on this connection
    requests: AtomicU64,
    /// Bytes received on this connection
    bytes_received: AtomicU64,
}

impl Session {
    /// Create a new session
    pub fn new(id: SessionId, address: SocketAddr, is_websocket: bool) -> Self {
        let now = Instant::now();
        Self {
            id,
            address,
            state: RwLock::new(SessionState::Connected),
            is_websocket,
            created_at: now,
            last_activity: RwLock::new(now),
            requests: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    /// Get the IP address as a string (without port)
    pub fn ip(&self) -> String {
        self.address.ip().to_string()
    }

    /// Get the current session state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Set the session state
    pub fn set_state(&self, new_state: SessionState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };
        if old_state != new_state {
            debug!(
                session_id = self.id,
                old_state = %old_state,
                new_state = %new_state,
                "Session state changed"
            );
        }
    }

    /// Check if session is active
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Record a handled request
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if self.state() == SessionState::Connected {
            self.set_state(SessionState::Replicating);
        }
    }

    /// Record received bytes and refresh the activity timestamp
    pub fn record_received(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.touch();
    }

    /// Requests answered so far
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Bytes received so far
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Update the last activity timestamp
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Get the last activity time
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.read()
    }

    /// Get the duration since last activity
    pub fn idle_duration(&self) -> Duration {
        self.last_activity().elapsed()
    }

    /// Check if the session has been idle too long
    pub fn is_idle(&self, max_idle: Duration) -> bool {
        self.idle_duration() > max_idle
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .field("is_websocket", &self.is_websocket)
            .field("requests", &self.requests())
            .field("idle_duration", &self.idle_duration())
            .finish()
    }
}

/// Thread-safe session manager
pub struct SessionManager {
    /// Map of session ID to session
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Map of IP address to list of session IDs (for connection limiting)
    ip_to_sessions: DashMap<String, Vec<SessionId>>,
    /// Next session ID to assign
    next_id: AtomicU64,
    /// Maximum sessions per IP
    max_per_ip: usize,
    /// Maximum idle time before disconnect
    max_idle_time: Duration,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self::with_limits(32, 300)
    }

    /// Create a session manager with custom limits
    pub fn with_limits(max_per_ip: usize, max_idle_secs: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            ip_to_sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            max_per_ip,
            max_idle_time: Duration::from_secs(max_idle_secs),
        }
    }

    /// Maximum idle time before a session is dropped
    pub fn max_idle_time(&self) -> Duration {
        self.max_idle_time
    }

    /// Create a new session and register it
    pub fn create_session(&self, address: SocketAddr, is_websocket: bool) -> Result<Arc<Session>> {
        let ip = address.ip().to_string();

        // Check connection limit per IP
        let current_count = self.ip_to_sessions.get(&ip).map(|v| v.len()).unwrap_or(0);
        if current_count >= self.max_per_ip {
            warn!(
                ip = %ip,
                count = current_count,
                max = self.max_per_ip,
                "Connection limit exceeded for IP"
            );
            return Err(NetworkError::TooManyConnections(ip).into());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session::new(id, address, is_websocket));

        self.sessions.insert(id, session.clone());
        self.ip_to_sessions.entry(ip).or_default().push(id);

        info!(
            session_id = id,
            address = %address,
            is_websocket = is_websocket,
            "Session created"
        );

        Ok(session)
    }

    /// Get a session by ID
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|r| r.clone())
    }

    /// Remove a session
    pub fn remove(&self, id: SessionId) {
        if let Some((_, session)) = self.sessions.remove(&id) {
            session.set_state(SessionState::Disconnected);

            let ip = session.ip();
            if let Some(mut sessions) = self.ip_to_sessions.get_mut(&ip) {
                sessions.retain(|&sid| sid != id);
            }
            self.ip_to_sessions.retain(|_, v| !v.is_empty());

            info!(
                session_id = id,
                requests = session.requests(),
                bytes_received = session.bytes_received(),
                "Session removed"
            );
        }
    }

    /// Ask a session's handler to stop. The handler removes it on exit.
    pub fn disconnect(&self, id: SessionId) {
        if let Some(session) = self.get(id) {
            session.set_state(SessionState::Disconnecting);
        }
    }

    /// Disconnect all sessions
    pub fn disconnect_all(&self) {
        for id in self.session_ids() {
            self.disconnect(id);
        }
    }

    /// Get the count of active sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Get the count of sessions per state
    pub fn count_by_state(&self) -> HashMap<SessionState, usize> {
        let mut counts = HashMap::new();
        for session in self.sessions.iter() {
            *counts.entry(session.state()).or_insert(0) += 1;
        }
        counts
    }

    /// Get list of all session IDs
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|r| *r.key()).collect()
    }

    /// Mark idle sessions for disconnect. Returns how many were marked.
    pub fn cleanup_idle(&self) -> usize {
        let mut to_disconnect = Vec::new();

        for session in self.sessions.iter() {
            if session.is_idle(self.max_idle_time) && session.is_active() {
                debug!(
                    session_id = session.id,
                    idle_duration = ?session.idle_duration(),
                    "Session idle timeout"
                );
                to_disconnect.push(session.id);
            }
        }

        for id in &to_disconnect {
            self.disconnect(*id);
        }
        to_disconnect.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
