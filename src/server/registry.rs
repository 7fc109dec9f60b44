//! Session registry and per-session state.
//!
//! Sessions are kept in insertion order and identified by ids drawn from a
//! monotonically increasing counter, so an id is never reused for a later
//! session. Removal is deferred: service code marks a session `Closed` and
//! the server sweeps marked sessions out between cycles, never while the
//! registry is being iterated.

use bytes::BytesMut;
use mio::net::UnixStream;
use socket2::SockAddr;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, greeting not yet written.
    Handshaking,
    /// Greeted and serving commands.
    Active,
    /// Marked for removal at the next sweep.
    Closed,
}

/// A single client session.
#[derive(Debug)]
pub struct ClientSession {
    /// Registry-assigned id, unique for the lifetime of the server.
    pub id: u64,
    /// Non-blocking stream to the client.
    pub stream: UnixStream,
    /// Peer address as reported by accept. Unix clients that never bind
    /// show up unnamed.
    pub peer: SockAddr,
    /// Inbound bytes not yet consumed as frames.
    pub buf: BytesMut,
    /// Current lifecycle state.
    pub state: SessionState,
}

impl ClientSession {
    /// Create a new session awaiting its greeting.
    fn new(id: u64, stream: UnixStream, peer: SockAddr) -> Self {
        Self {
            id,
            stream,
            peer,
            buf: BytesMut::new(),
            state: SessionState::Handshaking,
        }
    }

    /// Transition to serving commands.
    pub fn activate(&mut self) {
        self.state = SessionState::Active;
    }

    /// Mark the session for removal at the next sweep.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }
}

/// Registry of live sessions in insertion order.
pub struct SessionRegistry {
    sessions: Vec<ClientSession>,
    next_id: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Vec::new(),
            next_id: 1,
        }
    }

    /// Insert a new session and return its id.
    pub fn add(&mut self, stream: UnixStream, peer: SockAddr) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.sessions.push(ClientSession::new(id, stream, peer));
        id
    }

    pub fn get(&self, id: u64) -> Option<&ClientSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut ClientSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    /// Remove a session immediately.
    ///
    /// Only for sessions that never reached the poller; anything that
    /// has been registered is marked `Closed` and swept instead.
    pub fn remove(&mut self, id: u64) -> Option<ClientSession> {
        let pos = self.sessions.iter().position(|s| s.id == id)?;
        Some(self.sessions.remove(pos))
    }

    /// Remove every session marked `Closed`, preserving the order of the
    /// rest. The removed sessions are handed back so the caller can
    /// deregister their streams before dropping them.
    pub fn sweep_closed(&mut self) -> Vec<ClientSession> {
        let mut swept = Vec::new();
        let mut i = 0;
        while i < self.sessions.len() {
            if self.sessions[i].is_closed() {
                swept.push(self.sessions.remove(i));
            } else {
                i += 1;
            }
        }
        swept
    }

    /// Drain every session, for final teardown.
    pub fn drain_all(&mut self) -> Vec<ClientSession> {
        std::mem::take(&mut self.sessions)
    }

    /// Iterate over sessions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ClientSession> {
        self.sessions.iter()
    }

    /// Iterate over sessions mutably in insertion order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientSession> {
        self.sessions.iter_mut()
    }

    /// Number of live sessions, marked ones included until swept.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
