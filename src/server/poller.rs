//! Readiness polling.
//!
//! One `Poll` instance watches the listener and every session stream.
//! The listener sits under a reserved token; session tokens carry the
//! session id. Each cycle produces a `ReadySet` snapshot, so admissions
//! and removals made while servicing it take effect the following cycle.

use super::listener::Listener;
use super::registry::ClientSession;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

const LISTENER_TOKEN: Token = Token(usize::MAX);

const EVENT_CAPACITY: usize = 1024;

/// Poll instance plus its reusable event buffer.
pub struct Poller {
    poll: Poll,
    events: Events,
}

/// Snapshot of what fired during one poll cycle.
#[derive(Debug, Default)]
pub struct ReadySet {
    listener: bool,
    sessions: Vec<u64>,
}

impl ReadySet {
    pub fn listener_ready(&self) -> bool {
        self.listener
    }

    pub fn contains(&self, id: u64) -> bool {
        self.sessions.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        !self.listener && self.sessions.is_empty()
    }
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
        })
    }

    /// Watch the listener for pending connections.
    ///
    /// The listener is not a mio type, so its raw fd is registered
    /// through `SourceFd`.
    pub fn register_listener(&self, listener: &Listener) -> io::Result<()> {
        let fd = listener.as_raw_fd();
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), LISTENER_TOKEN, Interest::READABLE)
    }

    pub fn deregister_listener(&self, listener: &Listener) -> io::Result<()> {
        let fd = listener.as_raw_fd();
        self.poll.registry().deregister(&mut SourceFd(&fd))
    }

    /// Watch a session stream under its session id.
    pub fn register_session(&self, session: &mut ClientSession) -> io::Result<()> {
        self.poll.registry().register(
            &mut session.stream,
            Token(session.id as usize),
            Interest::READABLE,
        )
    }

    pub fn deregister_session(&self, session: &mut ClientSession) -> io::Result<()> {
        self.poll.registry().deregister(&mut session.stream)
    }

    /// Run one poll cycle and snapshot the results.
    ///
    /// EINTR comes back as an empty set rather than an error; the server
    /// loop re-checks the interrupt flag on every cycle anyway.
    pub fn poll_ready(&mut self, timeout: Duration) -> io::Result<ReadySet> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                return Ok(ReadySet::default());
            }
            Err(e) => return Err(e),
        }

        let mut ready = ReadySet::default();
        for event in self.events.iter() {
            match event.token() {
                LISTENER_TOKEN => ready.listener = true,
                Token(id) => ready.sessions.push(id as u64),
            }
        }
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::super::registry::SessionRegistry;
    use super::*;
    use socket2::SockAddr;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn temp_socket_path(tag: &str) -> PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("muxd-poller-{}-{}-{}", tag, std::process::id(), n))
    }

    #[test]
    fn test_empty_cycle() {
        let mut poller = Poller::new().unwrap();
        let ready = poller.poll_ready(Duration::from_millis(0)).unwrap();
        assert!(ready.is_empty());
        assert!(!ready.listener_ready());
        assert!(!ready.contains(1));
    }

    #[test]
    fn test_listener_readiness() {
        let path = temp_socket_path("listener");
        let mut listener = Listener::bind(&path, 10).unwrap();
        listener.set_nonblocking(true).unwrap();

        let mut poller = Poller::new().unwrap();
        poller.register_listener(&listener).unwrap();

        let _client = std::os::unix::net::UnixStream::connect(&path).unwrap();
        let ready = poller.poll_ready(Duration::from_millis(200)).unwrap();
        assert!(ready.listener_ready());

        poller.deregister_listener(&listener).unwrap();
        listener.close_and_unlink().unwrap();
    }

    #[test]
    fn test_session_readiness() {
        let (server_end, mut client_end) = mio::net::UnixStream::pair().unwrap();
        let mut registry = SessionRegistry::new();
        let id = registry.add(server_end, SockAddr::unix("").unwrap());

        let mut poller = Poller::new().unwrap();
        poller
            .register_session(registry.get_mut(id).unwrap())
            .unwrap();

        client_end.write_all(b"ping\0").unwrap();
        let ready = poller.poll_ready(Duration::from_millis(200)).unwrap();
        assert!(ready.contains(id));
        assert!(!ready.listener_ready());

        poller
            .deregister_session(registry.get_mut(id).unwrap())
            .unwrap();
    }

    #[test]
    fn test_registration_lands_in_next_cycle() {
        let (server_end, mut client_end) = mio::net::UnixStream::pair().unwrap();
        let mut registry = SessionRegistry::new();
        let first = registry.add(server_end, SockAddr::unix("").unwrap());

        let mut poller = Poller::new().unwrap();
        poller
            .register_session(registry.get_mut(first).unwrap())
            .unwrap();

        client_end.write_all(b"one\0").unwrap();
        let ready = poller.poll_ready(Duration::from_millis(200)).unwrap();
        assert!(ready.contains(first));

        // A stream that is already readable when it is registered joins
        // the following cycle's snapshot, not the one in hand.
        let (second_end, mut second_client) = mio::net::UnixStream::pair().unwrap();
        second_client.write_all(b"two\0").unwrap();
        let second = registry.add(second_end, SockAddr::unix("").unwrap());
        poller
            .register_session(registry.get_mut(second).unwrap())
            .unwrap();
        assert!(!ready.contains(second));

        let next = poller.poll_ready(Duration::from_millis(200)).unwrap();
        assert!(next.contains(second));

        poller
            .deregister_session(registry.get_mut(first).unwrap())
            .unwrap();
        poller
            .deregister_session(registry.get_mut(second).unwrap())
            .unwrap();
    }
}
