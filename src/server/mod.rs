//! Single-threaded multi-session server.
//!
//! One loop owns everything: the listener, the poller, and the session
//! registry. With no sessions connected the loop parks in a blocking
//! accept; once at least one session exists it switches the listener to
//! non-blocking and runs short poll cycles over the listener and every
//! session stream. An interrupt sets a flag, and the loop runs the one
//! teardown path: close sessions, close the listener, unlink the socket
//! file.

pub mod listener;
pub mod poller;
pub mod registry;
pub mod session;

use crate::config::Config;
use listener::Listener;
use mio::net::UnixStream;
use poller::{Poller, ReadySet};
use registry::SessionRegistry;
use session::CloseReason;
use socket2::SockAddr;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Errors that prevent the server from starting.
#[derive(Debug)]
pub enum StartupError {
    Create(io::Error),
    Bind(PathBuf, io::Error),
    Listen(PathBuf, io::Error),
    Poller(io::Error),
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartupError::Create(e) => {
                write!(f, "Failed to create server socket: {}", e)
            }
            StartupError::Bind(path, e) if e.kind() == io::ErrorKind::AddrInUse => {
                write!(
                    f,
                    "Failed to bind '{}': {}; if no server is running there, remove the stale socket file",
                    path.display(),
                    e
                )
            }
            StartupError::Bind(path, e) => {
                write!(f, "Failed to bind '{}': {}", path.display(), e)
            }
            StartupError::Listen(path, e) => {
                write!(f, "Failed to listen on '{}': {}", path.display(), e)
            }
            StartupError::Poller(e) => {
                write!(f, "Failed to initialize poller: {}", e)
            }
        }
    }
}

impl std::error::Error for StartupError {}

/// The server context: every piece of state the loop touches.
pub struct Server {
    listener: Listener,
    poller: Poller,
    registry: SessionRegistry,
    shutdown: Arc<AtomicBool>,
    /// Read buffer shared by every session; its length is the frame
    /// size bound.
    scratch: Vec<u8>,
    poll_timeout: Duration,
    idle_wait: Duration,
}

impl Server {
    /// Bind the socket and prepare the poller. The socket file must not
    /// already exist; a stale one from an unclean exit has to be removed
    /// by the operator.
    pub fn bind(config: &Config) -> Result<Self, StartupError> {
        let listener = Listener::bind(&config.socket, config.backlog)?;
        let poller = Poller::new().map_err(StartupError::Poller)?;
        poller
            .register_listener(&listener)
            .map_err(StartupError::Poller)?;

        Ok(Self {
            listener,
            poller,
            registry: SessionRegistry::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            scratch: vec![0; config.frame_size],
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            idle_wait: Duration::from_millis(config.idle_wait_ms),
        })
    }

    /// Flag that stops the loop. Hand a clone to the interrupt handler,
    /// or store `true` from anywhere to request shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn socket_path(&self) -> &Path {
        self.listener.path()
    }

    /// Serve until the shutdown flag is set, then tear down. Consumes the
    /// server; the socket file is gone when this returns.
    pub fn run(mut self) -> io::Result<()> {
        info!(path = %self.listener.path().display(), "Server started");

        let result = self.serve();
        if let Err(ref e) = result {
            error!(error = %e, "Server loop failed");
        }

        self.teardown();
        result
    }

    fn serve(&mut self) -> io::Result<()> {
        while !self.shutdown.load(Ordering::Relaxed) {
            if self.registry.is_empty() {
                self.wait_for_first_session()?;
            } else {
                self.poll_cycle()?;
            }
        }
        info!("Interrupt received");
        Ok(())
    }

    /// Empty-registry regime: park in a blocking accept.
    ///
    /// This is the only place the server suspends indefinitely. An
    /// interrupt lands as EINTR, returns control, and the loop condition
    /// picks the flag up.
    fn wait_for_first_session(&mut self) -> io::Result<()> {
        self.listener.set_nonblocking(false)?;
        info!("No sessions connected, blocking on accept");

        // A signal that lands between the loop's flag check and entry
        // into accept(2) does not interrupt the call; the flag is seen
        // once the accept next returns.
        match self.listener.accept_next() {
            Ok(Some((stream, peer))) => {
                self.admit(stream, peer);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => {
                error!("Accept error: {}", e);
                // Keep serving, but do not spin if the fault persists.
                std::thread::sleep(self.idle_wait);
                Ok(())
            }
        }
    }

    /// Occupied-registry regime: one short poll cycle over the listener
    /// and every session, listener first, sessions in insertion order.
    fn poll_cycle(&mut self) -> io::Result<()> {
        self.listener.set_nonblocking(true)?;

        let ready = self.poller.poll_ready(self.poll_timeout)?;
        if ready.is_empty() {
            std::thread::sleep(self.idle_wait);
            return Ok(());
        }

        if ready.listener_ready() {
            self.accept_pending();
        }
        self.service_ready(&ready);
        self.sweep();
        Ok(())
    }

    /// Drain the accept queue. The poller is edge-triggered, so stopping
    /// before `WouldBlock` could leave connections pending with no
    /// further readiness event to announce them.
    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept_next() {
                Ok(Some((stream, peer))) => self.admit(stream, peer),
                Ok(None) => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => break,
                Err(e) => {
                    error!("Accept error: {}", e);
                    break;
                }
            }
        }
    }

    /// Register a new session: assign its id, greet it, and put its
    /// stream under the poller. Sessions admitted during this cycle are
    /// polled from the next cycle on.
    fn admit(&mut self, stream: UnixStream, peer: SockAddr) {
        let id = self.registry.add(stream, peer);

        let poller = &self.poller;
        let result = match self.registry.get_mut(id) {
            Some(session) => match session::greet(session) {
                Ok(()) => match poller.register_session(session) {
                    Ok(()) => {
                        info!(session = id, peer = ?session.peer, "Session admitted");
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            },
            None => return,
        };

        if let Err(e) = result {
            warn!(session = id, error = %e, "Session setup failed");
            self.registry.remove(id);
        }
    }

    /// Service every session the cycle reported readable. Sessions that
    /// have to go are only marked here; the sweep removes them once the
    /// scan is over.
    fn service_ready(&mut self, ready: &ReadySet) {
        let scratch = &mut self.scratch;
        for session in self.registry.iter_mut() {
            if session.is_closed() || !ready.contains(session.id) {
                continue;
            }
            if let Some(reason) = session::service_readable(session, scratch) {
                session.close();
                match reason {
                    CloseReason::Quit => debug!(session = session.id, "Session quit"),
                    CloseReason::Eof => debug!(session = session.id, "Session EOF"),
                    CloseReason::OversizeFrame => {
                        warn!(
                            session = session.id,
                            frame_size = scratch.len(),
                            "Frame exceeded limit, dropping session"
                        )
                    }
                    CloseReason::Read(e) => {
                        warn!(session = session.id, error = %e, "Read failed, dropping session")
                    }
                    CloseReason::Write(e) => {
                        warn!(session = session.id, error = %e, "Reply write failed, dropping session")
                    }
                }
            }
        }
    }

    /// Remove marked sessions. Emptying the registry here is what flips
    /// the next cycle back to the blocking-accept regime.
    fn sweep(&mut self) {
        for mut session in self.registry.sweep_closed() {
            let _ = self.poller.deregister_session(&mut session);
            info!(session = session.id, "Session removed");
        }
    }

    /// The one teardown path, shared by interrupt and loop failure:
    /// close every session, close the listener, unlink the socket file.
    fn teardown(self) {
        let Server {
            listener,
            poller,
            mut registry,
            ..
        } = self;

        info!(sessions = registry.len(), "Shutting down");
        for mut session in registry.drain_all() {
            let _ = poller.deregister_session(&mut session);
            debug!(session = session.id, "Session closed");
        }

        let _ = poller.deregister_listener(&listener);
        let path = listener.path().to_owned();
        match listener.close_and_unlink() {
            Ok(()) => info!(path = %path.display(), "Listener closed, socket file removed"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Socket file could not be removed")
            }
        }
    }
}
